// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event and callback recorders.

use std::cell::RefCell;
use std::rc::Rc;

use tether_core::{BindEvent, Binding, BindingId, Completion, EventKind, EventState};

/// Records every event it is registered for.
#[derive(Clone, Default)]
pub struct EventRecorder {
    seen: Rc<RefCell<Vec<BindEvent>>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A listener appending to this recorder.
    pub fn listener(&self) -> impl Fn(&BindEvent, &mut EventState) + 'static {
        let seen = Rc::clone(&self.seen);
        move |event, _| seen.borrow_mut().push(event.clone())
    }

    /// Every recorded event, in firing order.
    pub fn events(&self) -> Vec<BindEvent> {
        self.seen.borrow().clone()
    }

    /// Kinds fired for `binding`, in order.
    pub fn kinds_for(&self, binding: BindingId) -> Vec<EventKind> {
        self.seen
            .borrow()
            .iter()
            .filter(|e| e.binding == binding)
            .map(|e| e.kind)
            .collect()
    }

    /// Number of `kind` events recorded.
    pub fn count(&self, kind: EventKind) -> usize {
        self.seen.borrow().iter().filter(|e| e.kind == kind).count()
    }

    /// Bindings that fired at least one event.
    pub fn bindings(&self) -> Vec<BindingId> {
        let mut out: Vec<BindingId> = self.seen.borrow().iter().map(|e| e.binding).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }
}

/// Records completion callbacks as `(label, completion)` pairs.
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    calls: Rc<RefCell<Vec<(String, Completion)>>>,
}

impl CallbackRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that records `label` with the binding's completion.
    pub fn callback(&self, label: &str) -> impl FnOnce(&Binding) + 'static {
        let calls = Rc::clone(&self.calls);
        let label = label.to_owned();
        move |binding| calls.borrow_mut().push((label, binding.completion()))
    }

    /// Labels in firing order.
    pub fn labels(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(l, _)| l.clone()).collect()
    }

    /// Every `(label, completion)` pair in firing order.
    pub fn calls(&self) -> Vec<(String, Completion)> {
        self.calls.borrow().clone()
    }

    /// Completion recorded for `label`, if its callback fired.
    pub fn completion_of(&self, label: &str) -> Option<Completion> {
        self.calls
            .borrow()
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| *c)
    }
}
