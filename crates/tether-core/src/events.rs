// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Binding lifecycle events and listener registration.

use std::rc::Rc;

use tether_stream::EventState;

use crate::binding::Progress;
use crate::error::BindError;
use crate::ident::{BindingId, SessionId};

/// Lifecycle events surfaced by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Session started (`begin`).
    Bind,
    /// Markup resolved.
    SetMarkup,
    /// Token values resolved.
    SetBindings,
    /// Markup populated with values.
    PopulateMarkup,
    /// Child sessions about to start.
    BindChildren,
    /// Every child session reached a terminal state.
    ChildrenBound,
    /// Session finished and nodes are attached.
    Bound,
    /// Session failed; fires once, before completion.
    Error,
}

/// Payload handed to listeners.
#[derive(Debug, Clone)]
pub struct BindEvent {
    /// Which event.
    pub kind: EventKind,
    /// Binding the session belongs to.
    pub binding: BindingId,
    /// Session that fired the event.
    pub session: SessionId,
    /// Binding progress when the event fired.
    pub progress: Progress,
    /// Failure reason for [`EventKind::Error`].
    pub error: Option<BindError>,
}

/// Event listener. The [`EventState`] lets a listener cancel, pause, or stop
/// propagation to the listeners after it.
pub type Listener = Rc<dyn Fn(&BindEvent, &mut EventState)>;

/// Listener list filtered by kind.
#[derive(Default, Clone)]
pub struct Listeners {
    entries: Vec<(EventKind, Listener)>,
}

impl core::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

impl Listeners {
    /// Registers `listener` for `kind`.
    pub fn add(&mut self, kind: EventKind, listener: Listener) {
        self.entries.push((kind, listener));
    }

    /// Listeners registered for `kind`, in registration order.
    pub fn for_kind(&self, kind: EventKind) -> Vec<Listener> {
        self.entries
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, l)| Rc::clone(l))
            .collect()
    }

    /// Removes every listener.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Invokes the listeners for `event.kind` until one calls `stop`.
    pub fn emit(&self, event: &BindEvent, state: &mut EventState) {
        for listener in self.for_kind(event.kind) {
            if state.is_stopped() {
                break;
            }
            listener(event, state);
        }
    }
}
