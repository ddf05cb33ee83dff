// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Binding handles: identity, options, listeners, progress, and state.

use tether_dom::NodeId;

use crate::config::BindOptions;
use crate::error::BindError;
use crate::events::Listeners;
use crate::ident::BindingId;
use crate::observer::SnapshotObserver;
use crate::source::Source;
use crate::state::{BindingState, StateTriplet};

/// How far the latest session got. Only moves forward; disposal resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Progress {
    /// Nothing requested yet.
    #[default]
    Idle,
    /// A session is waiting in the scheduler.
    Queued,
    /// Host element resolved.
    GotElement,
    /// Markup resolved.
    GotMarkup,
    /// Token values resolved.
    GotBoundValues,
    /// Markup populated.
    Populated,
    /// Child regions enumerated and reconciled.
    GotChildren,
    /// Child sessions started.
    BindingChildren,
    /// Every child session is terminal.
    ChildrenBound,
    /// Nodes attached.
    Injected,
}

/// Terminal status of the latest session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Completion {
    /// Never requested.
    #[default]
    None,
    /// Waiting in the scheduler.
    Queued,
    /// Running, suspended, or paused.
    Executing,
    /// Finished and committed.
    Success,
    /// Canceled or superseded; state rolled back.
    Canceled,
    /// Failed; state rolled back.
    Failed,
    /// Disposed.
    Disposed,
}

impl Completion {
    /// Returns `true` for `Success`, `Canceled`, `Failed`, and `Disposed`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Canceled | Self::Failed | Self::Disposed
        )
    }
}

/// Shape of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Object (or boxed scalar) rendered into its host element.
    Object,
    /// Array binding; renders no wrapper, one element binding per item.
    Array,
    /// Item `index` of the parent array binding.
    Element {
        /// Position in the parent array.
        index: usize,
    },
}

/// A (source, markup) pairing and everything the engine tracks about it.
#[derive(Debug)]
pub struct Binding {
    pub(crate) id: BindingId,
    pub(crate) parent: Option<BindingId>,
    pub(crate) kind: BindingKind,
    pub(crate) options: BindOptions,
    pub(crate) depth: usize,
    pub(crate) state: StateTriplet,
    pub(crate) progress: Progress,
    pub(crate) completion: Completion,
    pub(crate) error: Option<BindError>,
    pub(crate) listeners: Listeners,
    pub(crate) observer: Option<SnapshotObserver>,
    /// Parking fragment for nodes extracted during relocation.
    pub(crate) fragment: Option<NodeId>,
    /// Foreign node a top-level binding renders after.
    pub(crate) anchor: Option<NodeId>,
    /// Host the anchor was computed for.
    pub(crate) placed: Option<NodeId>,
    /// Controller-level listeners skip this binding's events.
    pub(crate) suppressed: bool,
}

impl Binding {
    pub(crate) fn new(
        id: BindingId,
        parent: Option<BindingId>,
        kind: BindingKind,
        options: BindOptions,
        depth: usize,
    ) -> Self {
        Self {
            id,
            parent,
            kind,
            options,
            depth,
            state: StateTriplet::default(),
            progress: Progress::Idle,
            completion: Completion::None,
            error: None,
            listeners: Listeners::default(),
            observer: None,
            fragment: None,
            anchor: None,
            placed: None,
            suppressed: false,
        }
    }

    /// Handle.
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Parent binding, for child and element bindings.
    pub fn parent(&self) -> Option<BindingId> {
        self.parent
    }

    /// Shape.
    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// Options.
    pub fn options(&self) -> &BindOptions {
        &self.options
    }

    /// Nesting depth; top-level bindings are `0`.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Progress of the latest session.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Completion of the latest session.
    pub fn completion(&self) -> Completion {
        self.completion
    }

    /// Failure of the latest session, if it failed.
    pub fn error(&self) -> Option<&BindError> {
        self.error.as_ref()
    }

    /// The state triplet.
    pub fn states(&self) -> &StateTriplet {
        &self.state
    }

    /// Authoritative state.
    pub fn state(&self) -> &BindingState {
        self.state.current()
    }

    /// Bound source.
    pub fn source(&self) -> Option<&Source> {
        self.state().source.as_ref()
    }

    /// Host element.
    pub fn element(&self) -> Option<NodeId> {
        self.state().element
    }

    /// Root nodes rendered by this binding.
    pub fn nodes(&self) -> &[NodeId] {
        &self.state().nodes
    }

    /// Child bindings in region order.
    pub fn children(&self) -> Vec<BindingId> {
        self.state().children.iter().map(|c| c.binding).collect()
    }

    /// Returns `true` if `self` is element 0 of array binding `array`.
    ///
    /// Element 0 shares its host with the array, which must not count as a
    /// host conflict between the two.
    pub fn is_first_array_element_of(&self, array: &Binding) -> bool {
        self.parent == Some(array.id)
            && array.kind == BindingKind::Array
            && self.kind == BindingKind::Element { index: 0 }
    }

    pub(crate) fn advance(&mut self, progress: Progress) {
        self.progress = self.progress.max(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_only_moves_forward() {
        let mut b = Binding::new(BindingId(0), None, BindingKind::Object, BindOptions::default(), 0);
        b.advance(Progress::Populated);
        b.advance(Progress::GotMarkup);
        assert_eq!(b.progress(), Progress::Populated);
        b.advance(Progress::Injected);
        assert_eq!(b.progress(), Progress::Injected);
    }

    #[test]
    fn first_array_element_is_recognized() {
        let array = Binding::new(BindingId(1), None, BindingKind::Array, BindOptions::default(), 0);
        let e0 = Binding::new(
            BindingId(2),
            Some(BindingId(1)),
            BindingKind::Element { index: 0 },
            BindOptions::default(),
            1,
        );
        let e1 = Binding::new(
            BindingId(3),
            Some(BindingId(1)),
            BindingKind::Element { index: 1 },
            BindOptions::default(),
            1,
        );
        assert!(e0.is_first_array_element_of(&array));
        assert!(!e1.is_first_array_element_of(&array));
        assert!(!array.is_first_array_element_of(&e0));
    }
}
