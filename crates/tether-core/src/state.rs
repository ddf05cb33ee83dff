// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Current / old / pending binding state and its transition rules.
//!
//! Snapshots are reference counted: `swap` clones pointers, not states, so a
//! rollback restores the exact allocations that were live before the
//! session. Writers go through [`Rc::make_mut`], which copies on write only
//! while a snapshot still shares the allocation.

use std::collections::BTreeMap;
use std::rc::Rc;

use bitflags::bitflags;
use tether_dom::{Content, NodeId};

use crate::error::StateError;
use crate::ident::{BindingId, Hash};
use crate::markup::Markup;
use crate::source::Source;

/// Child binding recorded in its parent's state.
#[derive(Debug, Clone)]
pub struct ChildEntry {
    /// Bound path (the region's attribute value, or the array index).
    pub path: String,
    /// Child binding handle.
    pub binding: BindingId,
    /// Source the child was bound to.
    pub source: Source,
    /// Structural hash of `source` when the entry was recorded.
    pub hash: Hash,
    /// `true` for array elements.
    pub array_member: bool,
    /// Host element the child renders into.
    pub host: NodeId,
}

/// One snapshot of a binding.
#[derive(Debug, Clone, Default)]
pub struct BindingState {
    /// Bound source.
    pub source: Option<Source>,
    /// Markup reference.
    pub markup: Option<Markup>,
    /// Resolved host element.
    pub element: Option<NodeId>,
    /// Normalized path relative to the parent binding's source.
    pub path: String,
    /// Rendered value of every bound token path.
    pub bound: BTreeMap<String, String>,
    /// Child bindings in region order.
    pub children: Vec<ChildEntry>,
    /// Root nodes this state injected, in document order.
    pub nodes: Vec<NodeId>,
    /// Template the content was rendered from.
    pub template: Option<Rc<Content>>,
    /// Rendered content the nodes reflect.
    pub content: Option<Rc<Content>>,
}

impl BindingState {
    /// Returns `true` if any child binding lives beneath this state.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

bitflags! {
    /// Which pending fields were assigned.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PendingFlags: u8 {
        /// `element` was assigned.
        const ELEMENT = 0b0001;
        /// `source` was assigned.
        const SOURCE = 0b0010;
        /// `markup` was assigned.
        const MARKUP = 0b0100;
        /// `path` was assigned.
        const PATH = 0b1000;
    }
}

/// Externally assigned overrides adopted by the next swap.
#[derive(Debug, Clone, Default)]
pub struct PendingState {
    /// Set-flags for the fields below.
    pub flags: PendingFlags,
    /// Host element override.
    pub element: Option<NodeId>,
    /// Source override.
    pub source: Option<Source>,
    /// Markup override.
    pub markup: Option<Markup>,
    /// Path override.
    pub path: Option<String>,
}

impl PendingState {
    fn overlay(&mut self, newer: &Self) {
        if newer.flags.contains(PendingFlags::ELEMENT) {
            self.element = newer.element;
        }
        if newer.flags.contains(PendingFlags::SOURCE) {
            self.source.clone_from(&newer.source);
        }
        if newer.flags.contains(PendingFlags::MARKUP) {
            self.markup.clone_from(&newer.markup);
        }
        if newer.flags.contains(PendingFlags::PATH) {
            self.path.clone_from(&newer.path);
        }
        self.flags |= newer.flags;
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    current: Rc<BindingState>,
    old: Option<Rc<BindingState>>,
    pending: Rc<PendingState>,
}

/// The state triplet owned by a binding.
#[derive(Debug, Default)]
pub struct StateTriplet {
    current: Rc<BindingState>,
    old: Option<Rc<BindingState>>,
    pending: Rc<PendingState>,
    snapshot: Option<Snapshot>,
    injected: bool,
}

fn pick<T: Clone>(
    flagged: bool,
    pending: Option<&T>,
    current: Option<&T>,
    old: Option<&T>,
) -> Option<T> {
    if flagged {
        return pending.cloned();
    }
    current.or(old).or(pending).cloned()
}

impl StateTriplet {
    /// Authoritative state.
    pub fn current(&self) -> &BindingState {
        &self.current
    }

    /// Shared handle to the authoritative state.
    pub fn current_rc(&self) -> &Rc<BindingState> {
        &self.current
    }

    /// Previous state while a rebind is in flight.
    pub fn old(&self) -> Option<&BindingState> {
        self.old.as_deref()
    }

    /// Shared handle to the previous state.
    pub fn old_rc(&self) -> Option<&Rc<BindingState>> {
        self.old.as_ref()
    }

    /// Overrides waiting for the next swap.
    pub fn pending(&self) -> &PendingState {
        &self.pending
    }

    /// Shared handle to the pending overrides.
    pub fn pending_rc(&self) -> &Rc<PendingState> {
        &self.pending
    }

    /// Mutable access to the current state (copy on write).
    pub fn current_mut(&mut self) -> &mut BindingState {
        Rc::make_mut(&mut self.current)
    }

    /// Returns `true` between `swap` and `commit`/`rollback`.
    pub fn is_swapped(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Returns `true` once the session attached nodes.
    pub fn is_injected(&self) -> bool {
        self.injected
    }

    /// Element the next swap will adopt.
    pub fn effective_element(&self) -> Option<NodeId> {
        pick(
            self.pending.flags.contains(PendingFlags::ELEMENT),
            self.pending.element.as_ref(),
            self.current.element.as_ref(),
            self.old.as_ref().and_then(|o| o.element.as_ref()),
        )
    }

    /// Markup the next swap will adopt.
    pub fn effective_markup(&self) -> Option<Markup> {
        pick(
            self.pending.flags.contains(PendingFlags::MARKUP),
            self.pending.markup.as_ref(),
            self.current.markup.as_ref(),
            self.old.as_ref().and_then(|o| o.markup.as_ref()),
        )
    }

    /// Assigns the host element for the next session.
    pub fn assign_element(&mut self, element: NodeId) {
        let p = Rc::make_mut(&mut self.pending);
        p.element = Some(element);
        p.flags |= PendingFlags::ELEMENT;
    }

    /// Assigns the source for the next session.
    pub fn assign_source(&mut self, source: Source) {
        let p = Rc::make_mut(&mut self.pending);
        p.source = Some(source);
        p.flags |= PendingFlags::SOURCE;
    }

    /// Assigns the markup for the next session.
    pub fn assign_markup(&mut self, markup: Markup) {
        let p = Rc::make_mut(&mut self.pending);
        p.markup = Some(markup);
        p.flags |= PendingFlags::MARKUP;
    }

    /// Assigns the normalized path for the next session.
    pub fn assign_path(&mut self, path: &str) {
        let p = Rc::make_mut(&mut self.pending);
        p.path = Some(path.to_owned());
        p.flags |= PendingFlags::PATH;
    }

    /// Starts a session: the previous current becomes old and a new current
    /// adopts the pending overrides.
    ///
    /// Flagged pending fields always win; unflagged ones fall back to the
    /// previous current, then old, then whatever pending holds.
    pub fn swap(&mut self) -> Result<(), StateError> {
        if self.snapshot.is_some() {
            return Err(StateError::AlreadySwapped);
        }
        self.snapshot = Some(Snapshot {
            current: Rc::clone(&self.current),
            old: self.old.clone(),
            pending: Rc::clone(&self.pending),
        });
        let flags = self.pending.flags;
        let prev_old = self.old.as_deref();
        let mut next = (*self.current).clone();
        next.element = pick(
            flags.contains(PendingFlags::ELEMENT),
            self.pending.element.as_ref(),
            self.current.element.as_ref(),
            prev_old.and_then(|o| o.element.as_ref()),
        );
        next.source = pick(
            flags.contains(PendingFlags::SOURCE),
            self.pending.source.as_ref(),
            self.current.source.as_ref(),
            prev_old.and_then(|o| o.source.as_ref()),
        );
        next.markup = pick(
            flags.contains(PendingFlags::MARKUP),
            self.pending.markup.as_ref(),
            self.current.markup.as_ref(),
            prev_old.and_then(|o| o.markup.as_ref()),
        );
        if let Some(path) = &self.pending.path {
            if flags.contains(PendingFlags::PATH) {
                next.path.clone_from(path);
            }
        }
        self.old = Some(Rc::clone(&self.current));
        self.current = Rc::new(next);
        self.pending = Rc::new(PendingState::default());
        self.injected = false;
        Ok(())
    }

    /// Undoes the last swap.
    ///
    /// Restores the exact pre-session allocations, then re-applies pending
    /// assignments made while the session ran. Returns `false` when nothing
    /// was swapped.
    pub fn rollback(&mut self) -> Result<bool, StateError> {
        if self.injected {
            return Err(StateError::Irreversible);
        }
        let Some(snapshot) = self.snapshot.take() else {
            return Ok(false);
        };
        let newer = std::mem::replace(&mut self.pending, snapshot.pending);
        if !newer.flags.is_empty() {
            Rc::make_mut(&mut self.pending).overlay(&newer);
        }
        self.current = snapshot.current;
        self.old = snapshot.old;
        Ok(true)
    }

    /// Records that nodes were attached; rollback is refused from here on.
    pub fn mark_injected(&mut self) {
        self.injected = true;
    }

    /// Ends a successful session: old is dropped.
    pub fn commit(&mut self) {
        self.snapshot = None;
        self.old = None;
        self.injected = false;
    }

    /// Clears everything, including pending overrides.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
