// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Batching and race control.
//!
//! Sessions wait in a global FIFO queue until they are carved into a root
//! batch of at most `batch_size` members. Sessions spawned by a member (child
//! bindings) go to that batch's private child queue and are carved into child
//! batches, which run as soon as the ancestor yields. The walk always starts
//! at the focused batch, descends into its child batches, then climbs the
//! parent chain, so a batch never waits on work nobody will schedule.
//!
//! The scheduler only decides *which* session starts next. It sees sessions
//! through [`SessionView`] and never touches their streams.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::ident::{BatchId, SessionId};
use crate::telemetry::SchedulerTelemetry;

/// What the scheduler needs to know about sessions.
pub(crate) trait SessionView {
    /// Session exists and has not reached a terminal state.
    fn is_live(&self, sid: SessionId) -> bool;
    /// Session's stream was executed at least once.
    fn is_started(&self, sid: SessionId) -> bool;
    /// Another started, live session holds the same binding or host.
    fn is_blocked(&self, sid: SessionId) -> bool;
    /// `a` and `b` target the same binding or the same host element.
    fn conflicts(&self, a: SessionId, b: SessionId) -> bool;
}

#[derive(Debug)]
struct Batch {
    parent: Option<BatchId>,
    depth: usize,
    members: Vec<SessionId>,
    child_queue: VecDeque<SessionId>,
    children: Vec<BatchId>,
}

#[derive(Debug)]
pub(crate) struct Scheduler {
    batch_size: usize,
    watchdog_interval: u32,
    queue: VecDeque<SessionId>,
    batches: FxHashMap<BatchId, Batch>,
    roots: Vec<BatchId>,
    focus: Option<BatchId>,
    placement: FxHashMap<SessionId, BatchId>,
    next_batch: u32,
    polls: u32,
    pub(crate) batches_carved: u64,
    pub(crate) rescues: u64,
}

impl Scheduler {
    pub(crate) fn new(batch_size: usize, watchdog_interval: u32) -> Self {
        Self {
            batch_size: batch_size.max(1),
            watchdog_interval,
            queue: VecDeque::new(),
            batches: FxHashMap::default(),
            roots: Vec::new(),
            focus: None,
            placement: FxHashMap::default(),
            next_batch: 0,
            polls: 0,
            batches_carved: 0,
            rescues: 0,
        }
    }

    /// Queues a top-level session.
    pub(crate) fn enqueue(&mut self, sid: SessionId) {
        self.queue.push_back(sid);
    }

    /// Queues a session spawned by `parent` into the parent's batch.
    pub(crate) fn enqueue_child(&mut self, parent: SessionId, sid: SessionId) {
        match self.placement.get(&parent).and_then(|b| self.batches.get_mut(b)) {
            Some(batch) => batch.child_queue.push_back(sid),
            None => self.queue.push_back(sid),
        }
    }

    /// Batch a session was carved into.
    pub(crate) fn batch_of(&self, sid: SessionId) -> Option<BatchId> {
        self.placement.get(&sid).copied()
    }

    /// Returns `true` when nothing is queued or batched.
    pub(crate) fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.batches.is_empty()
    }

    /// Picks the next session to start, carving batches as needed.
    pub(crate) fn next_start(
        &mut self,
        view: &impl SessionView,
        telemetry: &dyn SchedulerTelemetry,
    ) -> Option<SessionId> {
        self.polls = self.polls.wrapping_add(1);
        if self.watchdog_interval > 0 && self.polls % self.watchdog_interval == 0 {
            self.watchdog(telemetry);
        }
        let mut cursor = self.focus;
        while let Some(bid) = cursor {
            if let Some(sid) = self.start_in(bid, view, telemetry) {
                return Some(sid);
            }
            cursor = self.batches.get(&bid).and_then(|b| b.parent);
        }
        for root in self.roots.clone() {
            if let Some(sid) = self.start_in(root, view, telemetry) {
                return Some(sid);
            }
        }

        // Only carve once no open batch has runnable work.
        self.close_finished(view);
        while !self.queue.is_empty() {
            let Some(bid) = self.carve_root(view, telemetry) else {
                break;
            };
            if let Some(sid) = self.start_in(bid, view, telemetry) {
                return Some(sid);
            }
        }
        None
    }

    fn carve_root(&mut self, view: &impl SessionView, telemetry: &dyn SchedulerTelemetry) -> Option<BatchId> {
        let mut members = Vec::new();
        while members.len() < self.batch_size {
            let Some(sid) = self.queue.pop_front() else {
                break;
            };
            if view.is_live(sid) {
                members.push(sid);
            }
        }
        if members.is_empty() {
            return None;
        }
        let bid = self.open_batch(None, 0, members, telemetry);
        self.roots.push(bid);
        Some(bid)
    }

    fn open_batch(
        &mut self,
        parent: Option<BatchId>,
        depth: usize,
        members: Vec<SessionId>,
        telemetry: &dyn SchedulerTelemetry,
    ) -> BatchId {
        let bid = BatchId(self.next_batch);
        self.next_batch = self.next_batch.wrapping_add(1);
        self.batches_carved += 1;
        telemetry.on_batch(bid, members.len(), depth);
        trace!(batch = %bid, size = members.len(), depth, "batch opened");
        for sid in &members {
            self.placement.insert(*sid, bid);
        }
        self.batches.insert(
            bid,
            Batch {
                parent,
                depth,
                members,
                child_queue: VecDeque::new(),
                children: Vec::new(),
            },
        );
        bid
    }

    fn start_in(
        &mut self,
        bid: BatchId,
        view: &impl SessionView,
        telemetry: &dyn SchedulerTelemetry,
    ) -> Option<SessionId> {
        let (queued, depth) = {
            let batch = self.batches.get_mut(&bid)?;
            let take = batch.child_queue.len().min(self.batch_size);
            let queued: Vec<SessionId> = batch
                .child_queue
                .drain(..take)
                .filter(|s| view.is_live(*s))
                .collect();
            (queued, batch.depth)
        };
        if !queued.is_empty() {
            let child = self.open_batch(Some(bid), depth + 1, queued, telemetry);
            if let Some(batch) = self.batches.get_mut(&bid) {
                batch.children.push(child);
            }
        }

        let children = self.batches.get(&bid)?.children.clone();
        for child in children {
            if let Some(sid) = self.start_in(child, view, telemetry) {
                return Some(sid);
            }
        }

        let batch = self.batches.get(&bid)?;
        for (i, sid) in batch.members.iter().enumerate() {
            if !view.is_live(*sid) || view.is_started(*sid) || view.is_blocked(*sid) {
                continue;
            }
            let waits = batch.members[..i]
                .iter()
                .any(|earlier| view.is_live(*earlier) && view.conflicts(*earlier, *sid));
            if waits {
                continue;
            }
            self.focus = Some(bid);
            return Some(*sid);
        }
        None
    }

    fn is_finished(&self, bid: BatchId, view: &impl SessionView) -> bool {
        let Some(batch) = self.batches.get(&bid) else {
            return true;
        };
        batch.child_queue.is_empty()
            && batch.members.iter().all(|s| !view.is_live(*s))
            && batch.children.iter().all(|c| self.is_finished(*c, view))
    }

    fn close_finished(&mut self, view: &impl SessionView) {
        let finished: Vec<BatchId> = self
            .roots
            .iter()
            .copied()
            .filter(|r| self.is_finished(*r, view))
            .collect();
        for root in finished {
            self.drop_tree(root);
        }
        self.roots.retain(|r| self.batches.contains_key(r));
        if self.focus.is_some_and(|f| !self.batches.contains_key(&f)) {
            self.focus = None;
        }
    }

    fn drop_tree(&mut self, bid: BatchId) {
        let Some(batch) = self.batches.remove(&bid) else {
            return;
        };
        for sid in &batch.members {
            self.placement.remove(sid);
        }
        for child in batch.children {
            self.drop_tree(child);
        }
    }

    /// Moves child queues of batches no root can reach to the global queue.
    fn watchdog(&mut self, telemetry: &dyn SchedulerTelemetry) {
        let mut reachable = Vec::new();
        let mut stack = self.roots.clone();
        while let Some(bid) = stack.pop() {
            if let Some(batch) = self.batches.get(&bid) {
                reachable.push(bid);
                stack.extend(batch.children.iter().copied());
            }
        }
        let orphans: Vec<BatchId> = self
            .batches
            .iter()
            .filter(|(bid, b)| !b.child_queue.is_empty() && !reachable.contains(bid))
            .map(|(bid, _)| *bid)
            .collect();
        for bid in orphans {
            if let Some(batch) = self.batches.get_mut(&bid) {
                warn!(batch = %bid, queued = batch.child_queue.len(), "watchdog rescue");
                self.queue.extend(batch.child_queue.drain(..));
                self.rescues += 1;
                telemetry.on_rescue(bid);
            }
        }
    }
}
