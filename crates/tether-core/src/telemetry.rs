// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scheduler telemetry sinks and the per-drive run summary.

use tracing::{debug, info, warn};

use crate::ident::{BatchId, SessionId};

/// Counters reported by [`crate::Controller::run_until_idle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Sessions whose stream was executed at least once.
    pub sessions_executed: u64,
    /// Batches carved (global and child).
    pub batches: u64,
    /// Sessions canceled by a later session on the same binding or host.
    pub supersedes: u64,
    /// Child queues the watchdog had to move to the global queue.
    pub watchdog_rescues: u64,
    /// Sessions that finished successfully.
    pub completed: u64,
    /// Sessions that were canceled.
    pub canceled: u64,
    /// Sessions that failed.
    pub failed: u64,
}

/// Receives scheduler events. Every method defaults to a no-op.
pub trait SchedulerTelemetry {
    /// A batch was carved.
    fn on_batch(&self, _batch: BatchId, _size: usize, _depth: usize) {}

    /// `loser` was superseded by `winner`.
    fn on_superseded(&self, _loser: SessionId, _winner: SessionId) {}

    /// The watchdog moved a stuck child queue of `batch` to the global queue.
    fn on_rescue(&self, _batch: BatchId) {}

    /// A drive call went idle.
    fn on_summary(&self, _summary: &RunSummary) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl SchedulerTelemetry for NullTelemetry {}

/// Forwards scheduler events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl SchedulerTelemetry for TracingTelemetry {
    fn on_batch(&self, batch: BatchId, size: usize, depth: usize) {
        debug!(%batch, size, depth, "batch carved");
    }

    fn on_superseded(&self, loser: SessionId, winner: SessionId) {
        debug!(%loser, %winner, "session superseded");
    }

    fn on_rescue(&self, batch: BatchId) {
        warn!(%batch, "watchdog rescued child queue");
    }

    fn on_summary(&self, summary: &RunSummary) {
        info!(
            sessions = summary.sessions_executed,
            batches = summary.batches,
            supersedes = summary.supersedes,
            rescues = summary.watchdog_rescues,
            "drive idle"
        );
    }
}
