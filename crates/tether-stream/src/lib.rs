// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tether-stream: an ordered, cooperatively driven phase pipeline.
//!
//! A [`Stream`] is a fixed list of keyed phases. Each phase is either a
//! unit of work (a handler that resolves, rejects, cancels, seeks, or leaves
//! the work pending) or an event (a main handler followed by a fan-out stage
//! of listeners that share a mutable [`EventState`]). The driver never spawns
//! threads or timers: [`Stream::execute`] runs phases until the pipeline
//! finishes or suspends, and the owner calls it again after resolving the
//! pending unit of work or resuming a pause.
#![forbid(unsafe_code)]

mod stream;

pub use stream::{
    EventHandler, EventState, Handler, PhaseKey, PhaseKind, Step, Stream, StreamError,
    StreamStatus, Work, WorkHandler, WorkOutcome,
};
