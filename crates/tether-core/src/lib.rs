// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tether-core: one-way data binding of sources into a live document.
//!
//! A [`Binding`] pairs a [`Source`] with [`Markup`]. Each `bind`/`update`
//! request opens a session: a fixed phase pipeline (see `tether-stream`)
//! that resolves markup, resolves token values, populates, reconciles child
//! regions, binds children, and finally merges the result into the document.
//! The [`Controller`] batches sessions, supersedes stale ones, and rolls back
//! anything that does not finish.
//!
//! Layout:
//! - `state`: the current / old / pending triplet with pointer-exact rollback.
//! - `binder`: token substitution, region discovery, multi-value attributes.
//! - `reconcile`: classification of old vs new child regions.
//! - `merge`: two-phase tree merge against live nodes.
//! - `scheduler`: batches, child queues, conflict gating, watchdog.
//! - `session` / `controller`: the phase pipeline and the public surface.
#![forbid(unsafe_code)]

mod binder;
mod binding;
mod config;
mod controller;
mod error;
mod events;
mod ident;
mod markup;
pub mod merge;
mod observer;
mod reconcile;
mod scheduler;
mod session;
mod source;
mod state;
mod telemetry;

pub use binder::{
    collect_paths, handler_attr_value, is_hole, parse_handler_attr, reconcile_tokens, render,
    segments, HandlerTable, RenderContext, Rendered, Segment, HANDLER_PREFIX,
};
pub use binding::{Binding, BindingKind, Completion, Progress};
pub use config::{BindConfig, BindMode, BindOptions, InsertMode};
pub use controller::Controller;
pub use error::{BindError, ConfigError, StateError};
pub use events::{BindEvent, EventKind, Listener, Listeners};
pub use ident::{handler_key, short_hash, template_key, BatchId, BindingId, Hash, SessionId};
pub use markup::{ContentCache, ContentEntry, ContentFetcher, FetchPoll, Markup, NoFetcher, TemplateCache};
pub use merge::{MergeContext, MergeOp, MergePlan};
pub use observer::{touches, Change, ChangeKind, SnapshotObserver};
pub use reconcile::{reconcile, ChildDifference, Classified, NewChild, OldChild};
pub use session::BindCallback;
pub use source::{Handler, HandlerCall, Json, Source, SourceData, SourceId, Value};
pub use state::{BindingState, ChildEntry, PendingFlags, PendingState, StateTriplet};
pub use telemetry::{NullTelemetry, RunSummary, SchedulerTelemetry, TracingTelemetry};
pub use tether_stream::EventState;
