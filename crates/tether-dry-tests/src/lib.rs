// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for tether crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`fetch`] - Scripted markup fetcher with per-URL responses and call counts
//! - [`record`] - Event and callback recorders
//! - [`fixtures`] - Source builders and host-element helpers
//! - [`logging`] - Idempotent `tracing` subscriber setup for test output

pub mod fetch;
pub mod fixtures;
pub mod logging;
pub mod record;

pub use fetch::ScriptedFetcher;
pub use fixtures::{controller, host, items, json_source, text_of};
pub use logging::init_tracing;
pub use record::{CallbackRecorder, EventRecorder};
