// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for configuration, sessions, and state transitions.

use tether_dom::{DocumentError, NodeId, ParseError};
use tether_stream::StreamError;
use thiserror::Error;

use crate::ident::BindingId;

/// Errors returned synchronously from controller calls.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A mode string did not name a known mode.
    #[error("invalid {field} value: {value:?}")]
    InvalidMode {
        /// Option being parsed (`mode` or `insert`).
        field: &'static str,
        /// Rejected input.
        value: String,
    },
    /// A numeric option is out of range.
    #[error("invalid config value for {0}")]
    InvalidValue(&'static str),
    /// The binding has no markup to render.
    #[error("binding {0} has no markup")]
    MissingMarkup(BindingId),
    /// The binding has never been given a host element.
    #[error("binding {0} is not bound to an element")]
    NotBound(BindingId),
    /// A named template was never registered.
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    /// The binding id is unknown.
    #[error("unknown binding {0}")]
    UnknownBinding(BindingId),
    /// The node id does not name a live node.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// Registered markup failed to parse.
    #[error("template parse error: {0}")]
    Parse(#[from] ParseError),
    /// Config JSON failed to (de)serialize.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The session pipeline could not be assembled.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Errors raised by the state triplet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// `swap` was called twice within one session.
    #[error("state already swapped in this session")]
    AlreadySwapped,
    /// Nodes were attached; the swap can no longer be reversed.
    #[error("state is irreversible after injection")]
    Irreversible,
}

/// Errors that terminate a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// A child region resolved to a source already bound by an ancestor.
    #[error("circular source reference at {path:?} under binding {binding}")]
    CircularSource {
        /// Binding whose child region closed the cycle.
        binding: BindingId,
        /// Bound path of the offending region.
        path: String,
    },
    /// The binding tree exceeded the configured depth.
    #[error("binding depth {0} exceeds the configured maximum")]
    DepthExceeded(usize),
    /// No host element was resolved for the binding.
    #[error("binding {0} has no host element")]
    MissingElement(BindingId),
    /// No markup was resolved for the binding.
    #[error("binding {0} has no markup")]
    MissingMarkup(BindingId),
    /// A named template was not registered.
    #[error("unknown template: {0}")]
    UnknownTemplate(String),
    /// Markup failed to parse.
    #[error("markup parse error: {0}")]
    Parse(#[from] ParseError),
    /// Remote markup could not be retrieved.
    #[error("failed to fetch {url}: {reason}")]
    Fetch {
        /// Requested location.
        url: String,
        /// Fetcher-reported reason.
        reason: String,
    },
    /// A document mutation failed.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    /// A state transition was refused.
    #[error("state error: {0}")]
    State(#[from] StateError),
    /// The session pipeline faulted.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
    /// An internal invariant did not hold.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl BindError {
    /// Returns `true` for hazards that abort the whole drive call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CircularSource { .. })
    }
}
