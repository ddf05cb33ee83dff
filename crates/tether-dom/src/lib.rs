// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tether-dom: rendered-node primitives used by the binding engine.
//!
//! - [`Content`] is an owned value tree (element, text, or a list of either)
//!   produced by [`parse`] and consumed by [`to_markup`].
//! - [`Document`] is an arena of live nodes addressed by [`NodeId`]. Nodes
//!   may be detached (parked under a fragment or parentless) and re-inserted.
//! - [`compare`] walks two `Content` trees positionally and reports
//!   per-node and per-attribute [`Difference`]s.
#![forbid(unsafe_code)]

mod content;
mod diff;
mod document;
mod parse;

pub use content::{Attr, Content, Element, IndexPath};
pub use diff::{compare, Comparison, DiffFlags, Difference, DifferenceKind};
pub use document::{Document, DocumentError, NodeId, NodeKind};
pub use parse::{parse, to_markup, ParseError};
