// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Source builders and host-element helpers.

use serde_json::Value as JsonValue;
use tether_core::{BindConfig, Controller, Source};
use tether_dom::{Document, NodeId, NodeKind};

/// Controller with default config and a `tracing` subscriber installed.
///
/// # Panics
/// Never: the default config always validates.
#[allow(clippy::expect_used)]
pub fn controller() -> Controller {
    crate::init_tracing();
    Controller::new(BindConfig::default()).expect("default config is valid")
}

/// Creates a `<div>` attached under the document root.
///
/// # Panics
/// If the root cannot take children, which would be a document bug.
#[allow(clippy::expect_used)]
pub fn host(c: &mut Controller) -> NodeId {
    let doc = c.document_mut();
    let div = doc.create_element("div", vec![]);
    let root = doc.root();
    doc.append_child(root, div).expect("root accepts children");
    div
}

/// Builds a source tree from JSON.
pub fn json_source(json: &JsonValue) -> Source {
    Source::from_json(json)
}

/// Array of objects `{ "id": n }` for each `n` in `ids`.
pub fn items(ids: &[i64]) -> Source {
    let array = Source::array();
    for id in ids {
        let item = Source::object();
        item.set("id", *id);
        array.push(item);
    }
    array
}

/// Text of every text node under `node`, in document order.
pub fn text_of(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if let Ok(NodeKind::Text(t)) = doc.kind(n) {
            out.push_str(t);
        }
        stack.extend(doc.children(n).iter().rev().copied());
    }
    out
}
