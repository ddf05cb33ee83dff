// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Array bindings: one element binding per item, anchored in item order.

#![allow(missing_docs, clippy::unwrap_used)]

use serde_json::json;
use tether_core::{BindingKind, Completion, Markup, Source};
use tether_dry_tests::{controller, host, items, json_source, text_of};

#[test]
fn items_render_in_order_and_removal_drops_exactly_one_node() {
    let mut c = controller();
    let host = host(&mut c);
    let list = items(&[1, 2, 3]);
    let id = c.create_binding(Markup::inline("<li>{{id}}</li>"), list.clone());
    c.bind(id, host, |_| {}).unwrap();
    let summary = c.run_until_idle().unwrap();

    assert_eq!(c.document().inner_markup(host), "<li>1</li><li>2</li><li>3</li>");
    assert_eq!(summary.sessions_executed, 4);
    assert_eq!(summary.watchdog_rescues, 0);
    let b = c.binding(id).unwrap();
    assert_eq!(b.kind(), BindingKind::Array);
    let children = b.children();
    assert_eq!(children.len(), 3);
    for (i, child) in children.iter().enumerate() {
        assert_eq!(c.binding(*child).unwrap().kind(), BindingKind::Element { index: i });
    }
    let nodes = b.nodes().to_vec();
    assert_eq!(c.document().children(host), nodes.as_slice());
    assert_eq!(c.document().previous_sibling(nodes[1]), Some(nodes[0]));
    assert_eq!(c.document().previous_sibling(nodes[2]), Some(nodes[1]));

    list.remove("1");
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(c.document().children(host), &[nodes[0], nodes[2]]);
    assert!(!c.document().contains(nodes[1]));
    assert_eq!(c.document().inner_markup(host), "<li>1</li><li>3</li>");
    let b = c.binding(id).unwrap();
    assert_eq!(b.nodes(), &[nodes[0], nodes[2]]);
    assert!(c.binding(children[1]).is_none());
    assert_eq!(
        c.binding(children[2]).unwrap().kind(),
        BindingKind::Element { index: 1 }
    );
}

#[test]
fn prepended_item_lands_first_and_keeps_existing_nodes() {
    let mut c = controller();
    let host = host(&mut c);
    let list = items(&[1, 2]);
    let id = c.create_binding(Markup::inline("<li>{{id}}</li>"), list.clone());
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    let before = c.binding(id).unwrap().nodes().to_vec();

    let zero = Source::object();
    zero.set("id", 0);
    list.insert(0, zero);
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(text_of(c.document(), host), "012");
    let after = c.binding(id).unwrap().nodes().to_vec();
    assert_eq!(after.len(), 3);
    assert_eq!(&after[1..], before.as_slice());
}

#[test]
fn reordered_items_are_relinked_not_rebuilt() {
    let mut c = controller();
    let host = host(&mut c);
    let list = items(&[1, 2, 3]);
    let id = c.create_binding(Markup::inline("<li>{{id}}</li>"), list.clone());
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    let nodes = c.binding(id).unwrap().nodes().to_vec();

    let last = list.remove("2").unwrap();
    list.insert(0, last);
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(text_of(c.document(), host), "312");
    assert_eq!(c.document().children(host), &[nodes[2], nodes[0], nodes[1]]);
}

#[test]
fn scalar_items_and_nested_arrays_render() {
    let mut c = controller();
    let host = host(&mut c);
    let id = c.create_binding(
        Markup::inline(r#"<h2>{{name}}</h2><ol data-bind="rows"><li data-bind="cells"><span>{{.}}</span></li></ol>"#),
        json_source(&json!({"name": "grid", "rows": [{"cells": [1, 2]}, {"cells": [3]}]})),
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(
        c.document().inner_markup(host),
        concat!(
            "<h2>grid</h2><ol data-bind=\"rows\">",
            "<li data-bind=\"cells\"><span>1</span><span>2</span></li>",
            "<li data-bind=\"cells\"><span>3</span></li>",
            "</ol>"
        )
    );
    assert_eq!(c.binding(id).unwrap().completion(), Completion::Success);
}

#[test]
fn emptied_array_leaves_the_host_empty() {
    let mut c = controller();
    let host = host(&mut c);
    let list = items(&[7, 8]);
    let id = c.create_binding(Markup::inline("<li>{{id}}</li>"), list.clone());
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    list.remove("1");
    list.remove("0");
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert!(c.document().children(host).is_empty());
    assert!(c.binding(id).unwrap().children().is_empty());
    assert_eq!(c.binding(id).unwrap().completion(), Completion::Success);
}
