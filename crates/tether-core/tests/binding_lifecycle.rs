// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end binding sessions: render, rebind, patch, rollback, dispose.

#![allow(missing_docs, clippy::unwrap_used)]

use std::cell::Cell;
use std::rc::Rc;

use serde_json::json;
use tether_core::{
    BindConfig, BindError, BindMode, BindOptions, Completion, Controller, EventKind, InsertMode,
    Markup, PendingFlags, Progress, Source, Value, HANDLER_PREFIX,
};
use tether_dry_tests::{
    controller, host, init_tracing, json_source, text_of, CallbackRecorder, EventRecorder,
};

const CARD: &str = r#"<p class="{{role}}">Hello {{name}}</p>"#;

#[test]
fn bind_renders_tokens_into_the_host() {
    let mut c = controller();
    let host = host(&mut c);
    let src = json_source(&json!({"name": "Ada", "role": "admin"}));
    let id = c.create_binding(Markup::inline(CARD), src);
    let calls = CallbackRecorder::new();

    c.bind(id, host, calls.callback("first")).unwrap();
    let summary = c.run_until_idle().unwrap();

    assert_eq!(
        c.document().inner_markup(host),
        r#"<p class="admin">Hello Ada</p>"#
    );
    assert_eq!(calls.calls(), vec![("first".to_owned(), Completion::Success)]);
    let b = c.binding(id).unwrap();
    assert_eq!(b.progress(), Progress::Injected);
    assert_eq!(b.completion(), Completion::Success);
    assert_eq!(b.nodes().len(), 1);
    assert!(b.states().old().is_none());
    assert_eq!(summary.sessions_executed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.watchdog_rescues, 0);
}

#[test]
fn rebinding_an_unchanged_source_is_a_no_op() {
    let mut c = controller();
    let host = host(&mut c);
    let src = json_source(&json!({"name": "Ada", "role": "admin"}));
    let id = c.create_binding(Markup::inline(CARD), src.clone());
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    let nodes = c.binding(id).unwrap().nodes().to_vec();
    let content = Rc::clone(c.binding(id).unwrap().state().content.as_ref().unwrap());
    let markup = c.document().inner_markup(host);

    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    let b = c.binding(id).unwrap();
    assert_eq!(b.nodes(), nodes.as_slice());
    assert!(Rc::ptr_eq(b.state().content.as_ref().unwrap(), &content));
    assert!(b.source().unwrap().ptr_eq(&src));
    assert_eq!(c.document().inner_markup(host), markup);
    assert_eq!(b.completion(), Completion::Success);
}

#[test]
fn property_edit_patches_only_the_text_node() {
    let mut c = controller();
    let host = host(&mut c);
    let src = json_source(&json!({"name": "Ada", "role": "admin"}));
    let id = c.create_binding(Markup::inline(CARD), src.clone());
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    let p = c.binding(id).unwrap().nodes()[0];
    let text = c.document().children(p)[0];

    src.set("name", "Grace");
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(c.binding(id).unwrap().nodes(), &[p]);
    assert_eq!(c.document().children(host), &[p]);
    assert_eq!(c.document().children(p), &[text]);
    assert_eq!(c.document().text(text), Some("Hello Grace"));
    assert_eq!(c.document().attr(p, "class"), Some("admin"));
}

#[test]
fn multi_value_attributes_keep_manual_tokens() {
    let mut c = controller();
    let host = host(&mut c);
    let src = json_source(&json!({"name": "Ada", "role": "admin"}));
    let id = c.create_binding(Markup::inline(CARD), src.clone());
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    let p = c.binding(id).unwrap().nodes()[0];
    c.document_mut().set_attr(p, "class", "admin highlighted").unwrap();
    src.set("role", "guest");
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(c.document().attr(p, "class"), Some("guest highlighted"));
}

#[test]
fn canceled_session_rolls_back_to_the_exact_prior_state() {
    let mut c = controller();
    let host = host(&mut c);
    let id = c.create_binding(
        Markup::inline(CARD),
        json_source(&json!({"name": "Ada", "role": "admin"})),
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    let bound = EventRecorder::new();
    c.on_binding(id, EventKind::Bound, bound.listener()).unwrap();
    let before = Rc::clone(c.binding(id).unwrap().states().current_rc());
    let markup = c.document().inner_markup(host);

    c.set_source(id, json_source(&json!({"name": "Bob", "role": "guest"})))
        .unwrap();
    c.on_binding(id, EventKind::SetMarkup, |_, st| st.cancel())
        .unwrap();
    let calls = CallbackRecorder::new();
    c.update(id, calls.callback("update")).unwrap();
    c.run_until_idle().unwrap();

    let b = c.binding(id).unwrap();
    assert!(Rc::ptr_eq(b.states().current_rc(), &before));
    assert!(b.states().old().is_none());
    assert!(b.states().pending().flags.contains(PendingFlags::SOURCE));
    assert_eq!(b.completion(), Completion::Canceled);
    assert_eq!(calls.completion_of("update"), Some(Completion::Canceled));
    assert_eq!(bound.count(EventKind::Bound), 0);
    assert_eq!(c.document().inner_markup(host), markup);
}

#[test]
fn events_fire_in_phase_order_on_binding_then_controller() {
    let mut c = controller();
    let host = host(&mut c);
    let id = c.create_binding(
        Markup::inline("<h1>{{title}}</h1>"),
        json_source(&json!({"title": "T"})),
    );
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));
    let local = Rc::clone(&order);
    c.on_binding(id, EventKind::Bound, move |_, _| local.borrow_mut().push("binding"))
        .unwrap();
    let global = Rc::clone(&order);
    c.on(EventKind::Bound, move |_, _| global.borrow_mut().push("controller"));
    let all = EventRecorder::new();
    for kind in [
        EventKind::Bind,
        EventKind::SetMarkup,
        EventKind::SetBindings,
        EventKind::PopulateMarkup,
        EventKind::BindChildren,
        EventKind::ChildrenBound,
        EventKind::Bound,
    ] {
        c.on(kind, all.listener());
    }

    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(
        all.kinds_for(id),
        vec![
            EventKind::Bind,
            EventKind::SetMarkup,
            EventKind::SetBindings,
            EventKind::PopulateMarkup,
            EventKind::BindChildren,
            EventKind::ChildrenBound,
            EventKind::Bound,
        ]
    );
    assert_eq!(*order.borrow(), vec!["binding", "controller"]);
    let last = all.events().pop().unwrap();
    assert_eq!(last.progress, Progress::Injected);
}

#[test]
fn child_regions_bind_and_can_be_suppressed() {
    let markup = r#"<section><h1>{{title}}</h1><div data-bind="author"><span>{{name}}</span></div></section>"#;
    for suppress in [false, true] {
        let mut c = controller();
        let host = host(&mut c);
        let options = BindOptions {
            suppress_child_events: suppress,
            ..BindOptions::default()
        };
        let id = c.create_binding_with(
            Markup::inline(markup),
            json_source(&json!({"title": "Post", "author": {"name": "Ada"}})),
            options,
        );
        let bound = EventRecorder::new();
        c.on(EventKind::Bound, bound.listener());

        c.bind(id, host, |_| {}).unwrap();
        c.run_until_idle().unwrap();

        assert_eq!(
            c.document().inner_markup(host),
            r#"<section><h1>Post</h1><div data-bind="author"><span>Ada</span></div></section>"#
        );
        let children = c.binding(id).unwrap().children();
        assert_eq!(children.len(), 1);
        let child = c.binding(children[0]).unwrap();
        assert_eq!(child.completion(), Completion::Success);
        assert_eq!(child.depth(), 1);
        let expected = if suppress { vec![id] } else { vec![id, children[0]] };
        assert_eq!(bound.bindings(), expected);
    }
}

#[test]
fn nested_edit_rerenders_only_the_child() {
    let mut c = controller();
    let host = host(&mut c);
    let src = json_source(&json!({"title": "Post", "author": {"name": "Ada"}}));
    let id = c.create_binding(
        Markup::inline(r#"<article><h1>{{title}}</h1><div data-bind="author"><b>{{name}}</b></div></article>"#),
        src.clone(),
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    let article = c.binding(id).unwrap().nodes()[0];
    let parent_content = Rc::clone(c.binding(id).unwrap().state().content.as_ref().unwrap());

    let author = src.get("author").unwrap();
    author.as_source().unwrap().set("name", "Grace");
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(text_of(c.document(), host), "PostGrace");
    assert_eq!(c.binding(id).unwrap().nodes(), &[article]);
    assert!(Rc::ptr_eq(
        c.binding(id).unwrap().state().content.as_ref().unwrap(),
        &parent_content
    ));
}

#[test]
fn circular_source_aborts_the_drive() {
    let mut c = controller();
    let host = host(&mut c);
    let id = c.create_binding(
        Markup::inline(r#"<div data-bind="."><span>{{name}}</span></div>"#),
        json_source(&json!({"name": "loop"})),
    );
    let calls = CallbackRecorder::new();
    let errors = EventRecorder::new();
    c.on(EventKind::Error, errors.listener());

    c.bind(id, host, calls.callback("loop")).unwrap();
    let err = c.run_until_idle().unwrap_err();

    assert!(matches!(err, BindError::CircularSource { .. }));
    assert_eq!(calls.completion_of("loop"), Some(Completion::Failed));
    assert_eq!(errors.count(EventKind::Error), 1);
    assert!(c.document().children(host).is_empty());
    assert!(matches!(
        c.binding(id).unwrap().error(),
        Some(BindError::CircularSource { .. })
    ));
}

#[test]
fn insert_modes_place_nodes_around_foreign_children() {
    for (mode, expected) in [
        (InsertMode::Replace, "<p>x</p>"),
        (InsertMode::Append, "<em>keep</em><p>x</p>"),
        (InsertMode::Prepend, "<p>x</p><em>keep</em>"),
    ] {
        let mut c = controller();
        let host = host(&mut c);
        let doc = c.document_mut();
        let em = doc.create_element("em", vec![]);
        let keep = doc.create_text("keep");
        doc.append_child(em, keep).unwrap();
        doc.append_child(host, em).unwrap();

        let options = BindOptions {
            insert: mode,
            ..BindOptions::default()
        };
        let id = c.create_binding_with(
            Markup::inline("<p>{{v}}</p>"),
            json_source(&json!({"v": "x"})),
            options,
        );
        c.bind(id, host, |_| {}).unwrap();
        c.run_until_idle().unwrap();
        assert_eq!(c.document().inner_markup(host), expected, "{mode:?}");
        assert_eq!(c.document().contains(em), mode != InsertMode::Replace);

        // A rebind keeps the placement.
        c.update(id, |_| {}).unwrap();
        c.run_until_idle().unwrap();
        assert_eq!(c.document().inner_markup(host), expected, "{mode:?}");
    }
}

#[test]
fn bound_handlers_dispatch_by_attribute() {
    let mut c = controller();
    let host = host(&mut c);
    let clicks = Rc::new(Cell::new(0));
    let counter = Rc::clone(&clicks);
    let src = Source::object();
    src.set("label", "Save");
    src.set(
        "save",
        Value::handler(move |call| {
            assert_eq!(call.event, "click");
            counter.set(counter.get() + 1);
        }),
    );
    let id = c.create_binding(
        Markup::inline(r#"<button onclick="{{save}}">{{label}}</button>"#),
        src,
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    let button = c.document().children(host)[0];
    assert!(c
        .document()
        .attr(button, "onclick")
        .unwrap()
        .starts_with(HANDLER_PREFIX));
    assert!(c.dispatch(button, "click").unwrap());
    assert!(!c.dispatch(button, "hover").unwrap());
    assert_eq!(clicks.get(), 1);

    c.dispose(id).unwrap();
    assert!(c.dispatch(host, "click").is_ok_and(|hit| !hit));
}

#[test]
fn replaced_handler_is_dispatched_after_update() {
    let mut c = controller();
    let host = host(&mut c);
    let first = Rc::new(Cell::new(0));
    let second = Rc::new(Cell::new(0));
    let src = Source::object();
    let hits = Rc::clone(&first);
    src.set("save", Value::handler(move |_| hits.set(hits.get() + 1)));
    let id = c.create_binding(
        Markup::inline(r#"<button onclick="{{save}}">go</button>"#),
        src.clone(),
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    let button = c.document().children(host)[0];

    let hits = Rc::clone(&second);
    src.set("save", Value::handler(move |_| hits.set(hits.get() + 1)));
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(c.document().children(host), &[button]);
    assert!(c.dispatch(button, "click").unwrap());
    assert_eq!((first.get(), second.get()), (0, 1));
}

#[test]
fn overwrite_mode_rebind_without_changes_keeps_nodes() {
    let mut c = controller();
    let host = host(&mut c);
    let options = BindOptions {
        mode: BindMode::Overwrite,
        ..BindOptions::default()
    };
    let src = json_source(&json!({"n": 1}));
    let id = c.create_binding_with(Markup::inline("<p>{{n}}</p>"), src.clone(), options);
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    let before = c.binding(id).unwrap().nodes().to_vec();

    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    assert_eq!(c.binding(id).unwrap().nodes(), before.as_slice());
    assert!(c.document().contains(before[0]));

    // A real edit still re-renders.
    src.set("n", 2);
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    assert_eq!(c.document().inner_markup(host), "<p>2</p>");
    assert_ne!(c.binding(id).unwrap().nodes(), before.as_slice());
    assert!(!c.document().contains(before[0]));
}

#[test]
fn overwrite_parent_edit_keeps_unchanged_child_nodes() {
    let mut c = controller();
    let host = host(&mut c);
    let options = BindOptions {
        mode: BindMode::Overwrite,
        ..BindOptions::default()
    };
    let src = json_source(&json!({"t": "one", "kid": {"n": "k"}}));
    let id = c.create_binding_with(
        Markup::inline(r#"<section><h1>{{t}}</h1><div data-bind="kid"><b>{{n}}</b></div></section>"#),
        src.clone(),
        options,
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    let section = c.binding(id).unwrap().nodes()[0];
    let region = c.document().children(section)[1];
    let kid = c.document().children(region)[0];

    src.set("t", "two");
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(c.binding(id).unwrap().nodes(), &[section]);
    assert!(c.document().contains(kid));
    assert_eq!(c.document().children(region), &[kid]);
    assert_eq!(text_of(c.document(), host), "twok");
}

#[test]
fn swapped_regions_move_their_nodes() {
    let mut c = controller();
    let host = host(&mut c);
    let src = json_source(&json!({"a": {"v": "x"}, "b": {"v": "y"}}));
    let id = c.create_binding(
        Markup::inline(r#"<div data-bind="a"><b>{{v}}</b></div><div data-bind="b"><b>{{v}}</b></div>"#),
        src.clone(),
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    let roots = c.binding(id).unwrap().nodes().to_vec();
    let bx = c.document().children(roots[0])[0];
    let by = c.document().children(roots[1])[0];

    let a = src.get("a").unwrap();
    let b = src.get("b").unwrap();
    src.set("a", b);
    src.set("b", a);
    c.update(id, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(c.binding(id).unwrap().nodes(), roots.as_slice());
    assert_eq!(c.document().children(roots[0]), &[by]);
    assert_eq!(c.document().children(roots[1]), &[bx]);
    assert_eq!(text_of(c.document(), host), "yx");
}

#[test]
fn failing_child_leaves_its_siblings_bound() {
    init_tracing();
    let config = BindConfig {
        max_depth: 1,
        ..BindConfig::default()
    };
    let mut c = Controller::new(config).unwrap();
    let host = host(&mut c);
    let errors = EventRecorder::new();
    c.on(EventKind::Error, errors.listener());
    let id = c.create_binding(
        Markup::inline(concat!(
            r#"<div data-bind="a"><p data-bind="deep">{{x}}</p></div>"#,
            r#"<div data-bind="b"><i>{{y}}</i></div>"#
        )),
        json_source(&json!({"a": {"deep": {"x": 1}}, "b": {"y": "ok"}})),
    );
    let calls = CallbackRecorder::new();
    c.bind(id, host, calls.callback("top")).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(calls.completion_of("top"), Some(Completion::Success));
    let kids = c.binding(id).unwrap().children();
    let done: Vec<_> = kids
        .iter()
        .map(|k| c.binding(*k).unwrap().completion())
        .collect();
    assert_eq!(done, vec![Completion::Failed, Completion::Success]);
    assert!(matches!(
        c.binding(kids[0]).unwrap().error(),
        Some(BindError::DepthExceeded(2))
    ));
    assert_eq!(errors.bindings(), vec![kids[0]]);
    assert_eq!(text_of(c.document(), host), "ok");
}

#[test]
fn named_templates_are_parsed_once() {
    let mut c = controller();
    c.register_template("badge", "<b>{{n}}</b>").unwrap();
    let (_, misses) = c.template_stats();
    let a = host(&mut c);
    let b = host(&mut c);
    let first = c.create_binding(Markup::named("badge"), json_source(&json!({"n": 1})));
    let second = c.create_binding(Markup::named("badge"), json_source(&json!({"n": 2})));
    c.bind(first, a, |_| {}).unwrap();
    c.bind(second, b, |_| {}).unwrap();
    c.run_until_idle().unwrap();

    assert_eq!(c.document().inner_markup(a), "<b>1</b>");
    assert_eq!(c.document().inner_markup(b), "<b>2</b>");
    assert_eq!(c.template_stats().1, misses);
}

#[test]
fn dispose_removes_nodes_and_resets_the_binding() {
    let mut c = controller();
    let host = host(&mut c);
    let id = c.create_binding(
        Markup::inline(r#"<div><i>{{a}}</i><ul data-bind="list"><li>{{.}}</li></ul></div>"#),
        json_source(&json!({"a": "x", "list": ["p", "q"]})),
    );
    c.bind(id, host, |_| {}).unwrap();
    c.run_until_idle().unwrap();
    assert_eq!(text_of(c.document(), host), "xpq");
    let live = c.document().live_count();
    assert!(live > 2);

    c.dispose(id).unwrap();

    let b = c.binding(id).unwrap();
    assert!(c.document().children(host).is_empty());
    assert_eq!(b.completion(), Completion::Disposed);
    assert_eq!(b.progress(), Progress::Idle);
    assert!(b.nodes().is_empty());
    assert!(b.children().is_empty());
    // Root and host remain.
    assert_eq!(c.document().live_count(), 2);
}
