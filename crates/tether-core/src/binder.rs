// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `{{path}}` token substitution, bound event handlers, and multi-value
//! attribute reconciliation.
//!
//! Child regions (elements carrying the bind attribute) are holes: their own
//! attributes belong to the enclosing binding and are rendered here, but
//! their children belong to the child binding and are emptied.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tether_dom::{Content, Element};

use crate::ident::{handler_key, BindingId, Hash};
use crate::source::{Handler, Source, Value};

/// Attribute value prefix marking a bound handler.
pub const HANDLER_PREFIX: &str = "@handler:";

/// A piece of text split around tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Literal text.
    Text(&'a str),
    /// Token path, trimmed.
    Token(&'a str),
}

/// Splits `text` into literal and token segments.
///
/// An unterminated `{{` is literal text.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        if start > 0 {
            out.push(Segment::Text(&rest[..start]));
        }
        out.push(Segment::Token(rest[start + 2..start + 2 + len].trim()));
        rest = &rest[start + 2 + len + 2..];
    }
    if !rest.is_empty() {
        out.push(Segment::Text(rest));
    }
    out
}

/// Returns `true` if `el` declares a child region.
pub fn is_hole(el: &Element, bind_attribute: &str) -> bool {
    el.attr(bind_attribute).is_some()
}

/// Token paths bound by `template`, excluding region interiors.
pub fn collect_paths(template: &Content, bind_attribute: &str) -> BTreeSet<String> {
    fn tokens(text: &str, out: &mut BTreeSet<String>) {
        for seg in segments(text) {
            if let Segment::Token(path) = seg {
                out.insert(path.to_owned());
            }
        }
    }
    fn go(node: &Content, bind_attribute: &str, out: &mut BTreeSet<String>) {
        match node {
            Content::Text(t) => tokens(t, out),
            Content::Element(el) => {
                for attr in el.attrs.iter().filter(|a| a.name != bind_attribute) {
                    tokens(&attr.value, out);
                }
                if !is_hole(el, bind_attribute) {
                    el.children.iter().for_each(|c| go(c, bind_attribute, out));
                }
            }
            Content::List(items) => items.iter().for_each(|c| go(c, bind_attribute, out)),
        }
    }
    let mut out = BTreeSet::new();
    go(template, bind_attribute, &mut out);
    out
}

/// Inputs to [`render`].
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Source tokens resolve against; `None` renders every token empty.
    pub source: Option<&'a Source>,
    /// Binding doing the rendering (keys its handlers).
    pub binding: BindingId,
    /// Attribute declaring child regions.
    pub bind_attribute: &'a str,
}

/// Output of [`render`].
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    /// Populated content; regions are emptied.
    pub content: Content,
    /// Rendered value of every token path seen.
    pub bound: BTreeMap<String, String>,
    /// Handlers referenced from `on*` attributes.
    pub handlers: Vec<(Hash, Handler)>,
}

/// Substitutes tokens in `template`.
pub fn render(template: &Content, cx: &RenderContext<'_>) -> Rendered {
    let mut out = Rendered::default();
    out.content = render_node(template, cx, &mut out.bound, &mut out.handlers);
    out
}

fn resolve(cx: &RenderContext<'_>, path: &str) -> Option<Value> {
    cx.source.and_then(|s| s.resolve(path))
}

fn render_text(text: &str, cx: &RenderContext<'_>, bound: &mut BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    for seg in segments(text) {
        match seg {
            Segment::Text(t) => out.push_str(t),
            Segment::Token(path) => {
                let value = resolve(cx, path).map(|v| v.render()).unwrap_or_default();
                out.push_str(&value);
                bound.insert(path.to_owned(), value);
            }
        }
    }
    out
}

fn render_node(
    node: &Content,
    cx: &RenderContext<'_>,
    bound: &mut BTreeMap<String, String>,
    handlers: &mut Vec<(Hash, Handler)>,
) -> Content {
    match node {
        Content::Text(t) => Content::Text(render_text(t, cx, bound)),
        Content::List(items) => Content::List(
            items
                .iter()
                .map(|c| render_node(c, cx, bound, handlers))
                .collect(),
        ),
        Content::Element(el) => {
            let mut out = Element::new(&el.tag);
            for attr in &el.attrs {
                let value = if attr.name == cx.bind_attribute {
                    attr.value.clone()
                } else if let Some(key) = bind_handler(&attr.name, &attr.value, cx, bound, handlers) {
                    handler_attr_value(&key)
                } else {
                    render_text(&attr.value, cx, bound)
                };
                out.set_attr(&attr.name, &value);
            }
            if !is_hole(el, cx.bind_attribute) {
                out.children = el
                    .children
                    .iter()
                    .map(|c| render_node(c, cx, bound, handlers))
                    .collect();
            }
            Content::Element(out)
        }
    }
}

fn bind_handler(
    name: &str,
    value: &str,
    cx: &RenderContext<'_>,
    bound: &mut BTreeMap<String, String>,
    handlers: &mut Vec<(Hash, Handler)>,
) -> Option<Hash> {
    if !name.starts_with("on") {
        return None;
    }
    let segs = segments(value.trim());
    let [Segment::Token(path)] = segs.as_slice() else {
        return None;
    };
    let Value::Handler(handler) = resolve(cx, path)? else {
        return None;
    };
    let key = handler_key(cx.binding, path);
    // Tracked like any token so a swapped closure invalidates reuse.
    bound.insert((*path).to_owned(), handler_attr_value(&key));
    handlers.push((key, handler));
    Some(key)
}

/// Attribute value for a bound handler.
pub fn handler_attr_value(key: &Hash) -> String {
    format!("{HANDLER_PREFIX}{}", hex::encode(key))
}

/// Parses a handler attribute value back into its key.
pub fn parse_handler_attr(value: &str) -> Option<Hash> {
    let hex_key = value.strip_prefix(HANDLER_PREFIX)?;
    let bytes = hex::decode(hex_key).ok()?;
    bytes.try_into().ok()
}

/// Reconciles a live multi-value attribute against a re-render.
///
/// `live` is what the node carries now, `last` what was bound last time and
/// `next` what is bound now. A live token found in `last` was bound and is
/// replaced; tokens not in `last` are manual edits and are kept, except when
/// the three token lists are index-aligned and the bound token at that index
/// was renamed, in which case the rename wins.
pub fn reconcile_tokens(live: &str, last: &str, next: &str) -> String {
    let live: Vec<&str> = live.split_whitespace().collect();
    let last: Vec<&str> = last.split_whitespace().collect();
    let next: Vec<&str> = next.split_whitespace().collect();
    let same_count = last.len() == next.len();
    let aligned = same_count && live.len() == last.len();

    // `covered[k]`: next[k] already accounted for by a live token.
    let mut covered = vec![false; next.len()];
    let mut out: Vec<&str> = Vec::new();
    for (i, token) in live.iter().enumerate() {
        let replacement = match last.iter().position(|t| t == token) {
            Some(k) if same_count => {
                covered[k] = true;
                Some(next[k])
            }
            Some(_) => None,
            None if aligned => {
                covered[i] = true;
                Some(if last[i] == next[i] { *token } else { next[i] })
            }
            None => Some(*token),
        };
        if let Some(t) = replacement {
            if !out.contains(&t) {
                out.push(t);
            }
        }
    }
    for (k, token) in next.iter().enumerate() {
        if !covered[k] && !out.contains(token) {
            out.push(*token);
        }
    }
    out.join(" ")
}

/// Handlers registered by rendered bindings, keyed by handler key.
#[derive(Debug, Default)]
pub struct HandlerTable {
    entries: FxHashMap<Hash, (BindingId, Handler)>,
}

impl HandlerTable {
    /// Registers (or replaces) `handler` under `key`.
    pub fn insert(&mut self, key: Hash, binding: BindingId, handler: Handler) {
        self.entries.insert(key, (binding, handler));
    }

    /// Looks up a handler.
    pub fn get(&self, key: &Hash) -> Option<&(BindingId, Handler)> {
        self.entries.get(key)
    }

    /// Drops every handler registered by `binding`.
    pub fn remove_binding(&mut self, binding: BindingId) {
        self.entries.retain(|_, (b, _)| *b != binding);
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_dom::{parse, to_markup};

    fn cx(source: &Source) -> RenderContext<'_> {
        RenderContext {
            source: Some(source),
            binding: BindingId(7),
            bind_attribute: "data-bind",
        }
    }

    #[test]
    fn segments_split_tokens() {
        assert_eq!(
            segments("a {{ x.y }} b{{z}}"),
            vec![
                Segment::Text("a "),
                Segment::Token("x.y"),
                Segment::Text(" b"),
                Segment::Token("z"),
            ]
        );
        assert_eq!(segments("open {{ never"), vec![Segment::Text("open {{ never")]);
    }

    #[test]
    fn render_substitutes_text_and_attributes() {
        let src = Source::from_json(&json!({"name": "ada", "kind": "admin", "n": null}));
        let t = parse(r#"<p class="user {{kind}}">hi {{name}}{{n}}</p>"#).unwrap();
        let r = render(&t, &cx(&src));
        assert_eq!(to_markup(&r.content), r#"<p class="user admin">hi ada</p>"#);
        assert_eq!(r.bound.get("name").map(String::as_str), Some("ada"));
        assert_eq!(r.bound.get("n").map(String::as_str), Some(""));
    }

    #[test]
    fn regions_keep_attributes_and_lose_children() {
        let src = Source::from_json(&json!({"id": 3, "items": [1]}));
        let t = parse(r#"<ul id="{{id}}" data-bind="items"><li>{{.}}</li></ul>"#).unwrap();
        let r = render(&t, &cx(&src));
        assert_eq!(to_markup(&r.content), r#"<ul id="3" data-bind="items"></ul>"#);
        let paths = collect_paths(&t, "data-bind");
        assert_eq!(paths.into_iter().collect::<Vec<_>>(), vec!["id".to_owned()]);
    }

    #[test]
    fn handler_attributes_register_keys() {
        let src = Source::object();
        src.set("save", Value::handler(|_| {}));
        let t = parse(r#"<button onclick="{{save}}">go</button>"#).unwrap();
        let r = render(&t, &cx(&src));
        assert_eq!(r.handlers.len(), 1);
        let el = r.content.roots()[0].as_element().unwrap();
        let key = parse_handler_attr(el.attr("onclick").unwrap()).unwrap();
        assert_eq!(key, r.handlers[0].0);
        assert_eq!(key, handler_key(BindingId(7), "save"));
        assert!(r.bound.contains_key("save"));
    }

    #[test]
    fn reconcile_tokens_keeps_manual_edits() {
        assert_eq!(reconcile_tokens("btn active", "btn", "btn-lg"), "btn-lg active");
        assert_eq!(reconcile_tokens("a b", "a b", "a c"), "a c");
        assert_eq!(reconcile_tokens("a x", "a b", "a b"), "a x");
    }

    #[test]
    fn reconcile_tokens_maps_aligned_renames() {
        assert_eq!(reconcile_tokens("a x", "a b", "a c"), "a c");
        // Counts differ: the manual token stays and bound tokens follow.
        assert_eq!(reconcile_tokens("a x", "a b", "a c d"), "x a c d");
    }
}
