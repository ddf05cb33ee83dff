// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Positional structural comparison of two content trees.
//!
//! Children are paired by index, never by key: node `i` of `a` is compared
//! with node `i` of `b`, and surplus nodes on either side are reported as
//! one-sided. Keyed matching of child bindings happens one level up in the
//! reconciler, which is why a positional walk is sufficient here.

use bitflags::bitflags;

use crate::content::Content;

bitflags! {
    /// Which side(s) a difference applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DiffFlags: u8 {
        /// Present only in `a` (removed).
        const A_ONLY = 0b001;
        /// Present only in `b` (added).
        const B_ONLY = 0b010;
        /// Difference lives below this node.
        const CHILDREN = 0b100;
    }
}

/// What differs between two paired nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DifferenceKind {
    /// One side has no node at this position, or the node kinds differ.
    Node,
    /// Both are elements with different tags.
    Tag,
    /// Both are text leaves with different text.
    Text,
    /// The named attribute was added, removed, or changed.
    Attribute(String),
    /// Child count differs or some descendant differs.
    Children,
}

/// One reported difference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Difference {
    /// What differs.
    pub kind: DifferenceKind,
    /// Side flags; empty means "changed on both sides".
    pub flags: DiffFlags,
}

impl Difference {
    fn new(kind: DifferenceKind, flags: DiffFlags) -> Self {
        Self { kind, flags }
    }
}

/// Comparison node pairing `a` and `b` at one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison<'a> {
    /// Left node, absent when only `b` has a node here.
    pub a: Option<&'a Content>,
    /// Right node, absent when only `a` has a node here.
    pub b: Option<&'a Content>,
    /// Differences at this position.
    pub differences: Vec<Difference>,
    /// Positional comparisons of the children.
    pub children: Vec<Comparison<'a>>,
}

impl Comparison<'_> {
    /// Returns `true` if anything at or below this position differs.
    pub fn has_changes(&self) -> bool {
        !self.differences.is_empty()
    }

    /// Returns `true` if the two subtrees are structurally equal.
    pub fn is_equal(&self) -> bool {
        !self.has_changes()
    }

    /// Returns `true` if a difference of `kind` is recorded at this position.
    pub fn has(&self, kind: &DifferenceKind) -> bool {
        self.differences.iter().any(|d| &d.kind == kind)
    }

    /// Returns `true` if the nodes at this position must be replaced outright.
    pub fn is_replacement(&self) -> bool {
        self.has(&DifferenceKind::Node) || self.has(&DifferenceKind::Tag)
    }

    /// Changed attribute names with their side flags.
    pub fn attribute_changes(&self) -> impl Iterator<Item = (&str, DiffFlags)> + '_ {
        self.differences.iter().filter_map(|d| match &d.kind {
            DifferenceKind::Attribute(name) => Some((name.as_str(), d.flags)),
            _ => None,
        })
    }
}

/// Compares `a` and `b` positionally.
///
/// Lists compare their members pairwise; the returned root pairs the lists
/// themselves and carries the member comparisons as `children`.
pub fn compare<'a>(a: &'a Content, b: &'a Content) -> Comparison<'a> {
    compare_opt(Some(a), Some(b))
}

fn compare_opt<'a>(a: Option<&'a Content>, b: Option<&'a Content>) -> Comparison<'a> {
    let mut differences = Vec::new();
    let mut children = Vec::new();
    match (a, b) {
        (None, None) => {}
        (Some(_), None) => differences.push(Difference::new(DifferenceKind::Node, DiffFlags::A_ONLY)),
        (None, Some(_)) => differences.push(Difference::new(DifferenceKind::Node, DiffFlags::B_ONLY)),
        (Some(Content::Text(x)), Some(Content::Text(y))) => {
            if x != y {
                differences.push(Difference::new(DifferenceKind::Text, DiffFlags::empty()));
            }
        }
        (Some(Content::List(xs)), Some(Content::List(ys))) => {
            children = compare_children(xs, ys);
        }
        (Some(Content::Element(x)), Some(Content::Element(y))) => {
            if x.tag != y.tag {
                differences.push(Difference::new(DifferenceKind::Tag, DiffFlags::empty()));
            }
            for attr in &x.attrs {
                match y.attr(&attr.name) {
                    None => differences.push(Difference::new(
                        DifferenceKind::Attribute(attr.name.clone()),
                        DiffFlags::A_ONLY,
                    )),
                    Some(v) if v != attr.value => differences.push(Difference::new(
                        DifferenceKind::Attribute(attr.name.clone()),
                        DiffFlags::empty(),
                    )),
                    Some(_) => {}
                }
            }
            for attr in &y.attrs {
                if x.attr(&attr.name).is_none() {
                    differences.push(Difference::new(
                        DifferenceKind::Attribute(attr.name.clone()),
                        DiffFlags::B_ONLY,
                    ));
                }
            }
            children = compare_children(&x.children, &y.children);
        }
        (Some(_), Some(_)) => differences.push(Difference::new(DifferenceKind::Node, DiffFlags::empty())),
    }
    if children.iter().any(Comparison::has_changes) {
        differences.push(Difference::new(DifferenceKind::Children, DiffFlags::CHILDREN));
    }
    Comparison {
        a,
        b,
        differences,
        children,
    }
}

fn compare_children<'a>(xs: &'a [Content], ys: &'a [Content]) -> Vec<Comparison<'a>> {
    let len = xs.len().max(ys.len());
    (0..len)
        .map(|i| compare_opt(xs.get(i), ys.get(i)))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use proptest::prelude::*;

    #[test]
    fn identical_trees_have_no_changes() {
        let a = parse(r#"<ul class="x"><li>1</li><li>2</li></ul>"#).unwrap();
        let b = a.clone();
        let cmp = compare(&a, &b);
        assert!(cmp.is_equal());
        assert_eq!(cmp.children.len(), 1);
    }

    #[test]
    fn text_change_is_reported_on_the_leaf_and_bubbles_as_children() {
        let a = parse("<p><b>x</b></p>").unwrap();
        let b = parse("<p><b>y</b></p>").unwrap();
        let cmp = compare(&a, &b);
        let p = &cmp.children[0];
        assert!(p.has(&DifferenceKind::Children));
        assert!(!p.has(&DifferenceKind::Text));
        let leaf = &p.children[0].children[0];
        assert_eq!(
            leaf.differences,
            vec![Difference::new(DifferenceKind::Text, DiffFlags::empty())]
        );
    }

    #[test]
    fn attribute_sides_are_flagged() {
        let a = parse(r#"<a href="/" title="t"></a>"#).unwrap();
        let b = parse(r#"<a href="/x" rel="r"></a>"#).unwrap();
        let cmp = compare(&a, &b);
        let mut changes: Vec<_> = cmp.children[0]
            .attribute_changes()
            .map(|(n, f)| (n.to_owned(), f))
            .collect();
        changes.sort_by(|l, r| l.0.cmp(&r.0));
        assert_eq!(
            changes,
            vec![
                ("href".to_owned(), DiffFlags::empty()),
                ("rel".to_owned(), DiffFlags::B_ONLY),
                ("title".to_owned(), DiffFlags::A_ONLY),
            ]
        );
    }

    #[test]
    fn surplus_children_are_one_sided() {
        let a = parse("<ul><li>1</li></ul>").unwrap();
        let b = parse("<ul><li>1</li><li>2</li></ul>").unwrap();
        let cmp = compare(&a, &b);
        let ul = &cmp.children[0];
        assert!(ul.children[0].is_equal());
        assert_eq!(ul.children[1].a, None);
        assert_eq!(
            ul.children[1].differences[0].flags,
            DiffFlags::B_ONLY
        );
    }

    #[test]
    fn tag_and_kind_mismatches_are_replacements() {
        let a = parse("<p>1</p>text").unwrap();
        let b = parse("<div>1</div><i></i>").unwrap();
        let cmp = compare(&a, &b);
        assert!(cmp.children[0].is_replacement());
        assert!(cmp.children[1].is_replacement());
    }

    fn arb_content() -> impl Strategy<Value = Content> {
        let leaf = "[a-c]{0,2}".prop_map(|s| Content::Text(s));
        leaf.prop_recursive(3, 16, 3, |inner| {
            (
                prop_oneof![Just("p"), Just("li")],
                proptest::option::of("[xy]"),
                proptest::collection::vec(inner, 0..3),
            )
                .prop_map(|(tag, class, children)| {
                    let mut el = crate::content::Element::new(tag);
                    if let Some(c) = class {
                        el.set_attr("class", &c);
                    }
                    el.children = children;
                    Content::Element(el)
                })
        })
    }

    proptest! {
        #[test]
        fn compare_is_equal_iff_trees_are_equal(a in arb_content(), b in arb_content()) {
            let la = Content::List(vec![a]);
            let lb = Content::List(vec![b]);
            prop_assert_eq!(compare(&la, &lb).is_equal(), la == lb);
            prop_assert!(compare(&la, &la).is_equal());
        }
    }
}
