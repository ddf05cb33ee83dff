// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content merge: turns a tree comparison into edits on live nodes.
//!
//! Merging is two-phase. [`plan`] walks the comparison of the previously
//! rendered content against the new content alongside the live nodes,
//! builds any replacement subtrees *detached*, and records edits as
//! [`MergeOp`]s. Nothing attached is touched until [`apply`], so a session
//! canceled between the two can discard the plan and leave the document as
//! it was.
//!
//! Elements carrying the bind attribute are holes owned by child bindings:
//! the walk records their live node as the child's host and never descends.

use rustc_hash::FxHashMap;
use tether_dom::{compare, Comparison, Content, DiffFlags, DifferenceKind, Document, DocumentError, Element, IndexPath, NodeId};
use tracing::warn;

use crate::binder::{is_hole, reconcile_tokens};

/// Inputs shared by one planning pass.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    /// Attribute declaring child regions.
    pub bind_attribute: &'a str,
    /// Attributes reconciled token by token.
    pub multi_value: &'a [String],
    /// Overwrite mode forced into a merge: a tag change keeps the old
    /// element's children and moves them into the replacement.
    pub forced: bool,
}

impl MergeContext<'_> {
    fn is_multi_value(&self, name: &str) -> bool {
        self.multi_value.iter().any(|m| m == name)
    }
}

/// One recorded edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOp {
    /// Replace a text node's text.
    SetText {
        /// Text node.
        node: NodeId,
        /// New text.
        text: String,
    },
    /// Set an attribute.
    SetAttr {
        /// Element.
        node: NodeId,
        /// Attribute name.
        name: String,
        /// New value.
        value: String,
    },
    /// Remove an attribute.
    RemoveAttr {
        /// Element.
        node: NodeId,
        /// Attribute name.
        name: String,
    },
    /// Put `new` where `old` is, then destroy `old`.
    Replace {
        /// Live node.
        old: NodeId,
        /// Detached replacement.
        new: NodeId,
    },
    /// Append a detached node.
    Append {
        /// Live parent.
        parent: NodeId,
        /// Detached node.
        node: NodeId,
    },
    /// Destroy a live node.
    Remove(NodeId),
    /// Move every child of `from` into `to`.
    MoveChildren {
        /// Source element.
        from: NodeId,
        /// Destination element.
        to: NodeId,
    },
}

/// Result of [`plan`].
#[derive(Debug, Default)]
pub struct MergePlan {
    /// Edits in application order.
    pub ops: Vec<MergeOp>,
    /// Root nodes after the merge, in order. Kept roots are live; new ones
    /// are detached until placed.
    pub roots: Vec<NodeId>,
    /// Host node of every region, by index path into the new content.
    pub hosts: FxHashMap<IndexPath, NodeId>,
    /// Detached subtrees built by the plan.
    pub built: Vec<NodeId>,
}

impl MergePlan {
    /// Returns `true` if applying the plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.ops.is_empty() && self.built.is_empty()
    }

    /// Host node of the region at `path`.
    pub fn host(&self, path: &[usize]) -> Option<NodeId> {
        self.hosts.get(path).copied()
    }

    /// Destroys subtrees the plan built but never attached.
    pub fn discard(&self, doc: &mut Document) {
        for node in &self.built {
            if doc.contains(*node)
                && !doc.is_attached(*node)
                && doc.parent(*node).is_none()
                && doc.destroy(*node).is_err()
            {
                warn!(node = %node, "built subtree vanished during discard");
            }
        }
    }
}

struct Planner<'d, 'c, 'a> {
    doc: &'d mut Document,
    cx: &'c MergeContext<'a>,
    plan: MergePlan,
}

/// Plans the merge of `new` over `live`, the nodes rendered from `old`.
///
/// With `old == None`, or when the live roots no longer line up with `old`,
/// every live root is removed and `new` is built from scratch.
pub fn plan(
    doc: &mut Document,
    old: Option<&Content>,
    new: &Content,
    live: &[NodeId],
    cx: &MergeContext<'_>,
) -> Result<MergePlan, DocumentError> {
    let mut p = Planner {
        doc,
        cx,
        plan: MergePlan::default(),
    };
    let news = new.roots();
    match old {
        Some(old) if old.roots().len() == live.len() => {
            let olds = old.roots();
            for i in 0..olds.len().max(news.len()) {
                match (olds.get(i), news.get(i)) {
                    (Some(o), Some(n)) => {
                        let cmp = compare(o, n);
                        let node = p.walk(live[i], &cmp, vec![i])?;
                        p.plan.roots.push(node);
                    }
                    (Some(_), None) => p.plan.ops.push(MergeOp::Remove(live[i])),
                    (None, Some(n)) => {
                        let node = p.build(n, vec![i])?;
                        p.plan.roots.push(node);
                    }
                    (None, None) => {}
                }
            }
        }
        _ => {
            p.plan.ops.extend(live.iter().map(|n| MergeOp::Remove(*n)));
            for (i, n) in news.iter().enumerate() {
                let node = p.build(n, vec![i])?;
                p.plan.roots.push(node);
            }
        }
    }
    Ok(p.plan)
}

impl Planner<'_, '_, '_> {
    fn hole<'e>(&self, content: &'e Content) -> Option<&'e Element> {
        content
            .as_element()
            .filter(|el| is_hole(el, self.cx.bind_attribute))
    }

    fn walk(&mut self, node: NodeId, cmp: &Comparison<'_>, path: IndexPath) -> Result<NodeId, DocumentError> {
        let (Some(a), Some(b)) = (cmp.a, cmp.b) else {
            return Ok(node);
        };
        if cmp.is_replacement() {
            let forced_tag = self.cx.forced
                && cmp.has(&DifferenceKind::Tag)
                && a.as_element().is_some();
            if let (true, Some(eb)) = (forced_tag, b.as_element()) {
                let shell = self.doc.create_element(&eb.tag, eb.attrs.clone());
                self.plan.built.push(shell);
                self.plan.ops.push(MergeOp::MoveChildren { from: node, to: shell });
                self.plan.ops.push(MergeOp::Replace { old: node, new: shell });
                if self.hole(b).is_some() {
                    self.plan.hosts.insert(path, shell);
                } else {
                    self.walk_children(node, shell, cmp, &path)?;
                }
                return Ok(shell);
            }
            let built = self.build(b, path)?;
            self.plan.ops.push(MergeOp::Replace { old: node, new: built });
            return Ok(built);
        }
        match (a, b) {
            (Content::Text(_), Content::Text(text)) => {
                if cmp.has(&DifferenceKind::Text) {
                    self.plan.ops.push(MergeOp::SetText {
                        node,
                        text: text.clone(),
                    });
                }
            }
            (Content::Element(ea), Content::Element(eb)) => {
                self.patch_attrs(node, cmp, ea, eb);
                if self.hole(b).is_some() {
                    self.plan.hosts.insert(path, node);
                } else {
                    self.walk_children(node, node, cmp, &path)?;
                }
            }
            _ => {}
        }
        Ok(node)
    }

    fn walk_children(
        &mut self,
        live_parent: NodeId,
        target: NodeId,
        cmp: &Comparison<'_>,
        path: &IndexPath,
    ) -> Result<(), DocumentError> {
        let live = self.doc.children(live_parent).to_vec();
        let a_count = cmp.children.iter().filter(|c| c.a.is_some()).count();
        if live.len() != a_count {
            // Someone restructured the children by hand; rebuild them.
            self.plan.ops.extend(live.iter().map(|n| MergeOp::Remove(*n)));
            for (i, child) in cmp.children.iter().enumerate() {
                if let Some(b) = child.b {
                    let node = self.build(b, child_path(path, i))?;
                    self.plan.ops.push(MergeOp::Append { parent: target, node });
                }
            }
            return Ok(());
        }
        for (i, child) in cmp.children.iter().enumerate() {
            match (child.a, child.b) {
                (Some(_), Some(_)) => {
                    self.walk(live[i], child, child_path(path, i))?;
                }
                (Some(_), None) => self.plan.ops.push(MergeOp::Remove(live[i])),
                (None, Some(b)) => {
                    let node = self.build(b, child_path(path, i))?;
                    self.plan.ops.push(MergeOp::Append { parent: target, node });
                }
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn patch_attrs(&mut self, node: NodeId, cmp: &Comparison<'_>, a: &Element, b: &Element) {
        for (name, flags) in cmp.attribute_changes() {
            if flags.contains(DiffFlags::A_ONLY) {
                self.plan.ops.push(MergeOp::RemoveAttr {
                    node,
                    name: name.to_owned(),
                });
                continue;
            }
            let next = b.attr(name).unwrap_or_default();
            let value = match a.attr(name) {
                Some(prev) if self.cx.is_multi_value(name) => {
                    let live = self.doc.attr(node, name).unwrap_or_default();
                    reconcile_tokens(live, prev, next)
                }
                _ => next.to_owned(),
            };
            self.plan.ops.push(MergeOp::SetAttr {
                node,
                name: name.to_owned(),
                value,
            });
        }
    }

    /// Builds a detached subtree and records it for discard.
    fn build(&mut self, content: &Content, path: IndexPath) -> Result<NodeId, DocumentError> {
        let node = self.build_tree(content, path)?;
        self.plan.built.push(node);
        Ok(node)
    }

    fn build_tree(&mut self, content: &Content, path: IndexPath) -> Result<NodeId, DocumentError> {
        Ok(match content {
            Content::Text(t) => self.doc.create_text(t),
            Content::Element(el) => {
                let node = self.doc.create_element(&el.tag, el.attrs.clone());
                if is_hole(el, self.cx.bind_attribute) {
                    self.plan.hosts.insert(path, node);
                } else {
                    for (i, child) in el.children.iter().enumerate() {
                        let c = self.build_tree(child, child_path(&path, i))?;
                        self.doc.append_child(node, c)?;
                    }
                }
                node
            }
            Content::List(items) => {
                let frag = self.doc.create_fragment();
                for (i, child) in items.iter().enumerate() {
                    let c = self.build_tree(child, child_path(&path, i))?;
                    self.doc.append_child(frag, c)?;
                }
                frag
            }
        })
    }
}

fn child_path(path: &IndexPath, i: usize) -> IndexPath {
    let mut p = path.clone();
    p.push(i);
    p
}

/// Applies `plan` to the document.
pub fn apply(doc: &mut Document, plan: &MergePlan) -> Result<(), DocumentError> {
    for op in &plan.ops {
        match op {
            MergeOp::SetText { node, text } => doc.set_text(*node, text)?,
            MergeOp::SetAttr { node, name, value } => doc.set_attr(*node, name, value)?,
            MergeOp::RemoveAttr { node, name } => doc.remove_attr(*node, name)?,
            MergeOp::Replace { old, new } => {
                if doc.parent(*old).is_some() {
                    doc.replace(*old, *new)?;
                }
                if doc.contains(*old) {
                    doc.destroy(*old)?;
                }
            }
            MergeOp::Append { parent, node } => doc.append_child(*parent, *node)?,
            MergeOp::Remove(node) => {
                if doc.contains(*node) {
                    doc.destroy(*node)?;
                }
            }
            MergeOp::MoveChildren { from, to } => doc.move_children(*from, *to)?,
        }
    }
    Ok(())
}
