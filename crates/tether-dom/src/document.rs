// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Arena-backed live document.
//!
//! Every node lives in a single `Vec` and is addressed by a [`NodeId`]
//! index. Destroyed nodes keep their slot (marked dead) so ids are never
//! reused within a document; side tables keyed by `NodeId` therefore never
//! alias a different node.

use thiserror::Error;

use crate::content::{Attr, Content, Element};
use crate::parse::{write_element_close, write_element_open, write_text};

/// Arena index of a node.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    /// Returns the raw arena index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Payload of a document node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The document root; exactly one per document.
    Root,
    /// Element with tag and attributes.
    Element {
        /// Tag name.
        tag: String,
        /// Attributes in insertion order.
        attrs: Vec<Attr>,
    },
    /// Text leaf.
    Text(String),
    /// Parking container for detached node lists.
    Fragment,
}

/// Errors returned by document mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// The id does not name a live node.
    #[error("unknown or destroyed node {0}")]
    UnknownNode(NodeId),
    /// The operation requires an element.
    #[error("node {0} is not an element")]
    NotAnElement(NodeId),
    /// The operation requires a text node.
    #[error("node {0} is not a text node")]
    NotText(NodeId),
    /// The node cannot hold children.
    #[error("node {0} cannot have children")]
    NotAContainer(NodeId),
    /// Inserting would make a node its own ancestor.
    #[error("inserting {child} under {parent} would create a cycle")]
    Cycle {
        /// Intended parent.
        parent: NodeId,
        /// Node being inserted.
        child: NodeId,
    },
    /// A reference node is not a child of the given parent.
    #[error("node {child} is not a child of {parent}")]
    NotAChild {
        /// Expected parent.
        parent: NodeId,
        /// Reference node.
        child: NodeId,
    },
    /// The root cannot be moved or destroyed.
    #[error("the document root cannot be moved or destroyed")]
    RootImmovable,
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    live: bool,
}

/// Arena of live nodes with parent/child links.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates a document containing only its root.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Root,
                parent: None,
                children: Vec::new(),
                live: true,
            }],
        }
    }

    /// Returns the root node.
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of live nodes, root included.
    pub fn live_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.live).count()
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
            live: true,
        });
        id
    }

    fn data(&self, id: NodeId) -> Result<&NodeData, DocumentError> {
        self.nodes
            .get(id.index())
            .filter(|n| n.live)
            .ok_or(DocumentError::UnknownNode(id))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DocumentError> {
        self.nodes
            .get_mut(id.index())
            .filter(|n| n.live)
            .ok_or(DocumentError::UnknownNode(id))
    }

    /// Creates a detached element.
    pub fn create_element(&mut self, tag: &str, attrs: Vec<Attr>) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: tag.to_owned(),
            attrs,
        })
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_owned()))
    }

    /// Creates an empty, detached fragment.
    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeKind::Fragment)
    }

    /// Materializes `content` as detached nodes and returns the new roots.
    pub fn build(&mut self, content: &Content) -> Vec<NodeId> {
        content
            .roots()
            .iter()
            .flat_map(|root| self.build_node(root))
            .collect()
    }

    fn build_node(&mut self, content: &Content) -> Vec<NodeId> {
        match content {
            Content::Text(t) => vec![self.create_text(t)],
            Content::Element(el) => vec![self.build_element(el)],
            Content::List(items) => items.iter().flat_map(|c| self.build_node(c)).collect(),
        }
    }

    fn build_element(&mut self, el: &Element) -> NodeId {
        let id = self.create_element(&el.tag, el.attrs.clone());
        for child in &el.children {
            for node in self.build_node(child) {
                self.nodes[node.index()].parent = Some(id);
                self.nodes[id.index()].children.push(node);
            }
        }
        id
    }

    /// Returns `true` if `id` names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.data(id).is_ok()
    }

    /// Node payload.
    pub fn kind(&self, id: NodeId) -> Result<&NodeKind, DocumentError> {
        Ok(&self.data(id)?.kind)
    }

    /// Parent of `id`, if attached to one.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).ok().and_then(|n| n.parent)
    }

    /// Children of `id` (empty for unknown nodes).
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.data(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Position of `id` among its parent's children.
    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|c| *c == id)
    }

    /// Following sibling of `id`.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let idx = self.index_in_parent(id)?;
        self.children(parent).get(idx + 1).copied()
    }

    /// Preceding sibling of `id`.
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let idx = self.index_in_parent(id)?;
        idx.checked_sub(1)
            .and_then(|i| self.children(parent).get(i).copied())
    }

    /// Returns `true` if `id` is connected to the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if node == self.root() {
                return true;
            }
            cur = self.parent(node);
        }
        false
    }

    /// Returns `true` if `ancestor` is `node` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(n) = cur {
            if n == ancestor {
                return true;
            }
            cur = self.parent(n);
        }
        false
    }

    /// Tag name of an element.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.data(id).ok()?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    /// Value of attribute `name` on an element.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.data(id).ok()?.kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|a| a.name == name)
                .map(|a| a.value.as_str()),
            _ => None,
        }
    }

    /// All attributes of an element.
    pub fn attrs(&self, id: NodeId) -> &[Attr] {
        match self.data(id).map(|n| &n.kind) {
            Ok(NodeKind::Element { attrs, .. }) => attrs,
            _ => &[],
        }
    }

    /// Sets an attribute value on an element.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DocumentError> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Element { attrs, .. } => {
                match attrs.iter_mut().find(|a| a.name == name) {
                    Some(a) => value.clone_into(&mut a.value),
                    None => attrs.push(Attr::new(name, value)),
                }
                Ok(())
            }
            _ => Err(DocumentError::NotAnElement(id)),
        }
    }

    /// Removes an attribute from an element.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<(), DocumentError> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Element { attrs, .. } => {
                attrs.retain(|a| a.name != name);
                Ok(())
            }
            _ => Err(DocumentError::NotAnElement(id)),
        }
    }

    /// Text of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.data(id).ok()?.kind {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Replaces the text of a text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DocumentError> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Text(t) => {
                text.clone_into(t);
                Ok(())
            }
            _ => Err(DocumentError::NotText(id)),
        }
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> Result<(), DocumentError> {
        match self.data(parent)?.kind {
            NodeKind::Text(_) => return Err(DocumentError::NotAContainer(parent)),
            NodeKind::Root | NodeKind::Element { .. } | NodeKind::Fragment => {}
        }
        self.data(child)?;
        if child == self.root() {
            return Err(DocumentError::RootImmovable);
        }
        if self.is_ancestor_or_self(child, parent) {
            return Err(DocumentError::Cycle { parent, child });
        }
        Ok(())
    }

    /// Removes `id` from its parent, leaving it alive and parentless.
    pub fn detach(&mut self, id: NodeId) -> Result<(), DocumentError> {
        if id == self.root() {
            return Err(DocumentError::RootImmovable);
        }
        let parent = self.data(id)?.parent;
        if let Some(p) = parent {
            self.nodes[p.index()].children.retain(|c| *c != id);
        }
        self.nodes[id.index()].parent = None;
        Ok(())
    }

    /// Inserts `child` at `index` among `parent`'s children.
    ///
    /// `child` is detached from its current parent first; `index` is clamped.
    pub fn insert_at(
        &mut self,
        parent: NodeId,
        index: usize,
        child: NodeId,
    ) -> Result<(), DocumentError> {
        self.check_insert(parent, child)?;
        self.detach(child)?;
        let children = &mut self.nodes[parent.index()].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.index()].parent = Some(parent);
        Ok(())
    }

    /// Appends `child` to `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DocumentError> {
        self.insert_at(parent, usize::MAX, child)
    }

    /// Inserts `child` right after `prev` under `parent`, or first when `prev` is `None`.
    pub fn insert_after(
        &mut self,
        parent: NodeId,
        prev: Option<NodeId>,
        child: NodeId,
    ) -> Result<(), DocumentError> {
        if prev == Some(child) {
            return Ok(());
        }
        self.check_insert(parent, child)?;
        self.detach(child)?;
        let index = match prev {
            None => 0,
            Some(p) => {
                let pos = self
                    .children(parent)
                    .iter()
                    .position(|c| *c == p)
                    .ok_or(DocumentError::NotAChild { parent, child: p })?;
                pos + 1
            }
        };
        self.insert_at(parent, index, child)
    }

    /// Inserts `child` before `reference`, which must have a parent.
    pub fn insert_before(&mut self, reference: NodeId, child: NodeId) -> Result<(), DocumentError> {
        let parent = self
            .parent(reference)
            .ok_or(DocumentError::UnknownNode(reference))?;
        self.check_insert(parent, child)?;
        self.detach(child)?;
        let index = self
            .index_in_parent(reference)
            .ok_or(DocumentError::NotAChild {
                parent,
                child: reference,
            })?;
        self.insert_at(parent, index, child)
    }

    /// Puts `new` where `old` is and detaches `old`.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> Result<(), DocumentError> {
        if old == new {
            return Ok(());
        }
        match self.parent(old) {
            Some(_) => {
                self.insert_before(old, new)?;
                self.detach(old)
            }
            None => {
                self.data(new)?;
                self.detach(new)
            }
        }
    }

    /// Moves every child of `from` to the end of `to`, preserving order.
    pub fn move_children(&mut self, from: NodeId, to: NodeId) -> Result<(), DocumentError> {
        let kids = self.children(from).to_vec();
        for kid in kids {
            self.append_child(to, kid)?;
        }
        Ok(())
    }

    /// Detaches `id` and marks it and its whole subtree dead.
    pub fn destroy(&mut self, id: NodeId) -> Result<(), DocumentError> {
        self.detach(id)?;
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let data = &mut self.nodes[n.index()];
            data.live = false;
            data.parent = None;
            stack.append(&mut data.children);
        }
        Ok(())
    }

    /// Removes every child of `id`, destroying them.
    pub fn clear_children(&mut self, id: NodeId) -> Result<(), DocumentError> {
        for kid in self.children(id).to_vec() {
            self.destroy(kid)?;
        }
        Ok(())
    }

    /// Snapshots the subtree at `id` as content; fragments become lists.
    pub fn to_content(&self, id: NodeId) -> Result<Content, DocumentError> {
        let data = self.data(id)?;
        let children = data
            .children
            .iter()
            .map(|c| self.to_content(*c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match &data.kind {
            NodeKind::Root | NodeKind::Fragment => Content::List(children),
            NodeKind::Text(t) => Content::Text(t.clone()),
            NodeKind::Element { tag, attrs } => Content::Element(Element {
                tag: tag.clone(),
                attrs: attrs.clone(),
                children,
            }),
        })
    }

    /// Serializes the subtree at `id`, including `id` itself.
    pub fn outer_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    /// Serializes the children of `id`.
    pub fn inner_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(*child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Ok(data) = self.data(id) else {
            return;
        };
        match &data.kind {
            NodeKind::Text(t) => write_text(t, out),
            NodeKind::Element { tag, attrs } => {
                write_element_open(tag, attrs, out);
                for child in &data.children {
                    self.write_node(*child, out);
                }
                write_element_close(tag, out);
            }
            NodeKind::Root | NodeKind::Fragment => {
                for child in &data.children {
                    self.write_node(*child, out);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::parse::parse;

    #[test]
    fn build_and_attach_round_trips_markup() {
        let mut doc = Document::new();
        let content = parse(r#"<ul class="a"><li>1</li><li>2</li></ul>"#).unwrap();
        let roots = doc.build(&content);
        assert_eq!(roots.len(), 1);
        assert!(!doc.is_attached(roots[0]));
        let root = doc.root();
        doc.append_child(root, roots[0]).unwrap();
        assert!(doc.is_attached(roots[0]));
        assert_eq!(
            doc.inner_markup(root),
            r#"<ul class="a"><li>1</li><li>2</li></ul>"#
        );
        assert_eq!(doc.to_content(roots[0]).unwrap(), content.roots()[0]);
    }

    #[test]
    fn insert_after_none_inserts_first() {
        let mut doc = Document::new();
        let host = doc.create_element("div", vec![]);
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        let c = doc.create_text("c");
        doc.append_child(host, a).unwrap();
        doc.insert_after(host, None, b).unwrap();
        doc.insert_after(host, Some(b), c).unwrap();
        assert_eq!(doc.children(host), &[b, c, a]);
        assert_eq!(doc.next_sibling(b), Some(c));
        assert_eq!(doc.previous_sibling(a), Some(c));
    }

    #[test]
    fn moving_a_node_detaches_it_first() {
        let mut doc = Document::new();
        let x = doc.create_element("x", vec![]);
        let y = doc.create_element("y", vec![]);
        let t = doc.create_text("t");
        doc.append_child(x, t).unwrap();
        doc.append_child(y, t).unwrap();
        assert!(doc.children(x).is_empty());
        assert_eq!(doc.parent(t), Some(y));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut doc = Document::new();
        let outer = doc.create_element("div", vec![]);
        let inner = doc.create_element("span", vec![]);
        doc.append_child(outer, inner).unwrap();
        assert_eq!(
            doc.append_child(inner, outer),
            Err(DocumentError::Cycle {
                parent: inner,
                child: outer
            })
        );
    }

    #[test]
    fn destroy_kills_subtree_and_keeps_ids_unique() {
        let mut doc = Document::new();
        let roots = doc.build(&parse("<p><b>x</b></p>").unwrap());
        let before = doc.live_count();
        doc.destroy(roots[0]).unwrap();
        assert_eq!(doc.live_count(), before - 3);
        assert!(!doc.contains(roots[0]));
        let fresh = doc.create_text("new");
        assert_ne!(fresh, roots[0]);
        assert!(doc.set_text(roots[0], "x").is_err());
    }

    #[test]
    fn replace_swaps_in_place() {
        let mut doc = Document::new();
        let host = doc.create_element("div", vec![]);
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        let c = doc.create_element("i", vec![]);
        doc.append_child(host, a).unwrap();
        doc.append_child(host, b).unwrap();
        doc.replace(a, c).unwrap();
        assert_eq!(doc.children(host), &[c, b]);
        assert_eq!(doc.parent(a), None);
    }
}
