// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Owned content trees.

use serde::{Deserialize, Serialize};

/// Position of a node inside a content tree: root index, then child indices.
pub type IndexPath = Vec<usize>;

/// A single `name="value"` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attr {
    /// Attribute name, lower-cased by the parser.
    pub name: String,
    /// Attribute value with entities decoded.
    pub value: String,
}

impl Attr {
    /// Builds an attribute from borrowed parts.
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }
}

/// Element node of a content tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    /// Tag name, lower-cased by the parser.
    pub tag: String,
    /// Attributes in source order.
    pub attrs: Vec<Attr>,
    /// Child nodes in source order.
    pub children: Vec<Content>,
}

impl Element {
    /// Creates an element with no attributes or children.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_owned(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns the value of `name`, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Sets `name` to `value`, replacing an existing attribute in place.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => value.clone_into(&mut attr.value),
            None => self.attrs.push(Attr::new(name, value)),
        }
    }

    /// Removes `name`, returning its previous value.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let idx = self.attrs.iter().position(|a| a.name == name)?;
        Some(self.attrs.remove(idx).value)
    }
}

/// Tagged content tree: an element, a text leaf, or a list of either.
///
/// A parsed template is always a `List` of its root nodes; lists never nest
/// inside element children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Content {
    /// Element node.
    Element(Element),
    /// Text leaf.
    Text(String),
    /// Ordered sequence of sibling nodes.
    List(Vec<Content>),
}

impl Default for Content {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl Content {
    /// Convenience constructor for a text leaf.
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_owned())
    }

    /// Returns the root nodes: the list members, or `self` as a single root.
    pub fn roots(&self) -> &[Content] {
        match self {
            Self::List(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// Mutable counterpart of [`Content::roots`].
    pub fn roots_mut(&mut self) -> &mut [Content] {
        match self {
            Self::List(items) => items,
            other => std::slice::from_mut(other),
        }
    }

    /// Child nodes of an element; empty for text and lists.
    pub fn children(&self) -> &[Content] {
        match self {
            Self::Element(el) => &el.children,
            Self::Text(_) | Self::List(_) => &[],
        }
    }

    /// Returns the element payload, if this is an element.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(el) => Some(el),
            Self::Text(_) | Self::List(_) => None,
        }
    }

    /// Mutable counterpart of [`Content::as_element`].
    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Self::Element(el) => Some(el),
            Self::Text(_) | Self::List(_) => None,
        }
    }

    /// Returns the text payload, if this is a text leaf.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Element(_) | Self::List(_) => None,
        }
    }

    /// Follows `path` (root index first) and returns the addressed node.
    pub fn at_path(&self, path: &[usize]) -> Option<&Content> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots().get(*first)?;
        for idx in rest {
            node = node.children().get(*idx)?;
        }
        Some(node)
    }

    /// Mutable counterpart of [`Content::at_path`].
    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Content> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots_mut().get_mut(*first)?;
        for idx in rest {
            node = match node {
                Self::Element(el) => el.children.get_mut(*idx)?,
                Self::Text(_) | Self::List(_) => return None,
            };
        }
        Some(node)
    }

    /// Visits every element depth-first in document order with its path.
    ///
    /// Returning `false` from `visit` skips that element's children.
    pub fn walk_elements(&self, mut visit: impl FnMut(&IndexPath, &Element) -> bool) {
        fn go(
            node: &Content,
            path: &mut IndexPath,
            visit: &mut dyn FnMut(&IndexPath, &Element) -> bool,
        ) {
            if let Content::Element(el) = node {
                if visit(path, el) {
                    for (i, child) in el.children.iter().enumerate() {
                        path.push(i);
                        go(child, path, visit);
                        path.pop();
                    }
                }
            }
        }
        let mut path = Vec::new();
        for (i, root) in self.roots().iter().enumerate() {
            path.push(i);
            go(root, &mut path, &mut visit);
            path.pop();
        }
    }

    /// Concatenated text of every leaf under this node.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        fn go(node: &Content, out: &mut String) {
            match node {
                Content::Text(t) => out.push_str(t),
                Content::Element(el) => el.children.iter().for_each(|c| go(c, out)),
                Content::List(items) => items.iter().for_each(|c| go(c, out)),
            }
        }
        go(self, &mut out);
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Content {
        let mut li = Element::new("li");
        li.children.push(Content::text("one"));
        let mut ul = Element::new("ul");
        ul.children.push(Content::Element(li));
        Content::List(vec![Content::Element(ul), Content::text("tail")])
    }

    #[test]
    fn at_path_walks_roots_then_children() {
        let c = sample();
        assert_eq!(c.at_path(&[0, 0, 0]).and_then(Content::as_text), Some("one"));
        assert_eq!(c.at_path(&[1]).and_then(Content::as_text), Some("tail"));
        assert!(c.at_path(&[0, 3]).is_none());
        assert!(c.at_path(&[]).is_none());
    }

    #[test]
    fn walk_elements_reports_paths_in_document_order() {
        let mut seen = Vec::new();
        sample().walk_elements(|path, el| {
            seen.push((path.clone(), el.tag.clone()));
            true
        });
        assert_eq!(
            seen,
            vec![(vec![0], "ul".to_owned()), (vec![0, 0], "li".to_owned())]
        );
    }

    #[test]
    fn set_attr_replaces_in_place() {
        let mut el = Element::new("a");
        el.set_attr("class", "x");
        el.set_attr("href", "/");
        el.set_attr("class", "y");
        assert_eq!(el.attrs[0], Attr::new("class", "y"));
        assert_eq!(el.remove_attr("href").as_deref(), Some("/"));
        assert_eq!(el.attr("href"), None);
    }
}
