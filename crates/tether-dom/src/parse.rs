// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Minimal markup reader and writer.
//!
//! Supports elements, quoted/unquoted/bare attributes, self-closing tags, the
//! HTML void elements, comments (dropped), and the five basic entities.
//! Whitespace-only text between tags is dropped so layout indentation in
//! templates never produces text nodes.

use thiserror::Error;

use crate::content::{Attr, Content, Element};

/// Errors produced by [`parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Input ended inside a tag, attribute, or comment.
    #[error("unexpected end of markup at byte {0}")]
    UnexpectedEof(usize),
    /// A closing tag did not match the innermost open element.
    #[error("mismatched closing tag </{found}> at byte {at}, expected </{expected}>")]
    MismatchedClose {
        /// Tag that was expected to close.
        expected: String,
        /// Tag actually found.
        found: String,
        /// Byte offset of the closing tag.
        at: usize,
    },
    /// A closing tag appeared with no open element.
    #[error("stray closing tag </{0}>")]
    StrayClose(String),
    /// An element was never closed.
    #[error("unclosed element <{0}>")]
    Unclosed(String),
    /// A tag name was empty or malformed.
    #[error("malformed tag at byte {0}")]
    MalformedTag(usize),
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        &self.src[start..self.pos]
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.' | '@')
}

/// Parses `markup` into a [`Content::List`] of root nodes.
pub fn parse(markup: &str) -> Result<Content, ParseError> {
    let mut r = Reader { src: markup, pos: 0 };
    let mut roots: Vec<Content> = Vec::new();
    let mut stack: Vec<Element> = Vec::new();

    fn push_node(stack: &mut [Element], roots: &mut Vec<Content>, node: Content) {
        match stack.last_mut() {
            Some(open) => open.children.push(node),
            None => roots.push(node),
        }
    }

    while r.peek().is_some() {
        if r.eat("<!--") {
            match r.rest().find("-->") {
                Some(end) => r.pos += end + 3,
                None => return Err(ParseError::UnexpectedEof(markup.len())),
            }
            continue;
        }
        if r.rest().starts_with("</") {
            let at = r.pos;
            r.pos += 2;
            let name = r.take_while(is_name_char).to_ascii_lowercase();
            r.skip_ws();
            if !r.eat(">") {
                return Err(ParseError::MalformedTag(at));
            }
            let Some(open) = stack.pop() else {
                return Err(ParseError::StrayClose(name));
            };
            if open.tag != name {
                return Err(ParseError::MismatchedClose {
                    expected: open.tag,
                    found: name,
                    at,
                });
            }
            push_node(&mut stack, &mut roots, Content::Element(open));
            continue;
        }
        if r.peek() == Some('<') {
            let at = r.pos;
            r.bump();
            let name = r.take_while(is_name_char).to_ascii_lowercase();
            if name.is_empty() {
                return Err(ParseError::MalformedTag(at));
            }
            let mut element = Element::new(&name);
            let self_closing = read_attributes(&mut r, &mut element.attrs)?;
            if self_closing || is_void(&name) {
                push_node(&mut stack, &mut roots, Content::Element(element));
            } else {
                stack.push(element);
            }
            continue;
        }
        let text = r.take_while(|c| c != '<');
        if !text.trim().is_empty() {
            push_node(&mut stack, &mut roots, Content::Text(decode_entities(text)));
        }
    }

    if let Some(open) = stack.pop() {
        return Err(ParseError::Unclosed(open.tag));
    }
    Ok(Content::List(roots))
}

/// Reads attributes up to and including the closing `>`; returns `true` for `/>`.
fn read_attributes(r: &mut Reader<'_>, attrs: &mut Vec<Attr>) -> Result<bool, ParseError> {
    loop {
        r.skip_ws();
        if r.eat("/>") {
            return Ok(true);
        }
        if r.eat(">") {
            return Ok(false);
        }
        let at = r.pos;
        let name = r.take_while(|c| is_name_char(c) || c == '*').to_ascii_lowercase();
        if name.is_empty() {
            return match r.peek() {
                None => Err(ParseError::UnexpectedEof(r.pos)),
                Some(_) => Err(ParseError::MalformedTag(at)),
            };
        }
        r.skip_ws();
        let value = if r.eat("=") {
            r.skip_ws();
            match r.peek() {
                Some(q @ ('"' | '\'')) => {
                    r.bump();
                    let Some(end) = r.rest().find(q) else {
                        return Err(ParseError::UnexpectedEof(r.src.len()));
                    };
                    let raw = &r.rest()[..end];
                    r.pos += end + 1;
                    decode_entities(raw)
                }
                Some(_) => {
                    decode_entities(r.take_while(|c| !c.is_whitespace() && c != '>'))
                }
                None => return Err(ParseError::UnexpectedEof(r.pos)),
            }
        } else {
            String::new()
        };
        attrs.push(Attr { name, value });
    }
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_owned();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            c => out.push(c),
        }
    }
}

pub(crate) fn write_element_open(tag: &str, attrs: &[Attr], out: &mut String) {
    out.push('<');
    out.push_str(tag);
    for attr in attrs {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        escape_attr(&attr.value, out);
        out.push('"');
    }
    out.push('>');
}

pub(crate) fn write_element_close(tag: &str, out: &mut String) {
    if !is_void(tag) {
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    }
}

pub(crate) fn write_text(text: &str, out: &mut String) {
    escape_text(text, out);
}

/// Serializes content back to markup.
pub fn to_markup(content: &Content) -> String {
    let mut out = String::new();
    fn go(node: &Content, out: &mut String) {
        match node {
            Content::Text(t) => escape_text(t, out),
            Content::Element(el) => {
                write_element_open(&el.tag, &el.attrs, out);
                for child in &el.children {
                    go(child, out);
                }
                write_element_close(&el.tag, out);
            }
            Content::List(items) => items.iter().for_each(|c| go(c, out)),
        }
    }
    go(content, &mut out);
    out
}
