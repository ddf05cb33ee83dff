// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mutable source graph bound into markup.
//!
//! A [`Source`] is a shared, interior-mutable handle to an object, an array,
//! or a boxed scalar. Identity is pointer identity ([`SourceId`]); two handles
//! to the same allocation are the same source. Graphs may contain cycles, so
//! every traversal here carries an explicit ancestor stack.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use blake3::Hasher;
use tether_dom::NodeId;

use crate::ident::{BindingId, Hash};

/// JSON scalar or tree used for leaf values.
pub type Json = serde_json::Value;

/// Arguments passed to a bound event handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCall {
    /// Binding that rendered the handler attribute.
    pub binding: BindingId,
    /// Node the event was dispatched on.
    pub node: NodeId,
    /// Event name without the `on` prefix.
    pub event: String,
}

/// Callable stored in a source and wired to `on*` attributes.
#[derive(Clone)]
pub struct Handler(Rc<dyn Fn(&HandlerCall)>);

impl Handler {
    /// Wraps a closure.
    pub fn new(f: impl Fn(&HandlerCall) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invokes the handler.
    pub fn call(&self, call: &HandlerCall) {
        (self.0)(call);
    }

    /// Returns `true` if both handles wrap the same closure.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the wrapped closure; equal exactly when [`Self::ptr_eq`] holds.
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>().addr()
    }
}

impl core::fmt::Debug for Handler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// A value reachable from a source.
#[derive(Clone, Debug)]
pub enum Value {
    /// JSON leaf (string, number, bool, null).
    Scalar(Json),
    /// Nested object or array.
    Source(Source),
    /// Bound event handler.
    Handler(Handler),
}

impl Value {
    /// Wraps a closure as a handler value.
    pub fn handler(f: impl Fn(&HandlerCall) + 'static) -> Self {
        Self::Handler(Handler::new(f))
    }

    /// Nested source, if this is one.
    pub fn as_source(&self) -> Option<&Source> {
        match self {
            Self::Source(s) => Some(s),
            Self::Scalar(_) | Self::Handler(_) => None,
        }
    }

    /// JSON leaf, if this is one.
    pub fn as_scalar(&self) -> Option<&Json> {
        match self {
            Self::Scalar(j) => Some(j),
            Self::Source(_) | Self::Handler(_) => None,
        }
    }

    /// Text substituted for a `{{path}}` token.
    ///
    /// Strings render raw, `null` renders empty, other scalars use their JSON
    /// form. Sources and handlers render empty in text positions; boxed scalar
    /// sources render their scalar.
    pub fn render(&self) -> String {
        match self {
            Self::Scalar(j) => render_json(j),
            Self::Source(s) => s.scalar_value().map(|j| render_json(&j)).unwrap_or_default(),
            Self::Handler(_) => String::new(),
        }
    }

    /// Shallow equality: equal scalars, the same source, or the same handler.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Source(a), Self::Source(b)) => a.ptr_eq(b),
            (Self::Handler(a), Self::Handler(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    fn hash_into(&self, hasher: &mut Hasher, stack: &mut Vec<SourceId>) {
        match self {
            Self::Scalar(j) => {
                hasher.update(b"s");
                hash_json(j, hasher);
            }
            Self::Source(s) => s.hash_into(hasher, stack),
            Self::Handler(_) => {
                hasher.update(b"h");
            }
        }
    }
}

fn render_json(j: &Json) -> String {
    match j {
        Json::Null => String::new(),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn hash_json(j: &Json, hasher: &mut Hasher) {
    let text = j.to_string();
    hasher.update(&(text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
}

impl From<Json> for Value {
    fn from(j: Json) -> Self {
        Self::Scalar(j)
    }
}

impl From<Source> for Value {
    fn from(s: Source) -> Self {
        Self::Source(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Scalar(Json::String(s.to_owned()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Scalar(Json::String(s))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Scalar(Json::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Scalar(Json::Bool(b))
    }
}

impl From<Handler> for Value {
    fn from(h: Handler) -> Self {
        Self::Handler(h)
    }
}

/// Payload of a source.
#[derive(Debug)]
pub enum SourceData {
    /// Keyed entries in key order.
    Object(BTreeMap<String, Value>),
    /// Ordered items.
    Array(Vec<Value>),
    /// A boxed scalar, used for scalar array items and scalar regions.
    Scalar(Json),
}

/// Pointer identity of a source.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SourceId(usize);

impl core::fmt::Display for SourceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "src:{:x}", self.0)
    }
}

/// Shared handle to a mutable object, array, or boxed scalar.
#[derive(Clone)]
pub struct Source(Rc<RefCell<SourceData>>);

impl core::fmt::Debug for Source {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match &*self.0.borrow() {
            SourceData::Object(m) => format!("object({})", m.len()),
            SourceData::Array(v) => format!("array({})", v.len()),
            SourceData::Scalar(j) => format!("scalar({j})"),
        };
        write!(f, "Source({}, {kind})", self.id())
    }
}

impl Source {
    fn from_data(data: SourceData) -> Self {
        Self(Rc::new(RefCell::new(data)))
    }

    /// Creates an empty object.
    pub fn object() -> Self {
        Self::from_data(SourceData::Object(BTreeMap::new()))
    }

    /// Creates an empty array.
    pub fn array() -> Self {
        Self::from_data(SourceData::Array(Vec::new()))
    }

    /// Boxes a scalar.
    pub fn scalar(value: Json) -> Self {
        Self::from_data(SourceData::Scalar(value))
    }

    /// Builds a graph from JSON: objects and arrays become nested sources.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Object(map) => Self::from_data(SourceData::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::json_value(v)))
                    .collect(),
            )),
            Json::Array(items) => Self::from_data(SourceData::Array(
                items.iter().map(Self::json_value).collect(),
            )),
            scalar => Self::scalar(scalar.clone()),
        }
    }

    fn json_value(json: &Json) -> Value {
        match json {
            Json::Object(_) | Json::Array(_) => Value::Source(Self::from_json(json)),
            scalar => Value::Scalar(scalar.clone()),
        }
    }

    /// Pointer identity.
    pub fn id(&self) -> SourceId {
        SourceId(Rc::as_ptr(&self.0).cast::<()>().addr())
    }

    /// Returns `true` if both handles name the same source.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns `true` for arrays.
    pub fn is_array(&self) -> bool {
        matches!(&*self.0.borrow(), SourceData::Array(_))
    }

    /// Returns `true` for objects.
    pub fn is_object(&self) -> bool {
        matches!(&*self.0.borrow(), SourceData::Object(_))
    }

    /// The boxed scalar, for scalar sources.
    pub fn scalar_value(&self) -> Option<Json> {
        match &*self.0.borrow() {
            SourceData::Scalar(j) => Some(j.clone()),
            SourceData::Object(_) | SourceData::Array(_) => None,
        }
    }

    /// Number of entries or items; `0` for scalars.
    pub fn len(&self) -> usize {
        match &*self.0.borrow() {
            SourceData::Object(m) => m.len(),
            SourceData::Array(v) => v.len(),
            SourceData::Scalar(_) => 0,
        }
    }

    /// Returns `true` when [`Source::len`] is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry `key` of an object, or item `key` (decimal index) of an array.
    pub fn get(&self, key: &str) -> Option<Value> {
        match &*self.0.borrow() {
            SourceData::Object(m) => m.get(key).cloned(),
            SourceData::Array(v) => key.parse::<usize>().ok().and_then(|i| v.get(i).cloned()),
            SourceData::Scalar(_) => None,
        }
    }

    /// Sets entry `key`, returning the previous value.
    ///
    /// On arrays `key` is an index; an index equal to the length appends and
    /// anything past it is ignored. Scalars ignore writes.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Option<Value> {
        let value = value.into();
        match &mut *self.0.borrow_mut() {
            SourceData::Object(m) => m.insert(key.to_owned(), value),
            SourceData::Array(v) => match key.parse::<usize>() {
                Ok(i) if i < v.len() => Some(std::mem::replace(&mut v[i], value)),
                Ok(i) if i == v.len() => {
                    v.push(value);
                    None
                }
                _ => None,
            },
            SourceData::Scalar(_) => None,
        }
    }

    /// Appends an item to an array; no-op otherwise.
    pub fn push(&self, value: impl Into<Value>) {
        if let SourceData::Array(v) = &mut *self.0.borrow_mut() {
            v.push(value.into());
        }
    }

    /// Inserts an array item at `index` (clamped); no-op otherwise.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        if let SourceData::Array(v) = &mut *self.0.borrow_mut() {
            let index = index.min(v.len());
            v.insert(index, value.into());
        }
    }

    /// Removes entry `key` (or item index `key`), returning it.
    pub fn remove(&self, key: &str) -> Option<Value> {
        match &mut *self.0.borrow_mut() {
            SourceData::Object(m) => m.remove(key),
            SourceData::Array(v) => match key.parse::<usize>() {
                Ok(i) if i < v.len() => Some(v.remove(i)),
                _ => None,
            },
            SourceData::Scalar(_) => None,
        }
    }

    /// Replaces a boxed scalar's value; no-op for objects and arrays.
    pub fn set_scalar(&self, value: Json) {
        if let SourceData::Scalar(j) = &mut *self.0.borrow_mut() {
            *j = value;
        }
    }

    /// Snapshot of the entries; array keys are decimal indices.
    pub fn entries(&self) -> Vec<(String, Value)> {
        match &*self.0.borrow() {
            SourceData::Object(m) => m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            SourceData::Array(v) => v
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
            SourceData::Scalar(_) => Vec::new(),
        }
    }

    /// Resolves a dotted path. `.` (or an empty path) is the source itself.
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let path = path.trim();
        if path.is_empty() || path == "." {
            return Some(match self.scalar_value() {
                Some(j) => Value::Scalar(j),
                None => Value::Source(self.clone()),
            });
        }
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let mut value = self.get(segments.next()?)?;
        for segment in segments {
            value = value.as_source()?.get(segment)?;
        }
        Some(value)
    }

    /// Domain-separated BLAKE3 hash of the structure reachable from here.
    ///
    /// Equal structures hash equal regardless of identity; a back-edge to an
    /// ancestor hashes as its depth on the stack, so cycles terminate.
    pub fn structural_hash(&self) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(b"source:");
        self.hash_into(&mut hasher, &mut Vec::new());
        hasher.finalize().into()
    }

    fn hash_into(&self, hasher: &mut Hasher, stack: &mut Vec<SourceId>) {
        let id = self.id();
        if let Some(depth) = stack.iter().position(|s| *s == id) {
            hasher.update(b"cycle");
            hasher.update(&(depth as u64).to_le_bytes());
            return;
        }
        stack.push(id);
        match &*self.0.borrow() {
            SourceData::Object(m) => {
                hasher.update(b"o");
                hasher.update(&(m.len() as u64).to_le_bytes());
                for (k, v) in m {
                    hasher.update(&(k.len() as u64).to_le_bytes());
                    hasher.update(k.as_bytes());
                    v.hash_into(hasher, stack);
                }
            }
            SourceData::Array(items) => {
                hasher.update(b"a");
                hasher.update(&(items.len() as u64).to_le_bytes());
                for v in items {
                    v.hash_into(hasher, stack);
                }
            }
            SourceData::Scalar(j) => {
                hasher.update(b"s");
                hash_json(j, hasher);
            }
        }
        stack.pop();
    }

    /// Returns `true` if the two sources share at least one top-level entry
    /// (same key, shallowly equal value).
    pub fn shares_entry_with(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if let (Some(a), Some(b)) = (self.scalar_value(), other.scalar_value()) {
            return a == b;
        }
        let theirs = other.entries();
        self.entries().iter().any(|(k, v)| {
            theirs
                .iter()
                .any(|(k2, v2)| k == k2 && v.same_as(v2))
        })
    }

    /// Converts back to JSON; handlers and back-edges become `null`.
    pub fn to_json(&self) -> Json {
        self.to_json_inner(&mut Vec::new())
    }

    fn to_json_inner(&self, stack: &mut Vec<SourceId>) -> Json {
        let id = self.id();
        if stack.contains(&id) {
            return Json::Null;
        }
        stack.push(id);
        let out = match &*self.0.borrow() {
            SourceData::Object(m) => Json::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), value_json(v, stack)))
                    .collect(),
            ),
            SourceData::Array(items) => Json::Array(items.iter().map(|v| value_json(v, stack)).collect()),
            SourceData::Scalar(j) => j.clone(),
        };
        stack.pop();
        out
    }
}

fn value_json(v: &Value, stack: &mut Vec<SourceId>) -> Json {
    match v {
        Value::Scalar(j) => j.clone(),
        Value::Source(s) => s.to_json_inner(stack),
        Value::Handler(_) => Json::Null,
    }
}
