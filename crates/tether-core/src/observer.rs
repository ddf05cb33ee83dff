// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property-change observation by snapshot comparison.

use std::collections::BTreeMap;

use crate::source::{Json, Source, SourceId, Value};

/// Kind of an observed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path did not exist in the snapshot.
    Added,
    /// The value at the path differs.
    Changed,
    /// The path no longer exists.
    Removed,
}

/// One observed change.
#[derive(Debug, Clone)]
pub struct Change {
    /// What happened.
    pub kind: ChangeKind,
    /// Dotted path from the observed root.
    pub path: String,
    /// Source that holds (or held) the entry.
    pub host: SourceId,
    /// Value before the change; `None` for additions.
    pub original: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
enum Fingerprint {
    Scalar(Json),
    Source(SourceId),
    Handler(usize),
}

#[derive(Debug, Clone)]
struct Entry {
    host: SourceId,
    value: Value,
    print: Fingerprint,
}

/// Flattened snapshot of every path reachable from a root source.
#[derive(Debug, Clone)]
pub struct SnapshotObserver {
    root: SourceId,
    entries: BTreeMap<String, Entry>,
}

impl SnapshotObserver {
    /// Snapshots `source`.
    pub fn observe(source: &Source) -> Self {
        Self {
            root: source.id(),
            entries: flatten(source),
        }
    }

    /// Identity of the observed root.
    pub fn root(&self) -> SourceId {
        self.root
    }

    /// Changes between the snapshot and the current state of `source`.
    ///
    /// A different root identity reports the whole graph as replaced.
    pub fn changes(&self, source: &Source) -> Vec<Change> {
        let now = flatten(source);
        let mut out = Vec::new();
        for (path, before) in &self.entries {
            match now.get(path) {
                None => out.push(Change {
                    kind: ChangeKind::Removed,
                    path: path.clone(),
                    host: before.host,
                    original: Some(before.value.clone()),
                }),
                Some(after) if after.print != before.print => out.push(Change {
                    kind: ChangeKind::Changed,
                    path: path.clone(),
                    host: after.host,
                    original: Some(before.value.clone()),
                }),
                Some(_) => {}
            }
        }
        for (path, after) in &now {
            if !self.entries.contains_key(path) {
                out.push(Change {
                    kind: ChangeKind::Added,
                    path: path.clone(),
                    host: after.host,
                    original: None,
                });
            }
        }
        out
    }

    /// Re-snapshots `source`.
    pub fn refresh(&mut self, source: &Source) {
        *self = Self::observe(source);
    }
}

/// Returns `true` if a change at `changed` can affect a token bound to `bound`.
///
/// Paths touch when one is a segment prefix of the other; `.` touches all.
pub fn touches(changed: &str, bound: &str) -> bool {
    let bound = bound.trim();
    if bound.is_empty() || bound == "." {
        return true;
    }
    let (short, long) = if changed.len() <= bound.len() {
        (changed, bound)
    } else {
        (bound, changed)
    };
    long == short || (long.starts_with(short) && long.as_bytes().get(short.len()) == Some(&b'.'))
}

fn flatten(source: &Source) -> BTreeMap<String, Entry> {
    let mut out = BTreeMap::new();
    if let Some(j) = source.scalar_value() {
        out.insert(
            ".".to_owned(),
            Entry {
                host: source.id(),
                value: Value::Scalar(j.clone()),
                print: Fingerprint::Scalar(j),
            },
        );
        return out;
    }
    walk(source, "", &mut vec![source.id()], &mut out);
    out
}

fn walk(source: &Source, prefix: &str, stack: &mut Vec<SourceId>, out: &mut BTreeMap<String, Entry>) {
    for (key, value) in source.entries() {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{prefix}.{key}")
        };
        let print = match &value {
            Value::Scalar(j) => Fingerprint::Scalar(j.clone()),
            Value::Source(s) => s
                .scalar_value()
                .map_or(Fingerprint::Source(s.id()), Fingerprint::Scalar),
            Value::Handler(h) => Fingerprint::Handler(h.addr()),
        };
        if let Value::Source(child) = &value {
            if !stack.contains(&child.id()) {
                stack.push(child.id());
                walk(child, &path, stack, out);
                stack.pop();
            }
        }
        out.insert(
            path,
            Entry {
                host: source.id(),
                value,
                print,
            },
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reports_added_changed_removed() {
        let s = Source::from_json(&json!({"a": 1, "b": {"c": 2}}));
        let obs = SnapshotObserver::observe(&s);
        assert!(obs.changes(&s).is_empty());
        s.set("a", 5);
        s.remove("b");
        s.set("d", "new");
        let mut kinds: Vec<_> = obs
            .changes(&s)
            .into_iter()
            .map(|c| (c.path, c.kind))
            .collect();
        kinds.sort_by(|l, r| l.0.cmp(&r.0));
        assert_eq!(
            kinds,
            vec![
                ("a".to_owned(), ChangeKind::Changed),
                ("b".to_owned(), ChangeKind::Removed),
                ("b.c".to_owned(), ChangeKind::Removed),
                ("d".to_owned(), ChangeKind::Added),
            ]
        );
    }

    #[test]
    fn nested_edit_reports_host_and_original() {
        let s = Source::from_json(&json!({"user": {"name": "ada"}}));
        let obs = SnapshotObserver::observe(&s);
        let user = s.get("user").unwrap().as_source().unwrap().clone();
        user.set("name", "grace");
        let changes = obs.changes(&s);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "user.name");
        assert_eq!(changes[0].host, user.id());
        assert_eq!(changes[0].original.as_ref().unwrap().render(), "ada");
    }

    #[test]
    fn swapped_handler_is_a_change() {
        let s = Source::object();
        let keep = Value::handler(|_| {});
        s.set("save", keep.clone());
        let obs = SnapshotObserver::observe(&s);
        s.set("save", keep);
        assert!(obs.changes(&s).is_empty());
        s.set("save", Value::handler(|_| {}));
        let changes = obs.changes(&s);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Changed);
        assert_eq!(changes[0].path, "save");
    }

    #[test]
    fn touches_uses_segment_prefixes() {
        assert!(touches("user.name", "user"));
        assert!(touches("user", "user.name"));
        assert!(!touches("username", "user"));
        assert!(touches("anything", "."));
        assert!(!touches("a", "b"));
    }

    #[test]
    fn cycles_terminate() {
        let s = Source::object();
        s.set("me", s.clone());
        let obs = SnapshotObserver::observe(&s);
        assert!(obs.changes(&s).is_empty());
        s.remove("me");
    }
}
