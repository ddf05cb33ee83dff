// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Child binding reconciliation.
//!
//! Old children are matched to new child values first by source identity,
//! then by structural hash (a re-created but equal object), then by path for
//! related objects. Whatever remains is added or removed. Every old index and
//! every new index lands in exactly one [`Classified`] record.

use crate::ident::{BindingId, Hash};
use crate::source::{Source, SourceId};

/// How a child changed between two renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildDifference {
    /// Same path, same (or related) object.
    None,
    /// New value with no old counterpart.
    Added,
    /// Old child with no new counterpart.
    Removed,
    /// Two non-array children exchanged paths.
    Swapped,
    /// Array member now at a different index.
    Shifted,
    /// Non-array child now at a different path.
    Moved,
}

/// Child recorded by the previous render.
#[derive(Debug, Clone)]
pub struct OldChild {
    /// Path it was bound at.
    pub path: String,
    /// Its binding.
    pub binding: BindingId,
    /// Source it was bound to.
    pub source: Source,
    /// Structural hash recorded with it.
    pub hash: Hash,
    /// `true` for array elements.
    pub array_member: bool,
}

/// Child value found by the current render.
#[derive(Debug, Clone)]
pub struct NewChild {
    /// Path it sits at.
    pub path: String,
    /// Its value.
    pub source: Source,
}

impl NewChild {
    fn id(&self) -> SourceId {
        self.source.id()
    }
}

/// One classification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// Kind of change.
    pub difference: ChildDifference,
    /// Index into the old list, if an old child takes part.
    pub old: Option<usize>,
    /// Index into the new list, if a new value takes part.
    pub new: Option<usize>,
    /// The child must re-render its content.
    pub content_changed: bool,
}

/// Pairs each unmatched old child with an unmatched new value satisfying
/// `pred`, preferring the candidate at the same path.
fn pair_by(
    old: &[OldChild],
    new: &[NewChild],
    pred: impl Fn(usize, usize) -> bool,
    old_to_new: &mut [Option<usize>],
    new_taken: &mut [bool],
) {
    for (oi, o) in old.iter().enumerate() {
        if old_to_new[oi].is_some() {
            continue;
        }
        let mut pick = None;
        for ni in 0..new.len() {
            if new_taken[ni] || !pred(oi, ni) {
                continue;
            }
            if new[ni].path == o.path {
                pick = Some(ni);
                break;
            }
            pick = pick.or(Some(ni));
        }
        if let Some(ni) = pick {
            old_to_new[oi] = Some(ni);
            new_taken[ni] = true;
        }
    }
}

/// Classifies `new` against `old`.
///
/// Records come back ordered by new index, with removals last.
pub fn reconcile(old: &[OldChild], new: &[NewChild]) -> Vec<Classified> {
    let new_hashes: Vec<Hash> = new.iter().map(|n| n.source.structural_hash()).collect();
    let mut old_to_new: Vec<Option<usize>> = vec![None; old.len()];
    let mut new_taken = vec![false; new.len()];

    pair_by(old, new, |oi, ni| old[oi].source.id() == new[ni].id(), &mut old_to_new, &mut new_taken);
    pair_by(old, new, |oi, ni| old[oi].hash == new_hashes[ni], &mut old_to_new, &mut new_taken);

    // Same path, different object: related objects keep their binding.
    for (oi, o) in old.iter().enumerate() {
        if old_to_new[oi].is_some() {
            continue;
        }
        let same_path = (0..new.len()).find(|&ni| !new_taken[ni] && new[ni].path == o.path);
        if let Some(ni) = same_path {
            if o.source.shares_entry_with(&new[ni].source) {
                old_to_new[oi] = Some(ni);
                new_taken[ni] = true;
            }
        }
    }

    let mut new_to_old: Vec<Option<usize>> = vec![None; new.len()];
    for (oi, ni) in old_to_new.iter().enumerate() {
        if let Some(ni) = ni {
            new_to_old[*ni] = Some(oi);
        }
    }

    let mut out = Vec::with_capacity(old.len() + new.len());
    for (ni, n) in new.iter().enumerate() {
        let Some(oi) = new_to_old[ni] else {
            out.push(Classified {
                difference: ChildDifference::Added,
                old: None,
                new: Some(ni),
                content_changed: true,
            });
            continue;
        };
        let o = &old[oi];
        let content_changed = o.hash != new_hashes[ni] || o.source.id() != n.id();
        let difference = if o.path == n.path {
            ChildDifference::None
        } else if o.array_member {
            ChildDifference::Shifted
        } else {
            // Mutual exchange: the old child at our new path went to our old path.
            let exchanged = old.iter().enumerate().any(|(oj, other)| {
                oj != oi
                    && other.path == n.path
                    && old_to_new[oj].is_some_and(|nj| new[nj].path == o.path)
            });
            if exchanged {
                ChildDifference::Swapped
            } else {
                ChildDifference::Moved
            }
        };
        out.push(Classified {
            difference,
            old: Some(oi),
            new: Some(ni),
            content_changed,
        });
    }
    for (oi, ni) in old_to_new.iter().enumerate() {
        if ni.is_none() {
            out.push(Classified {
                difference: ChildDifference::Removed,
                old: Some(oi),
                new: None,
                content_changed: false,
            });
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn old_child(path: &str, source: &Source, n: u32, array_member: bool) -> OldChild {
        OldChild {
            path: path.to_owned(),
            binding: BindingId(n),
            source: source.clone(),
            hash: source.structural_hash(),
            array_member,
        }
    }

    fn new_child(path: &str, source: &Source) -> NewChild {
        NewChild {
            path: path.to_owned(),
            source: source.clone(),
        }
    }

    fn kinds(records: &[Classified]) -> Vec<ChildDifference> {
        records.iter().map(|r| r.difference).collect()
    }

    #[test]
    fn unchanged_children_are_none() {
        let a = Source::from_json(&json!({"id": 1}));
        let r = reconcile(&[old_child("a", &a, 0, false)], &[new_child("a", &a)]);
        assert_eq!(kinds(&r), vec![ChildDifference::None]);
        assert!(!r[0].content_changed);
        let recorded = [old_child("a", &a, 0, false)];
        a.set("id", 2);
        let r = reconcile(&recorded, &[new_child("a", &a)]);
        assert_eq!(r[0].difference, ChildDifference::None);
        assert!(r[0].content_changed);
    }

    #[test]
    fn array_removal_shifts_the_tail() {
        let items: Vec<Source> = (1..=3).map(|i| Source::from_json(&json!({"id": i}))).collect();
        let old: Vec<_> = items
            .iter()
            .enumerate()
            .map(|(i, s)| old_child(&i.to_string(), s, i as u32, true))
            .collect();
        let new = vec![new_child("0", &items[0]), new_child("1", &items[2])];
        let r = reconcile(&old, &new);
        assert_eq!(
            kinds(&r),
            vec![ChildDifference::None, ChildDifference::Shifted, ChildDifference::Removed]
        );
        assert_eq!(r[1].old, Some(2));
        assert_eq!(r[2].old, Some(1));
    }

    #[test]
    fn exchanged_keys_are_swapped_and_single_moves_are_moved() {
        let x = Source::from_json(&json!({"v": "x"}));
        let y = Source::from_json(&json!({"v": "y"}));
        let old = vec![old_child("a", &x, 0, false), old_child("b", &y, 1, false)];
        let r = reconcile(&old, &[new_child("a", &y), new_child("b", &x)]);
        assert_eq!(kinds(&r), vec![ChildDifference::Swapped, ChildDifference::Swapped]);

        let r = reconcile(&old[..1], &[new_child("c", &x)]);
        assert_eq!(kinds(&r), vec![ChildDifference::Moved]);
    }

    #[test]
    fn recreated_equal_objects_match_by_hash() {
        let before = Source::from_json(&json!({"id": 9}));
        let after = Source::from_json(&json!({"id": 9}));
        let r = reconcile(&[old_child("0", &before, 0, true)], &[new_child("0", &after)]);
        assert_eq!(r[0].difference, ChildDifference::None);
        // Identity changed, so the child must pick up the new source.
        assert!(r[0].content_changed);
    }

    #[test]
    fn unrelated_object_at_same_path_is_remove_plus_add() {
        let before = Source::from_json(&json!({"id": 1}));
        let related = Source::from_json(&json!({"id": 1, "extra": true}));
        let unrelated = Source::from_json(&json!({"name": "z"}));
        let r = reconcile(&[old_child("p", &before, 0, false)], &[new_child("p", &related)]);
        assert_eq!(kinds(&r), vec![ChildDifference::None]);
        let r = reconcile(&[old_child("p", &before, 0, false)], &[new_child("p", &unrelated)]);
        assert_eq!(kinds(&r), vec![ChildDifference::Added, ChildDifference::Removed]);
    }

    proptest! {
        #[test]
        fn every_old_and_new_index_is_classified_exactly_once(
            pool in proptest::collection::vec(0u8..4, 1..6),
            old_picks in proptest::collection::vec(0usize..6, 0..6),
            new_picks in proptest::collection::vec(0usize..6, 0..6),
            arrays in any::<bool>(),
        ) {
            let sources: Vec<Source> = pool
                .iter()
                .map(|v| Source::from_json(&json!({"v": v})))
                .collect();
            let old: Vec<OldChild> = old_picks
                .iter()
                .enumerate()
                .map(|(i, p)| old_child(&i.to_string(), &sources[p % sources.len()], i as u32, arrays))
                .collect();
            let new: Vec<NewChild> = new_picks
                .iter()
                .enumerate()
                .map(|(i, p)| new_child(&i.to_string(), &sources[p % sources.len()]))
                .collect();
            let r = reconcile(&old, &new);
            let mut old_seen = vec![0u32; old.len()];
            let mut new_seen = vec![0u32; new.len()];
            for rec in &r {
                if let Some(o) = rec.old { old_seen[o] += 1; }
                if let Some(n) = rec.new { new_seen[n] += 1; }
                match rec.difference {
                    ChildDifference::Added => prop_assert!(rec.old.is_none() && rec.new.is_some()),
                    ChildDifference::Removed => prop_assert!(rec.old.is_some() && rec.new.is_none()),
                    _ => prop_assert!(rec.old.is_some() && rec.new.is_some()),
                }
                if arrays {
                    prop_assert!(!matches!(rec.difference, ChildDifference::Moved | ChildDifference::Swapped));
                }
            }
            prop_assert!(old_seen.iter().all(|c| *c == 1));
            prop_assert!(new_seen.iter().all(|c| *c == 1));
        }
    }
}
