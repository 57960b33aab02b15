//! Three-level signal-match index with copy-on-write leaves.
//!
//! Matches are keyed by `(path, interface, member)`, each level keyed by
//! the concrete value or the wildcard (`None`). Dispatch probes at most
//! 2×2×2 cells — `{wildcard, concrete}` per level — which covers every
//! match that registered either the exact value or a wildcard at that
//! position, and empty levels short-circuit.
//!
//! # Copy-on-write leaves
//!
//! A leaf is an `Arc<Vec<...>>` replaced wholesale on every insert and
//! removal, never mutated in place. A dispatch pass that cloned a leaf
//! before a concurrent removal rewrote it keeps iterating its stable
//! snapshot; order within a leaf is registration order, which is an
//! observable contract.

use std::sync::Arc;

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::subscription::match_rule::SignalMatch;

/// One insertion-ordered leaf sequence. Shared, never mutated in place.
pub(crate) type MatchLeaf = Arc<Vec<Arc<SignalMatch>>>;

type MemberLevel = FxHashMap<Option<String>, MatchLeaf>;
type InterfaceLevel = FxHashMap<Option<String>, MemberLevel>;

/// The index itself. All mutation goes through the connection's lock;
/// this type only enforces the copy-on-write discipline.
#[derive(Default)]
pub(crate) struct MatchIndex {
    by_path: FxHashMap<Option<String>, InterfaceLevel>,
}

impl MatchIndex {
    /// Appends a match to the leaf for its exact `(path, interface,
    /// member)` triple, creating intermediate levels on demand.
    pub(crate) fn insert(&mut self, m: Arc<SignalMatch>) {
        let leaf = self
            .by_path
            .entry(m.path().map(str::to_string))
            .or_default()
            .entry(m.interface().map(str::to_string))
            .or_default()
            .entry(m.member().map(str::to_string))
            .or_insert_with(|| Arc::new(Vec::new()));
        let mut next = Vec::with_capacity(leaf.len() + 1);
        next.extend(leaf.iter().cloned());
        next.push(m);
        *leaf = Arc::new(next);
    }

    /// Rewrites the leaf for the exact triple (no wildcard expansion),
    /// dropping every match the predicate selects. Returns how many were
    /// dropped; a missing cell is a no-op.
    pub(crate) fn remove_where<F>(
        &mut self,
        path: Option<&str>,
        interface: Option<&str>,
        member: Option<&str>,
        predicate: F,
    ) -> usize
    where
        F: Fn(&Arc<SignalMatch>) -> bool,
    {
        let Some(by_interface) = self.by_path.get_mut(&path.map(str::to_string)) else {
            return 0;
        };
        let Some(by_member) = by_interface.get_mut(&interface.map(str::to_string)) else {
            return 0;
        };
        let Some(leaf) = by_member.get_mut(&member.map(str::to_string)) else {
            return 0;
        };
        let kept: Vec<Arc<SignalMatch>> = leaf
            .iter()
            .filter(|m| !predicate(m))
            .cloned()
            .collect();
        let removed = leaf.len() - kept.len();
        *leaf = Arc::new(kept);
        removed
    }

    /// Collects the candidate leaves for a signal's concrete routing
    /// fields, probing `{wildcard, concrete}` at each level. Leaves come
    /// back in probe order (wildcard before concrete at every level).
    pub(crate) fn candidates(
        &self,
        path: Option<&str>,
        interface: Option<&str>,
        member: Option<&str>,
    ) -> SmallVec<[MatchLeaf; 8]> {
        let mut leaves = SmallVec::new();
        for path_key in level_keys(path) {
            let Some(by_interface) = self.by_path.get(&path_key) else {
                continue;
            };
            for interface_key in level_keys(interface) {
                let Some(by_member) = by_interface.get(&interface_key) else {
                    continue;
                };
                for member_key in level_keys(member) {
                    if let Some(leaf) = by_member.get(&member_key) {
                        if !leaf.is_empty() {
                            leaves.push(Arc::clone(leaf));
                        }
                    }
                }
            }
        }
        leaves
    }
}

/// The key set to probe at one level: the wildcard, plus the concrete
/// value when the message carries one.
fn level_keys(concrete: Option<&str>) -> SmallVec<[Option<String>; 2]> {
    let mut keys: SmallVec<[Option<String>; 2]> = SmallVec::new();
    keys.push(None);
    if let Some(value) = concrete {
        keys.push(Some(value.to_string()));
    }
    keys
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::match_rule::tests::match_for;

    #[test]
    fn test_insert_preserves_registration_order() {
        let mut index = MatchIndex::default();
        let a = match_for(None, Some("org.x.Y"), Some("M"));
        let b = match_for(None, Some("org.x.Y"), Some("M"));
        index.insert(Arc::clone(&a));
        index.insert(Arc::clone(&b));

        let leaves = index.candidates(Some("/p"), Some("org.x.Y"), Some("M"));
        assert_eq!(leaves.len(), 1);
        assert!(Arc::ptr_eq(&leaves[0][0], &a));
        assert!(Arc::ptr_eq(&leaves[0][1], &b));
    }

    #[test]
    fn test_candidates_probe_wildcard_and_concrete_cells() {
        let mut index = MatchIndex::default();
        let wildcard = match_for(None, None, None);
        let concrete = match_for(Some("/p"), Some("org.x.Y"), Some("M"));
        let other = match_for(Some("/other"), Some("org.x.Y"), Some("M"));
        index.insert(wildcard);
        index.insert(concrete);
        index.insert(other);

        let leaves = index.candidates(Some("/p"), Some("org.x.Y"), Some("M"));
        let total: usize = leaves.iter().map(|l| l.len()).sum();
        assert_eq!(total, 2); // wildcard + exact, not /other
    }

    #[test]
    fn test_candidates_empty_levels_short_circuit() {
        let index = MatchIndex::default();
        assert!(index.candidates(Some("/p"), Some("org.x.Y"), Some("M")).is_empty());
    }

    #[test]
    fn test_remove_where_exact_triple_only() {
        let mut index = MatchIndex::default();
        let wildcard = match_for(None, Some("org.x.Y"), Some("M"));
        let concrete = match_for(Some("/p"), Some("org.x.Y"), Some("M"));
        index.insert(Arc::clone(&wildcard));
        index.insert(Arc::clone(&concrete));

        // Removal at the concrete triple must not expand to the wildcard cell.
        let removed = index.remove_where(Some("/p"), Some("org.x.Y"), Some("M"), |_| true);
        assert_eq!(removed, 1);
        let leaves = index.candidates(Some("/p"), Some("org.x.Y"), Some("M"));
        let total: usize = leaves.iter().map(|l| l.len()).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_remove_where_missing_cell_is_noop() {
        let mut index = MatchIndex::default();
        assert_eq!(index.remove_where(Some("/p"), None, None, |_| true), 0);
    }

    #[test]
    fn test_removal_leaves_old_snapshot_intact() {
        let mut index = MatchIndex::default();
        let a = match_for(Some("/p"), Some("org.x.Y"), Some("M"));
        index.insert(Arc::clone(&a));

        let before = index.candidates(Some("/p"), Some("org.x.Y"), Some("M"));
        index.remove_where(Some("/p"), Some("org.x.Y"), Some("M"), |_| true);

        // The snapshot taken before the removal still holds the match.
        assert_eq!(before[0].len(), 1);
        assert!(Arc::ptr_eq(&before[0][0], &a));
        assert!(index.candidates(Some("/p"), Some("org.x.Y"), Some("M")).is_empty());
    }
}
