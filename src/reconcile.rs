use std::collections::HashSet;
use std::hash::Hash;

/// Result of a keyed three-way diff between the elements currently on the
/// surface and the elements the next snapshot wants.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation<K> {
    /// Present now, absent before.
    pub entered: Vec<K>,
    /// Present in both.
    pub updated: Vec<K>,
    /// Present before, absent now.
    pub exited: Vec<K>,
}

// Derived Default would demand `K: Default`, which keys never need.
impl<K> Default for Reconciliation<K> {
    fn default() -> Self {
        Self {
            entered: Vec::new(),
            updated: Vec::new(),
            exited: Vec::new(),
        }
    }
}

impl<K> Reconciliation<K> {
    pub fn is_noop(&self) -> bool {
        self.entered.is_empty() && self.exited.is_empty()
    }
}

/// Keyed diff of two element sets. `entered` and `updated` preserve the
/// order of `next`; `exited` preserves the order of `prev`. The key
/// function is the caller's choice; anything stable across snapshots works.
pub fn reconcile<K>(prev: &[K], next: &[K]) -> Reconciliation<K>
where
    K: Eq + Hash + Clone,
{
    let prev_set: HashSet<&K> = prev.iter().collect();
    let next_set: HashSet<&K> = next.iter().collect();

    let mut out = Reconciliation::default();
    for key in next {
        if prev_set.contains(key) {
            out.updated.push(key.clone());
        } else {
            out.entered.push(key.clone());
        }
    }
    for key in prev {
        if !next_set.contains(key) {
            out.exited.push(key.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_disjoint_operations() {
        let prev = vec!["a", "b", "c"];
        let next = vec!["b", "c", "d"];

        let diff = reconcile(&prev, &next);
        assert_eq!(diff.entered, vec!["d"]);
        assert_eq!(diff.updated, vec!["b", "c"]);
        assert_eq!(diff.exited, vec!["a"]);
    }

    #[test]
    fn identical_sets_produce_only_updates() {
        let keys = vec!["a", "b"];
        let diff = reconcile(&keys, &keys);
        assert!(diff.is_noop());
        assert_eq!(diff.updated, keys);
    }

    #[test]
    fn empty_next_exits_everything() {
        let prev = vec![1, 2, 3];
        let diff = reconcile(&prev, &[]);
        assert_eq!(diff.exited, prev);
        assert!(diff.entered.is_empty());
        assert!(diff.updated.is_empty());
    }

    #[test]
    fn empty_prev_enters_everything_in_order() {
        let next = vec!["x", "y"];
        let diff = reconcile(&[], &next);
        assert_eq!(diff.entered, next);
    }

    #[test]
    fn keys_need_no_default() {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        struct CompositeKey(String, usize);

        let prev = vec![CompositeKey("a".to_string(), 0)];
        let next = vec![CompositeKey("a".to_string(), 1)];
        let diff = reconcile(&prev, &next);
        assert_eq!(diff.entered, next);
        assert_eq!(diff.exited, prev);
    }
}
