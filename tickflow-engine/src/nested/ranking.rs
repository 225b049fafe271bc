//! Incremental ranking of mesh keys.
//!
//! Every key of a mesh gets a rank; a key that depends on another must
//! rank strictly above it so the host evaluates it later in the same tick.
//! Dependencies appear at runtime, so ranks are repaired incrementally:
//! raising a key raises everything that depends on it, and meeting a key
//! already on the visiting stack means the dependencies form a cycle.

use std::collections::{BTreeMap, BTreeSet};
use tickflow_core::{FlowError, Key, Result};

/// Outcome of registering a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Ranks already order the two keys.
    Satisfied,
    /// The key depended on does not exist yet.
    Pending,
    /// A re-rank has been queued.
    ReRankRequested,
}

/// Ranks and dependency edges of the keys of one mesh.
#[derive(Debug, Clone, Default)]
pub struct MeshRanking {
    ranks: BTreeMap<Key, usize>,
    /// key -> keys it depends on.
    dependencies: BTreeMap<Key, BTreeSet<Key>>,
    /// key -> keys depending on it.
    dependents: BTreeMap<Key, BTreeSet<Key>>,
    /// missing key -> keys waiting for it.
    pending: BTreeMap<Key, BTreeSet<Key>>,
    requests: Vec<(Key, Key)>,
    max_rank: usize,
}

impl MeshRanking {
    /// Create an empty ranking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank of `key`.
    pub fn rank(&self, key: &Key) -> Option<usize> {
        self.ranks.get(key).copied()
    }

    /// Highest rank in use.
    pub fn max_rank(&self) -> usize {
        self.max_rank
    }

    /// Whether `key` is ranked.
    pub fn contains(&self, key: &Key) -> bool {
        self.ranks.contains_key(key)
    }

    /// Number of ranked keys.
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    /// Whether no key is ranked.
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Keys at `rank`, in key order.
    pub fn keys_at(&self, rank: usize) -> Vec<Key> {
        self.ranks
            .iter()
            .filter(|(_, r)| **r == rank)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys depending on `key`.
    pub fn dependents_of(&self, key: &Key) -> BTreeSet<Key> {
        self.dependents.get(key).cloned().unwrap_or_default()
    }

    /// Keys `key` depends on.
    pub fn dependencies_of(&self, key: &Key) -> BTreeSet<Key> {
        self.dependencies.get(key).cloned().unwrap_or_default()
    }

    /// Whether re-rank requests are waiting to be applied.
    pub fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Rank a new key, at `rank` or at the current maximum. Keys that were
    /// waiting for it get their re-rank requested.
    pub fn insert(&mut self, key: Key, rank: Option<usize>) -> usize {
        let rank = rank.unwrap_or(self.max_rank);
        self.max_rank = self.max_rank.max(rank);
        self.ranks.insert(key.clone(), rank);
        if let Some(waiting) = self.pending.remove(&key) {
            for waiter in waiting {
                self.request_re_rank(&waiter, &key);
            }
        }
        rank
    }

    /// Drop `key` and the dependencies it holds. Returns the keys it
    /// depended on.
    pub fn remove(&mut self, key: &Key) -> BTreeSet<Key> {
        self.ranks.remove(key);
        let held = self.dependencies.remove(key).unwrap_or_default();
        for target in &held {
            if let Some(set) = self.dependents.get_mut(target) {
                set.remove(key);
                if set.is_empty() {
                    self.dependents.remove(target);
                }
            }
        }
        for waiters in self.pending.values_mut() {
            waiters.remove(key);
        }
        self.pending.retain(|_, waiters| !waiters.is_empty());
        self.requests.retain(|(k, d)| k != key && d != key);
        self.max_rank = self.ranks.values().copied().max().unwrap_or(0);
        held
    }

    /// Register that `key` depends on `depends_on`.
    pub fn add_dependency(&mut self, key: &Key, depends_on: &Key) -> DependencyStatus {
        self.dependencies
            .entry(key.clone())
            .or_default()
            .insert(depends_on.clone());
        self.dependents
            .entry(depends_on.clone())
            .or_default()
            .insert(key.clone());
        if !self.ranks.contains_key(depends_on) {
            self.pending
                .entry(depends_on.clone())
                .or_default()
                .insert(key.clone());
            return DependencyStatus::Pending;
        }
        self.request_re_rank(key, depends_on)
    }

    /// Drop the dependency of `key` on `depends_on`. Returns whether
    /// `depends_on` is left without dependents.
    pub fn remove_dependency(&mut self, key: &Key, depends_on: &Key) -> bool {
        if let Some(set) = self.dependencies.get_mut(key) {
            set.remove(depends_on);
            if set.is_empty() {
                self.dependencies.remove(key);
            }
        }
        if let Some(set) = self.dependents.get_mut(depends_on) {
            set.remove(key);
            if set.is_empty() {
                self.dependents.remove(depends_on);
            }
        }
        if let Some(set) = self.pending.get_mut(depends_on) {
            set.remove(key);
            if set.is_empty() {
                self.pending.remove(depends_on);
            }
        }
        !self.dependents.contains_key(depends_on)
    }

    /// Queue a re-rank unless `key` already ranks above `depends_on`.
    pub fn request_re_rank(&mut self, key: &Key, depends_on: &Key) -> DependencyStatus {
        match (self.rank(key), self.rank(depends_on)) {
            (Some(rank), Some(dep)) if rank > dep => DependencyStatus::Satisfied,
            (_, None) => DependencyStatus::Pending,
            _ => {
                self.requests.push((key.clone(), depends_on.clone()));
                DependencyStatus::ReRankRequested
            }
        }
    }

    /// Raise `key` above `depends_on`, then everything that depends on
    /// `key`. Records every key whose rank changed in `changed`.
    pub fn re_rank(
        &mut self,
        key: &Key,
        depends_on: &Key,
        visiting: &mut Vec<Key>,
        changed: &mut BTreeSet<Key>,
    ) -> Result<()> {
        if visiting.contains(key) {
            let mut path: Vec<String> = visiting.iter().map(ToString::to_string).collect();
            path.push(key.to_string());
            return Err(FlowError::MeshCycle { path });
        }
        let (Some(rank), Some(dep)) = (self.rank(key), self.rank(depends_on)) else {
            return Ok(());
        };
        if rank > dep {
            return Ok(());
        }
        let raised = dep + 1;
        self.ranks.insert(key.clone(), raised);
        self.max_rank = self.max_rank.max(raised);
        changed.insert(key.clone());

        visiting.push(key.clone());
        for dependent in self.dependents_of(key) {
            self.re_rank(&dependent, key, visiting, changed)?;
        }
        visiting.pop();
        Ok(())
    }

    /// Apply queued re-rank requests in arrival order.
    ///
    /// A request that closes a cycle is rolled back completely: ranks return
    /// to their state before the request and the offending dependency is
    /// dropped. The cycle error is returned after the remaining requests
    /// have been applied.
    pub fn apply_re_ranks(&mut self) -> Result<BTreeSet<Key>> {
        let mut changed = BTreeSet::new();
        let mut first_cycle = None;
        for (key, depends_on) in std::mem::take(&mut self.requests) {
            let ranks = self.ranks.clone();
            let max_rank = self.max_rank;
            let mut step = BTreeSet::new();
            match self.re_rank(&key, &depends_on, &mut Vec::new(), &mut step) {
                Ok(()) => changed.extend(step),
                Err(err) => {
                    tracing::warn!(key = %key, depends_on = %depends_on, error = %err, "Mesh re-rank rolled back");
                    self.ranks = ranks;
                    self.max_rank = max_rank;
                    self.remove_dependency(&key, &depends_on);
                    first_cycle.get_or_insert(err);
                }
            }
        }
        match first_cycle {
            Some(err) => Err(err),
            None => Ok(changed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(name: &str) -> Key {
        Key::from(name)
    }

    fn ranked(keys: &[&str]) -> MeshRanking {
        let mut ranking = MeshRanking::new();
        for key in keys {
            ranking.insert(k(key), Some(0));
        }
        ranking
    }

    #[test]
    fn dependency_raises_rank() {
        let mut ranking = ranked(&["a", "b"]);
        assert_eq!(
            ranking.add_dependency(&k("a"), &k("b")),
            DependencyStatus::ReRankRequested
        );
        let changed = ranking.apply_re_ranks().unwrap();
        assert_eq!(changed, BTreeSet::from([k("a")]));
        assert!(ranking.rank(&k("a")) > ranking.rank(&k("b")));
        assert_eq!(ranking.max_rank(), 1);

        assert_eq!(
            ranking.add_dependency(&k("a"), &k("b")),
            DependencyStatus::Satisfied
        );
        assert!(!ranking.has_requests());
    }

    #[test]
    fn re_rank_propagates_to_dependents() {
        let mut ranking = ranked(&["a", "b", "c"]);
        ranking.add_dependency(&k("a"), &k("b"));
        ranking.apply_re_ranks().unwrap();
        ranking.add_dependency(&k("b"), &k("c"));
        ranking.apply_re_ranks().unwrap();

        let rank = |key: &str| ranking.rank(&k(key)).unwrap();
        assert!(rank("b") > rank("c"));
        assert!(rank("a") > rank("b"));
        assert_eq!(ranking.keys_at(rank("a")), vec![k("a")]);
    }

    #[test]
    fn pending_dependency_resolves_on_insert() {
        let mut ranking = ranked(&["a"]);
        assert_eq!(
            ranking.add_dependency(&k("a"), &k("later")),
            DependencyStatus::Pending
        );
        ranking.insert(k("later"), Some(0));
        assert!(ranking.has_requests());
        ranking.apply_re_ranks().unwrap();
        assert!(ranking.rank(&k("a")) > ranking.rank(&k("later")));
    }

    #[test]
    fn cycle_is_reported_and_rolled_back() {
        let mut ranking = ranked(&["A", "B", "C"]);
        ranking.add_dependency(&k("A"), &k("B"));
        ranking.apply_re_ranks().unwrap();
        ranking.add_dependency(&k("B"), &k("C"));
        ranking.apply_re_ranks().unwrap();
        let before: Vec<_> = ["A", "B", "C"].iter().map(|key| ranking.rank(&k(key))).collect();

        ranking.add_dependency(&k("C"), &k("A"));
        let err = ranking.apply_re_ranks().unwrap_err();
        assert_eq!(err.code(), "E401");
        let FlowError::MeshCycle { path } = &err else {
            panic!("expected a mesh cycle, got {err}");
        };
        for key in ["A", "B", "C"] {
            assert!(path.iter().any(|p| p == key), "{key} missing from {path:?}");
        }
        assert_eq!(path.first(), path.last());

        let after: Vec<_> = ["A", "B", "C"].iter().map(|key| ranking.rank(&k(key))).collect();
        assert_eq!(before, after);
        assert!(!ranking.dependencies_of(&k("C")).contains(&k("A")));
    }

    #[test]
    fn remove_releases_dependencies() {
        let mut ranking = ranked(&["a", "b"]);
        ranking.add_dependency(&k("a"), &k("b"));
        ranking.apply_re_ranks().unwrap();
        assert_eq!(ranking.dependents_of(&k("b")), BTreeSet::from([k("a")]));

        let held = ranking.remove(&k("a"));
        assert_eq!(held, BTreeSet::from([k("b")]));
        assert!(ranking.dependents_of(&k("b")).is_empty());
        assert_eq!(ranking.max_rank(), 0);
        assert!(!ranking.contains(&k("a")));
    }

    #[test]
    fn remove_dependency_reports_orphans() {
        let mut ranking = ranked(&["a", "b", "c"]);
        ranking.add_dependency(&k("a"), &k("c"));
        ranking.add_dependency(&k("b"), &k("c"));
        assert!(!ranking.remove_dependency(&k("a"), &k("c")));
        assert!(ranking.remove_dependency(&k("b"), &k("c")));
    }
}
