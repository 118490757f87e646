//! # DSU Module
//!
//! Disjoint-set union over record arena indices. Uses path halving on
//! find and union by rank, so clustering stays effectively linear in
//! the number of accepted pairs.

use rustc_hash::FxHashMap;

/// Union-find structure keyed by arena index.
#[derive(Debug, Clone, Default)]
pub struct DisjointSet {
    parent: FxHashMap<usize, usize>,
    rank: FxHashMap<usize, u32>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an element as its own singleton set. No-op when the
    /// element is already known.
    pub fn add(&mut self, x: usize) {
        self.parent.entry(x).or_insert(x);
        self.rank.entry(x).or_insert(0);
    }

    /// Find the set root of `x`, halving the path along the way.
    pub fn find(&mut self, x: usize) -> usize {
        self.add(x);
        let mut current = x;
        loop {
            let parent = self.parent[&current];
            if parent == current {
                return current;
            }
            let grandparent = self.parent[&parent];
            self.parent.insert(current, grandparent);
            current = grandparent;
        }
    }

    /// Merge the sets containing `a` and `b`. Returns false when they
    /// were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }

        let rank_a = self.rank[&root_a];
        let rank_b = self.rank[&root_b];
        if rank_a < rank_b {
            self.parent.insert(root_a, root_b);
        } else if rank_a > rank_b {
            self.parent.insert(root_b, root_a);
        } else {
            self.parent.insert(root_b, root_a);
            self.rank.insert(root_a, rank_a + 1);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Extract all sets with at least two members. Members within a
    /// set and sets themselves are sorted by index, so the output is
    /// deterministic regardless of union order.
    pub fn clusters(&mut self) -> Vec<Vec<usize>> {
        let elements: Vec<usize> = self.parent.keys().copied().collect();
        let mut grouped: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for x in elements {
            let root = self.find(x);
            grouped.entry(root).or_default().push(x);
        }

        let mut clusters: Vec<Vec<usize>> = grouped
            .into_values()
            .filter(|members| members.len() >= 2)
            .collect();
        for members in &mut clusters {
            members.sort_unstable();
        }
        clusters.sort_unstable_by_key(|members| members[0]);
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_find_basics() {
        let mut dsu = DisjointSet::new();
        dsu.add(0);
        dsu.add(1);
        dsu.add(2);

        assert_ne!(dsu.find(0), dsu.find(1));
        assert!(dsu.union(0, 1));
        assert_eq!(dsu.find(0), dsu.find(1));
        assert!(!dsu.union(1, 0));
        assert_ne!(dsu.find(0), dsu.find(2));
    }

    #[test]
    fn test_find_registers_unknown_elements() {
        let mut dsu = DisjointSet::new();
        assert_eq!(dsu.find(7), 7);
        assert_eq!(dsu.len(), 1);
    }

    #[test]
    fn test_transitive_union() {
        let mut dsu = DisjointSet::new();
        dsu.union(0, 1);
        dsu.union(1, 2);
        dsu.union(3, 4);

        assert_eq!(dsu.find(0), dsu.find(2));
        assert_ne!(dsu.find(0), dsu.find(3));
    }

    #[test]
    fn test_clusters_drop_singletons_and_sort() {
        let mut dsu = DisjointSet::new();
        dsu.add(5);
        dsu.union(2, 0);
        dsu.union(0, 4);
        dsu.union(3, 1);

        let clusters = dsu.clusters();
        assert_eq!(clusters, vec![vec![0, 2, 4], vec![1, 3]]);
    }

    #[test]
    fn test_clusters_deterministic_across_union_order() {
        let mut a = DisjointSet::new();
        a.union(0, 1);
        a.union(1, 2);

        let mut b = DisjointSet::new();
        b.union(2, 1);
        b.union(0, 2);

        assert_eq!(a.clusters(), b.clusters());
    }

    #[test]
    fn test_long_chain_stays_flat() {
        let mut dsu = DisjointSet::new();
        for i in 0..1000 {
            dsu.union(i, i + 1);
        }
        let clusters = dsu.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 1001);
    }
}
