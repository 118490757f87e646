//! # Cluster Module
//!
//! Builds duplicate clusters from exact-key groups and accepted fuzzy
//! pairs. Exact groups (shared normalized domain, shared normalized
//! name, shared contact-derived domain) are unioned star-wise;
//! fuzzy pairs pairwise. Transitivity comes for free from the DSU:
//! if A pairs with B and B with C, all three land in one cluster.

use crate::dsu::DisjointSet;
use crate::model::{CandidatePair, Cluster, NormalizedKey, OrgId, OrgRecord};
use std::collections::BTreeMap;
use tracing::debug;

/// Assembles clusters over a fixed record arena.
#[derive(Debug, Default)]
pub struct ClusterBuilder {
    dsu: DisjointSet,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union records sharing an exact grouping key. Each group map
    /// value holds arena indices; groups of fewer than two distinct
    /// records contribute nothing.
    pub fn add_exact_groups(&mut self, groups: &BTreeMap<String, Vec<usize>>) {
        for members in groups.values() {
            if members.len() < 2 {
                continue;
            }
            let first = members[0];
            for &other in &members[1..] {
                self.dsu.union(first, other);
            }
        }
    }

    /// Union both sides of every accepted fuzzy pair.
    pub fn add_pairs(&mut self, pairs: &[CandidatePair], index_of: &BTreeMap<OrgId, usize>) {
        for pair in pairs {
            if let (Some(&a), Some(&b)) = (index_of.get(&pair.left), index_of.get(&pair.right)) {
                self.dsu.union(a, b);
            }
        }
    }

    /// Extract clusters of size two or more, keyed by their smallest
    /// member id. Members are sorted by id, clusters by key, so the
    /// result is stable across runs.
    pub fn build(mut self, records: &[OrgRecord]) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = self
            .dsu
            .clusters()
            .into_iter()
            .map(|members| {
                let mut ids: Vec<OrgId> =
                    members.iter().map(|&i| records[i].id.clone()).collect();
                ids.sort();
                Cluster {
                    key: format!("cluster:{}", ids[0]),
                    members: ids,
                }
            })
            .collect();
        clusters.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(clusters = clusters.len(), "cluster extraction complete");
        clusters
    }
}

/// Group arena indices by exact keys: normalized domain, normalized
/// name, and contact-derived domain where present. Returns one merged
/// key space; keys are prefixed so the spaces cannot collide.
pub fn exact_groups(
    records: &[OrgRecord],
    keys: &[NormalizedKey],
    contact_domains: &BTreeMap<OrgId, String>,
) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for (idx, key) in keys.iter().enumerate() {
        if let Some(domain) = &key.domain {
            groups
                .entry(format!("company_domain:{domain}"))
                .or_default()
                .push(idx);
        }
        if !key.name.is_empty() {
            groups
                .entry(format!("company_name:{}", key.name))
                .or_default()
                .push(idx);
        }
        if let Some(cd) = contact_domains.get(&records[idx].id) {
            groups
                .entry(format!("contact_domain:{cd}"))
                .or_default()
                .push(idx);
        }
    }

    groups
}

/// Rebuild clusters from previously accepted pairs alone, e.g. when
/// consuming a persisted candidate-pairs table.
pub fn clusters_from_pairs(pairs: &[CandidatePair]) -> Vec<Cluster> {
    let mut index_of: BTreeMap<OrgId, usize> = BTreeMap::new();
    let mut ids: Vec<OrgId> = Vec::new();
    for pair in pairs {
        for id in [&pair.left, &pair.right] {
            if !index_of.contains_key(id) {
                index_of.insert(id.clone(), ids.len());
                ids.push(id.clone());
            }
        }
    }

    let mut dsu = DisjointSet::new();
    for pair in pairs {
        dsu.union(index_of[&pair.left], index_of[&pair.right]);
    }

    let mut clusters: Vec<Cluster> = dsu
        .clusters()
        .into_iter()
        .map(|members| {
            let mut member_ids: Vec<OrgId> = members.iter().map(|&i| ids[i].clone()).collect();
            member_ids.sort();
            Cluster {
                key: format!("cluster:{}", member_ids[0]),
                members: member_ids,
            }
        })
        .collect();
    clusters.sort_by(|a, b| a.key.cmp(&b.key));
    clusters
}
