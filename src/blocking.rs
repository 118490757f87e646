//! # Blocking Module
//!
//! Buckets records under cheap keys so the matcher only compares
//! records that share a first name token or a domain. Candidate
//! generation cost stays near-linear as long as buckets stay small.

use crate::model::{BlockKind, NormalizedKey};
use std::collections::BTreeMap;
use tracing::warn;

/// Index of record positions bucketed by blocking key.
///
/// Keys are `token:<first_token>` and `domain:<normalized_domain>`.
/// Values are indices into the record slice the index was built from.
/// A `BTreeMap` keeps bucket iteration deterministic.
#[derive(Debug, Clone, Default)]
pub struct BlockingIndex {
    buckets: BTreeMap<String, Vec<usize>>,
}

/// Counters describing a built index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockingStats {
    pub buckets: usize,
    pub oversized: usize,
}

impl BlockingIndex {
    /// Build the index from normalized keys, aligned by position with
    /// the records they were derived from. Records without a first
    /// token or domain simply do not land in that key space.
    pub fn build(keys: &[NormalizedKey]) -> Self {
        let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for (idx, key) in keys.iter().enumerate() {
            if let Some(token) = &key.first_token {
                buckets
                    .entry(format!("token:{token}"))
                    .or_default()
                    .push(idx);
            }
            if let Some(domain) = &key.domain {
                buckets
                    .entry(format!("domain:{domain}"))
                    .or_default()
                    .push(idx);
            }
        }

        Self { buckets }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Iterate buckets in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.buckets.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Count buckets and those above the pairing ceiling, logging a
    /// warning when any bucket will be skipped.
    pub fn stats(&self, max_bucket_size: usize) -> BlockingStats {
        let oversized = self
            .buckets
            .values()
            .filter(|b| b.len() > max_bucket_size)
            .count();
        if oversized > 0 {
            warn!(
                oversized,
                max_bucket_size, "oversized buckets will be skipped during pair generation"
            );
        }
        BlockingStats {
            buckets: self.buckets.len(),
            oversized,
        }
    }
}

/// Classify a bucket key into its key space.
pub fn block_kind(bucket_key: &str) -> BlockKind {
    if bucket_key.starts_with("token:") {
        BlockKind::Token
    } else {
        BlockKind::Domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrgRecord;
    use crate::normalize::key_for;

    fn keys(records: &[OrgRecord]) -> Vec<NormalizedKey> {
        records.iter().map(key_for).collect()
    }

    #[test]
    fn test_build_token_and_domain_buckets() {
        let records = vec![
            OrgRecord::new("1", "Acme Oy").with_domain("acme.fi"),
            OrgRecord::new("2", "Acme Group").with_domain("acme.com"),
            OrgRecord::new("3", "Beta Ltd"),
        ];
        let index = BlockingIndex::build(&keys(&records));

        let buckets: Vec<(&str, &[usize])> = index.iter().collect();
        let token_acme = buckets
            .iter()
            .find(|(k, _)| *k == "token:acme")
            .map(|(_, v)| v.to_vec());
        assert_eq!(token_acme, Some(vec![0, 1]));

        assert!(buckets.iter().any(|(k, _)| *k == "domain:acme.fi"));
        assert!(buckets.iter().any(|(k, _)| *k == "token:beta"));
        // No domain bucket for the domainless record.
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_record_without_name_or_domain_is_unbucketed() {
        let records = vec![OrgRecord::new("1", "")];
        let index = BlockingIndex::build(&keys(&records));
        assert!(index.is_empty());
    }

    #[test]
    fn test_stats_counts_oversized() {
        let records: Vec<OrgRecord> = (0..5)
            .map(|i| OrgRecord::new(i.to_string(), "Acme Oy"))
            .collect();
        let index = BlockingIndex::build(&keys(&records));
        let stats = index.stats(3);
        assert_eq!(stats.buckets, 1);
        assert_eq!(stats.oversized, 1);
        assert_eq!(index.stats(10).oversized, 0);
    }

    #[test]
    fn test_block_kind_from_key() {
        assert_eq!(block_kind("token:acme"), BlockKind::Token);
        assert_eq!(block_kind("domain:acme.fi"), BlockKind::Domain);
    }
}
