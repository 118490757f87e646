//! # Matcher Module
//!
//! Weighted fuzzy scoring of candidate pairs inside blocking buckets.
//! The score is a 0-100 weighted ratio over normalized names: the best
//! of the plain, token-sorted, token-set and partial-window similarities,
//! with the partial variants discounted when string lengths diverge.

use crate::blocking::{block_kind, BlockingIndex};
use crate::model::{CandidatePair, NormalizedKey, OrgRecord};
use crate::normalize::has_significant_overlap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Tuning knobs for pair generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum weighted-ratio score for a pair to be kept.
    pub min_score: f64,
    /// Buckets larger than this are skipped entirely.
    pub max_bucket_size: usize,
    /// Optional global cap on generated pairs.
    pub max_pairs: Option<usize>,
    /// Adjusted domain-root score below which a pair is always rejected.
    pub root_reject_below: f64,
    /// Adjusted domain-root score below which a pair is rejected unless
    /// the name score clears `name_override_score`.
    pub root_soft_below: f64,
    /// Name score that overrides a moderate domain-root disagreement.
    pub name_override_score: f64,
    /// Penalty per character of root length difference.
    pub root_length_penalty: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_score: 90.0,
            max_bucket_size: 200,
            max_pairs: None,
            root_reject_below: 60.0,
            root_soft_below: 80.0,
            name_override_score: 98.0,
            root_length_penalty: 5.0,
        }
    }
}

impl MatcherConfig {
    /// Tightened profile for runs where false positives are costlier
    /// than missed duplicates.
    pub fn strict() -> Self {
        Self {
            min_score: 95.0,
            max_bucket_size: 100,
            ..Self::default()
        }
    }
}

/// Output of a pair-generation pass.
#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    pub pairs: Vec<CandidatePair>,
    /// Buckets skipped for exceeding the ceiling, with their sizes.
    pub skipped_buckets: Vec<(String, usize)>,
    /// True when the global pair cap stopped generation early.
    pub truncated: bool,
}

/// Similarity of two strings in [0, 100] based on edit distance.
pub fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

fn token_sorted(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Ratio over alphabetically sorted tokens, tolerant of word reorder.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&token_sorted(a), &token_sorted(b))
}

/// Ratio over token intersections and differences, tolerant of one
/// side carrying extra words.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();

    let common: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).copied().collect();

    let base = common.join(" ");
    let combined_a = join_nonempty(&base, &only_a.join(" "));
    let combined_b = join_nonempty(&base, &only_b.join(" "));

    ratio(&base, &combined_a)
        .max(ratio(&base, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn join_nonempty(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a} {b}"),
    }
}

/// Best ratio of the shorter string against every equally long window
/// of the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let chars_a: Vec<char> = a.chars().collect();
    let chars_b: Vec<char> = b.chars().collect();
    let (short, long) = if chars_a.len() <= chars_b.len() {
        (chars_a, chars_b)
    } else {
        (chars_b, chars_a)
    };
    if short.is_empty() {
        return 0.0;
    }
    if short.len() == long.len() {
        let s: String = short.iter().collect();
        let l: String = long.iter().collect();
        return ratio(&s, &l);
    }

    let needle: String = short.iter().collect();
    let mut best: f64 = 0.0;
    for window in long.windows(short.len()) {
        let hay: String = window.iter().collect();
        best = best.max(ratio(&needle, &hay));
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Weighted combination of the ratio variants. Partial variants only
/// participate when lengths diverge, and are discounted the further
/// they diverge, so a short name cannot trivially match inside a long
/// unrelated one.
pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let len_a = a.chars().count() as f64;
    let len_b = b.chars().count() as f64;
    let len_ratio = len_a.max(len_b) / len_a.min(len_b);

    let base = ratio(a, b);
    const TOKEN_SCALE: f64 = 0.95;

    if len_ratio < 1.5 {
        return base
            .max(token_sort_ratio(a, b) * TOKEN_SCALE)
            .max(token_set_ratio(a, b) * TOKEN_SCALE);
    }

    let partial_scale = if len_ratio < 8.0 { 0.90 } else { 0.60 };
    let sorted_a = token_sorted(a);
    let sorted_b = token_sorted(b);
    base.max(partial_ratio(a, b) * partial_scale)
        .max(partial_ratio(&sorted_a, &sorted_b) * TOKEN_SCALE * partial_scale)
        .max(token_set_ratio(a, b) * TOKEN_SCALE * partial_scale)
}

/// Pair generator over a blocking index.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Generate accepted candidate pairs. `records` and `keys` must be
    /// aligned by position; `index` must have been built from `keys`.
    pub fn generate_pairs(
        &self,
        records: &[OrgRecord],
        keys: &[NormalizedKey],
        index: &BlockingIndex,
    ) -> MatchReport {
        let cfg = &self.config;
        let mut report = MatchReport::default();
        let mut seen: FxHashSet<(usize, usize)> = FxHashSet::default();

        for (bucket_key, members) in index.iter() {
            let n = members.len();
            if n < 2 {
                continue;
            }
            if n > cfg.max_bucket_size {
                warn!(bucket = bucket_key, size = n, "skipping oversized bucket");
                report.skipped_buckets.push((bucket_key.to_string(), n));
                continue;
            }

            let kind = block_kind(bucket_key);

            for i in 0..n {
                let ia = members[i];
                for j in (i + 1)..n {
                    let ib = members[j];
                    let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
                    if !seen.insert((lo, hi)) {
                        continue;
                    }

                    let key_a = &keys[ia];
                    let key_b = &keys[ib];

                    if !has_significant_overlap(&key_a.name, &key_b.name) {
                        continue;
                    }

                    let score = weighted_ratio(&key_a.name, &key_b.name);
                    if score < cfg.min_score {
                        continue;
                    }

                    if !self.passes_domain_gate(key_a, key_b, score) {
                        continue;
                    }

                    report.pairs.push(CandidatePair::new(
                        records[ia].id.clone(),
                        records[ib].id.clone(),
                        score,
                        kind,
                        bucket_key.to_string(),
                    ));

                    if let Some(cap) = cfg.max_pairs {
                        if report.pairs.len() >= cap {
                            warn!(cap, "pair cap reached, stopping generation early");
                            report.truncated = true;
                            return report;
                        }
                    }
                }
            }
        }

        debug!(
            pairs = report.pairs.len(),
            skipped_buckets = report.skipped_buckets.len(),
            "pair generation complete"
        );
        report
    }

    /// Domain-root agreement check. Skipped when the normalized names
    /// are identical or either side lacks a root. Root similarity is
    /// penalized by length difference before being compared to the
    /// thresholds.
    fn passes_domain_gate(&self, a: &NormalizedKey, b: &NormalizedKey, name_score: f64) -> bool {
        if a.name == b.name {
            return true;
        }
        let (root_a, root_b) = match (&a.domain_root, &b.domain_root) {
            (Some(ra), Some(rb)) => (ra, rb),
            _ => return true,
        };

        let cfg = &self.config;
        let root_score = weighted_ratio(root_a, root_b);
        let length_diff = (root_a.chars().count() as i64 - root_b.chars().count() as i64).abs();
        let adjusted = root_score - length_diff as f64 * cfg.root_length_penalty;

        if adjusted < cfg.root_reject_below {
            return false;
        }
        if adjusted < cfg.root_soft_below && name_score < cfg.name_override_score {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::key_for;

    fn report_for(records: &[OrgRecord], config: MatcherConfig) -> MatchReport {
        let keys: Vec<NormalizedKey> = records.iter().map(key_for).collect();
        let index = BlockingIndex::build(&keys);
        Matcher::new(config).generate_pairs(records, &keys, &index)
    }

    #[test]
    fn test_ratio_bounds() {
        assert_eq!(ratio("acme", "acme"), 100.0);
        assert_eq!(ratio("", ""), 100.0);
        assert!(ratio("acme", "zzzz") < 30.0);
    }

    #[test]
    fn test_token_sort_handles_reorder() {
        assert_eq!(
            token_sort_ratio("kuivaustekniikka oulun", "oulun kuivaustekniikka"),
            100.0
        );
    }

    #[test]
    fn test_token_set_tolerates_extra_words() {
        assert_eq!(token_set_ratio("acme oulu", "acme"), 100.0);
    }

    #[test]
    fn test_partial_ratio_substring() {
        assert_eq!(partial_ratio("acme", "acme industries"), 100.0);
        assert_eq!(partial_ratio("", "acme"), 0.0);
    }

    #[test]
    fn test_weighted_ratio_identity_and_empty() {
        assert_eq!(weighted_ratio("acme", "acme"), 100.0);
        assert_eq!(weighted_ratio("", "acme"), 0.0);
    }

    #[test]
    fn test_weighted_ratio_near_match() {
        let score = weighted_ratio("nokia networks", "nokia network");
        assert!(score >= 90.0, "score was {score}");
        assert!(score < 100.0);
    }

    #[test]
    fn test_accepts_near_identical_names_without_domains() {
        let records = vec![
            OrgRecord::new("1", "Nokia Networks Oy"),
            OrgRecord::new("2", "Nokia Network"),
        ];
        let report = report_for(&records, MatcherConfig::default());
        assert_eq!(report.pairs.len(), 1);
        let pair = &report.pairs[0];
        assert_eq!(pair.left, "1".into());
        assert_eq!(pair.right, "2".into());
        assert!(pair.score >= 90.0);
    }

    #[test]
    fn test_identical_names_bypass_domain_gate() {
        let records = vec![
            OrgRecord::new("1", "Audionova").with_domain("audionova.dk"),
            OrgRecord::new("2", "Audionova AB").with_domain("totally-different.se"),
        ];
        let report = report_for(&records, MatcherConfig::default());
        assert_eq!(report.pairs.len(), 1);
    }

    #[test]
    fn test_domain_gate_rejects_disagreeing_roots() {
        // Names overlap on "acme" and the partial ratio is high, but
        // the domain roots disagree hard.
        let records = vec![
            OrgRecord::new("1", "Acme").with_domain("acme.fi"),
            OrgRecord::new("2", "Acme Industries").with_domain("industries-intl.com"),
        ];
        let report = report_for(&records, MatcherConfig::default());
        assert!(report.pairs.is_empty());
    }

    #[test]
    fn test_token_overlap_gate_rejects_stopword_only_overlap() {
        let records = vec![
            OrgRecord::new("1", "University of Oulu"),
            OrgRecord::new("2", "University of Oslo"),
        ];
        let report = report_for(&records, MatcherConfig::default());
        assert!(report.pairs.is_empty());
    }

    #[test]
    fn test_oversized_bucket_is_skipped_and_reported() {
        let records: Vec<OrgRecord> = (0..4)
            .map(|i| OrgRecord::new(i.to_string(), "Acme Oy"))
            .collect();
        let config = MatcherConfig {
            max_bucket_size: 3,
            ..MatcherConfig::default()
        };
        let report = report_for(&records, config);
        assert!(report.pairs.is_empty());
        assert_eq!(report.skipped_buckets, vec![("token:acme".to_string(), 4)]);
    }

    #[test]
    fn test_pair_cap_truncates() {
        let records: Vec<OrgRecord> = (0..4)
            .map(|i| OrgRecord::new(i.to_string(), "Acme Oy"))
            .collect();
        let config = MatcherConfig {
            max_pairs: Some(2),
            ..MatcherConfig::default()
        };
        let report = report_for(&records, config);
        assert_eq!(report.pairs.len(), 2);
        assert!(report.truncated);
    }

    #[test]
    fn test_pair_deduplicated_across_buckets() {
        // Same pair reachable through both the token and domain bucket.
        let records = vec![
            OrgRecord::new("1", "Acme Oy").with_domain("acme.fi"),
            OrgRecord::new("2", "Acme").with_domain("acme.fi"),
        ];
        let report = report_for(&records, MatcherConfig::default());
        assert_eq!(report.pairs.len(), 1);
    }

    #[test]
    fn test_strict_profile_tightens_min_score() {
        let cfg = MatcherConfig::strict();
        assert!(cfg.min_score > MatcherConfig::default().min_score);
        assert!(cfg.max_bucket_size < MatcherConfig::default().max_bucket_size);
    }
}
