//! # Model Module
//!
//! Core data types shared across the deduplication pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of an organization record in the remote store.
///
/// Remote ids are opaque strings (typically decimal digits). They are
/// compared as strings everywhere except the primary-selection
/// tie-break, which is numeric-aware.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrgId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OrgId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An organization record as fetched from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRecord {
    pub id: OrgId,
    pub name: String,
    /// Raw website domain as stored remotely, if any.
    pub domain: Option<String>,
    /// Creation timestamp. Missing timestamps sort after present ones.
    pub created_at: Option<DateTime<Utc>>,
    /// Pointer to the record this one was merged into, if any.
    pub superseded_by: Option<OrgId>,
}

impl OrgRecord {
    pub fn new(id: impl Into<OrgId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            domain: None,
            created_at: None,
            superseded_by: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = Some(ts);
        self
    }

    pub fn with_superseded_by(mut self, id: impl Into<OrgId>) -> Self {
        self.superseded_by = Some(id.into());
        self
    }

    /// A record is a canonical endpoint when it has not been merged away.
    pub fn is_canonical(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// Normalized view of a record, derived once and reused by blocking
/// and matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedKey {
    /// Lowercased name with legal and weak suffixes stripped.
    pub name: String,
    /// First token of the normalized name, used as a blocking key.
    pub first_token: Option<String>,
    /// Non-stopword tokens of the normalized name.
    pub significant: BTreeSet<String>,
    /// Lowercased domain with a leading `www.` removed.
    pub domain: Option<String>,
    /// Approximate registrable root of the domain.
    pub domain_root: Option<String>,
}

/// Which blocking key space produced a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Token,
    Domain,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Token => "token",
            BlockKind::Domain => "domain",
        }
    }
}

/// A scored pair of records that survived the acceptance pipeline.
///
/// `left` always orders before `right` so that the same pair is never
/// emitted twice with swapped sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub left: OrgId,
    pub right: OrgId,
    pub score: f64,
    pub block: BlockKind,
    pub block_key: String,
}

impl CandidatePair {
    pub fn new(a: OrgId, b: OrgId, score: f64, block: BlockKind, block_key: String) -> Self {
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        Self {
            left,
            right,
            score,
            block,
            block_key,
        }
    }
}

/// A resolved duplicate cluster. Always holds at least two members,
/// sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub key: String,
    pub members: Vec<OrgId>,
}

/// Result of following a superseded-by chain from `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalChain {
    pub start: OrgId,
    pub canonical: OrgId,
    pub hops: usize,
    /// True when the hop bound was hit before the chain terminated.
    pub exhausted: bool,
}

/// Terminal state of a single (primary, secondary) merge attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    /// The remote store accepted the merge.
    Merged,
    /// The remote store reported the secondary already pointing at the
    /// current primary, so the merge was redundant.
    AlreadyCanonical,
    /// The first attempt hit a stale primary; the retry against the
    /// redirected primary succeeded.
    RetryRedirected { new_primary: OrgId },
    /// The secondary no longer exists in the remote store.
    SkippedMissing,
    /// The attempt failed after exhausting its single redirect retry.
    Failed { detail: String },
}

impl MergeAction {
    pub fn label(&self) -> &'static str {
        match self {
            MergeAction::Merged => "merged",
            MergeAction::AlreadyCanonical => "already_canonical",
            MergeAction::RetryRedirected { .. } => "retry_redirected",
            MergeAction::SkippedMissing => "skipped_missing",
            MergeAction::Failed { .. } => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MergeAction::Merged
                | MergeAction::AlreadyCanonical
                | MergeAction::RetryRedirected { .. }
        )
    }
}

/// Outcome of one merge attempt within a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub group_key: String,
    pub primary: OrgId,
    pub secondary: OrgId,
    pub action: MergeAction,
    /// True when the attempt was planned but not sent to the remote
    /// store.
    pub dry_run: bool,
}

/// A failed merge parked for human follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualReviewEntry {
    pub group_key: String,
    pub primary: OrgId,
    pub secondary: OrgId,
    pub suggested_canonical: Option<OrgId>,
    pub detail: String,
}

/// One row of the append-only merge audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub group_key: String,
    pub primary: OrgId,
    pub secondary: OrgId,
    pub action: String,
    pub detail: String,
}

/// Aggregate counters for a full pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub records_loaded: usize,
    pub malformed_skipped: usize,
    pub merged_history_skipped: usize,
    pub buckets_built: usize,
    pub buckets_skipped: usize,
    pub pairs_generated: usize,
    pub pairs_truncated: bool,
    pub clusters_found: usize,
    pub merges_succeeded: usize,
    pub merges_failed: usize,
    pub review_entries: usize,
    pub aborted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_org_id_display() {
        let id = OrgId::new("4633671122");
        assert_eq!(id.to_string(), "4633671122");
        assert_eq!(id.as_str(), "4633671122");
    }

    #[test]
    fn test_candidate_pair_orders_sides() {
        let pair = CandidatePair::new(
            OrgId::new("9"),
            OrgId::new("10"),
            95.0,
            BlockKind::Token,
            "token:acme".to_string(),
        );
        // String ordering: "10" < "9".
        assert_eq!(pair.left, OrgId::new("10"));
        assert_eq!(pair.right, OrgId::new("9"));
    }

    #[test]
    fn test_record_builder() {
        let ts = Utc.with_ymd_and_hms(2021, 3, 14, 9, 26, 53).unwrap();
        let rec = OrgRecord::new("1", "Acme Oy")
            .with_domain("acme.fi")
            .with_created_at(ts);
        assert!(rec.is_canonical());
        assert_eq!(rec.domain.as_deref(), Some("acme.fi"));

        let merged = rec.with_superseded_by("2");
        assert!(!merged.is_canonical());
    }

    #[test]
    fn test_merge_action_labels() {
        assert_eq!(MergeAction::Merged.label(), "merged");
        assert!(MergeAction::AlreadyCanonical.is_success());
        assert!(!MergeAction::SkippedMissing.is_success());
        let failed = MergeAction::Failed {
            detail: "HTTP 400".to_string(),
        };
        assert_eq!(failed.label(), "failed");
    }
}
