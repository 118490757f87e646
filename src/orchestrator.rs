//! # Orchestrator Module
//!
//! Drives merges for duplicate groups against the remote store. Every
//! (primary, secondary) pair walks a small state machine: it either
//! merges, turns out to be already canonical, gets skipped because the
//! secondary vanished, or fails into the manual-review ledger. A stale
//! primary earns exactly one retry against the redirected canonical id.

use crate::model::{
    AuditEntry, Cluster, ManualReviewEntry, MergeAction, MergeOutcome, OrgId, OrgRecord,
};
use crate::resolver::CanonicalResolver;
use crate::selector::choose_primary;
use crate::store::{MergeResponse, RemoteStore, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Answer from a confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Merge this group.
    Approve,
    /// Skip this group.
    Skip,
    /// Merge this and every remaining group without asking again.
    ApproveRest,
    /// Stop processing groups entirely.
    Abort,
}

/// One line of the per-group preview shown to a confirmation gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRow {
    pub id: OrgId,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Decides per group whether merging may proceed.
pub trait ConfirmPolicy {
    fn confirm(&mut self, group_key: &str, preview: &[PreviewRow]) -> Confirmation;
}

/// Approves every group. Used for unattended runs.
pub struct AutoApprove;

impl ConfirmPolicy for AutoApprove {
    fn confirm(&mut self, _group_key: &str, _preview: &[PreviewRow]) -> Confirmation {
        Confirmation::Approve
    }
}

/// Declines every group. Useful for inventory-only runs.
pub struct DeclineAll;

impl ConfirmPolicy for DeclineAll {
    fn confirm(&mut self, _group_key: &str, _preview: &[PreviewRow]) -> Confirmation {
        Confirmation::Skip
    }
}

impl<F> ConfirmPolicy for F
where
    F: FnMut(&str, &[PreviewRow]) -> Confirmation,
{
    fn confirm(&mut self, group_key: &str, preview: &[PreviewRow]) -> Confirmation {
        self(group_key, preview)
    }
}

/// Per-group tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Merge driver. Owns the run-scoped resolver cache, the audit trail
/// and the manual-review ledger.
pub struct MergeOrchestrator<'a> {
    store: &'a dyn RemoteStore,
    resolver: CanonicalResolver,
    dry_run: bool,
    approve_rest: bool,
    aborted: bool,
    outcomes: Vec<MergeOutcome>,
    audit: Vec<AuditEntry>,
    review: Vec<ManualReviewEntry>,
}

impl<'a> MergeOrchestrator<'a> {
    pub fn new(store: &'a dyn RemoteStore, max_hops: usize, dry_run: bool) -> Self {
        Self {
            store,
            resolver: CanonicalResolver::new(max_hops),
            dry_run,
            approve_rest: false,
            aborted: false,
            outcomes: Vec::new(),
            audit: Vec::new(),
            review: Vec::new(),
        }
    }

    pub fn outcomes(&self) -> &[MergeOutcome] {
        &self.outcomes
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    pub fn review(&self) -> &[ManualReviewEntry] {
        &self.review
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn into_results(
        self,
    ) -> (Vec<MergeOutcome>, Vec<AuditEntry>, Vec<ManualReviewEntry>) {
        (self.outcomes, self.audit, self.review)
    }

    /// Process clusters in order, honoring an abort from the gate.
    pub fn merge_clusters(
        &mut self,
        clusters: &[Cluster],
        confirm: &mut dyn ConfirmPolicy,
    ) -> Result<GroupSummary, StoreError> {
        let mut total = GroupSummary::default();
        for cluster in clusters {
            if self.aborted {
                break;
            }
            let summary = self.merge_group(&cluster.key, &cluster.members, confirm)?;
            total.succeeded += summary.succeeded;
            total.failed += summary.failed;
            total.skipped += summary.skipped;
        }
        Ok(total)
    }

    /// Merge one group of ids into a single canonical record.
    pub fn merge_group(
        &mut self,
        group_key: &str,
        ids: &[OrgId],
        confirm: &mut dyn ConfirmPolicy,
    ) -> Result<GroupSummary, StoreError> {
        let mut summary = GroupSummary::default();

        let unique: BTreeSet<OrgId> = ids.iter().cloned().collect();
        if unique.len() <= 1 {
            return Ok(summary);
        }

        // Fetch current state for every member; the snapshot the group
        // came from may be stale.
        let wanted: Vec<OrgId> = unique.iter().cloned().collect();
        let present: BTreeMap<OrgId, OrgRecord> = self
            .store
            .batch_fetch(&wanted)?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let missing: Vec<OrgId> = unique
            .iter()
            .filter(|id| !present.contains_key(id))
            .cloned()
            .collect();
        for id in &missing {
            warn!(group = group_key, id = %id, "group member missing remotely");
        }

        if present.len() <= 1 {
            self.push_audit(group_key, None, None, "group_skipped", "fewer than two live records");
            summary.skipped += unique.len();
            return Ok(summary);
        }

        if !self.approve_rest {
            let preview: Vec<PreviewRow> = present
                .values()
                .map(|r| PreviewRow {
                    id: r.id.clone(),
                    name: r.name.clone(),
                    created_at: r.created_at,
                })
                .collect();
            match confirm.confirm(group_key, &preview) {
                Confirmation::Approve => {}
                Confirmation::ApproveRest => self.approve_rest = true,
                Confirmation::Skip => {
                    info!(group = group_key, "group skipped by confirmation gate");
                    self.push_audit(group_key, None, None, "group_declined", "");
                    summary.skipped += present.len();
                    return Ok(summary);
                }
                Confirmation::Abort => {
                    info!(group = group_key, "run aborted by confirmation gate");
                    self.push_audit(group_key, None, None, "run_aborted", "");
                    self.aborted = true;
                    return Ok(summary);
                }
            }
        }

        // Resolve each member to its live canonical endpoint.
        let mut canonical_ids: BTreeSet<OrgId> = BTreeSet::new();
        for record in present.values() {
            let chain = self.resolver.resolve_with_seed(self.store, record)?;
            canonical_ids.insert(chain.canonical);
        }

        let mut primary = self.select_primary(&canonical_ids, &present)?;
        info!(group = group_key, primary = %primary, "selected primary");

        for id in missing {
            self.record(
                group_key,
                primary.clone(),
                id,
                MergeAction::SkippedMissing,
                None,
                &mut summary,
            );
        }

        let member_ids: Vec<OrgId> = present.keys().cloned().collect();
        for secondary in member_ids {
            if secondary == primary {
                continue;
            }

            if self.dry_run {
                self.record(
                    group_key,
                    primary.clone(),
                    secondary,
                    MergeAction::Merged,
                    None,
                    &mut summary,
                );
                continue;
            }

            let (action, suggested) = self.attempt_merge(group_key, &mut primary, &secondary);
            self.record(
                group_key,
                primary.clone(),
                secondary,
                action,
                suggested,
                &mut summary,
            );
        }

        Ok(summary)
    }

    /// Single canonical id wins outright; otherwise the oldest of the
    /// canonical candidates (fetched as needed) becomes primary.
    fn select_primary(
        &mut self,
        canonical_ids: &BTreeSet<OrgId>,
        present: &BTreeMap<OrgId, OrgRecord>,
    ) -> Result<OrgId, StoreError> {
        if canonical_ids.len() == 1 {
            if let Some(id) = canonical_ids.iter().next() {
                return Ok(id.clone());
            }
        }

        let mut candidates: Vec<OrgRecord> = Vec::new();
        for id in canonical_ids {
            let record = match present.get(id) {
                Some(r) => Some(r.clone()),
                None => self.store.fetch(id)?,
            };
            // A canonical id that cannot be fetched still competes,
            // with no timestamp it simply sorts last.
            candidates.push(record.unwrap_or_else(|| OrgRecord::new(id.clone(), "")));
        }

        match choose_primary(&candidates) {
            Some(record) => Ok(record.id.clone()),
            None => Err(StoreError::Malformed(
                "no canonical candidates for group".to_string(),
            )),
        }
    }

    /// One merge attempt with its single bounded redirect retry. May
    /// switch `primary` for the rest of the group. The second element
    /// is the canonical id suggested to the review ledger on failure.
    fn attempt_merge(
        &mut self,
        group_key: &str,
        primary: &mut OrgId,
        secondary: &OrgId,
    ) -> (MergeAction, Option<OrgId>) {
        let first = match self.store.merge(primary, secondary) {
            Ok(resp) => resp,
            Err(e) => {
                return (
                    MergeAction::Failed {
                        detail: e.to_string(),
                    },
                    None,
                )
            }
        };

        match first {
            MergeResponse::Merged => (MergeAction::Merged, None),
            MergeResponse::NotFound => (MergeAction::SkippedMissing, None),
            MergeResponse::Failed { status, message } => (
                MergeAction::Failed {
                    detail: format!("HTTP {status}: {message}"),
                },
                None,
            ),
            MergeResponse::StaleReference { canonical_id } => {
                if canonical_id == *primary {
                    // The secondary already points at our primary; the
                    // merge is redundant.
                    return (MergeAction::AlreadyCanonical, None);
                }

                warn!(
                    group = group_key,
                    old_primary = %primary,
                    new_primary = %canonical_id,
                    "stale primary, switching and retrying once"
                );
                self.push_audit(
                    group_key,
                    Some(primary.clone()),
                    Some(secondary.clone()),
                    "primary_redirected",
                    canonical_id.as_str(),
                );
                *primary = canonical_id;
                self.resolver.invalidate();

                match self.store.merge(primary, secondary) {
                    Ok(MergeResponse::Merged) => (
                        MergeAction::RetryRedirected {
                            new_primary: primary.clone(),
                        },
                        None,
                    ),
                    Ok(MergeResponse::StaleReference { canonical_id }) => {
                        if canonical_id == *primary {
                            (MergeAction::AlreadyCanonical, None)
                        } else {
                            (
                                MergeAction::Failed {
                                    detail: format!(
                                        "still stale after redirect, points to {canonical_id}"
                                    ),
                                },
                                Some(canonical_id),
                            )
                        }
                    }
                    Ok(MergeResponse::NotFound) => (MergeAction::SkippedMissing, None),
                    Ok(MergeResponse::Failed { status, message }) => (
                        MergeAction::Failed {
                            detail: format!("HTTP {status} after redirect: {message}"),
                        },
                        Some(primary.clone()),
                    ),
                    Err(e) => (
                        MergeAction::Failed {
                            detail: format!("after redirect: {e}"),
                        },
                        Some(primary.clone()),
                    ),
                }
            }
        }
    }

    /// Record an outcome: outcome list, audit trail, counters, and the
    /// review ledger for failures. The audit entry lands before the
    /// next pair is attempted.
    fn record(
        &mut self,
        group_key: &str,
        primary: OrgId,
        secondary: OrgId,
        action: MergeAction,
        suggested: Option<OrgId>,
        summary: &mut GroupSummary,
    ) {
        let detail = match &action {
            MergeAction::Failed { detail } => detail.clone(),
            MergeAction::RetryRedirected { new_primary } => {
                format!("redirected to {new_primary}")
            }
            _ => String::new(),
        };
        self.push_audit(
            group_key,
            Some(primary.clone()),
            Some(secondary.clone()),
            if self.dry_run { "planned" } else { action.label() },
            &detail,
        );

        match &action {
            MergeAction::Failed { detail } => {
                summary.failed += 1;
                self.review.push(ManualReviewEntry {
                    group_key: group_key.to_string(),
                    primary: primary.clone(),
                    secondary: secondary.clone(),
                    suggested_canonical: suggested,
                    detail: detail.clone(),
                });
            }
            MergeAction::SkippedMissing => summary.skipped += 1,
            _ => summary.succeeded += 1,
        }

        self.outcomes.push(MergeOutcome {
            group_key: group_key.to_string(),
            primary,
            secondary,
            action,
            dry_run: self.dry_run,
        });
    }

    fn push_audit(
        &mut self,
        group_key: &str,
        primary: Option<OrgId>,
        secondary: Option<OrgId>,
        action: &str,
        detail: &str,
    ) {
        self.audit.push(AuditEntry {
            timestamp: Utc::now(),
            group_key: group_key.to_string(),
            primary: primary.unwrap_or_else(|| OrgId::new("")),
            secondary: secondary.unwrap_or_else(|| OrgId::new("")),
            action: action.to_string(),
            detail: detail.to_string(),
        });
    }
}
