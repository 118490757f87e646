//! # Orgmerge
//!
//! A deduplication and merge engine for organization records held in a
//! remote CRM-style store.
//!
//! This library finds duplicate organizations with exact and fuzzy
//! matching over blocked candidate buckets, clusters them with a
//! union-find pass, picks a deterministic primary per cluster, and
//! drives the remote merge endpoint with stale-reference recovery and
//! a manual-review ledger for everything it cannot settle on its own.

pub mod blocking;
pub mod cluster;
pub mod config;
pub mod dsu;
pub mod http;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod selector;
pub mod store;

// Re-export main types for convenience
pub use config::{ConfigOverrides, OrgmergeConfig};
pub use matcher::{Matcher, MatcherConfig};
pub use model::{
    Cluster, MergeAction, MergeOutcome, OrgId, OrgRecord, RunStats,
};
pub use orchestrator::{AutoApprove, ConfirmPolicy, Confirmation, GroupSummary, MergeOrchestrator};
pub use pipeline::RunReport;
pub use store::{MemoryStore, RemoteStore};

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Main API for organization deduplication.
pub struct Orgmerge {
    store: Box<dyn RemoteStore>,
    config: OrgmergeConfig,
}

impl Orgmerge {
    /// Create an instance talking to the configured remote API.
    pub fn new(config: OrgmergeConfig) -> Result<Self> {
        let store = http::HttpStore::new(config.remote.clone())
            .context("building remote store client")?;
        Ok(Self::with_store(store, config))
    }

    /// Create an instance over any store, e.g. a [`MemoryStore`].
    pub fn with_store<S: RemoteStore + 'static>(store: S, config: OrgmergeConfig) -> Self {
        Self {
            store: Box::new(store),
            config,
        }
    }

    pub fn config(&self) -> &OrgmergeConfig {
        &self.config
    }

    /// Run the full scan-match-cluster-merge pipeline.
    pub fn run(&self, confirm: &mut dyn ConfirmPolicy) -> Result<RunReport> {
        pipeline::run(self.store.as_ref(), &self.config, confirm)
    }

    /// Merge the duplicates of a single organization found by name.
    ///
    /// An exact-name search runs first; when it yields fewer than two
    /// records a token search widens the net, keeping only records
    /// whose normalized name equals the query's.
    pub fn merge_by_name(
        &self,
        name: &str,
        confirm: &mut dyn ConfirmPolicy,
    ) -> Result<GroupSummary> {
        let normalized = normalize::normalize_name(name);
        if normalized.is_empty() {
            warn!(name, "name normalizes to nothing, skipping");
            return Ok(GroupSummary::default());
        }

        let mut candidates = self
            .store
            .search_by_name(name, store::SearchOperator::Exact)?;
        if candidates.len() < 2 {
            let widened = self
                .store
                .search_by_name(name, store::SearchOperator::ContainsToken)?;
            candidates = widened
                .into_iter()
                .filter(|r| normalize::normalize_name(&r.name) == normalized)
                .collect();
        }

        let ids: BTreeSet<OrgId> = candidates.into_iter().map(|r| r.id).collect();
        if ids.len() < 2 {
            info!(name, found = ids.len(), "no duplicates to merge");
            return Ok(GroupSummary::default());
        }
        let ids: Vec<OrgId> = ids.into_iter().collect();

        let mut orchestrator = self.orchestrator();
        let group_key = format!("name:{normalized}");
        let summary = orchestrator.merge_group(&group_key, &ids, confirm)?;
        self.write_merge_artifacts(orchestrator)?;
        Ok(summary)
    }

    /// Re-run the groups recorded in a review ledger or clusters file.
    pub fn merge_review_file(
        &self,
        path: &Path,
        confirm: &mut dyn ConfirmPolicy,
    ) -> Result<GroupSummary> {
        let groups = report::read_review_groups_file(path)?;
        if groups.is_empty() {
            info!(path = %path.display(), "review file holds no groups");
            return Ok(GroupSummary::default());
        }

        let mut orchestrator = self.orchestrator();
        let mut total = GroupSummary::default();
        for (group_key, ids) in &groups {
            if orchestrator.aborted() {
                break;
            }
            let ids: Vec<OrgId> = ids.iter().cloned().collect();
            let summary = orchestrator.merge_group(group_key, &ids, confirm)?;
            total.succeeded += summary.succeeded;
            total.failed += summary.failed;
            total.skipped += summary.skipped;
        }
        self.write_merge_artifacts(orchestrator)?;
        Ok(total)
    }

    /// Export the store with resolved canonical ids to a CSV file.
    pub fn export_snapshot(&self, path: &Path, include_history: bool) -> Result<usize> {
        pipeline::export_snapshot(self.store.as_ref(), &self.config, path, include_history)
    }

    fn orchestrator(&self) -> MergeOrchestrator<'_> {
        MergeOrchestrator::new(
            self.store.as_ref(),
            self.config.merge.max_hops,
            self.config.merge.dry_run,
        )
    }

    fn write_merge_artifacts(&self, orchestrator: MergeOrchestrator<'_>) -> Result<()> {
        let output_dir = PathBuf::from(&self.config.output_dir);
        let (_, audit, review) = orchestrator.into_results();
        if !audit.is_empty() {
            report::append_audit_file(&output_dir.join(pipeline::AUDIT_FILE), &audit)?;
        }
        if !review.is_empty() {
            report::write_review_file(&output_dir.join(pipeline::REVIEW_FILE), &review)?;
        }
        Ok(())
    }
}
