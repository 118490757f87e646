//! # Pipeline Module
//!
//! End-to-end deduplication run: snapshot load, contact-domain
//! enrichment, normalization, blocking, fuzzy pair generation,
//! clustering, and the merge pass, with every stage's artifact written
//! under the configured output directory.

use crate::blocking::BlockingIndex;
use crate::cluster::{exact_groups, ClusterBuilder};
use crate::config::OrgmergeConfig;
use crate::matcher::Matcher;
use crate::model::{Cluster, NormalizedKey, OrgId, OrgRecord, RunStats};
use crate::normalize::{email_domain, is_freemail, key_for};
use crate::orchestrator::{ConfirmPolicy, MergeOrchestrator};
use crate::report::{self, SnapshotRow};
use crate::resolver::CanonicalResolver;
use crate::store::{RemoteStore, StoreError};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const PAIRS_FILE: &str = "candidate_pairs.csv";
pub const CLUSTERS_FILE: &str = "clusters.csv";
pub const AUDIT_FILE: &str = "audit_log.csv";
pub const REVIEW_FILE: &str = "manual_review.csv";

/// Result of a full pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stats: RunStats,
    pub clusters: Vec<Cluster>,
}

/// Scan every page of the remote store. Rows without an id or a name
/// cannot take part in matching and are dropped with a count.
pub fn load_snapshot(
    store: &dyn RemoteStore,
    page_limit: usize,
) -> Result<(Vec<OrgRecord>, usize), StoreError> {
    let mut records = Vec::new();
    let mut malformed = 0usize;
    let mut after: Option<String> = None;

    loop {
        let page = store.list_page(after.as_deref(), page_limit)?;
        for record in page.records {
            if record.id.as_str().trim().is_empty() || record.name.trim().is_empty() {
                malformed += 1;
                continue;
            }
            records.push(record);
        }
        match page.after {
            Some(cursor) => after = Some(cursor),
            None => break,
        }
    }

    info!(loaded = records.len(), malformed, "snapshot scan complete");
    Ok((records, malformed))
}

/// Derive a domain for records that have none, from the email domains
/// of their associated contacts. Freemail providers are ignored; the
/// most frequent remaining domain wins, ties broken alphabetically.
pub fn contact_domains(
    store: &dyn RemoteStore,
    records: &[OrgRecord],
) -> Result<BTreeMap<OrgId, String>, StoreError> {
    let domainless: Vec<OrgId> = records
        .iter()
        .filter(|r| r.domain.is_none())
        .map(|r| r.id.clone())
        .collect();
    if domainless.is_empty() {
        return Ok(BTreeMap::new());
    }

    let associations = store.contacts_for(&domainless)?;
    let all_contacts: Vec<String> = {
        let mut ids: Vec<String> = associations.values().flatten().cloned().collect();
        ids.sort();
        ids.dedup();
        ids
    };
    let emails = store.contact_emails(&all_contacts)?;

    let mut derived = BTreeMap::new();
    for (org_id, contact_ids) in &associations {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for contact_id in contact_ids {
            let Some(email) = emails.get(contact_id) else { continue };
            let Some(domain) = email_domain(email) else { continue };
            if is_freemail(&domain) {
                continue;
            }
            *counts.entry(domain).or_insert(0) += 1;
        }
        // On a count tie the alphabetically smallest domain wins.
        let best = counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(domain, _)| domain.clone());
        if let Some(domain) = best {
            debug!(org = %org_id, domain, "derived domain from contacts");
            derived.insert(org_id.clone(), domain);
        }
    }

    info!(derived = derived.len(), candidates = domainless.len(), "contact-domain enrichment done");
    Ok(derived)
}

/// Build normalized keys for the arena, substituting derived contact
/// domains where the record itself has none.
pub fn build_keys(
    records: &[OrgRecord],
    derived: &BTreeMap<OrgId, String>,
) -> Vec<NormalizedKey> {
    records
        .iter()
        .map(|record| {
            if record.domain.is_some() {
                return key_for(record);
            }
            match derived.get(&record.id) {
                Some(domain) => {
                    let enriched = record.clone().with_domain(domain.clone());
                    key_for(&enriched)
                }
                None => key_for(record),
            }
        })
        .collect()
}

/// Run the full pipeline against a store.
pub fn run(
    store: &dyn RemoteStore,
    config: &OrgmergeConfig,
    confirm: &mut dyn ConfirmPolicy,
) -> Result<RunReport> {
    let output_dir = PathBuf::from(&config.output_dir);
    let mut stats = RunStats::default();

    let (all_records, malformed) = load_snapshot(store, config.remote.page_limit)?;
    stats.records_loaded = all_records.len();
    stats.malformed_skipped = malformed;

    // Records that already point at a canonical survivor are merge
    // history; they never start a new merge.
    let records: Vec<OrgRecord> = all_records
        .into_iter()
        .filter(|r| r.is_canonical())
        .collect();
    stats.merged_history_skipped = stats.records_loaded - records.len();
    if records.len() < 2 {
        info!("fewer than two live records, nothing to do");
        return Ok(RunReport {
            stats,
            clusters: Vec::new(),
        });
    }

    let derived = contact_domains(store, &records)?;
    let keys = build_keys(&records, &derived);

    let index = BlockingIndex::build(&keys);
    let block_stats = index.stats(config.matcher.max_bucket_size);
    stats.buckets_built = block_stats.buckets;
    stats.buckets_skipped = block_stats.oversized;

    let matcher = Matcher::new(config.matcher.clone());
    let match_report = matcher.generate_pairs(&records, &keys, &index);
    stats.pairs_generated = match_report.pairs.len();
    stats.pairs_truncated = match_report.truncated;
    report::write_pairs_file(
        &output_dir.join(PAIRS_FILE),
        &match_report.pairs,
        &records,
        &keys,
    )?;

    let index_of: BTreeMap<OrgId, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();
    let mut builder = ClusterBuilder::new();
    builder.add_exact_groups(&exact_groups(&records, &keys, &derived));
    builder.add_pairs(&match_report.pairs, &index_of);
    let clusters = builder.build(&records);
    stats.clusters_found = clusters.len();
    report::write_clusters_file(&output_dir.join(CLUSTERS_FILE), &clusters)?;

    if clusters.is_empty() {
        info!("no duplicate clusters found");
        return Ok(RunReport { stats, clusters });
    }

    let mut orchestrator =
        MergeOrchestrator::new(store, config.merge.max_hops, config.merge.dry_run);
    let summary = orchestrator
        .merge_clusters(&clusters, confirm)
        .context("merge pass failed")?;
    stats.merges_succeeded = summary.succeeded;
    stats.merges_failed = summary.failed;
    stats.aborted = orchestrator.aborted();

    let (_, audit, review) = orchestrator.into_results();
    stats.review_entries = review.len();
    report::append_audit_file(&output_dir.join(AUDIT_FILE), &audit)?;
    if !review.is_empty() {
        report::write_review_file(&output_dir.join(REVIEW_FILE), &review)?;
        warn!(
            entries = review.len(),
            "some merges need manual review, see {}",
            output_dir.join(REVIEW_FILE).display()
        );
    }

    info!(
        clusters = stats.clusters_found,
        succeeded = stats.merges_succeeded,
        failed = stats.merges_failed,
        dry_run = config.merge.dry_run,
        "run complete"
    );
    Ok(RunReport { stats, clusters })
}

/// Export the current store state with each row's resolved canonical
/// id. With `include_history` false only surviving records are kept.
pub fn export_snapshot(
    store: &dyn RemoteStore,
    config: &OrgmergeConfig,
    path: &Path,
    include_history: bool,
) -> Result<usize> {
    let (records, _) = load_snapshot(store, config.remote.page_limit)?;
    let mut resolver = CanonicalResolver::new(config.merge.max_hops);

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let chain = resolver.resolve_with_seed(store, record)?;
        if !include_history && chain.canonical != record.id {
            continue;
        }
        rows.push(SnapshotRow {
            id: record.id.clone(),
            name: record.name.clone(),
            domain: record.domain.clone(),
            created_at: record.created_at,
            superseded_by: record.superseded_by.clone(),
            resolved_canonical: chain.canonical,
        });
    }

    report::write_snapshot_file(path, &rows)?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::AutoApprove;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn org(id: &str, name: &str, domain: Option<&str>, day: u32) -> OrgRecord {
        let mut r = OrgRecord::new(id, name)
            .with_created_at(Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap());
        if let Some(d) = domain {
            r = r.with_domain(d);
        }
        r
    }

    fn test_config(dir: &Path) -> OrgmergeConfig {
        let mut config = OrgmergeConfig::default();
        config.output_dir = dir.display().to_string();
        config.merge.dry_run = false;
        config
    }

    #[test]
    fn test_load_snapshot_drops_nameless_rows() {
        let store = MemoryStore::new();
        store.add_org(org("1", "Acme", None, 1));
        store.add_org(OrgRecord::new("2", "   "));
        let (records, malformed) = load_snapshot(&store, 100).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(malformed, 1);
    }

    #[test]
    fn test_contact_domains_skips_freemail() {
        let store = MemoryStore::new();
        store.add_org(org("1", "Acme", None, 1));
        store.add_contact("1", "c1", "ceo@gmail.com");
        store.add_contact("1", "c2", "cto@acme.com");
        store.add_contact("1", "c3", "cfo@acme.com");
        let records = vec![org("1", "Acme", None, 1)];
        let derived = contact_domains(&store, &records).unwrap();
        assert_eq!(derived.get(&OrgId::new("1")), Some(&"acme.com".to_string()));
    }

    #[test]
    fn test_contact_domains_tie_breaks_alphabetically() {
        let store = MemoryStore::new();
        store.add_org(org("1", "Acme", None, 1));
        store.add_contact("1", "c1", "a@zeta.com");
        store.add_contact("1", "c2", "b@alpha.com");
        let records = vec![org("1", "Acme", None, 1)];
        let derived = contact_domains(&store, &records).unwrap();
        assert_eq!(
            derived.get(&OrgId::new("1")),
            Some(&"alpha.com".to_string())
        );
    }

    #[test]
    fn test_run_merges_exact_domain_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.add_org(org("1", "Acme Oy", Some("acme.com"), 1));
        store.add_org(org("2", "Acme Ltd", Some("acme.com"), 5));
        store.add_org(org("3", "Unrelated Corp", Some("unrelated.io"), 2));

        let config = test_config(dir.path());
        let report = run(&store, &config, &mut AutoApprove).unwrap();

        assert_eq!(report.stats.clusters_found, 1);
        assert_eq!(report.stats.merges_succeeded, 1);
        assert_eq!(report.stats.merges_failed, 0);
        let merged = store.get(&OrgId::new("2")).unwrap();
        assert_eq!(merged.superseded_by, Some(OrgId::new("1")));
        assert!(dir.path().join(PAIRS_FILE).exists());
        assert!(dir.path().join(CLUSTERS_FILE).exists());
        assert!(dir.path().join(AUDIT_FILE).exists());
    }

    #[test]
    fn test_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.add_org(org("1", "Acme Oy", Some("acme.com"), 1));
        store.add_org(org("2", "Acme Ltd", Some("acme.com"), 5));

        let config = test_config(dir.path());
        run(&store, &config, &mut AutoApprove).unwrap();
        let second = run(&store, &config, &mut AutoApprove).unwrap();

        // The merged record is history now, so nothing is left to pair.
        assert_eq!(second.stats.merged_history_skipped, 1);
        assert_eq!(second.stats.merges_succeeded, 0);
    }

    #[test]
    fn test_dry_run_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.add_org(org("1", "Acme Oy", Some("acme.com"), 1));
        store.add_org(org("2", "Acme Ltd", Some("acme.com"), 5));

        let mut config = test_config(dir.path());
        config.merge.dry_run = true;
        let report = run(&store, &config, &mut AutoApprove).unwrap();

        assert_eq!(report.stats.merges_succeeded, 1);
        assert!(store.get(&OrgId::new("2")).unwrap().is_canonical());
        assert!(store.merge_log().is_empty());
    }

    #[test]
    fn test_export_snapshot_resolves_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.add_org(org("1", "Acme", Some("acme.com"), 1));
        store.add_org(org("2", "Acme Dup", Some("acme.com"), 5).with_superseded_by(OrgId::new("1")));

        let config = test_config(dir.path());
        let path = dir.path().join("snapshot.csv");
        let live = export_snapshot(&store, &config, &path, false).unwrap();
        assert_eq!(live, 1);
        let all = export_snapshot(&store, &config, &path, true).unwrap();
        assert_eq!(all, 2);
    }
}
