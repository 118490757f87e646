//! # Report Module
//!
//! Semicolon-delimited CSV artifacts: candidate pairs, clusters, the
//! merge audit log, the manual-review ledger, and canonical snapshot
//! exports. The ledger reader accepts both the cluster format
//! (`group_key;id_list`) and the review format written here, so a
//! later run can consume either artifact.

use crate::model::{
    AuditEntry, CandidatePair, Cluster, ManualReviewEntry, NormalizedKey, OrgId, OrgRecord,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// One row of a canonical snapshot export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub id: OrgId,
    pub name: String,
    pub domain: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<OrgId>,
    pub resolved_canonical: OrgId,
}

impl SnapshotRow {
    pub fn is_canonical(&self) -> bool {
        self.resolved_canonical == self.id
    }
}

fn delimited_writer<W: Write>(w: W) -> csv::Writer<W> {
    csv::WriterBuilder::new().delimiter(b';').from_writer(w)
}

fn create_for(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))
}

/// Write the candidate-pairs table. `records` and `keys` are the
/// aligned arena the pairs were generated from.
pub fn write_pairs<W: Write>(
    w: W,
    pairs: &[CandidatePair],
    records: &[OrgRecord],
    keys: &[NormalizedKey],
) -> Result<()> {
    let by_id: BTreeMap<&OrgId, (&OrgRecord, &NormalizedKey)> = records
        .iter()
        .zip(keys.iter())
        .map(|(r, k)| (&r.id, (r, k)))
        .collect();

    let mut writer = delimited_writer(w);
    writer.write_record([
        "id1",
        "name1",
        "domain1",
        "normalized_name1",
        "id2",
        "name2",
        "domain2",
        "normalized_name2",
        "score",
        "block_type",
        "block_key",
    ])?;

    for pair in pairs {
        let (left, left_key) = by_id
            .get(&pair.left)
            .context("pair references unknown left record")?;
        let (right, right_key) = by_id
            .get(&pair.right)
            .context("pair references unknown right record")?;
        let score = format!("{:.1}", pair.score);
        writer.write_record([
            pair.left.as_str(),
            left.name.as_str(),
            left.domain.as_deref().unwrap_or(""),
            left_key.name.as_str(),
            pair.right.as_str(),
            right.name.as_str(),
            right.domain.as_deref().unwrap_or(""),
            right_key.name.as_str(),
            score.as_str(),
            pair.block.as_str(),
            pair.block_key.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_pairs_file(
    path: &Path,
    pairs: &[CandidatePair],
    records: &[OrgRecord],
    keys: &[NormalizedKey],
) -> Result<()> {
    write_pairs(create_for(path)?, pairs, records, keys)?;
    info!(rows = pairs.len(), path = %path.display(), "wrote candidate pairs");
    Ok(())
}

/// Write clusters as `group_key;id_list` with comma-joined member ids.
pub fn write_clusters<W: Write>(w: W, clusters: &[Cluster]) -> Result<()> {
    let mut writer = delimited_writer(w);
    writer.write_record(["group_key", "id_list"])?;
    for cluster in clusters {
        let id_list = cluster
            .members
            .iter()
            .map(OrgId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        writer.write_record([cluster.key.as_str(), id_list.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_clusters_file(path: &Path, clusters: &[Cluster]) -> Result<()> {
    write_clusters(create_for(path)?, clusters)?;
    info!(rows = clusters.len(), path = %path.display(), "wrote clusters");
    Ok(())
}

/// Append audit entries, writing the header only when the file is new.
/// The log is append-only so consecutive runs share one trail.
pub fn append_audit_file(path: &Path, entries: &[AuditEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let new_file = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .from_writer(file);
    if new_file {
        writer.write_record([
            "timestamp",
            "group_key",
            "primary_id",
            "secondary_id",
            "action",
            "detail",
        ])?;
    }
    for entry in entries {
        let timestamp = entry.timestamp.to_rfc3339();
        writer.write_record([
            timestamp.as_str(),
            entry.group_key.as_str(),
            entry.primary.as_str(),
            entry.secondary.as_str(),
            entry.action.as_str(),
            entry.detail.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the manual-review ledger.
pub fn write_review<W: Write>(w: W, entries: &[ManualReviewEntry]) -> Result<()> {
    let mut writer = delimited_writer(w);
    writer.write_record([
        "group_key",
        "primary_id",
        "secondary_id",
        "suggested_canonical_id",
        "error",
    ])?;
    for entry in entries {
        writer.write_record([
            entry.group_key.as_str(),
            entry.primary.as_str(),
            entry.secondary.as_str(),
            entry
                .suggested_canonical
                .as_ref()
                .map(OrgId::as_str)
                .unwrap_or(""),
            entry.detail.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_review_file(path: &Path, entries: &[ManualReviewEntry]) -> Result<()> {
    write_review(create_for(path)?, entries)?;
    info!(rows = entries.len(), path = %path.display(), "wrote manual-review ledger");
    Ok(())
}

/// Write a snapshot export with resolved canonical information.
pub fn write_snapshot<W: Write>(w: W, rows: &[SnapshotRow]) -> Result<()> {
    let mut writer = delimited_writer(w);
    writer.write_record([
        "id",
        "name",
        "domain",
        "created_at",
        "superseded_by",
        "resolved_canonical_id",
        "is_canonical",
    ])?;
    for row in rows {
        let created = row
            .created_at
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_default();
        writer.write_record([
            row.id.as_str(),
            row.name.as_str(),
            row.domain.as_deref().unwrap_or(""),
            created.as_str(),
            row.superseded_by
                .as_ref()
                .map(OrgId::as_str)
                .unwrap_or(""),
            row.resolved_canonical.as_str(),
            if row.is_canonical() { "1" } else { "0" },
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_snapshot_file(path: &Path, rows: &[SnapshotRow]) -> Result<()> {
    write_snapshot(create_for(path)?, rows)?;
    info!(rows = rows.len(), path = %path.display(), "wrote snapshot export");
    Ok(())
}

/// Read id groups from a ledger-like CSV. Supports two layouts:
///
/// 1. `group_key;id_list` where `id_list` is comma-joined ids;
/// 2. the review ledger, where `primary_id`, `secondary_id` and
///    `suggested_canonical_id` all join the group.
///
/// Groups that end up with no ids are dropped.
pub fn read_review_groups<R: Read>(r: R) -> Result<BTreeMap<String, BTreeSet<OrgId>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(r);

    let headers = reader.headers()?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let group_key_idx = position("group_key")
        .context("ledger is missing the group_key column")?;
    let id_list_idx = position("id_list");
    let id_columns: Vec<usize> = ["primary_id", "secondary_id", "suggested_canonical_id"]
        .iter()
        .filter_map(|name| position(name))
        .collect();

    let mut groups: BTreeMap<String, BTreeSet<OrgId>> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let group_key = record.get(group_key_idx).unwrap_or("").trim();
        if group_key.is_empty() {
            continue;
        }
        let ids = groups.entry(group_key.to_string()).or_default();

        if let Some(idx) = id_list_idx {
            for id in record.get(idx).unwrap_or("").split(',') {
                let id = id.trim();
                if !id.is_empty() {
                    ids.insert(OrgId::new(id));
                }
            }
        }
        for &idx in &id_columns {
            let id = record.get(idx).unwrap_or("").trim();
            if !id.is_empty() {
                ids.insert(OrgId::new(id));
            }
        }
    }

    groups.retain(|_, ids| !ids.is_empty());
    Ok(groups)
}

pub fn read_review_groups_file(path: &Path) -> Result<BTreeMap<String, BTreeSet<OrgId>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    read_review_groups(file)
}
