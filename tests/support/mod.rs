use chrono::{TimeZone, Utc};
use orgmerge::{MemoryStore, OrgRecord, Orgmerge, OrgmergeConfig};
use std::path::Path;

#[allow(dead_code)]
pub fn org(id: &str, name: &str, domain: Option<&str>, day: u32) -> OrgRecord {
    let mut record = OrgRecord::new(id, name)
        .with_created_at(Utc.with_ymd_and_hms(2022, 3, day, 9, 0, 0).unwrap());
    if let Some(domain) = domain {
        record = record.with_domain(domain);
    }
    record
}

#[allow(dead_code)]
pub fn test_config(output_dir: &Path, apply: bool) -> OrgmergeConfig {
    let mut config = OrgmergeConfig::default();
    config.output_dir = output_dir.display().to_string();
    config.merge.dry_run = !apply;
    config
}

/// Engine over a clone of the store handle, so the caller keeps one
/// for assertions.
#[allow(dead_code)]
pub fn engine(store: &MemoryStore, output_dir: &Path, apply: bool) -> Orgmerge {
    Orgmerge::with_store(store.clone(), test_config(output_dir, apply))
}
