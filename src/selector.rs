//! # Selector Module
//!
//! Deterministic primary selection for a duplicate group: the record
//! with the earliest creation timestamp wins; missing timestamps sort
//! last; ties break on the smallest id.

use crate::model::{OrgId, OrgRecord};
use std::cmp::Ordering;

/// Numeric-aware id comparison. Two all-digit ids compare as integers,
/// anything else falls back to lexicographic order. Always total.
pub fn id_order(a: &OrgId, b: &OrgId) -> Ordering {
    match (a.as_str().parse::<u64>(), b.as_str().parse::<u64>()) {
        (Ok(na), Ok(nb)) => na.cmp(&nb),
        _ => a.as_str().cmp(b.as_str()),
    }
}

/// Strict total order used for primary selection. The minimum element
/// is the preferred primary.
pub fn primary_order(a: &OrgRecord, b: &OrgRecord) -> Ordering {
    match (a.created_at, b.created_at) {
        (Some(ta), Some(tb)) => ta.cmp(&tb).then_with(|| id_order(&a.id, &b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => id_order(&a.id, &b.id),
    }
}

/// Pick the primary from a group of records. `None` on an empty group.
pub fn choose_primary<'a, I>(records: I) -> Option<&'a OrgRecord>
where
    I: IntoIterator<Item = &'a OrgRecord>,
{
    records.into_iter().min_by(|a, b| primary_order(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(id: &str, created: Option<(i32, u32, u32)>) -> OrgRecord {
        let mut r = OrgRecord::new(id, format!("Org {id}"));
        if let Some((y, m, d)) = created {
            r = r.with_created_at(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap());
        }
        r
    }

    #[test]
    fn test_earliest_created_wins() {
        let records = vec![
            rec("5", Some((2022, 1, 1))),
            rec("3", Some((2019, 6, 1))),
            rec("9", Some((2021, 3, 1))),
        ];
        let primary = choose_primary(&records).unwrap();
        assert_eq!(primary.id, OrgId::new("3"));
    }

    #[test]
    fn test_missing_timestamp_sorts_last() {
        let records = vec![rec("1", None), rec("2", Some((2023, 1, 1)))];
        let primary = choose_primary(&records).unwrap();
        assert_eq!(primary.id, OrgId::new("2"));
    }

    #[test]
    fn test_tie_breaks_on_numeric_id() {
        let records = vec![
            rec("10", Some((2020, 1, 1))),
            rec("9", Some((2020, 1, 1))),
        ];
        let primary = choose_primary(&records).unwrap();
        // 9 < 10 numerically even though "10" < "9" as strings.
        assert_eq!(primary.id, OrgId::new("9"));
    }

    #[test]
    fn test_non_numeric_ids_order_lexicographically() {
        assert_eq!(
            id_order(&OrgId::new("abc"), &OrgId::new("abd")),
            Ordering::Less
        );
        let records = vec![rec("b-org", None), rec("a-org", None)];
        assert_eq!(choose_primary(&records).unwrap().id, OrgId::new("a-org"));
    }

    #[test]
    fn test_empty_group() {
        assert!(choose_primary(Vec::<OrgRecord>::new().iter()).is_none());
    }

    #[test]
    fn test_order_is_deterministic_under_shuffle() {
        let a = vec![
            rec("7", Some((2020, 5, 1))),
            rec("2", None),
            rec("4", Some((2020, 5, 1))),
        ];
        let b = vec![a[2].clone(), a[0].clone(), a[1].clone()];
        assert_eq!(
            choose_primary(&a).unwrap().id,
            choose_primary(&b).unwrap().id
        );
    }
}
