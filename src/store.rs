//! # Store Module
//!
//! Abstraction over the remote record store, plus an in-memory
//! implementation used by tests and local experiments. The pipeline
//! only ever talks to `dyn RemoteStore`, so the HTTP transport can be
//! swapped out wholesale.

use crate::model::{OrgId, OrgRecord};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use thiserror::Error;

/// Errors surfaced by a remote store implementation.
///
/// Transient faults (rate limiting, server hiccups) are retried inside
/// the implementation; what escapes here is considered terminal for
/// the current call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote call failed with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("retries exhausted after {attempts} attempts (last status {status})")]
    RetriesExhausted { attempts: u32, status: u16 },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Name search operators supported by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOperator {
    /// Exact, case-sensitive name equality.
    Exact,
    /// Token-based containment; used only behind a confirmation gate.
    ContainsToken,
}

/// One page of a listing scan.
#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<OrgRecord>,
    /// Cursor for the next page, absent on the last one.
    pub after: Option<String>,
}

/// Structured result of a merge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResponse {
    /// The secondary was folded into the primary.
    Merged,
    /// One of the two records does not exist.
    NotFound,
    /// The store rejected the merge because one side already points at
    /// a newer canonical record.
    StaleReference { canonical_id: OrgId },
    /// Any other rejection.
    Failed { status: u16, message: String },
}

/// Capability set the pipeline consumes from the remote store.
pub trait RemoteStore {
    /// Fetch one page of non-archived records.
    fn list_page(&self, after: Option<&str>, limit: usize) -> Result<Page, StoreError>;

    /// Fetch a single record. `Ok(None)` when it does not exist.
    fn fetch(&self, id: &OrgId) -> Result<Option<OrgRecord>, StoreError>;

    /// Fetch several records by id. Missing ids are silently absent
    /// from the result.
    fn batch_fetch(&self, ids: &[OrgId]) -> Result<Vec<OrgRecord>, StoreError>;

    /// Search records by name.
    fn search_by_name(
        &self,
        name: &str,
        operator: SearchOperator,
    ) -> Result<Vec<OrgRecord>, StoreError>;

    /// Merge `secondary` into `primary`.
    fn merge(&self, primary: &OrgId, secondary: &OrgId) -> Result<MergeResponse, StoreError>;

    /// Contact ids associated with each given organization.
    fn contacts_for(
        &self,
        org_ids: &[OrgId],
    ) -> Result<BTreeMap<OrgId, Vec<String>>, StoreError>;

    /// Email addresses for the given contact ids.
    fn contact_emails(
        &self,
        contact_ids: &[String],
    ) -> Result<BTreeMap<String, String>, StoreError>;
}

/// In-memory store. Merge semantics mirror the remote API: a merged
/// secondary stays around with its superseded-by pointer set, and
/// merging against a stale side is rejected with the canonical id.
///
/// Clones share state, so a test can keep a handle to inspect the
/// store after handing a copy to the engine. Single-threaded by
/// design, hence `Rc<RefCell>`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    orgs: BTreeMap<OrgId, OrgRecord>,
    /// org id -> associated contact ids
    associations: BTreeMap<OrgId, Vec<String>>,
    /// contact id -> email
    contacts: BTreeMap<String, String>,
    /// Scripted rejections keyed by (primary, secondary), consumed
    /// once per entry. Lets tests exercise the failure paths.
    fail_merges: BTreeMap<(OrgId, OrgId), (u16, String)>,
    merge_log: Vec<(OrgId, OrgId)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_org(&self, record: OrgRecord) {
        self.inner.borrow_mut().orgs.insert(record.id.clone(), record);
    }

    pub fn add_contact(&self, org_id: impl Into<OrgId>, contact_id: &str, email: &str) {
        let mut inner = self.inner.borrow_mut();
        inner
            .associations
            .entry(org_id.into())
            .or_default()
            .push(contact_id.to_string());
        inner
            .contacts
            .insert(contact_id.to_string(), email.to_string());
    }

    /// Script the next merge of this pair to fail with the given
    /// status and message.
    pub fn fail_next_merge(
        &self,
        primary: impl Into<OrgId>,
        secondary: impl Into<OrgId>,
        status: u16,
        message: &str,
    ) {
        self.inner.borrow_mut().fail_merges.insert(
            (primary.into(), secondary.into()),
            (status, message.to_string()),
        );
    }

    pub fn get(&self, id: &OrgId) -> Option<OrgRecord> {
        self.inner.borrow().orgs.get(id).cloned()
    }

    /// Merges performed so far, in order.
    pub fn merge_log(&self) -> Vec<(OrgId, OrgId)> {
        self.inner.borrow().merge_log.clone()
    }
}

impl RemoteStore for MemoryStore {
    fn list_page(&self, after: Option<&str>, limit: usize) -> Result<Page, StoreError> {
        let inner = self.inner.borrow();
        let records: Vec<&OrgRecord> = inner.orgs.values().collect();

        let start = match after {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| StoreError::Malformed(format!("bad cursor: {cursor}")))?,
            None => 0,
        };
        let end = (start + limit).min(records.len());
        let page: Vec<OrgRecord> = records[start..end].iter().map(|r| (*r).clone()).collect();
        let next = if end < records.len() {
            Some(end.to_string())
        } else {
            None
        };
        Ok(Page {
            records: page,
            after: next,
        })
    }

    fn fetch(&self, id: &OrgId) -> Result<Option<OrgRecord>, StoreError> {
        Ok(self.inner.borrow().orgs.get(id).cloned())
    }

    fn batch_fetch(&self, ids: &[OrgId]) -> Result<Vec<OrgRecord>, StoreError> {
        let inner = self.inner.borrow();
        Ok(ids
            .iter()
            .filter_map(|id| inner.orgs.get(id).cloned())
            .collect())
    }

    fn search_by_name(
        &self,
        name: &str,
        operator: SearchOperator,
    ) -> Result<Vec<OrgRecord>, StoreError> {
        let inner = self.inner.borrow();
        let matches = |record: &OrgRecord| match operator {
            SearchOperator::Exact => record.name == name,
            SearchOperator::ContainsToken => {
                let lowered = record.name.to_lowercase();
                let tokens: Vec<&str> = lowered.split_whitespace().collect();
                name.to_lowercase()
                    .split_whitespace()
                    .any(|t| tokens.contains(&t))
            }
        };
        Ok(inner.orgs.values().filter(|r| matches(r)).cloned().collect())
    }

    fn merge(&self, primary: &OrgId, secondary: &OrgId) -> Result<MergeResponse, StoreError> {
        let mut inner = self.inner.borrow_mut();

        if let Some((status, message)) =
            inner.fail_merges.remove(&(primary.clone(), secondary.clone()))
        {
            return Ok(MergeResponse::Failed { status, message });
        }

        let Some(secondary_rec) = inner.orgs.get(secondary).cloned() else {
            return Ok(MergeResponse::NotFound);
        };
        if let Some(canonical) = secondary_rec.superseded_by {
            return Ok(MergeResponse::StaleReference {
                canonical_id: canonical,
            });
        }

        let Some(primary_rec) = inner.orgs.get(primary).cloned() else {
            return Ok(MergeResponse::NotFound);
        };
        if let Some(canonical) = primary_rec.superseded_by {
            return Ok(MergeResponse::StaleReference {
                canonical_id: canonical,
            });
        }

        if let Some(rec) = inner.orgs.get_mut(secondary) {
            rec.superseded_by = Some(primary.clone());
        }
        inner.merge_log.push((primary.clone(), secondary.clone()));
        Ok(MergeResponse::Merged)
    }

    fn contacts_for(
        &self,
        org_ids: &[OrgId],
    ) -> Result<BTreeMap<OrgId, Vec<String>>, StoreError> {
        let inner = self.inner.borrow();
        Ok(org_ids
            .iter()
            .filter_map(|id| {
                inner
                    .associations
                    .get(id)
                    .map(|contacts| (id.clone(), contacts.clone()))
            })
            .collect())
    }

    fn contact_emails(
        &self,
        contact_ids: &[String],
    ) -> Result<BTreeMap<String, String>, StoreError> {
        let inner = self.inner.borrow();
        Ok(contact_ids
            .iter()
            .filter_map(|cid| inner.contacts.get(cid).map(|e| (cid.clone(), e.clone())))
            .collect())
    }
}
