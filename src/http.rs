//! # HTTP Store Module
//!
//! Blocking HTTP implementation of [`RemoteStore`] against a
//! HubSpot-style CRM API. Transient faults (429 and 5xx) are retried
//! with a capped linear backoff that honors `Retry-After`; everything
//! else surfaces as a structured result or a terminal error.

use crate::config::RemoteConfig;
use crate::model::{OrgId, OrgRecord};
use crate::store::{MergeResponse, Page, RemoteStore, SearchOperator, StoreError};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const OBJECT_PROPERTIES: [&str; 4] = ["name", "domain", "createdate", "hs_canonical_object_id"];

/// HTTP-backed remote store.
pub struct HttpStore {
    client: Client,
    base_url: String,
    token: String,
    config: RemoteConfig,
}

impl HttpStore {
    pub fn new(config: RemoteConfig) -> Result<Self, StoreError> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| StoreError::Malformed("remote token is not configured".to_string()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, retrying transient statuses. The `Retry-After`
    /// header wins over the computed backoff when present and numeric.
    fn send_with_retry(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, StoreError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let response = build()
                .bearer_auth(&self.token)
                .send()
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            if !matches!(status, 429 | 500 | 502 | 503 | 504) {
                return Ok(response);
            }
            if attempt >= self.config.max_retries {
                return Err(StoreError::RetriesExhausted {
                    attempts: attempt,
                    status,
                });
            }

            let sleep_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or_else(|| {
                    (attempt as f64 * self.config.backoff_step_secs)
                        .min(self.config.backoff_cap_secs)
                });
            warn!(status, attempt, sleep_secs, "transient remote fault, backing off");
            thread::sleep(Duration::from_secs_f64(sleep_secs));
        }
    }

    fn remote_error(response: Response) -> StoreError {
        let status = response.status().as_u16();
        let message = response.text().unwrap_or_default();
        StoreError::Remote { status, message }
    }
}

impl RemoteStore for HttpStore {
    fn list_page(&self, after: Option<&str>, limit: usize) -> Result<Page, StoreError> {
        let mut params: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("archived", "false".to_string()),
            ("properties", OBJECT_PROPERTIES.join(",")),
        ];
        if let Some(cursor) = after {
            params.push(("after", cursor.to_string()));
        }

        let url = self.url("/crm/v3/objects/companies");
        let response = self.send_with_retry(|| self.client.get(&url).query(&params))?;
        if !response.status().is_success() {
            return Err(Self::remote_error(response));
        }

        let body: ListResponse = response
            .json()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let next = body.paging.and_then(|p| p.next).and_then(|n| n.after);
        let records = body.results.into_iter().map(record_from_raw).collect();
        Ok(Page {
            records,
            after: next,
        })
    }

    fn fetch(&self, id: &OrgId) -> Result<Option<OrgRecord>, StoreError> {
        let url = self.url(&format!("/crm/v3/objects/companies/{id}"));
        let params = [
            ("properties", OBJECT_PROPERTIES.join(",")),
            ("archived", "false".to_string()),
        ];
        let response = self.send_with_retry(|| self.client.get(&url).query(&params))?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::remote_error(response));
        }
        let raw: RawObject = response
            .json()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        Ok(Some(record_from_raw(raw)))
    }

    fn batch_fetch(&self, ids: &[OrgId]) -> Result<Vec<OrgRecord>, StoreError> {
        let url = self.url("/crm/v3/objects/companies/batch/read");
        let mut records = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(self.config.batch_size.max(1)) {
            let payload = json!({
                "properties": OBJECT_PROPERTIES,
                "inputs": chunk.iter().map(|id| json!({"id": id.as_str()})).collect::<Vec<_>>(),
            });
            let response = self.send_with_retry(|| self.client.post(&url).json(&payload))?;
            // 207 carries per-item errors next to successes; both are
            // parsed from `results`.
            let status = response.status().as_u16();
            if status != 200 && status != 207 {
                return Err(Self::remote_error(response));
            }
            let body: ListResponse = response
                .json()
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            records.extend(body.results.into_iter().map(record_from_raw));
        }

        debug!(requested = ids.len(), fetched = records.len(), "batch fetch complete");
        Ok(records)
    }

    fn search_by_name(
        &self,
        name: &str,
        operator: SearchOperator,
    ) -> Result<Vec<OrgRecord>, StoreError> {
        let operator = match operator {
            SearchOperator::Exact => "EQ",
            SearchOperator::ContainsToken => "CONTAINS_TOKEN",
        };
        let url = self.url("/crm/v3/objects/companies/search");

        let mut results = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut body = json!({
                "filterGroups": [{
                    "filters": [{"propertyName": "name", "operator": operator, "value": name}]
                }],
                "properties": OBJECT_PROPERTIES,
                "limit": 100,
            });
            if let Some(cursor) = &after {
                body["after"] = json!(cursor);
            }

            let response = self.send_with_retry(|| self.client.post(&url).json(&body))?;
            if !response.status().is_success() {
                return Err(Self::remote_error(response));
            }
            let page: ListResponse = response
                .json()
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            results.extend(page.results.into_iter().map(record_from_raw));

            after = page.paging.and_then(|p| p.next).and_then(|n| n.after);
            if after.is_none() {
                break;
            }
        }
        Ok(results)
    }

    fn merge(&self, primary: &OrgId, secondary: &OrgId) -> Result<MergeResponse, StoreError> {
        let url = self.url("/crm/v3/objects/companies/merge");
        let payload = json!({
            "primaryObjectId": primary.as_str(),
            "objectIdToMerge": secondary.as_str(),
        });

        let response = self.send_with_retry(|| self.client.post(&url).json(&payload))?;
        let status = response.status().as_u16();
        match status {
            200 => Ok(MergeResponse::Merged),
            404 => Ok(MergeResponse::NotFound),
            _ => {
                let text = response.text().unwrap_or_default();
                let message = serde_json::from_str::<ErrorBody>(&text)
                    .ok()
                    .and_then(|b| b.message)
                    .unwrap_or(text);
                if status == 400 {
                    if let Some(canonical_id) = stale_reference_target(&message) {
                        return Ok(MergeResponse::StaleReference { canonical_id });
                    }
                }
                Ok(MergeResponse::Failed { status, message })
            }
        }
    }

    fn contacts_for(
        &self,
        org_ids: &[OrgId],
    ) -> Result<BTreeMap<OrgId, Vec<String>>, StoreError> {
        let url = self.url("/crm/v3/associations/companies/contacts/batch/read");
        let mut out: BTreeMap<OrgId, Vec<String>> = BTreeMap::new();

        for chunk in org_ids.chunks(self.config.batch_size.max(1)) {
            let payload = json!({
                "inputs": chunk.iter().map(|id| json!({"id": id.as_str()})).collect::<Vec<_>>(),
            });
            let response = self.send_with_retry(|| self.client.post(&url).json(&payload))?;
            let status = response.status().as_u16();
            if status != 200 && status != 207 {
                return Err(Self::remote_error(response));
            }
            let body: AssocResponse = response
                .json()
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            for row in body.results {
                let Some(from_id) = row.from_id else { continue };
                let contacts: Vec<String> =
                    row.to.into_iter().filter_map(|t| t.id_string()).collect();
                if !contacts.is_empty() {
                    out.entry(OrgId::new(from_id)).or_default().extend(contacts);
                }
            }
        }
        Ok(out)
    }

    fn contact_emails(
        &self,
        contact_ids: &[String],
    ) -> Result<BTreeMap<String, String>, StoreError> {
        let url = self.url("/crm/v3/objects/contacts/batch/read");
        let mut out = BTreeMap::new();

        for chunk in contact_ids.chunks(self.config.batch_size.max(1)) {
            let payload = json!({
                "properties": ["email"],
                "idProperty": "hs_object_id",
                "inputs": chunk.iter().map(|id| json!({"id": id})).collect::<Vec<_>>(),
            });
            let response = self.send_with_retry(|| self.client.post(&url).json(&payload))?;
            let status = response.status().as_u16();
            if status != 200 && status != 207 {
                return Err(Self::remote_error(response));
            }
            let body: ContactResponse = response
                .json()
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            for row in body.results {
                if let Some(email) = row.properties.email {
                    let email = email.trim().to_string();
                    if !email.is_empty() {
                        out.insert(row.id, email);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Pull the canonical id out of a "forward reference to <id>"
/// validation message.
fn stale_reference_target(message: &str) -> Option<OrgId> {
    let rest = message.split("forward reference to ").nth(1)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(OrgId::new(digits))
    }
}

/// Parse a remote timestamp: RFC 3339 first, epoch milliseconds as a
/// fallback. Unparseable values are dropped rather than failing the
/// whole row.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn record_from_raw(raw: RawObject) -> OrgRecord {
    let props = raw.properties;
    let name = props.name.unwrap_or_default().trim().to_string();
    let domain = props
        .domain
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let created_at = props.createdate.as_deref().and_then(parse_timestamp);
    let superseded_by = props
        .canonical
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .map(OrgId::new);

    OrgRecord {
        id: OrgId::new(raw.id),
        name,
        domain,
        created_at,
        superseded_by,
    }
}

#[derive(Debug, Deserialize)]
struct RawObject {
    id: String,
    #[serde(default)]
    properties: RawProperties,
}

#[derive(Debug, Default, Deserialize)]
struct RawProperties {
    name: Option<String>,
    domain: Option<String>,
    createdate: Option<String>,
    #[serde(rename = "hs_canonical_object_id")]
    canonical: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<RawObject>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<PagingNext>,
}

#[derive(Debug, Deserialize)]
struct PagingNext {
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssocResponse {
    #[serde(default)]
    results: Vec<AssocRow>,
}

#[derive(Debug, Deserialize)]
struct AssocRow {
    #[serde(rename = "fromId")]
    from_id: Option<String>,
    #[serde(default)]
    to: Vec<AssocTarget>,
}

#[derive(Debug, Deserialize)]
struct AssocTarget {
    /// The remote API emits this as either a number or a string.
    #[serde(rename = "toObjectId")]
    to_object_id: Option<serde_json::Value>,
}

impl AssocTarget {
    fn id_string(self) -> Option<String> {
        match self.to_object_id? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContactResponse {
    #[serde(default)]
    results: Vec<ContactRow>,
}

#[derive(Debug, Deserialize)]
struct ContactRow {
    id: String,
    #[serde(default)]
    properties: ContactProperties,
}

#[derive(Debug, Default, Deserialize)]
struct ContactProperties {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_reference_target() {
        let msg = "Request validation failed: objectId=1579 has a forward reference to 4633671122, cannot merge";
        assert_eq!(
            stale_reference_target(msg),
            Some(OrgId::new("4633671122"))
        );
        assert_eq!(stale_reference_target("merge limit reached"), None);
        assert_eq!(stale_reference_target("forward reference to "), None);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let iso = parse_timestamp("2021-03-14T09:26:53Z").unwrap();
        assert_eq!(iso.timestamp(), 1_615_714_013);
        let millis = parse_timestamp("1615714013000").unwrap();
        assert_eq!(millis, iso);
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("not a date").is_none());
    }

    #[test]
    fn test_record_from_raw_normalizes_blanks() {
        let raw: RawObject = serde_json::from_value(json!({
            "id": "42",
            "properties": {
                "name": "  Acme Oy  ",
                "domain": "",
                "createdate": "2021-03-14T09:26:53Z",
                "hs_canonical_object_id": " 7 "
            }
        }))
        .unwrap();
        let record = record_from_raw(raw);
        assert_eq!(record.id, OrgId::new("42"));
        assert_eq!(record.name, "Acme Oy");
        assert_eq!(record.domain, None);
        assert!(record.created_at.is_some());
        assert_eq!(record.superseded_by, Some(OrgId::new("7")));
    }

    #[test]
    fn test_record_from_raw_missing_properties() {
        let raw: RawObject = serde_json::from_value(json!({"id": "9"})).unwrap();
        let record = record_from_raw(raw);
        assert_eq!(record.name, "");
        assert!(record.is_canonical());
    }

    #[test]
    fn test_assoc_target_accepts_number_or_string() {
        let numeric: AssocTarget =
            serde_json::from_value(json!({"toObjectId": 123})).unwrap();
        assert_eq!(numeric.id_string(), Some("123".to_string()));
        let textual: AssocTarget =
            serde_json::from_value(json!({"toObjectId": "456"})).unwrap();
        assert_eq!(textual.id_string(), Some("456".to_string()));
        let absent: AssocTarget = serde_json::from_value(json!({})).unwrap();
        assert_eq!(absent.id_string(), None);
    }
}
