//! Registry (membership CRM) adapter
//!
//! The core consumes the registry through the narrow [`RegistryApi`] trait;
//! [`RegistryClient`] is the production HTTP implementation. Records are kept
//! untyped (JSON maps) because callers only pick out a handful of fields and
//! the registry schema is not ours to model.

use serde::Deserialize;
use serde_json::Value;

use crate::config::RegistryConfig;
use crate::error::{BridgeError, Result};

/// One registry record, as returned by iteration.
pub type Record = serde_json::Map<String, Value>;

/// Read access to the registry. Paging is the implementation's problem;
/// callers always see the complete result set.
pub trait RegistryApi: Send {
    /// Fetch every record of `entity_type` matching all `filters`
    /// (field, value) pairs.
    fn iterate(&self, entity_type: &str, filters: &[(&str, &str)]) -> Result<Vec<Record>>;
}

/// Paged-envelope response wrapper used by the registry API.
#[derive(Debug, Deserialize)]
struct PagedResponse {
    #[serde(rename = "Items")]
    items: ItemsEnvelope,
    #[serde(rename = "Offset", default)]
    offset: u64,
    #[serde(rename = "TotalCount", default)]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct ItemsEnvelope {
    #[serde(rename = "$values", default)]
    values: Vec<Record>,
}

/// Blocking HTTP client for the registry API.
pub struct RegistryClient {
    client: reqwest::blocking::Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout))
            .build()?;
        Ok(Self { client, config })
    }

    fn fetch_page(
        &self,
        entity_type: &str,
        filters: &[(&str, &str)],
        offset: u64,
    ) -> Result<PagedResponse> {
        let url = format!(
            "{}/api/{}",
            self.config.base_url.trim_end_matches('/'),
            entity_type
        );
        let mut request = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .query(&[
                ("limit", self.config.page_size.to_string()),
                ("offset", offset.to_string()),
            ]);
        for (field, value) in filters {
            request = request.query(&[(field, value)]);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Registry(format!(
                "{} query returned HTTP {}",
                entity_type, status
            )));
        }
        Ok(response.json()?)
    }
}

impl RegistryApi for RegistryClient {
    fn iterate(&self, entity_type: &str, filters: &[(&str, &str)]) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self.fetch_page(entity_type, filters, offset)?;
            let fetched = page.items.values.len() as u64;
            records.extend(page.items.values);
            if fetched == 0 {
                break;
            }
            offset = page.offset + fetched;
            if offset >= page.total_count {
                break;
            }
        }
        Ok(records)
    }
}

/// Walk `path` through nested objects and return the leaf as a string slice.
pub fn field_str<'a>(record: &'a Record, path: &[&str]) -> Option<&'a str> {
    let (first, rest) = path.split_first()?;
    let mut value = record.get(*first)?;
    for key in rest {
        value = value.get(*key)?;
    }
    value.as_str()
}

/// Like [`field_str`], but parses the leaf as a decimal integer. The registry
/// serves numeric ids both as JSON numbers and as strings.
pub fn field_i64(record: &Record, path: &[&str]) -> Option<i64> {
    let (first, rest) = path.split_first()?;
    let mut value = record.get(*first)?;
    for key in rest {
        value = value.get(*key)?;
    }
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
