// ABOUTME: Upstream snapshot sources - HTTP fetch with retries and per-run payload cache
// ABOUTME: Dispatches each table to the flattener for its source kind

pub mod crypto;
pub mod twelvedata;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::config::{Config, SourceKind, TableConfig};
use crate::reconcile::{Snapshot, Value};
use crate::utils::retry_with_backoff;

/// Produces the current upstream snapshot of a logical table.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, table: &TableConfig) -> Result<Snapshot>;
}

/// Turn flattened records into a snapshot following the table's column list.
///
/// Configured columns missing from a record are null; record keys that are
/// not configured columns are dropped.
pub(crate) fn build_snapshot(
    table: &TableConfig,
    records: impl IntoIterator<Item = HashMap<String, Value>>,
) -> Result<Snapshot> {
    let rows: Vec<Vec<Value>> = records
        .into_iter()
        .map(|mut record| {
            table
                .columns
                .iter()
                .map(|c| record.remove(c).unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Snapshot::from_rows(&table.id_column, &table.columns, rows)
        .with_context(|| format!("Upstream data for '{}' is not a valid snapshot", table.name))
}

pub fn default_url(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Crypto => crypto::CRYPTO_URL,
        SourceKind::Forex | SourceKind::ForexPairs => twelvedata::FOREX_URL,
        SourceKind::Indices => twelvedata::INDICES_URL,
    }
}

fn api_key_param(source: SourceKind) -> &'static str {
    match source {
        SourceKind::Crypto => "api_key",
        _ => "apikey",
    }
}

/// Flatten an already decoded payload for `table`.
pub fn flatten(source: SourceKind, payload: &JsonValue, table: &TableConfig) -> Result<Snapshot> {
    match source {
        SourceKind::Crypto => crypto::flatten(payload, table),
        SourceKind::Forex => twelvedata::flatten_forex(payload, table),
        SourceKind::ForexPairs => twelvedata::flatten_forex_pairs(payload, table),
        SourceKind::Indices => twelvedata::flatten_indices(payload, table),
    }
}

/// Fetches upstream JSON over HTTP.
///
/// Payloads are cached by URL for the lifetime of the source, so tables
/// derived from the same listing (forex and forex_pairs) cost one request.
pub struct HttpSource {
    client: Client,
    retries: u32,
    retry_delay: Duration,
    cache: Mutex<HashMap<String, Arc<JsonValue>>>,
}

impl HttpSource {
    pub fn new(timeout: Duration, retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("refdata-reconciler/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            retries,
            retry_delay,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.http_timeout(),
            config.fetch_retries,
            config.fetch_retry_delay(),
        )
    }

    fn request_url(table: &TableConfig) -> Result<Url> {
        let base = table
            .url
            .as_deref()
            .unwrap_or_else(|| default_url(table.source));
        let mut url =
            Url::parse(base).with_context(|| format!("Invalid upstream URL for '{}'", table.name))?;

        if let Some(var) = &table.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.is_empty() => {
                    url.query_pairs_mut()
                        .append_pair(api_key_param(table.source), &key);
                }
                _ => tracing::warn!(
                    "{}: {} is not set, requesting without an API key",
                    table.name,
                    var
                ),
            }
        }
        Ok(url)
    }

    fn cached(&self, key: &str) -> Option<Arc<JsonValue>> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(key).cloned())
    }

    async fn get_json(&self, url: &Url) -> Result<JsonValue> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", display_url(url)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!(
                "{} returned status {}: {}",
                display_url(url),
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to decode JSON from {}", display_url(url)))
    }

    /// Fetch the payload behind `url`, reusing an earlier response when present.
    pub async fn payload(&self, url: &Url) -> Result<Arc<JsonValue>> {
        if let Some(hit) = self.cached(url.as_str()) {
            tracing::debug!("Reusing cached response from {}", display_url(url));
            return Ok(hit);
        }

        tracing::info!("Fetching {}", display_url(url));
        let payload = retry_with_backoff(|| self.get_json(url), self.retries, self.retry_delay)
            .await
            .map(Arc::new)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(url.as_str().to_string(), Arc::clone(&payload));
        }
        Ok(payload)
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    async fn fetch(&self, table: &TableConfig) -> Result<Snapshot> {
        let url = Self::request_url(table)?;
        let payload = self.payload(&url).await?;
        let snapshot = flatten(table.source, &payload, table)?;
        tracing::info!(
            "{}: fetched {} upstream rows",
            table.name,
            snapshot.len()
        );
        Ok(snapshot)
    }
}

/// URL without its query string, so API keys stay out of logs.
fn display_url(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableConfig {
        Config::builtin()
            .tables
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }

    #[test]
    fn test_build_snapshot_fills_missing_columns() {
        let table = table("indices");
        let mut record = HashMap::new();
        record.insert("asset_id".to_string(), Value::text("in_SPX"));
        record.insert("symbol".to_string(), Value::text("SPX"));
        record.insert("exchange".to_string(), Value::text("dropped"));

        let snapshot = build_snapshot(&table, vec![record]).unwrap();
        assert_eq!(
            snapshot.row("in_SPX").unwrap(),
            &[Value::text("SPX"), Value::Null, Value::Null, Value::Null]
        );
    }

    #[test]
    fn test_build_snapshot_requires_identifier() {
        let table = table("indices");
        let mut record = HashMap::new();
        record.insert("symbol".to_string(), Value::text("SPX"));
        assert!(build_snapshot(&table, vec![record]).is_err());
    }

    #[test]
    fn test_request_url_defaults_and_overrides() {
        let mut t = table("indices");
        t.api_key_env = None;
        let url = HttpSource::request_url(&t).unwrap();
        assert_eq!(url.as_str(), twelvedata::INDICES_URL);

        t.url = Some("http://localhost:8080/indices".to_string());
        assert_eq!(
            HttpSource::request_url(&t).unwrap().as_str(),
            "http://localhost:8080/indices"
        );

        t.url = Some("not a url".to_string());
        assert!(HttpSource::request_url(&t).is_err());
    }

    #[test]
    fn test_request_url_appends_api_key() {
        let mut t = table("forex_pairs");
        t.api_key_env = Some("REFDATA_TEST_TWELVEDATA_KEY".to_string());
        std::env::set_var("REFDATA_TEST_TWELVEDATA_KEY", "secret");
        let url = HttpSource::request_url(&t).unwrap();
        std::env::remove_var("REFDATA_TEST_TWELVEDATA_KEY");

        assert_eq!(url.query(), Some("apikey=secret"));
        assert_eq!(display_url(&url), twelvedata::FOREX_URL);
    }

    #[test]
    fn test_forex_tables_share_a_url() {
        assert_eq!(
            default_url(SourceKind::Forex),
            default_url(SourceKind::ForexPairs)
        );
    }
}
