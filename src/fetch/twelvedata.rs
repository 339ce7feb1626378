// ABOUTME: Flattens TwelveData forex pair and index listings into snapshots
// ABOUTME: Derives forex currencies, forex pairs and indices with prefixed asset ids

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

use super::build_snapshot;
use crate::config::TableConfig;
use crate::reconcile::{Snapshot, Value};

pub const FOREX_URL: &str = "https://api.twelvedata.com/forex_pairs";
pub const INDICES_URL: &str = "https://api.twelvedata.com/indices?country=United%20States";

fn data_array(payload: &JsonValue) -> Result<&Vec<JsonValue>> {
    payload
        .get("data")
        .and_then(JsonValue::as_array)
        .context("TwelveData response has no 'data' array")
}

fn field(entry: &JsonValue, key: &str) -> Value {
    entry.get(key).map(Value::from_json).unwrap_or(Value::Null)
}

fn text_field<'a>(entry: &'a JsonValue, key: &str) -> Result<&'a str> {
    entry
        .get(key)
        .and_then(JsonValue::as_str)
        .with_context(|| format!("TwelveData entry is missing '{}': {}", key, entry))
}

/// One row per distinct base currency of the forex pair list, in first-seen order.
pub fn flatten_forex(payload: &JsonValue, table: &TableConfig) -> Result<Snapshot> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for pair in data_array(payload)? {
        let symbol = text_field(pair, "symbol")?;
        let base = symbol.split('/').next().unwrap_or(symbol);
        if !seen.insert(base.to_string()) {
            continue;
        }

        let mut record = HashMap::new();
        record.insert("asset_id".to_string(), Value::Text(format!("fo_{}", base)));
        record.insert("symbol".to_string(), Value::text(base));
        record.insert("name".to_string(), field(pair, "currency_base"));
        records.push(record);
    }

    build_snapshot(table, records)
}

/// One row per forex pair, keyed by `fo_` plus the pair symbol without its slash.
pub fn flatten_forex_pairs(payload: &JsonValue, table: &TableConfig) -> Result<Snapshot> {
    let mut records = Vec::new();

    for pair in data_array(payload)? {
        let symbol = text_field(pair, "symbol")?;

        let mut record = HashMap::new();
        record.insert(
            "asset_id".to_string(),
            Value::Text(format!("fo_{}", symbol.replace('/', ""))),
        );
        record.insert("symbol".to_string(), Value::text(symbol));
        for key in ["currency_group", "currency_base", "currency_quote"] {
            record.insert(key.to_string(), field(pair, key));
        }
        records.push(record);
    }

    build_snapshot(table, records)
}

/// One row per index, keyed by `in_` plus the index symbol.
pub fn flatten_indices(payload: &JsonValue, table: &TableConfig) -> Result<Snapshot> {
    let mut records = Vec::new();

    for index in data_array(payload)? {
        let symbol = text_field(index, "symbol")?;

        let mut record = HashMap::new();
        record.insert("asset_id".to_string(), Value::Text(format!("in_{}", symbol)));
        record.insert("symbol".to_string(), Value::text(symbol));
        for key in ["name", "country", "currency"] {
            record.insert(key.to_string(), field(index, key));
        }
        records.push(record);
    }

    build_snapshot(table, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn table(name: &str) -> TableConfig {
        Config::builtin()
            .tables
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }

    fn pairs_payload() -> JsonValue {
        json!({
            "data": [
                {"symbol": "EUR/USD", "currency_group": "Major", "currency_base": "Euro", "currency_quote": "US Dollar"},
                {"symbol": "EUR/GBP", "currency_group": "Minor", "currency_base": "Euro", "currency_quote": "British Pound"},
                {"symbol": "AED/BRL", "currency_group": "Exotic-Cross", "currency_base": "UAE Dirham"}
            ],
            "status": "ok"
        })
    }

    #[test]
    fn test_flatten_forex_dedupes_base_currencies() {
        let snapshot = flatten_forex(&pairs_payload(), &table("forex")).unwrap();
        let ids: Vec<&String> = snapshot.ids().collect();
        assert_eq!(ids, vec!["fo_AED", "fo_EUR"]);
        assert_eq!(
            snapshot.row("fo_EUR").unwrap(),
            &[Value::text("EUR"), Value::text("Euro")]
        );
    }

    #[test]
    fn test_flatten_forex_pairs() {
        let snapshot = flatten_forex_pairs(&pairs_payload(), &table("forex_pairs")).unwrap();
        assert_eq!(snapshot.len(), 3);

        let quote = snapshot.column_index("currency_quote").unwrap();
        assert_eq!(
            snapshot.row("fo_EURGBP").unwrap()[quote],
            Value::text("British Pound")
        );
        assert_eq!(snapshot.row("fo_AEDBRL").unwrap()[quote], Value::Null);
    }

    #[test]
    fn test_flatten_indices() {
        let payload = json!({
            "data": [
                {"symbol": "SPX", "name": "S&P 500", "country": "United States", "currency": "USD"},
                {"symbol": "IXIC", "name": "NASDAQ Composite", "country": "United States", "currency": "USD"}
            ]
        });
        let snapshot = flatten_indices(&payload, &table("indices")).unwrap();
        assert_eq!(
            snapshot.row("in_SPX").unwrap(),
            &[
                Value::text("SPX"),
                Value::text("S&P 500"),
                Value::text("United States"),
                Value::text("USD")
            ]
        );
    }

    #[test]
    fn test_duplicate_pairs_rejected() {
        let payload = json!({"data": [{"symbol": "EUR/USD"}, {"symbol": "EUR/USD"}]});
        assert!(flatten_forex_pairs(&payload, &table("forex_pairs")).is_err());
    }

    #[test]
    fn test_missing_data_array() {
        let payload = json!({"code": 401, "message": "apikey is invalid", "status": "error"});
        assert!(flatten_indices(&payload, &table("indices")).is_err());
    }
}
