// ABOUTME: Flattens the CryptoCompare coin list into a crypto asset snapshot
// ABOUTME: Prefixes symbols with cr_ and spreads Taxonomy and Weiss ratings into columns

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use super::build_snapshot;
use crate::config::TableConfig;
use crate::reconcile::{Snapshot, Value};

pub const CRYPTO_URL: &str = "https://min-api.cryptocompare.com/data/all/coinlist";

const SYMBOL_PREFIX: &str = "cr_";

/// Build the crypto asset snapshot from a coin list payload.
///
/// Each entry of the `Data` object becomes one row. `Taxonomy.<field>` is
/// stored as `Taxonomy_<field>` and `Rating.Weiss.<field>` as
/// `Weiss_<field>`. Keys that are not configured columns are ignored and
/// configured columns missing from a coin are null.
pub fn flatten(payload: &JsonValue, table: &TableConfig) -> Result<Snapshot> {
    let coins = payload
        .get("Data")
        .and_then(JsonValue::as_object)
        .context("Coin list response has no 'Data' object")?;

    let records = coins.values().map(|coin| {
        let mut record: HashMap<String, Value> = HashMap::new();
        let Some(fields) = coin.as_object() else {
            return record;
        };

        for (key, value) in fields {
            match key.as_str() {
                "Symbol" => {
                    let symbol = match value {
                        JsonValue::String(s) => Value::Text(format!("{}{}", SYMBOL_PREFIX, s)),
                        other => Value::from_json(other),
                    };
                    record.insert(key.clone(), symbol);
                }
                "Taxonomy" => {
                    for (field, v) in value.as_object().into_iter().flatten() {
                        record.insert(format!("Taxonomy_{}", field), Value::from_json(v));
                    }
                }
                "Rating" => {
                    let weiss = value.get("Weiss").and_then(JsonValue::as_object);
                    for (field, v) in weiss.into_iter().flatten() {
                        record.insert(format!("Weiss_{}", field), Value::from_json(v));
                    }
                }
                _ => {
                    record.insert(key.clone(), Value::from_json(value));
                }
            }
        }
        record
    });

    build_snapshot(table, records)
}
