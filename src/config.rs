// ABOUTME: Reconciliation configuration - tables, identifier columns and run limits
// ABOUTME: Loaded from TOML or taken from the built-in reference data catalog

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::reconcile::{ReconcileOptions, TableRef, TableTarget, DEFAULT_BATCH_SIZE};
use crate::utils::{validate_column_name, validate_postgres_identifier};

/// Upstream dataset a logical table is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// CryptoCompare coin list
    Crypto,
    /// Distinct base currencies of the TwelveData forex pairs
    Forex,
    /// TwelveData forex pairs
    ForexPairs,
    /// TwelveData indices
    Indices,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Crypto => "crypto",
            SourceKind::Forex => "forex",
            SourceKind::ForexPairs => "forex_pairs",
            SourceKind::Indices => "indices",
        }
    }
}

/// One logical table to reconcile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Store table name, also used as the logical name
    pub name: String,
    /// Schema override (defaults to the top-level `schema`)
    #[serde(default)]
    pub schema: Option<String>,
    pub source: SourceKind,
    pub id_column: String,
    /// Full column list including the identifier column
    pub columns: Vec<String>,
    #[serde(default)]
    pub coerce_columns: Vec<String>,
    #[serde(default)]
    pub exclude_columns: Vec<String>,
    /// Upstream URL override
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding an upstream API key
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl TableConfig {
    /// Engine view of this table.
    pub fn target(&self, default_schema: &str) -> TableTarget {
        let schema = self.schema.as_deref().unwrap_or(default_schema);
        TableTarget {
            name: self.name.clone(),
            store: TableRef::new(schema, &self.name),
            id_column: self.id_column.clone(),
            coerce_columns: self.coerce_columns.clone(),
            exclude_columns: self.exclude_columns.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_postgres_identifier(&self.name)
            .with_context(|| format!("Invalid table name '{}'", self.name))?;
        if let Some(schema) = &self.schema {
            validate_postgres_identifier(schema)
                .with_context(|| format!("Invalid schema for table '{}'", self.name))?;
        }
        for column in &self.columns {
            validate_column_name(column)
                .with_context(|| format!("Invalid column in table '{}'", self.name))?;
        }

        let known: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        if known.len() != self.columns.len() {
            bail!("Table '{}' lists a column more than once", self.name);
        }
        if !known.contains(self.id_column.as_str()) {
            bail!(
                "Table '{}': identifier column '{}' is not in its column list",
                self.name,
                self.id_column
            );
        }
        for column in self.coerce_columns.iter().chain(self.exclude_columns.iter()) {
            if !known.contains(column.as_str()) {
                bail!(
                    "Table '{}': column '{}' is not in its column list",
                    self.name,
                    column
                );
            }
        }
        if self.exclude_columns.contains(&self.id_column) {
            bail!(
                "Table '{}': the identifier column cannot be excluded",
                self.name
            );
        }
        Ok(())
    }
}

/// Top-level configuration for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema: String,
    pub batch_size: usize,
    pub statement_timeout_secs: u64,
    pub fetch_retries: u32,
    pub fetch_retry_delay_ms: u64,
    pub http_timeout_secs: u64,
    pub transactional: bool,
    pub tables: Vec<TableConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            statement_timeout_secs: 300,
            fetch_retries: 3,
            fetch_retry_delay_ms: 1000,
            http_timeout_secs: 30,
            transactional: true,
            tables: Vec::new(),
        }
    }
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in catalog of the crypto, forex and indices reference tables.
    pub fn builtin() -> Self {
        Self {
            tables: vec![
                TableConfig {
                    name: "crypto_assets".to_string(),
                    schema: None,
                    source: SourceKind::Crypto,
                    id_column: "Symbol".to_string(),
                    columns: to_strings(CRYPTO_COLUMNS),
                    coerce_columns: to_strings(&["Sponsored", "IsTrading"]),
                    exclude_columns: Vec::new(),
                    url: None,
                    api_key_env: Some("CRYPTOCOMPARE_API_KEY".to_string()),
                },
                TableConfig {
                    name: "forex".to_string(),
                    schema: None,
                    source: SourceKind::Forex,
                    id_column: "asset_id".to_string(),
                    columns: to_strings(FOREX_COLUMNS),
                    coerce_columns: Vec::new(),
                    exclude_columns: Vec::new(),
                    url: None,
                    api_key_env: Some("TWELVEDATA_API_KEY".to_string()),
                },
                TableConfig {
                    name: "forex_pairs".to_string(),
                    schema: None,
                    source: SourceKind::ForexPairs,
                    id_column: "asset_id".to_string(),
                    columns: to_strings(FOREX_PAIRS_COLUMNS),
                    coerce_columns: Vec::new(),
                    exclude_columns: Vec::new(),
                    url: None,
                    api_key_env: Some("TWELVEDATA_API_KEY".to_string()),
                },
                TableConfig {
                    name: "indices".to_string(),
                    schema: None,
                    source: SourceKind::Indices,
                    id_column: "asset_id".to_string(),
                    columns: to_strings(INDICES_COLUMNS),
                    coerce_columns: Vec::new(),
                    exclude_columns: Vec::new(),
                    url: None,
                    api_key_env: Some("TWELVEDATA_API_KEY".to_string()),
                },
            ],
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_postgres_identifier(&self.schema).context("Invalid default schema")?;
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.statement_timeout_secs == 0 {
            bail!("statement_timeout_secs must be greater than zero");
        }
        if self.tables.is_empty() {
            bail!("No tables configured");
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            table.validate()?;
            let schema = table.schema.as_deref().unwrap_or(&self.schema);
            if !seen.insert((schema.to_string(), table.name.clone())) {
                bail!("Table '{}.{}' is configured more than once", schema, table.name);
            }
        }
        Ok(())
    }

    /// Restrict the run to `names`, keeping configuration order.
    pub fn select_tables(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if !self.tables.iter().any(|t| &t.name == name) {
                bail!("Unknown table '{}' (not in configuration)", name);
            }
        }
        self.tables.retain(|t| names.contains(&t.name));
        Ok(())
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    pub fn reconcile_options(&self, dry_run: bool) -> ReconcileOptions {
        ReconcileOptions {
            batch_size: self.batch_size,
            transactional: self.transactional,
            dry_run,
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub const CRYPTO_COLUMNS: &[&str] = &[
    "Id",
    "Url",
    "ImageUrl",
    "ContentCreatedOn",
    "Name",
    "Symbol",
    "CoinName",
    "FullName",
    "Description",
    "AssetTokenStatus",
    "Algorithm",
    "ProofType",
    "SortOrder",
    "Sponsored",
    "Taxonomy_Access",
    "Taxonomy_FCA",
    "Taxonomy_FINMA",
    "Taxonomy_Industry",
    "Taxonomy_CollateralizedAsset",
    "Taxonomy_CollateralizedAssetType",
    "Taxonomy_CollateralType",
    "Taxonomy_CollateralInfo",
    "Weiss_Rating",
    "Weiss_TechnologyAdoptionRating",
    "Weiss_MarketPerformanceRating",
    "IsTrading",
    "TotalCoinsMined",
    "CirculatingSupply",
    "BlockNumber",
    "NetHashesPerSecond",
    "BlockReward",
    "BlockTime",
    "AssetLaunchDate",
    "AssetWhitepaperUrl",
    "AssetWebsiteUrl",
    "MaxSupply",
    "MktCapPenalty",
    "IsUsedInDefi",
    "IsUsedInNft",
    "PlatformType",
    "AlgorithmType",
    "Difficulty",
    "BuiltOn",
    "SmartContractAddress",
    "DecimalPoints",
];

pub const FOREX_COLUMNS: &[&str] = &["asset_id", "symbol", "name"];

pub const FOREX_PAIRS_COLUMNS: &[&str] = &[
    "asset_id",
    "symbol",
    "currency_group",
    "currency_base",
    "currency_quote",
];

pub const INDICES_COLUMNS: &[&str] = &["asset_id", "symbol", "name", "country", "currency"];
