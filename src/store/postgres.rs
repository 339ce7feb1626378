// ABOUTME: PostgreSQL store - snapshot reads and statement execution over tokio-postgres
// ABOUTME: Binds reconciliation values to parameters according to the prepared column types

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Row};

use super::SnapshotStore;
use crate::reconcile::{value::bool_text, Snapshot, Statement, StatementExecutor, TableRef, Value};
use crate::utils::{mask_password, quote_ident, retry_with_backoff, validate_connection_string};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Open a connection, negotiating TLS when the server offers it.
pub async fn connect(url: &str, allow_self_signed: bool) -> Result<Client> {
    validate_connection_string(url)?;

    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow_self_signed)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", mask_password(url)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

pub async fn connect_with_retry(url: &str, allow_self_signed: bool) -> Result<Client> {
    retry_with_backoff(
        || connect(url, allow_self_signed),
        3,
        Duration::from_secs(1),
    )
    .await
}

/// Store backed by a single PostgreSQL connection.
///
/// Transactions are driven with plain `BEGIN`/`COMMIT`/`ROLLBACK` so the
/// engine can bracket each table's batches without holding a borrow on the
/// client.
pub struct PgStore {
    client: Client,
    statement_timeout: Duration,
}

impl PgStore {
    pub fn new(client: Client, statement_timeout: Duration) -> Self {
        Self {
            client,
            statement_timeout,
        }
    }

    pub async fn connect(
        url: &str,
        statement_timeout: Duration,
        allow_self_signed: bool,
    ) -> Result<Self> {
        let client = connect_with_retry(url, allow_self_signed).await?;
        // The server cancels hung statements itself, so a client-side timeout
        // never leaves the session busy for the following ROLLBACK.
        client
            .batch_execute(&statement_timeout_sql(statement_timeout))
            .await
            .context("Failed to set statement_timeout")?;
        tracing::info!("Connected to {}", mask_password(url));
        Ok(Self::new(client, statement_timeout))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Column names and data types of a table, in ordinal order.
    pub async fn table_columns(&self, table: &TableRef) -> Result<Vec<(String, String)>> {
        let rows = self
            .client
            .query(
                "SELECT column_name::text, data_type::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&table.schema, &table.table],
            )
            .await
            .with_context(|| format!("Failed to read columns of {}", table.qualified()))?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn read_snapshot(&self, table: &TableRef, id_column: &str) -> Result<Snapshot> {
        let column_types = self.table_columns(table).await?;
        if column_types.is_empty() {
            bail!(
                "Table {} does not exist or has no columns",
                table.qualified()
            );
        }
        if !column_types.iter().any(|(name, _)| name == id_column) {
            bail!(
                "Table {} has no identifier column '{}'",
                table.qualified(),
                id_column
            );
        }

        let header: Vec<String> = column_types.iter().map(|(n, _)| n.clone()).collect();
        let query = build_select_query(table, &column_types, id_column);
        let rows = with_timeout(self.statement_timeout, "Reading rows", async {
            self.client
                .query(&query, &[])
                .await
                .with_context(|| format!("Failed to read rows of {}", table.qualified()))
        })
        .await?;

        let values = rows
            .iter()
            .map(|row| row_to_values(row, &column_types))
            .collect::<Result<Vec<_>>>()?;

        let snapshot = Snapshot::from_rows(id_column, &header, values)
            .with_context(|| format!("Stored rows of {} are not a valid snapshot", table.qualified()))?;
        tracing::info!(
            "Read {} stored rows from {}",
            snapshot.len(),
            table.qualified()
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl StatementExecutor for PgStore {
    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let run = async {
            let prepared = self
                .client
                .prepare(&statement.sql)
                .await
                .context("Failed to prepare statement")?;

            let params = statement
                .params
                .iter()
                .zip(prepared.params())
                .enumerate()
                .map(|(idx, (value, ty))| {
                    value_to_param(value, ty).with_context(|| format!("Parameter ${}", idx + 1))
                })
                .collect::<Result<Vec<_>>>()?;
            let refs: Vec<&(dyn ToSql + Sync)> = params
                .iter()
                .map(|p| p.as_ref() as &(dyn ToSql + Sync))
                .collect();

            self.client
                .execute(&prepared, &refs)
                .await
                .context("Statement execution failed")
        };

        with_timeout(self.statement_timeout, "Statement", run).await
    }

    async fn begin(&self) -> Result<()> {
        self.control("BEGIN", "begin transaction").await
    }

    async fn commit(&self) -> Result<()> {
        self.control("COMMIT", "commit transaction").await
    }

    async fn rollback(&self) -> Result<()> {
        self.control("ROLLBACK", "roll back transaction").await
    }
}

impl PgStore {
    async fn control(&self, sql: &str, what: &str) -> Result<()> {
        with_timeout(self.statement_timeout, what, async {
            self.client
                .batch_execute(sql)
                .await
                .with_context(|| format!("Failed to {}", what))
        })
        .await
    }
}

/// Session setting that makes the server abort statements running longer
/// than `timeout`.
fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET statement_timeout = {}", timeout.as_millis())
}

async fn with_timeout<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| anyhow!("{} timed out after {:?}", what, timeout))?
}

/// information_schema data types that `read_cell` decodes natively.
const DECODED_TYPES: &[&str] = &[
    "boolean",
    "smallint",
    "integer",
    "bigint",
    "real",
    "double precision",
    "numeric",
    "json",
    "jsonb",
    "date",
    "timestamp without time zone",
    "timestamp with time zone",
    "text",
    "character varying",
    "character",
];

fn build_select_query(
    table: &TableRef,
    column_types: &[(String, String)],
    id_column: &str,
) -> String {
    // Anything without a native decoder is read back as its text form.
    let quoted: Vec<String> = column_types
        .iter()
        .map(|(name, dtype)| {
            if DECODED_TYPES.contains(&dtype.as_str()) {
                quote_ident(name)
            } else {
                format!("{}::text", quote_ident(name))
            }
        })
        .collect();
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        quoted.join(", "),
        table.qualified(),
        quote_ident(id_column)
    )
}

/// Convert one stored row into values using information_schema data types.
fn row_to_values(row: &Row, column_types: &[(String, String)]) -> Result<Vec<Value>> {
    column_types
        .iter()
        .enumerate()
        .map(|(idx, (name, dtype))| {
            read_cell(row, idx, dtype).with_context(|| format!("Failed to read column '{}'", name))
        })
        .collect()
}

fn read_cell(row: &Row, idx: usize, dtype: &str) -> Result<Value> {
    let value: Value = match dtype {
        "boolean" => row.try_get::<_, Option<bool>>(idx)?.into(),
        "smallint" => row.try_get::<_, Option<i16>>(idx)?.map(i64::from).into(),
        "integer" => row.try_get::<_, Option<i32>>(idx)?.map(i64::from).into(),
        "bigint" => row.try_get::<_, Option<i64>>(idx)?.into(),
        "real" => row.try_get::<_, Option<f32>>(idx)?.map(real_to_f64).into(),
        "double precision" => row.try_get::<_, Option<f64>>(idx)?.into(),
        "numeric" => row
            .try_get::<_, Option<Decimal>>(idx)?
            .map(numeric_to_f64)
            .transpose()?
            .into(),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|j| Value::from_json(&j))
            .unwrap_or(Value::Null),
        "date" => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| d.to_string())
            .into(),
        "timestamp without time zone" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|t| t.to_string())
            .into(),
        "timestamp with time zone" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|t| t.to_rfc3339())
            .into(),
        _ => row.try_get::<_, Option<String>>(idx)?.into(),
    };
    Ok(value)
}

/// Box a value for binding to a parameter of type `ty`.
///
/// Booleans bound to text columns use the `True`/`False` spelling, numbers
/// bound to integer columns must be whole.
fn value_to_param(value: &Value, ty: &Type) -> Result<Box<dyn ToSql + Sync + Send>> {
    let param: Box<dyn ToSql + Sync + Send> = match *ty {
        Type::BOOL => Box::new(match value {
            v if v.is_null() => None,
            Value::Bool(b) => Some(*b),
            Value::Text(s) => Some(parse_bool(s)?),
            Value::Number(n) => Some(*n != 0.0),
            Value::Null => None,
        }),
        Type::INT2 => Box::new(to_integer(value)?.map(i16::try_from).transpose()?),
        Type::INT4 => Box::new(to_integer(value)?.map(i32::try_from).transpose()?),
        Type::INT8 => Box::new(to_integer(value)?),
        Type::FLOAT4 => Box::new(to_float(value)?.map(f64_to_real).transpose()?),
        Type::FLOAT8 => Box::new(to_float(value)?),
        Type::NUMERIC => Box::new(to_decimal(value)?),
        Type::JSON | Type::JSONB => Box::new(param_text(value).map(|s| {
            serde_json::from_str::<serde_json::Value>(&s).unwrap_or(serde_json::Value::String(s))
        })),
        Type::DATE => Box::new(
            param_text(value)
                .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
                .transpose()?,
        ),
        Type::TIMESTAMP => Box::new(
            param_text(value)
                .map(|s| parse_timestamp(&s))
                .transpose()?,
        ),
        Type::TIMESTAMPTZ => Box::new(
            param_text(value)
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|t| t.with_timezone(&Utc)))
                .transpose()?,
        ),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => Box::new(param_text(value)),
        _ => bail!("Unsupported column type '{}'", ty),
    };
    Ok(param)
}

/// Text form used when binding to a textual parameter.
fn param_text(value: &Value) -> Option<String> {
    match value {
        v if v.is_null() => None,
        Value::Text(s) => Some(s.clone()),
        Value::Bool(b) => Some(bool_text(*b).to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Null => None,
    }
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" => Ok(true),
        "false" | "f" | "0" | "no" => Ok(false),
        _ => bail!("'{}' is not a boolean", s),
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .with_context(|| format!("'{}' is not a timestamp", s))
}

fn to_float(value: &Value) -> Result<Option<f64>> {
    match value {
        v if v.is_null() => Ok(None),
        Value::Number(n) => Ok(Some(*n)),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .with_context(|| format!("'{}' is not a number", s)),
        Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
        Value::Null => Ok(None),
    }
}

fn to_integer(value: &Value) -> Result<Option<i64>> {
    match to_float(value)? {
        None => Ok(None),
        Some(n) if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 => {
            Ok(Some(n as i64))
        }
        Some(n) => bail!("{} is not a whole number", n),
    }
}

fn to_decimal(value: &Value) -> Result<Option<Decimal>> {
    match value {
        Value::Text(s) if !s.trim().is_empty() => s
            .trim()
            .parse::<Decimal>()
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map(Some)
            .with_context(|| format!("'{}' is not a decimal", s)),
        other => to_float(other)?.map(f64_to_numeric).transpose(),
    }
}

// Floats cross the numeric and real boundaries through their shortest
// round-trip text, so a written value reads back bit-identical.

fn f64_to_numeric(n: f64) -> Result<Decimal> {
    let text = n.to_string();
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&format!("{:e}", n)))
        .map_err(|_| anyhow!("{} cannot be stored as numeric", n))
}

fn numeric_to_f64(d: Decimal) -> Result<f64> {
    d.to_string()
        .parse::<f64>()
        .with_context(|| format!("numeric {} does not fit a float", d))
}

fn f64_to_real(n: f64) -> Result<f32> {
    let narrowed = n as f32;
    if real_to_f64(narrowed) != n {
        bail!("{} cannot be stored as real without rounding", n);
    }
    Ok(narrowed)
}

fn real_to_f64(f: f32) -> f64 {
    f.to_string().parse::<f64>().unwrap_or(f64::from(f))
}
