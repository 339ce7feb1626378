// ABOUTME: Builds parameterized upsert and delete statements for one batch
// ABOUTME: Uses INSERT ... ON CONFLICT DO UPDATE keyed by the identifier column

use thiserror::Error;

use super::snapshot::Snapshot;
use super::value::Value;
use crate::utils::quote_ident;

#[derive(Debug, Error, PartialEq)]
pub enum StatementError {
    #[error("identifier '{0}' is not present in the upstream snapshot")]
    UnknownIdentifier(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Upsert,
    Delete,
}

/// A rendered statement with `$n` placeholders and the values bound to them.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
    pub params: Vec<Value>,
    /// Number of identifiers (rows) the statement covers.
    pub rows: usize,
}

/// Fully qualified store table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Build one upsert covering every row of `ids` taken from `snapshot`.
///
/// The column list is the identifier column followed by the snapshot's value
/// columns in order. On conflict every value column is overwritten with the
/// new value. Returns `Ok(None)` for an empty batch.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("id", "col1", "col2")
/// VALUES ($1, $2, $3), ($4, $5, $6)
/// ON CONFLICT ("id") DO UPDATE SET "col1" = EXCLUDED."col1", "col2" = EXCLUDED."col2"
/// ```
pub fn build_upsert(
    target: &TableRef,
    snapshot: &Snapshot,
    ids: &[String],
) -> Result<Option<Statement>, StatementError> {
    if ids.is_empty() {
        return Ok(None);
    }

    let id_column = snapshot.id_column();
    let num_cols = snapshot.columns().len() + 1;

    // Flatten rows into one parameter list, identifier first in each row
    let mut params = Vec::with_capacity(ids.len() * num_cols);
    for id in ids {
        let row = snapshot
            .row(id)
            .ok_or_else(|| StatementError::UnknownIdentifier(id.clone()))?;
        params.push(Value::Text(id.clone()));
        params.extend(row.iter().cloned());
    }

    // Column list: "id", "col1", "col2", ...
    let quoted_columns: Vec<String> = std::iter::once(id_column)
        .chain(snapshot.columns().iter().map(String::as_str))
        .map(quote_ident)
        .collect();

    // VALUES ($1, $2, ...), ($n+1, ...), one tuple per identifier
    let value_rows: Vec<String> = (0..ids.len())
        .map(|row_idx| {
            let placeholders: Vec<String> = (0..num_cols)
                .map(|col_idx| format!("${}", row_idx * num_cols + col_idx + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    // UPDATE SET clause covers every non-identifier column
    let update_columns: Vec<String> = snapshot
        .columns()
        .iter()
        .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
        .collect();

    let update_clause = if update_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) {}",
        target.qualified(),
        quoted_columns.join(", "),
        value_rows.join(", "),
        quote_ident(id_column),
        update_clause
    );

    Ok(Some(Statement {
        kind: StatementKind::Upsert,
        sql,
        params,
        rows: ids.len(),
    }))
}

/// Build one delete removing every row whose identifier is in `ids`.
///
/// ```sql
/// DELETE FROM "schema"."table" WHERE "id" IN ($1, $2, $3)
/// ```
pub fn build_delete(target: &TableRef, id_column: &str, ids: &[String]) -> Option<Statement> {
    if ids.is_empty() {
        return None;
    }

    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        target.qualified(),
        quote_ident(id_column),
        placeholders.join(", ")
    );

    Some(Statement {
        kind: StatementKind::Delete,
        sql,
        params: ids.iter().cloned().map(Value::Text).collect(),
        rows: ids.len(),
    })
}

impl Statement {
    /// Render the statement with every placeholder replaced by its SQL literal.
    ///
    /// For display only; placeholders inside quoted identifiers are left alone.
    pub fn preview(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut chars = self.sql.chars().peekable();
        let mut in_ident = false;

        while let Some(ch) = chars.next() {
            if ch == '"' {
                in_ident = !in_ident;
                out.push(ch);
                continue;
            }
            if ch != '$' || in_ident {
                out.push(ch);
                continue;
            }

            let mut digits = String::new();
            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                digits.push(*d);
                chars.next();
            }
            let param = digits
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| self.params.get(idx));
            match param {
                Some(value) => out.push_str(&value.to_sql_literal()),
                None => {
                    out.push('$');
                    out.push_str(&digits);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto_snapshot() -> Snapshot {
        let mut s = Snapshot::new(
            "Symbol",
            vec!["CoinName".to_string(), "Sponsored".to_string(), "SortOrder".to_string()],
        );
        s.insert(
            "cr_BTC".into(),
            vec!["Bitcoin".into(), Value::Bool(false), 1i64.into()],
        )
        .unwrap();
        s.insert(
            "cr_DOGE".into(),
            vec!["Doge's coin".into(), Value::Null, 2.5f64.into()],
        )
        .unwrap();
        s
    }

    #[test]
    fn test_build_upsert_single_row() {
        let target = TableRef::new("crypto_fundamentals", "crypto_assets");
        let stmt = build_upsert(&target, &crypto_snapshot(), &["cr_BTC".to_string()])
            .unwrap()
            .unwrap();

        assert!(stmt
            .sql
            .contains("INSERT INTO \"crypto_fundamentals\".\"crypto_assets\""));
        assert!(stmt
            .sql
            .contains("(\"Symbol\", \"CoinName\", \"Sponsored\", \"SortOrder\")"));
        assert!(stmt.sql.contains("VALUES ($1, $2, $3, $4)"));
        assert!(stmt.sql.contains("ON CONFLICT (\"Symbol\")"));
        assert!(stmt.sql.contains("\"CoinName\" = EXCLUDED.\"CoinName\""));
        assert!(!stmt.sql.contains("\"Symbol\" = EXCLUDED"));
        assert_eq!(stmt.rows, 1);
        assert_eq!(
            stmt.params,
            vec![
                Value::text("cr_BTC"),
                Value::text("Bitcoin"),
                Value::Bool(false),
                Value::Number(1.0)
            ]
        );
    }

    #[test]
    fn test_build_upsert_multiple_rows() {
        let target = TableRef::new("public", "crypto_assets");
        let ids = vec!["cr_BTC".to_string(), "cr_DOGE".to_string()];
        let stmt = build_upsert(&target, &crypto_snapshot(), &ids)
            .unwrap()
            .unwrap();

        assert!(stmt.sql.contains("($1, $2, $3, $4), ($5, $6, $7, $8)"));
        assert_eq!(stmt.params.len(), 8);
    }

    #[test]
    fn test_upsert_preview_uses_literal_rules() {
        let target = TableRef::new("public", "crypto_assets");
        let ids = vec!["cr_BTC".to_string(), "cr_DOGE".to_string()];
        let stmt = build_upsert(&target, &crypto_snapshot(), &ids)
            .unwrap()
            .unwrap();

        let preview = stmt.preview();
        assert!(preview.contains("('cr_BTC', 'Bitcoin', 'False', 1)"));
        assert!(preview.contains("('cr_DOGE', 'Doge''s coin', NULL, 2.5)"));
    }

    #[test]
    fn test_empty_batches_build_nothing() {
        let target = TableRef::new("public", "forex");
        assert_eq!(build_upsert(&target, &crypto_snapshot(), &[]).unwrap(), None);
        assert_eq!(build_delete(&target, "asset_id", &[]), None);
    }

    #[test]
    fn test_unknown_identifier_is_an_error() {
        let target = TableRef::new("public", "crypto_assets");
        let err = build_upsert(&target, &crypto_snapshot(), &["cr_ETH".to_string()]).unwrap_err();
        assert_eq!(err, StatementError::UnknownIdentifier("cr_ETH".into()));
    }

    #[test]
    fn test_identifier_only_table_does_nothing_on_conflict() {
        let mut s = Snapshot::new("asset_id", Vec::new());
        s.insert("fo_EUR".into(), Vec::new()).unwrap();
        let stmt = build_upsert(&TableRef::new("public", "forex"), &s, &["fo_EUR".to_string()])
            .unwrap()
            .unwrap();
        assert!(stmt.sql.ends_with("ON CONFLICT (\"asset_id\") DO NOTHING"));
    }

    #[test]
    fn test_build_delete() {
        let target = TableRef::new("public", "forex_pairs");
        let ids = vec!["fo_EURUSD".to_string(), "fo_GBPUSD".to_string(), "fo_O'X".to_string()];
        let stmt = build_delete(&target, "asset_id", &ids).unwrap();

        assert_eq!(
            stmt.sql,
            "DELETE FROM \"public\".\"forex_pairs\" WHERE \"asset_id\" IN ($1, $2, $3)"
        );
        assert_eq!(stmt.kind, StatementKind::Delete);
        assert_eq!(
            stmt.preview(),
            "DELETE FROM \"public\".\"forex_pairs\" WHERE \"asset_id\" IN ('fo_EURUSD', 'fo_GBPUSD', 'fo_O''X')"
        );
    }

    #[test]
    fn test_preview_handles_double_digit_placeholders() {
        let target = TableRef::new("public", "t");
        let ids: Vec<String> = (0..12).map(|i| format!("id{}", i)).collect();
        let stmt = build_delete(&target, "id", &ids).unwrap();
        let preview = stmt.preview();
        assert!(preview.contains("'id9', 'id10', 'id11'"));
        assert!(!preview.contains('$'));
    }
}
