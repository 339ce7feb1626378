// ABOUTME: Aligns a new and an old snapshot into identically shaped tables
// ABOUTME: Coerces ambiguous columns and restricts both sides to shared identifiers

use thiserror::Error;

use super::snapshot::Snapshot;

/// Two snapshots of the same logical table with the same columns and identifiers.
#[derive(Debug, Clone)]
pub struct AlignedPair {
    pub new: Snapshot,
    pub old: Snapshot,
}

/// Structural drift between two snapshots that prevents a cell-by-cell comparison.
#[derive(Debug, Clone, Error, PartialEq)]
#[error(
    "snapshots cannot be compared: new is {new_rows}x{} keyed by '{new_id_column}', \
     old is {old_rows}x{} keyed by '{old_id_column}'{}",
    .new_columns.len(),
    .old_columns.len(),
    describe_column_drift(.new_columns, .old_columns)
)]
pub struct ShapeMismatch {
    pub new_id_column: String,
    pub old_id_column: String,
    pub new_rows: usize,
    pub old_rows: usize,
    pub new_columns: Vec<String>,
    pub old_columns: Vec<String>,
}

fn describe_column_drift(new_columns: &[String], old_columns: &[String]) -> String {
    let added: Vec<&str> = new_columns
        .iter()
        .filter(|c| !old_columns.contains(c))
        .map(String::as_str)
        .collect();
    let removed: Vec<&str> = old_columns
        .iter()
        .filter(|c| !new_columns.contains(c))
        .map(String::as_str)
        .collect();

    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("only upstream: {}", added.join(", ")));
    }
    if !removed.is_empty() {
        parts.push(format!("only stored: {}", removed.join(", ")));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join("; "))
    }
}

/// Align `new` against `old`.
///
/// Both sides are restricted to the identifiers they share and the columns in
/// `coerce_columns` are rewritten to their canonical text form. The stored
/// side is reordered to the upstream column order when the column sets match.
/// Anything else that leaves the two tables with different dimensions or
/// identifier sequences is a [`ShapeMismatch`].
pub fn align(
    new: &Snapshot,
    old: &Snapshot,
    coerce_columns: &[String],
) -> Result<AlignedPair, ShapeMismatch> {
    let mismatch = || ShapeMismatch {
        new_id_column: new.id_column().to_string(),
        old_id_column: old.id_column().to_string(),
        new_rows: new.len(),
        old_rows: old.len(),
        new_columns: new.columns().to_vec(),
        old_columns: old.columns().to_vec(),
    };

    if new.id_column() != old.id_column() {
        return Err(mismatch());
    }

    let mut new_aligned = new.clone();
    new_aligned.retain_ids(|id| old.contains(id));

    let mut old_aligned = if old.columns() == new.columns() {
        old.clone()
    } else {
        old.reordered(new.columns()).ok_or_else(mismatch)?
    };
    old_aligned.retain_ids(|id| new.contains(id));

    for column in coerce_columns {
        new_aligned.map_column(column, |v| v.to_canonical_text());
        old_aligned.map_column(column, |v| v.to_canonical_text());
    }

    let same_ids = new_aligned.ids().eq(old_aligned.ids());
    if new_aligned.len() != old_aligned.len()
        || new_aligned.columns().len() != old_aligned.columns().len()
        || !same_ids
    {
        return Err(mismatch());
    }

    Ok(AlignedPair {
        new: new_aligned,
        old: old_aligned,
    })
}
