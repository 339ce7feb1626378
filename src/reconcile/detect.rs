// ABOUTME: Null-aware cell-by-cell comparison of an aligned snapshot pair
// ABOUTME: Reports which identifiers have at least one changed field

use std::collections::BTreeSet;

use super::normalize::AlignedPair;
use super::value::Value;

/// A row whose fields differ between the upstream and stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDiff {
    pub id: String,
    pub columns: Vec<String>,
}

/// Compare one cell.
///
/// A cell is unchanged when both sides are null, or both are non-null and
/// equal. One null side is always a change, whatever the other side holds.
pub fn cell_changed(new: &Value, old: &Value) -> bool {
    match (new.is_null(), old.is_null()) {
        (true, true) => false,
        (false, false) => !new.value_eq(old),
        _ => true,
    }
}

/// Every row of the pair with at least one changed cell, in identifier order.
pub fn diff_rows(pair: &AlignedPair) -> Vec<RowDiff> {
    let columns = pair.new.columns();

    pair.new
        .rows()
        .zip(pair.old.rows())
        .filter_map(|((id, new_values), (_, old_values))| {
            let changed: Vec<String> = new_values
                .iter()
                .zip(old_values.iter())
                .zip(columns.iter())
                .filter(|((n, o), _)| cell_changed(n, o))
                .map(|(_, column)| column.clone())
                .collect();

            if changed.is_empty() {
                None
            } else {
                Some(RowDiff {
                    id: id.clone(),
                    columns: changed,
                })
            }
        })
        .collect()
}

/// Identifiers of rows with at least one changed cell.
pub fn changed_identifiers(pair: &AlignedPair) -> BTreeSet<String> {
    diff_rows(pair).into_iter().map(|d| d.id).collect()
}
