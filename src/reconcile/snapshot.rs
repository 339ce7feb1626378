// ABOUTME: Table snapshot keyed by a unique identifier column
// ABOUTME: Rows are held in identifier order so comparisons are order-independent

use std::collections::BTreeMap;
use thiserror::Error;

use super::value::Value;

/// Errors raised while building a snapshot.
#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("identifier column '{0}' is not part of the snapshot header")]
    UnknownColumn(String),
    #[error("row {row} has a null identifier in column '{column}'")]
    MissingIdentifier { column: String, row: usize },
    #[error("identifier '{id}' appears more than once in column '{column}'")]
    DuplicateIdentifier { column: String, id: String },
    #[error("row {row} has {actual} values but the header has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// A tabular dataset for one logical table at a point in time.
///
/// The identifier column is held apart from the value columns. `columns`
/// lists the value columns in their upstream order and every row stores one
/// value per column in that order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    id_column: String,
    columns: Vec<String>,
    rows: BTreeMap<String, Vec<Value>>,
}

impl Snapshot {
    /// Create an empty snapshot with the given identifier column and value columns.
    pub fn new(id_column: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            id_column: id_column.into(),
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Build a snapshot from a header and positional rows.
    ///
    /// `header` must contain `id_column`; it is removed from the value columns
    /// and its cell becomes the row identifier.
    pub fn from_rows(
        id_column: &str,
        header: &[String],
        rows: impl IntoIterator<Item = Vec<Value>>,
    ) -> Result<Self, SnapshotError> {
        let id_idx = header
            .iter()
            .position(|c| c == id_column)
            .ok_or_else(|| SnapshotError::UnknownColumn(id_column.to_string()))?;

        let columns: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .map(|(_, c)| c.clone())
            .collect();

        let mut snapshot = Snapshot::new(id_column, columns);
        for (row_idx, mut row) in rows.into_iter().enumerate() {
            if row.len() != header.len() {
                return Err(SnapshotError::RowWidth {
                    row: row_idx,
                    expected: header.len(),
                    actual: row.len(),
                });
            }
            let id = row
                .remove(id_idx)
                .as_identifier()
                .ok_or_else(|| SnapshotError::MissingIdentifier {
                    column: id_column.to_string(),
                    row: row_idx,
                })?;
            snapshot.insert(id, row)?;
        }

        Ok(snapshot)
    }

    /// Insert one row. `values` must follow the order of [`Snapshot::columns`].
    pub fn insert(&mut self, id: String, values: Vec<Value>) -> Result<(), SnapshotError> {
        if values.len() != self.columns.len() {
            return Err(SnapshotError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: values.len(),
            });
        }
        if self.rows.contains_key(&id) {
            return Err(SnapshotError::DuplicateIdentifier {
                column: self.id_column.clone(),
                id,
            });
        }
        self.rows.insert(id, values);
        Ok(())
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    pub fn row(&self, id: &str) -> Option<&[Value]> {
        self.rows.get(id).map(Vec::as_slice)
    }

    /// Identifiers in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    /// Rows in ascending identifier order.
    pub fn rows(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
        self.rows.iter()
    }

    /// Keep only the rows whose identifier satisfies `keep`.
    pub fn retain_ids(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.rows.retain(|id, _| keep(id));
    }

    /// Drop the named value columns. Unknown names are ignored.
    pub fn drop_columns(&mut self, names: &[String]) {
        let drop: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| names.contains(c))
            .map(|(i, _)| i)
            .collect();
        if drop.is_empty() {
            return;
        }

        for values in self.rows.values_mut() {
            for idx in drop.iter().rev() {
                values.remove(*idx);
            }
        }
        for idx in drop.iter().rev() {
            self.columns.remove(*idx);
        }
    }

    /// Apply `f` to every cell of one column. Returns false when the column is unknown.
    pub fn map_column(&mut self, column: &str, f: impl Fn(&Value) -> Value) -> bool {
        let Some(idx) = self.column_index(column) else {
            return false;
        };
        for values in self.rows.values_mut() {
            values[idx] = f(&values[idx]);
        }
        true
    }

    /// Return a copy whose value columns follow `order`.
    ///
    /// Returns `None` unless `order` is a permutation of this snapshot's columns.
    pub fn reordered(&self, order: &[String]) -> Option<Snapshot> {
        if order.len() != self.columns.len() {
            return None;
        }
        let positions: Vec<usize> = order
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Option<_>>()?;

        let rows = self
            .rows
            .iter()
            .map(|(id, values)| {
                let reordered = positions.iter().map(|&p| values[p].clone()).collect();
                (id.clone(), reordered)
            })
            .collect();

        Some(Snapshot {
            id_column: self.id_column.clone(),
            columns: order.to_vec(),
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_from_rows_extracts_identifier() {
        let rows: Vec<Vec<Value>> = vec![
            vec!["EUR".into(), "fo_EUR".into(), "Euro".into()],
            vec!["AUD".into(), "fo_AUD".into(), Value::Null],
        ];
        let snapshot =
            Snapshot::from_rows("asset_id", &header(&["symbol", "asset_id", "name"]), rows)
                .unwrap();

        assert_eq!(snapshot.columns(), &["symbol".to_string(), "name".to_string()]);
        let ids: Vec<&String> = snapshot.ids().collect();
        assert_eq!(ids, vec!["fo_AUD", "fo_EUR"]);
        assert_eq!(snapshot.row("fo_AUD").unwrap()[1], Value::Null);
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let rows: Vec<Vec<Value>> = vec![
            vec!["A".into(), 1i64.into()],
            vec!["A".into(), 2i64.into()],
        ];
        let err = Snapshot::from_rows("id", &header(&["id", "x"]), rows).unwrap_err();
        assert_eq!(
            err,
            SnapshotError::DuplicateIdentifier {
                column: "id".into(),
                id: "A".into()
            }
        );
    }

    #[test]
    fn test_null_identifier_rejected() {
        let err = Snapshot::from_rows("id", &header(&["id"]), vec![vec![Value::Null]]).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingIdentifier { row: 0, .. }));
    }

    #[test]
    fn test_unknown_identifier_column() {
        let err = Snapshot::from_rows("id", &header(&["x"]), Vec::<Vec<Value>>::new()).unwrap_err();
        assert_eq!(err, SnapshotError::UnknownColumn("id".into()));
    }

    #[test]
    fn test_drop_columns_and_reorder() {
        let rows: Vec<Vec<Value>> = vec![vec!["X".into(), 1i64.into(), 2i64.into(), 3i64.into()]];
        let mut snapshot = Snapshot::from_rows("id", &header(&["id", "a", "b", "c"]), rows).unwrap();

        snapshot.drop_columns(&["b".to_string(), "missing".to_string()]);
        assert_eq!(snapshot.columns(), &["a".to_string(), "c".to_string()]);
        assert_eq!(snapshot.row("X").unwrap(), &[Value::Number(1.0), Value::Number(3.0)]);

        let reordered = snapshot.reordered(&header(&["c", "a"])).unwrap();
        assert_eq!(reordered.row("X").unwrap(), &[Value::Number(3.0), Value::Number(1.0)]);
        assert!(snapshot.reordered(&header(&["c", "z"])).is_none());
    }
}
