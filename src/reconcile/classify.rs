// ABOUTME: Classifies identifiers into insert, delete and update sets
// ABOUTME: Set differences on raw identifiers, change detection on the aligned overlap

use std::collections::BTreeSet;

use super::detect::changed_identifiers;
use super::normalize::{align, ShapeMismatch};
use super::snapshot::Snapshot;

/// Insert/update/delete identifier sets for one logical table.
///
/// Inserts and updates are written with the same upsert statement, so
/// [`ChangePlan::upsert_ids`] merges them. Deletes are issued separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePlan {
    pub to_insert: BTreeSet<String>,
    pub to_delete: BTreeSet<String>,
    pub to_update: BTreeSet<String>,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty() && self.to_update.is_empty()
    }

    /// Identifiers to write with insert-or-update, in ascending order.
    pub fn upsert_ids(&self) -> Vec<String> {
        self.to_insert
            .union(&self.to_update)
            .cloned()
            .collect()
    }

    /// Identifiers to delete, in ascending order.
    pub fn delete_ids(&self) -> Vec<String> {
        self.to_delete.iter().cloned().collect()
    }
}

/// `ids(new) - ids(old)` and `ids(old) - ids(new)` under exact string equality.
pub fn key_differences(new: &Snapshot, old: &Snapshot) -> (BTreeSet<String>, BTreeSet<String>) {
    let to_insert = new.ids().filter(|id| !old.contains(id)).cloned().collect();
    let to_delete = old.ids().filter(|id| !new.contains(id)).cloned().collect();
    (to_insert, to_delete)
}

/// Build the full change plan for a pair of raw snapshots.
pub fn classify(
    new: &Snapshot,
    old: &Snapshot,
    coerce_columns: &[String],
) -> Result<ChangePlan, ShapeMismatch> {
    let (to_insert, to_delete) = key_differences(new, old);
    let pair = align(new, old, coerce_columns)?;
    let to_update = changed_identifiers(&pair);

    Ok(ChangePlan {
        to_insert,
        to_delete,
        to_update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::value::Value;

    fn snapshot(rows: &[(&str, Vec<Value>)]) -> Snapshot {
        let mut s = Snapshot::new("id", vec!["x".to_string(), "y".to_string()]);
        for (id, values) in rows {
            s.insert(id.to_string(), values.clone()).unwrap();
        }
        s
    }

    #[test]
    fn test_new_row_only_is_insert() {
        let old = snapshot(&[("A", vec![1i64.into(), Value::Null])]);
        let new = snapshot(&[
            ("A", vec![1i64.into(), Value::Null]),
            ("B", vec![2i64.into(), 3i64.into()]),
        ]);

        let plan = classify(&new, &old, &[]).unwrap();
        assert_eq!(plan.to_insert, BTreeSet::from(["B".to_string()]));
        assert!(plan.to_delete.is_empty());
        assert!(plan.to_update.is_empty());
        assert_eq!(plan.upsert_ids(), vec!["B".to_string()]);
    }

    #[test]
    fn test_insert_and_delete_are_disjoint() {
        let old = snapshot(&[
            ("A", vec![1i64.into(), Value::Null]),
            ("C", vec![1i64.into(), Value::Null]),
        ]);
        let new = snapshot(&[
            ("A", vec![1i64.into(), 9i64.into()]),
            ("B", vec![1i64.into(), Value::Null]),
        ]);

        let plan = classify(&new, &old, &[]).unwrap();
        assert_eq!(plan.to_insert, BTreeSet::from(["B".to_string()]));
        assert_eq!(plan.to_delete, BTreeSet::from(["C".to_string()]));
        assert_eq!(plan.to_update, BTreeSet::from(["A".to_string()]));
        assert!(plan.to_insert.is_disjoint(&plan.to_delete));
        assert_eq!(plan.upsert_ids(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(plan.delete_ids(), vec!["C".to_string()]);
    }

    #[test]
    fn test_identical_snapshots_produce_empty_plan() {
        let rows = [
            ("A", vec![1i64.into(), Value::Null]),
            ("B", vec![Value::Number(f64::NAN), "z".into()]),
        ];
        let plan = classify(&snapshot(&rows), &snapshot(&rows), &[]).unwrap();
        assert!(plan.is_empty());
    }
}
