// ABOUTME: Error taxonomy for a reconciliation run
// ABOUTME: Every variant names the logical table and, where relevant, the failing stage

use std::fmt;
use thiserror::Error;

use super::normalize::ShapeMismatch;
use super::statement::StatementError;

/// The step of a table's reconciliation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Read,
    Align,
    Begin,
    Delete,
    Upsert,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Read => "read",
            Stage::Align => "align",
            Stage::Begin => "begin",
            Stage::Delete => "delete",
            Stage::Upsert => "upsert",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Snapshots differ in shape after restricting them to their common identifiers.
    #[error("{table}: {source}")]
    ShapeMismatch {
        table: String,
        source: ShapeMismatch,
    },

    /// A delete/upsert statement (or the surrounding transaction) failed.
    #[error("{table}: {stage} failed")]
    StoreWrite {
        table: String,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("{table}: failed to read stored snapshot")]
    StoreRead {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{table}: failed to fetch upstream snapshot")]
    Fetch {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{table}: failed to build statement")]
    Statement {
        table: String,
        source: StatementError,
    },

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("{table}: reconciliation cancelled")]
    Cancelled { table: String },
}

impl ReconcileError {
    /// The logical table the error belongs to, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            ReconcileError::ShapeMismatch { table, .. }
            | ReconcileError::StoreWrite { table, .. }
            | ReconcileError::StoreRead { table, .. }
            | ReconcileError::Fetch { table, .. }
            | ReconcileError::Statement { table, .. }
            | ReconcileError::Cancelled { table } => Some(table),
            ReconcileError::InvalidBatchSize => None,
        }
    }

    /// The stage that failed, if the error is tied to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ReconcileError::ShapeMismatch { .. } => Some(Stage::Align),
            ReconcileError::StoreWrite { stage, .. } => Some(*stage),
            ReconcileError::StoreRead { .. } => Some(Stage::Read),
            ReconcileError::Fetch { .. } => Some(Stage::Fetch),
            ReconcileError::Statement { .. } => Some(Stage::Upsert),
            ReconcileError::InvalidBatchSize | ReconcileError::Cancelled { .. } => None,
        }
    }
}
