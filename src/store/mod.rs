// ABOUTME: Persistent store access - reads stored snapshots and executes statements
// ABOUTME: PostgreSQL is the only backend; the trait lets runs target an in-memory store

pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::reconcile::{Snapshot, StatementExecutor, TableRef};

pub use postgres::{connect, connect_with_retry, PgStore};

/// A store the engine can both read old snapshots from and write statements to.
#[async_trait]
pub trait SnapshotStore: StatementExecutor {
    /// Read every stored row of `table`, keyed by `id_column`.
    async fn read_snapshot(&self, table: &TableRef, id_column: &str) -> Result<Snapshot>;
}
