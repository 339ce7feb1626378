// ABOUTME: Runs a reconciliation over every configured table in order
// ABOUTME: Fetches, reads, reconciles and aggregates reports; stops at the first failure

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::fetch::SnapshotSource;
use crate::reconcile::{ReconcileError, Reconciler, TableReport};
use crate::store::SnapshotStore;

/// Aggregate outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub tables: Vec<TableReport>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            tables: Vec::new(),
        }
    }

    pub fn inserted(&self) -> usize {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    pub fn updated(&self) -> usize {
        self.tables.iter().map(|t| t.updated).sum()
    }

    pub fn deleted(&self) -> usize {
        self.tables.iter().map(|t| t.deleted).sum()
    }

    pub fn statements(&self) -> usize {
        self.tables.iter().map(|t| t.statements).sum()
    }

    /// Human-readable summary, one line per table plus a total.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.tables.len() + 2);
        for t in &self.tables {
            lines.push(format!(
                "  {:<16} +{} ~{} -{} ({} statements, {} rows affected, {}ms)",
                t.table, t.inserted, t.updated, t.deleted, t.statements, t.rows_affected, t.duration_ms
            ));
        }
        let elapsed = self
            .finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or_default();
        lines.push(format!(
            "Total: {} inserted, {} updated, {} deleted across {} tables in {}ms{}",
            self.inserted(),
            self.updated(),
            self.deleted(),
            self.tables.len(),
            elapsed,
            if self.dry_run { " (dry run, nothing written)" } else { "" }
        ));
        lines
    }
}

/// Wait for a shutdown message; lagging still counts as one.
async fn cancelled(shutdown: &mut broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
}

/// Reconcile every table of `config`, in order.
///
/// Each table is fetched from `source`, read from `store` and reconciled in
/// its own transaction. The first failure aborts the run; tables already
/// committed stay committed.
pub async fn run<S>(
    config: &Config,
    source: &dyn SnapshotSource,
    store: &S,
    dry_run: bool,
    shutdown: &broadcast::Sender<()>,
) -> Result<RunReport, ReconcileError>
where
    S: SnapshotStore + ?Sized,
{
    let mut report = RunReport::new(dry_run);
    let options = config.reconcile_options(dry_run);
    let mut stop = shutdown.subscribe();

    for table in &config.tables {
        let target = table.target(&config.schema);
        let name = target.name.clone();
        // Subscribed before the fetch so a message that lands while fetching
        // or reading is still seen before the first write.
        let table_shutdown = shutdown.subscribe();

        if !matches!(stop.try_recv(), Err(broadcast::error::TryRecvError::Empty)) {
            return Err(ReconcileError::Cancelled { table: name });
        }

        tracing::info!("{}: reconciling into {}", name, target.store.qualified());

        let new = tokio::select! {
            fetched = source.fetch(table) => fetched.map_err(|source| ReconcileError::Fetch {
                table: name.clone(),
                source,
            })?,
            _ = cancelled(&mut stop) => return Err(ReconcileError::Cancelled { table: name }),
        };

        let old = tokio::select! {
            read = store.read_snapshot(&target.store, &target.id_column) => {
                read.map_err(|source| ReconcileError::StoreRead {
                    table: name.clone(),
                    source,
                })?
            }
            _ = cancelled(&mut stop) => return Err(ReconcileError::Cancelled { table: name }),
        };

        let mut reconciler =
            Reconciler::new(store, options.clone()).with_shutdown(table_shutdown);
        let table_report = reconciler.reconcile_table(&target, new, old).await?;
        report.tables.push(table_report);
    }

    report.finished_at = Some(Utc::now());
    Ok(report)
}
