// ABOUTME: Drives one logical table from snapshots to applied store changes
// ABOUTME: Classifies rows, then deletes and upserts in bounded batches inside a transaction

use async_trait::async_trait;
use serde::Serialize;
use std::time::Instant;
use tokio::sync::broadcast;

use super::batch::{batch_count, effective_batch_size, plan_batches, DEFAULT_BATCH_SIZE};
use super::classify::{classify, ChangePlan};
use super::error::{ReconcileError, Stage};
use super::snapshot::Snapshot;
use super::statement::{build_delete, build_upsert, Statement, TableRef};

/// Executes rendered statements against the store.
///
/// Transaction hooks default to no-ops so simple executors only implement
/// [`StatementExecutor::execute`].
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute one statement and return the number of rows affected.
    async fn execute(&self, statement: &Statement) -> anyhow::Result<u64>;

    async fn begin(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn commit(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-table settings the engine needs. Nothing here is global.
#[derive(Debug, Clone, PartialEq)]
pub struct TableTarget {
    /// Logical table name used in logs and errors
    pub name: String,
    pub store: TableRef,
    pub id_column: String,
    /// Columns whose values are compared in canonical text form
    pub coerce_columns: Vec<String>,
    /// Columns dropped from both snapshots before comparison and writing
    pub exclude_columns: Vec<String>,
}

/// Run-wide engine settings.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Maximum identifiers per statement
    pub batch_size: usize,
    /// Wrap each table's deletes and upserts in one transaction
    pub transactional: bool,
    /// Plan and render statements without executing them
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            transactional: true,
            dry_run: false,
        }
    }
}

/// Outcome of reconciling one logical table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableReport {
    pub table: String,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub statements: usize,
    pub rows_affected: u64,
    pub duration_ms: u64,
    pub dry_run: bool,
    /// Statements with inlined literals, only filled on dry runs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub previews: Vec<String>,
}

impl TableReport {
    fn from_plan(table: &str, plan: &ChangePlan, dry_run: bool) -> Self {
        Self {
            table: table.to_string(),
            inserted: plan.to_insert.len(),
            updated: plan.to_update.len(),
            deleted: plan.to_delete.len(),
            dry_run,
            ..Default::default()
        }
    }

    pub fn has_changes(&self) -> bool {
        self.inserted + self.updated + self.deleted > 0
    }
}

/// Reconciles logical tables one at a time through a [`StatementExecutor`].
pub struct Reconciler<'a, E: StatementExecutor + ?Sized> {
    executor: &'a E,
    options: ReconcileOptions,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<'a, E: StatementExecutor + ?Sized> Reconciler<'a, E> {
    pub fn new(executor: &'a E, options: ReconcileOptions) -> Self {
        Self {
            executor,
            options,
            shutdown: None,
        }
    }

    /// Abort between batches once a message arrives on `shutdown`.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Compute the change plan for one table without touching the store.
    pub fn plan(
        &self,
        target: &TableTarget,
        new: &mut Snapshot,
        old: &mut Snapshot,
    ) -> Result<ChangePlan, ReconcileError> {
        if !target.exclude_columns.is_empty() {
            new.drop_columns(&target.exclude_columns);
            old.drop_columns(&target.exclude_columns);
        }

        let plan = classify(new, old, &target.coerce_columns).map_err(|source| {
            ReconcileError::ShapeMismatch {
                table: target.name.clone(),
                source,
            }
        })?;

        tracing::info!(
            "{}: {} new, {} delisted, {} changed ({} upstream rows, {} stored rows)",
            target.name,
            plan.to_insert.len(),
            plan.to_delete.len(),
            plan.to_update.len(),
            new.len(),
            old.len()
        );
        tracing::debug!("{}: inserting {:?}", target.name, plan.to_insert);
        tracing::debug!("{}: deleting {:?}", target.name, plan.to_delete);

        Ok(plan)
    }

    /// Reconcile one logical table: classify, then apply deletes and upserts.
    ///
    /// A shape mismatch aborts before any statement is executed.
    pub async fn reconcile_table(
        &mut self,
        target: &TableTarget,
        mut new: Snapshot,
        mut old: Snapshot,
    ) -> Result<TableReport, ReconcileError> {
        let plan = self.plan(target, &mut new, &mut old)?;
        self.apply_plan(target, &plan, &new).await
    }

    /// Apply a previously computed plan using rows from `new`.
    pub async fn apply_plan(
        &mut self,
        target: &TableTarget,
        plan: &ChangePlan,
        new: &Snapshot,
    ) -> Result<TableReport, ReconcileError> {
        let start = Instant::now();
        let mut report = TableReport::from_plan(&target.name, plan, self.options.dry_run);

        if plan.is_empty() {
            tracing::info!("{}: already up to date", target.name);
            return Ok(report);
        }
        if self.options.batch_size == 0 {
            return Err(ReconcileError::InvalidBatchSize);
        }

        let transactional = self.options.transactional && !self.options.dry_run;
        if transactional {
            self.executor
                .begin()
                .await
                .map_err(|source| ReconcileError::StoreWrite {
                    table: target.name.clone(),
                    stage: Stage::Begin,
                    source,
                })?;
        }

        let result = self.write_batches(target, plan, new, &mut report).await;

        match result {
            Ok(()) => {
                if transactional {
                    self.executor
                        .commit()
                        .await
                        .map_err(|source| ReconcileError::StoreWrite {
                            table: target.name.clone(),
                            stage: Stage::Commit,
                            source,
                        })?;
                }
            }
            Err(e) => {
                if transactional {
                    if let Err(rollback_err) = self.executor.rollback().await {
                        tracing::warn!(
                            "{}: rollback after failure also failed: {:?}",
                            target.name,
                            rollback_err
                        );
                    }
                }
                return Err(e);
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "{}: {} statements, {} rows affected in {}ms{}",
            target.name,
            report.statements,
            report.rows_affected,
            report.duration_ms,
            if report.dry_run { " (dry run)" } else { "" }
        );
        Ok(report)
    }

    async fn write_batches(
        &mut self,
        target: &TableTarget,
        plan: &ChangePlan,
        new: &Snapshot,
        report: &mut TableReport,
    ) -> Result<(), ReconcileError> {
        let delete_ids = plan.delete_ids();
        let delete_size = effective_batch_size(self.options.batch_size, 1);
        let batches =
            plan_batches(&delete_ids, delete_size).ok_or(ReconcileError::InvalidBatchSize)?;
        let total = batch_count(delete_ids.len(), delete_size);

        for (idx, batch) in batches.enumerate() {
            self.check_cancelled(target)?;
            if let Some(statement) = build_delete(&target.store, &target.id_column, batch) {
                tracing::debug!(
                    "{}: delete batch {}/{} ({} ids)",
                    target.name,
                    idx + 1,
                    total,
                    batch.len()
                );
                self.run(target, Stage::Delete, statement, report).await?;
            }
        }

        let upsert_ids = plan.upsert_ids();
        let params_per_row = new.columns().len() + 1;
        let upsert_size = effective_batch_size(self.options.batch_size, params_per_row);
        if upsert_size < self.options.batch_size {
            tracing::warn!(
                "{}: batch size clamped from {} to {} to stay within {} bind parameters",
                target.name,
                self.options.batch_size,
                upsert_size,
                super::batch::MAX_BIND_PARAMS
            );
        }
        let batches =
            plan_batches(&upsert_ids, upsert_size).ok_or(ReconcileError::InvalidBatchSize)?;
        let total = batch_count(upsert_ids.len(), upsert_size);

        for (idx, batch) in batches.enumerate() {
            self.check_cancelled(target)?;
            let statement = build_upsert(&target.store, new, batch).map_err(|source| {
                ReconcileError::Statement {
                    table: target.name.clone(),
                    source,
                }
            })?;
            if let Some(statement) = statement {
                tracing::debug!(
                    "{}: upsert batch {}/{} ({} rows)",
                    target.name,
                    idx + 1,
                    total,
                    batch.len()
                );
                self.run(target, Stage::Upsert, statement, report).await?;
            }
        }

        Ok(())
    }

    async fn run(
        &self,
        target: &TableTarget,
        stage: Stage,
        statement: Statement,
        report: &mut TableReport,
    ) -> Result<(), ReconcileError> {
        report.statements += 1;

        if self.options.dry_run {
            report.previews.push(statement.preview());
            return Ok(());
        }

        let affected = self
            .executor
            .execute(&statement)
            .await
            .map_err(|source| ReconcileError::StoreWrite {
                table: target.name.clone(),
                stage,
                source,
            })?;
        report.rows_affected += affected;
        Ok(())
    }

    fn check_cancelled(&mut self, target: &TableTarget) -> Result<(), ReconcileError> {
        let Some(shutdown) = self.shutdown.as_mut() else {
            return Ok(());
        };
        match shutdown.try_recv() {
            Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_)) => {
                tracing::warn!("{}: shutdown requested, aborting", target.name);
                Err(ReconcileError::Cancelled {
                    table: target.name.clone(),
                })
            }
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::statement::StatementKind;
    use crate::reconcile::value::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
        fail_on: Option<StatementKind>,
    }

    #[async_trait]
    impl StatementExecutor for Recorder {
        async fn execute(&self, statement: &Statement) -> anyhow::Result<u64> {
            if self.fail_on == Some(statement.kind) {
                anyhow::bail!("simulated failure");
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("{:?}:{}", statement.kind, statement.rows));
            Ok(statement.rows as u64)
        }

        async fn begin(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("BEGIN".into());
            Ok(())
        }

        async fn commit(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("COMMIT".into());
            Ok(())
        }

        async fn rollback(&self) -> anyhow::Result<()> {
            self.log.lock().unwrap().push("ROLLBACK".into());
            Ok(())
        }
    }

    fn target() -> TableTarget {
        TableTarget {
            name: "forex".into(),
            store: TableRef::new("public", "forex"),
            id_column: "asset_id".into(),
            coerce_columns: Vec::new(),
            exclude_columns: Vec::new(),
        }
    }

    fn snapshot(rows: &[(&str, &str)]) -> Snapshot {
        let mut s = Snapshot::new("asset_id", vec!["name".to_string()]);
        for (id, name) in rows {
            s.insert(id.to_string(), vec![Value::text(*name)]).unwrap();
        }
        s
    }

    #[tokio::test]
    async fn test_deletes_run_before_upserts_in_one_transaction() {
        let recorder = Recorder::default();
        let mut reconciler = Reconciler::new(&recorder, ReconcileOptions::default());

        let new = snapshot(&[("fo_EUR", "Euro"), ("fo_USD", "US Dollar")]);
        let old = snapshot(&[("fo_EUR", "Euro"), ("fo_XYZ", "Gone")]);
        let report = reconciler.reconcile_table(&target(), new, old).await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(
            *recorder.log.lock().unwrap(),
            vec!["BEGIN", "Delete:1", "Upsert:1", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let recorder = Recorder {
            fail_on: Some(StatementKind::Upsert),
            ..Default::default()
        };
        let mut reconciler = Reconciler::new(&recorder, ReconcileOptions::default());

        let new = snapshot(&[("fo_USD", "US Dollar")]);
        let old = snapshot(&[("fo_XYZ", "Gone")]);
        let err = reconciler
            .reconcile_table(&target(), new, old)
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Upsert));
        assert_eq!(
            *recorder.log.lock().unwrap(),
            vec!["BEGIN", "Delete:1", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let recorder = Recorder::default();
        let options = ReconcileOptions {
            dry_run: true,
            ..Default::default()
        };
        let mut reconciler = Reconciler::new(&recorder, options);

        let new = snapshot(&[("fo_EUR", "Euro")]);
        let old = snapshot(&[]);
        let report = reconciler.reconcile_table(&target(), new, old).await.unwrap();

        assert!(recorder.log.lock().unwrap().is_empty());
        assert_eq!(report.statements, 1);
        assert!(report.previews[0].contains("('fo_EUR', 'Euro')"));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_before_first_batch() {
        let recorder = Recorder::default();
        let (tx, rx) = broadcast::channel(1);
        let mut reconciler =
            Reconciler::new(&recorder, ReconcileOptions::default()).with_shutdown(rx);
        tx.send(()).unwrap();

        let new = snapshot(&[("fo_EUR", "Euro")]);
        let err = reconciler
            .reconcile_table(&target(), new, snapshot(&[]))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Cancelled { .. }));
        assert_eq!(*recorder.log.lock().unwrap(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let recorder = Recorder::default();
        let options = ReconcileOptions {
            batch_size: 0,
            ..Default::default()
        };
        let mut reconciler = Reconciler::new(&recorder, options);
        let err = reconciler
            .reconcile_table(&target(), snapshot(&[("fo_EUR", "Euro")]), snapshot(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidBatchSize));
    }
}
