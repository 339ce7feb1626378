// ABOUTME: Snapshot reconciliation engine - decides and applies insert/update/delete sets
// ABOUTME: Pure diffing lives in value/snapshot/normalize/detect/classify; engine drives writes

pub mod batch;
pub mod classify;
pub mod detect;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod snapshot;
pub mod statement;
pub mod value;

pub use batch::{plan_batches, DEFAULT_BATCH_SIZE};
pub use classify::{classify, ChangePlan};
pub use detect::{cell_changed, changed_identifiers, diff_rows, RowDiff};
pub use engine::{ReconcileOptions, Reconciler, StatementExecutor, TableReport, TableTarget};
pub use error::{ReconcileError, Stage};
pub use normalize::{align, AlignedPair, ShapeMismatch};
pub use snapshot::{Snapshot, SnapshotError};
pub use statement::{build_delete, build_upsert, Statement, StatementKind, TableRef};
pub use value::Value;
