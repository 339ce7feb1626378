// ABOUTME: Command implementations for the CLI
// ABOUTME: Exports the reconcile and target commands

pub mod reconcile;
pub mod target;

pub use reconcile::ReconcileArgs;
pub use target::TargetArgs;
