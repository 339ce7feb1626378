// ABOUTME: Library root for refdata-reconciler
// ABOUTME: Snapshot reconciliation of reference data tables into PostgreSQL

pub mod commands;
pub mod config;
pub mod fetch;
pub mod reconcile;
pub mod runner;
pub mod state;
pub mod store;
pub mod utils;
