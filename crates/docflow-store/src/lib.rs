//! # docflow-store
//!
//! Persistence layer for docflow.
//!
//! Provides a SQLite-backed [`Database`] handle (WAL mode, all access via
//! the blocking thread pool) and the [`RunStore`], which keeps one durable
//! record per workflow run. The engine flushes the record on every step
//! transition, so an observer can always see a run's last known step even
//! while a slow handler is still executing.

pub mod db;
pub mod error;
pub mod migration;
pub mod run_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use run_store::{RunStatus, RunStore, WorkflowRun};
