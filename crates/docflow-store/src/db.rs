//! SQLite database handle with WAL mode and sane concurrency pragmas.
//!
//! [`Database`] wraps a `rusqlite::Connection` behind an `Arc<Mutex<>>`
//! and exposes async methods that run on `tokio::task::spawn_blocking`,
//! keeping file I/O off the async runtime. Runs for distinct `run_id`s
//! may be flushed concurrently; WAL plus a busy timeout lets those
//! writers queue instead of failing.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Thread-safe handle to a SQLite database.
///
/// All read/write operations go through [`Database::execute`], which
/// dispatches onto the blocking thread pool.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// Blocks briefly on file I/O — call it during startup, or wrap it in
    /// `spawn_blocking` yourself.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening run-state database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database — used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database and run all pending migrations.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            migration::run_all(&conn)
        })
        .await?
    }

    /// Execute a closure against the connection on the blocking pool.
    ///
    /// This is the only way store code interacts with the database from
    /// async context. The closure receives a `&Connection` and returns a
    /// `StoreResult<T>`.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL: concurrent readers while a run record is being rewritten.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL — at worst the last flush is lost
        // on power failure, never a corrupt file.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        // Concurrent run flushes wait for the write lock instead of
        // failing immediately.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;

        debug!("database pragmas applied (WAL, NORMAL sync, 5s busy timeout)");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
