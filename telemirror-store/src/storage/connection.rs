//! Scoped SQLite connections.
//!
//! Every store operation opens its own connection, runs, and hands the
//! connection back. There is no pool: traffic is low-frequency administrative
//! work, and SQLite's write-ahead log already lets readers proceed while a
//! writer holds the lock. Writers from other processes are serialized by
//! SQLite itself, waiting at most the configured busy timeout.

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Opens connections to one database file.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    path: PathBuf,
    busy_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            path: config.db_path(),
            busy_timeout: config.busy_timeout(),
        }
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against a fresh connection in write-ahead-log mode.
    ///
    /// Whatever `f` returns, and also when it panics, any transaction left
    /// open on the connection is committed and the connection is closed before
    /// control returns. Transactions started through
    /// [`Connection::transaction`] roll themselves back when dropped on an
    /// error path, so only explicit `BEGIN` statements are affected.
    ///
    /// Failing to open or configure the connection is reported as
    /// [`StoreError::Unavailable`] and is never retried.
    pub fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut scoped = self.open()?;
        f(scoped.connection())
    }

    fn open(&self) -> StoreResult<ScopedConnection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| StoreError::unavailable(&self.path, e))?;

        // From here on the guard owns the handle, so a failed pragma still
        // closes it.
        let mut scoped = ScopedConnection {
            conn: Some(conn),
            path: self.path.clone(),
        };
        scoped
            .configure(self.busy_timeout)
            .map_err(|e| StoreError::unavailable(&self.path, e))?;
        Ok(scoped)
    }
}

/// A connection that commits and closes itself when dropped.
struct ScopedConnection {
    conn: Option<Connection>,
    path: PathBuf,
}

impl ScopedConnection {
    fn connection(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("connection is only taken in drop")
    }

    fn configure(&mut self, busy_timeout: Duration) -> rusqlite::Result<()> {
        let path = self.path.clone();
        let conn = self.connection();
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(path = %path.display(), mode = %mode, "write-ahead log not available");
        }
        conn.busy_timeout(busy_timeout)?;
        Ok(())
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("COMMIT") {
                warn!(path = %self.path.display(), error = %e, "commit on release failed");
            }
        }
        match conn.close() {
            Ok(()) => debug!(path = %self.path.display(), "connection closed"),
            Err((_, e)) => warn!(path = %self.path.display(), error = %e, "close failed"),
        }
    }
}
