// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single SQLite connection owned by the pool.
//!
//! Each [`Connection`] wraps a `tokio_rusqlite::Connection`, which runs the
//! underlying `rusqlite::Connection` on its own background thread. Closures
//! passed to [`Connection::call_checked`] execute on that thread, so blocking
//! SQLite calls never stall the async runtime. A connection is only ever
//! reachable through one [`PooledConnection`](crate::pool::PooledConnection)
//! at a time.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use rusqlite::ErrorCode;
use spindle_config::model::StorageConfig;
use spindle_core::SpindleError;
use tracing::{debug, warn};

use crate::migrations;
use crate::pool::PoolShared;

/// Why a connection must leave rotation.
pub(crate) enum Poison {
    /// The engine reported a fatal condition. The operation's own result is
    /// still returned to the caller.
    Fatal(String),
    /// The connection can no longer guarantee a clean state (rollback failed).
    /// The caller sees [`SpindleError::ConnectionUnhealthy`].
    Broken(String),
}

/// The value produced on the worker thread plus any health verdict.
pub(crate) struct Checked<R> {
    pub value: R,
    pub poison: Option<Poison>,
}

impl<R> Checked<R> {
    pub fn new(value: R) -> Self {
        Self {
            value,
            poison: None,
        }
    }

    pub fn broken(value: R, reason: String) -> Self {
        Self {
            value,
            poison: Some(Poison::Broken(reason)),
        }
    }
}

/// Result codes after which a handle is not trusted again.
pub(crate) fn fatal_reason(err: &rusqlite::Error) -> Option<String> {
    match err.sqlite_error_code() {
        Some(
            ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::NotADatabase
            | ErrorCode::CannotOpen,
        ) => Some(format!("fatal storage error: {err}")),
        _ => None,
    }
}

/// Wrap an engine error, flagging lock contention as retryable.
pub(crate) fn storage_error(err: rusqlite::Error) -> SpindleError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => SpindleError::busy(err),
        _ => SpindleError::operation(err),
    }
}

/// Health verdict shared between a connection and its worker thread.
///
/// The worker writes it before the result is handed back, so the verdict
/// stands even when the awaiting caller is gone.
type Verdict = Arc<Mutex<Option<String>>>;

fn read_verdict(verdict: &Verdict) -> Option<String> {
    verdict
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn record_verdict(verdict: &Verdict, connection_id: u64, reason: &str) {
    let mut slot = verdict.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        warn!(connection_id, reason, "connection marked unhealthy");
        *slot = Some(reason.to_string());
    }
}

/// One open handle to the store.
pub struct Connection {
    id: u64,
    handle: tokio_rusqlite::Connection,
    verdict: Verdict,
    in_flight: bool,
    pool: Weak<PoolShared>,
}

impl Connection {
    /// Open a connection, apply pragmas, and optionally bring the schema up to date.
    pub(crate) async fn open(
        id: u64,
        storage: &StorageConfig,
        pool: Weak<PoolShared>,
        migrate: bool,
    ) -> Result<Self, SpindleError> {
        let path = storage.database_path.clone();
        let unavailable = |source: spindle_core::BoxError| SpindleError::StoreUnavailable {
            path: path.clone(),
            source,
        };

        let handle = tokio_rusqlite::Connection::open(&storage.database_path)
            .await
            .map_err(|e| unavailable(Box::new(e)))?;

        let wal_mode = storage.wal_mode;
        let busy_timeout = storage.busy_timeout();
        handle
            .call(move |conn| -> Result<Result<(), SpindleError>, rusqlite::Error> {
                apply_pragmas(conn, wal_mode, busy_timeout)?;
                if migrate {
                    return Ok(migrations::run_migrations(conn));
                }
                Ok(Ok(()))
            })
            .await
            .map_err(|e| unavailable(Box::new(e)))?
            .map_err(|e| unavailable(Box::new(e)))?;

        debug!(connection_id = id, migrate, "connection opened");
        Ok(Self {
            id,
            handle,
            verdict: Arc::new(Mutex::new(None)),
            in_flight: false,
            pool,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_healthy(&self) -> bool {
        self.unhealthy_reason().is_none()
    }

    /// Reason this connection was taken out of rotation, if it was.
    pub fn unhealthy_reason(&self) -> Option<String> {
        read_verdict(&self.verdict)
    }

    /// Take the connection out of rotation. The pool discards it on release.
    pub fn mark_unhealthy(&mut self, reason: &str) {
        record_verdict(&self.verdict, self.id, reason);
    }

    pub(crate) fn pool(&self) -> &Weak<PoolShared> {
        &self.pool
    }

    /// Whether a call was sent to the worker and not seen to finish.
    pub(crate) fn has_call_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Wait until the worker thread has finished every call sent to it.
    pub(crate) async fn settle(&mut self) {
        // Calls run in order, so an empty one completes after all earlier ones.
        let drained = self
            .handle
            .call(|_conn| -> Result<(), rusqlite::Error> { Ok(()) })
            .await;
        if let Err(e) = drained {
            self.mark_unhealthy(&format!("connection worker unavailable: {e}"));
        }
        self.in_flight = false;
    }

    fn unhealthy_error(&self, reason: String) -> SpindleError {
        SpindleError::ConnectionUnhealthy {
            connection_id: self.id,
            reason,
        }
    }

    /// Run `f` on this connection's worker thread.
    ///
    /// After `f` returns, a transaction left open is rolled back so the
    /// connection goes back to the pool in autocommit mode. A failed
    /// discard, a [`Poison::Broken`] verdict, or a dead worker thread marks
    /// the connection unhealthy and yields `ConnectionUnhealthy`. Verdicts
    /// are recorded on the worker thread, so they hold even if this future
    /// is dropped before the call finishes.
    pub(crate) async fn call_checked<F, R>(&mut self, f: F) -> Result<R, SpindleError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Checked<R> + Send + 'static,
        R: Send + 'static,
    {
        if let Some(reason) = self.unhealthy_reason() {
            return Err(self.unhealthy_error(reason));
        }

        let id = self.id;
        let verdict = Arc::clone(&self.verdict);
        self.in_flight = true;
        let outcome = self
            .handle
            .call(move |conn| -> Result<Result<R, String>, rusqlite::Error> {
                // An earlier call may have broken the handle after its caller left.
                if let Some(reason) = read_verdict(&verdict) {
                    return Ok(Err(reason));
                }

                let mut checked = f(conn);
                let broken = matches!(checked.poison, Some(Poison::Broken(_)));
                if !broken && !conn.is_autocommit() {
                    warn!(connection_id = id, "operation left a transaction open; rolling back");
                    if let Err(e) = conn.execute_batch("ROLLBACK") {
                        let reason = format!("could not discard open transaction: {e}");
                        checked.poison = Some(Poison::Broken(reason));
                    }
                }

                match checked.poison {
                    None => Ok(Ok(checked.value)),
                    Some(Poison::Fatal(reason)) => {
                        record_verdict(&verdict, id, &reason);
                        Ok(Ok(checked.value))
                    }
                    Some(Poison::Broken(reason)) => {
                        record_verdict(&verdict, id, &reason);
                        Ok(Err(reason))
                    }
                }
            })
            .await;
        self.in_flight = false;

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(self.unhealthy_error(reason)),
            Err(e) => {
                let reason = format!("connection worker unavailable: {e}");
                self.mark_unhealthy(&reason);
                Err(self.unhealthy_error(reason))
            }
        }
    }

    /// Run a single operation. Engine errors come back as `OperationFailed`.
    pub async fn call<F, R>(&mut self, f: F) -> Result<R, SpindleError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.call_checked(move |conn| {
            let result = f(conn);
            let poison = result.as_ref().err().and_then(fatal_reason).map(Poison::Fatal);
            Checked {
                value: result,
                poison,
            }
        })
        .await?
        .map_err(storage_error)
    }

    /// Fold the write-ahead log back into the main database file.
    pub(crate) async fn checkpoint(&mut self) -> Result<(), SpindleError> {
        self.call(|conn| conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);"))
            .await
    }

    /// Close the native handle, logging rather than failing on error.
    pub(crate) async fn close(self) {
        let id = self.id;
        match self.handle.close().await {
            Ok(()) => debug!(connection_id = id, "connection closed"),
            Err(e) => warn!(connection_id = id, error = %e, "error closing connection"),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("unhealthy", &self.unhealthy_reason())
            .finish_non_exhaustive()
    }
}

/// Apply the pragmas every pooled connection runs with.
fn apply_pragmas(
    conn: &rusqlite::Connection,
    wal_mode: bool,
    busy_timeout: Duration,
) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    if wal_mode {
        // journal_mode answers with the resulting mode, so it must be read back.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage_config(path: &std::path::Path) -> StorageConfig {
        StorageConfig {
            database_path: path.to_string_lossy().into_owned(),
            wal_mode: true,
            busy_timeout_ms: 1_000,
        }
    }

    async fn open_migrated(dir: &tempfile::TempDir) -> Connection {
        let config = storage_config(&dir.path().join("conn.db"));
        Connection::open(1, &config, Weak::new(), true).await.unwrap()
    }

    #[tokio::test]
    async fn open_applies_wal_and_schema() {
        let dir = tempdir().unwrap();
        let mut conn = open_migrated(&dir).await;

        let mode: String = conn
            .call(|c| c.pragma_query_value(None, "journal_mode", |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let tables: i64 = conn
            .call(|c| {
                c.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tasks'",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[tokio::test]
    async fn open_fails_for_unreachable_path() {
        let dir = tempdir().unwrap();
        let config = storage_config(&dir.path().join("missing").join("nested").join("x.db"));
        let err = Connection::open(1, &config, Weak::new(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn sql_errors_are_operation_failures_and_keep_connection_healthy() {
        let dir = tempdir().unwrap();
        let mut conn = open_migrated(&dir).await;

        let err = conn
            .call(|c| c.execute("INSERT INTO no_such_table VALUES (1)", []))
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::OperationFailed { .. }));
        assert!(conn.is_healthy());
    }

    #[tokio::test]
    async fn lock_contention_is_retryable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.db");
        let mut config = storage_config(&path);
        config.busy_timeout_ms = 50;
        let mut conn = Connection::open(1, &config, Weak::new(), true).await.unwrap();

        let holder = rusqlite::Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let err = conn
            .call(|c| c.execute("INSERT INTO tasks (name) VALUES ('blocked')", []))
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::OperationFailed { busy: true, .. }));
        assert!(err.is_retryable());
        assert!(conn.is_healthy());

        holder.execute_batch("ROLLBACK;").unwrap();
        let err = conn
            .call(|c| c.execute("INSERT INTO no_such_table VALUES (1)", []))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn leftover_transaction_is_rolled_back() {
        let dir = tempdir().unwrap();
        let mut conn = open_migrated(&dir).await;

        conn.call(|c| c.execute_batch("BEGIN; INSERT INTO tasks (name) VALUES ('orphan');"))
            .await
            .unwrap();

        assert!(conn.is_healthy());
        let count: i64 = conn
            .call(|c| c.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 0, "uncommitted insert must not persist");
        let autocommit = conn.call(|c| Ok(c.is_autocommit())).await.unwrap();
        assert!(autocommit);
    }

    #[tokio::test]
    async fn unhealthy_connection_refuses_work() {
        let dir = tempdir().unwrap();
        let mut conn = open_migrated(&dir).await;
        conn.mark_unhealthy("test");

        let err = conn.call(|c| c.execute_batch("SELECT 1")).await.unwrap_err();
        assert!(matches!(
            err,
            SpindleError::ConnectionUnhealthy { connection_id: 1, .. }
        ));
        assert_eq!(conn.unhealthy_reason().as_deref(), Some("test"));
    }
}
