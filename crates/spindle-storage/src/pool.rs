// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-size pool of SQLite connections.
//!
//! Admission is a fair [`Semaphore`] sized to the pool: one permit per
//! connection, handed to waiters in arrival order. Bookkeeping (idle
//! connections, borrowed count, vacant slots) lives behind a synchronous
//! mutex that is never held across an `.await`.
//!
//! A connection found unhealthy on release is dropped and its slot becomes
//! vacant. The next borrower of that slot opens a fresh connection, so the
//! pool heals without a background task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use spindle_config::model::{PoolConfig, StorageConfig};
use spindle_core::{HealthStatus, PoolStatus, SpindleError, TransactionMode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::transaction;

/// State shared between the pool handle and every borrowed connection.
pub(crate) struct PoolShared {
    storage: StorageConfig,
    size: usize,
    acquire_timeout: Option<Duration>,
    shutdown_timeout: Duration,
    transaction_mode: TransactionMode,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    waiting: AtomicUsize,
    next_id: AtomicU64,
}

struct PoolState {
    idle: VecDeque<Connection>,
    in_use: usize,
    vacant: usize,
    closed: bool,
}

impl PoolShared {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Take a connection back from a borrower.
    fn check_in(&self, conn: Connection) {
        let mut state = self.lock_state();
        debug_assert!(state.in_use > 0, "release without a matching acquire");
        state.in_use = state.in_use.saturating_sub(1);

        if state.closed {
            debug!(connection_id = conn.id(), "connection released after pool close");
            return;
        }

        if let Some(reason) = conn.unhealthy_reason() {
            warn!(connection_id = conn.id(), %reason, "discarding unhealthy connection");
            state.vacant += 1;
            return;
        }

        debug_assert!(
            state.idle.iter().all(|c| c.id() != conn.id()),
            "connection {} released twice",
            conn.id()
        );
        state.idle.push_back(conn);
    }
}

/// Counts a task in the admission queue for as long as it lives.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A vacant slot claimed by an acquirer that is reopening it.
///
/// If the reopen fails or the acquiring future is dropped, the slot goes
/// back to vacant.
struct VacantClaim<'a> {
    shared: &'a PoolShared,
    armed: bool,
}

impl VacantClaim<'_> {
    fn fulfil(mut self) {
        self.armed = false;
    }
}

impl Drop for VacantClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.lock_state();
            state.in_use = state.in_use.saturating_sub(1);
            if !state.closed {
                state.vacant += 1;
            }
        }
    }
}

/// A bounded set of connections to one SQLite database.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Open `pool.size` connections eagerly and run migrations on the first.
    ///
    /// Fails with [`SpindleError::StoreUnavailable`] if any connection
    /// cannot be opened; connections opened so far are dropped.
    pub async fn open(storage: &StorageConfig, pool: &PoolConfig) -> Result<Self, SpindleError> {
        if pool.size == 0 {
            return Err(SpindleError::Config(
                "pool size must be at least 1".to_string(),
            ));
        }

        let shared = Arc::new(PoolShared {
            storage: storage.clone(),
            size: pool.size,
            acquire_timeout: pool.acquire_timeout(),
            shutdown_timeout: pool.shutdown_timeout(),
            transaction_mode: pool.transaction_mode,
            permits: Arc::new(Semaphore::new(pool.size)),
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(pool.size),
                in_use: 0,
                vacant: 0,
                closed: false,
            }),
            waiting: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        });

        let mut idle = VecDeque::with_capacity(pool.size);
        for index in 0..pool.size {
            let conn = Connection::open(
                shared.next_connection_id(),
                storage,
                Arc::downgrade(&shared),
                index == 0,
            )
            .await?;
            idle.push_back(conn);
        }
        shared.lock_state().idle = idle;

        info!(
            path = %storage.database_path,
            size = pool.size,
            wal = storage.wal_mode,
            "connection pool opened"
        );
        Ok(Self { shared })
    }

    /// Borrow a connection, waiting at most the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection, SpindleError> {
        self.acquire_within(self.shared.acquire_timeout).await
    }

    /// Borrow a connection, waiting at most `timeout`.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection, SpindleError> {
        self.acquire_within(Some(timeout)).await
    }

    async fn acquire_within(
        &self,
        timeout: Option<Duration>,
    ) -> Result<PooledConnection, SpindleError> {
        let shared = &*self.shared;
        if shared.lock_state().closed {
            return Err(SpindleError::PoolClosed);
        }

        let started = Instant::now();
        let permit = {
            let _waiting = WaitingGuard::enter(&shared.waiting);
            let admission = Arc::clone(&shared.permits).acquire_owned();
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, admission).await {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!(waited_ms = limit.as_millis() as u64, "pool acquire timed out");
                        return Err(SpindleError::PoolExhausted {
                            waited: limit,
                            size: shared.size,
                        });
                    }
                },
                None => admission.await,
            }
        }
        .map_err(|_| SpindleError::PoolClosed)?;

        let (idle, claim) = {
            let mut state = shared.lock_state();
            if state.closed {
                return Err(SpindleError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop_front() {
                state.in_use += 1;
                (Some(conn), None)
            } else if state.vacant > 0 {
                state.vacant -= 1;
                state.in_use += 1;
                (
                    None,
                    Some(VacantClaim {
                        shared,
                        armed: true,
                    }),
                )
            } else {
                return Err(SpindleError::Internal(
                    "pool admitted a borrower with no connection available".to_string(),
                ));
            }
        };

        let conn = match (idle, claim) {
            (Some(conn), _) => conn,
            (None, Some(claim)) => {
                let conn = Connection::open(
                    shared.next_connection_id(),
                    &shared.storage,
                    Arc::downgrade(&self.shared),
                    false,
                )
                .await
                .inspect_err(|e| warn!(error = %e, "failed to reopen vacant pool slot"))?;
                claim.fulfil();
                info!(connection_id = conn.id(), "reopened connection for vacant slot");
                conn
            }
            (None, None) => {
                return Err(SpindleError::Internal(
                    "pool slot vanished during acquire".to_string(),
                ));
            }
        };

        debug!(
            connection_id = conn.id(),
            waited_us = started.elapsed().as_micros() as u64,
            "connection acquired"
        );
        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            transaction_mode: shared.transaction_mode,
        })
    }

    /// Hand a connection back to the pool.
    ///
    /// Equivalent to dropping the guard. Releasing into a closed pool closes
    /// the connection instead.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Close the pool.
    ///
    /// New acquires fail with [`SpindleError::PoolClosed`] immediately.
    /// Borrowed connections are given up to the shutdown timeout to come
    /// back; after that, remaining waiters are woken with `PoolClosed` and
    /// idle connections are closed. Calling `close` again is a no-op.
    pub async fn close(&self) {
        let shared = &*self.shared;
        {
            let mut state = shared.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        let size = u32::try_from(shared.size).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(
            shared.shutdown_timeout,
            Arc::clone(&shared.permits).acquire_many_owned(size),
        )
        .await;
        if drained.is_err() {
            let in_use = shared.lock_state().in_use;
            warn!(
                in_use,
                timeout_ms = shared.shutdown_timeout.as_millis() as u64,
                "closing pool with connections still borrowed"
            );
        }
        shared.permits.close();

        let idle: Vec<Connection> = shared.lock_state().idle.drain(..).collect();
        let mut idle = idle.into_iter();
        if let Some(mut first) = idle.next() {
            if shared.storage.wal_mode
                && let Err(e) = first.checkpoint().await
            {
                warn!(error = %e, "WAL checkpoint on close failed");
            }
            first.close().await;
        }
        for conn in idle {
            conn.close().await;
        }

        info!(path = %shared.storage.database_path, "connection pool closed");
    }

    /// Snapshot of the pool's bookkeeping.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock_state();
        PoolStatus {
            size: self.shared.size,
            idle: state.idle.len(),
            in_use: state.in_use,
            vacant: state.vacant,
            waiting: self.shared.waiting.load(Ordering::Relaxed),
            closed: state.closed,
        }
    }

    /// Probe the store through a pooled connection.
    ///
    /// Reports `Degraded` while discarded connections have not been replaced.
    pub async fn health_check(&self) -> Result<HealthStatus, SpindleError> {
        if self.is_closed() {
            return Ok(HealthStatus::Unhealthy("pool is closed".to_string()));
        }

        let mut conn = self.acquire().await?;
        if let Err(e) = conn.call(|c| c.execute_batch("SELECT 1;")).await {
            return Ok(HealthStatus::Unhealthy(e.to_string()));
        }
        drop(conn);

        let status = self.status();
        if status.vacant > 0 {
            return Ok(HealthStatus::Degraded(format!(
                "{} of {} connections awaiting replacement",
                status.vacant, status.size
            )));
        }
        Ok(HealthStatus::Healthy)
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed
    }

    /// Default mode for [`PooledConnection::transaction`].
    pub fn transaction_mode(&self) -> TransactionMode {
        self.shared.transaction_mode
    }

    pub fn database_path(&self) -> &str {
        &self.shared.storage.database_path
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("path", &self.shared.storage.database_path)
            .field("status", &self.status())
            .finish()
    }
}

/// A connection on loan from a [`ConnectionPool`].
///
/// Dropping the guard returns the connection. Because release consumes the
/// guard, a connection cannot be handed back twice.
pub struct PooledConnection {
    conn: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
    transaction_mode: TransactionMode,
}

impl PooledConnection {
    pub(crate) fn connection_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .expect("pooled connection is present until drop")
    }

    fn connection(&self) -> &Connection {
        self.conn
            .as_ref()
            .expect("pooled connection is present until drop")
    }

    pub fn id(&self) -> u64 {
        self.connection().id()
    }

    pub fn is_healthy(&self) -> bool {
        self.connection().is_healthy()
    }

    /// Flag the connection so the pool discards it on release.
    pub fn mark_unhealthy(&mut self, reason: &str) {
        self.connection_mut().mark_unhealthy(reason);
    }

    /// Run one operation on the connection's worker thread.
    pub async fn call<F, R>(&mut self, f: F) -> Result<R, SpindleError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.connection_mut().call(f).await
    }

    /// Run `body` in a transaction using the pool's default mode.
    pub async fn transaction<F, T>(&mut self, body: F) -> Result<T, SpindleError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mode = self.transaction_mode;
        transaction::with_transaction(self, mode, body).await
    }

    /// Return the connection to its pool. Same as dropping the guard.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let permit = self.permit.take();
        let Some(mut conn) = self.conn.take() else {
            return;
        };

        // A caller cancelled mid-call leaves work running on the worker thread.
        // The slot stays taken until that work ends and its verdict is known.
        if conn.has_call_in_flight()
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            debug!(connection_id = conn.id(), "release deferred until in-flight call ends");
            runtime.spawn(async move {
                conn.settle().await;
                return_to_pool(conn);
                drop(permit);
            });
            return;
        }

        return_to_pool(conn);
        // The permit goes last so the next waiter finds the connection idle.
        drop(permit);
    }
}

fn return_to_pool(conn: Connection) {
    match conn.pool().upgrade() {
        Some(shared) => shared.check_in(conn),
        None => debug!(connection_id = conn.id(), "pool gone before release"),
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .field("transaction_mode", &self.transaction_mode)
            .finish()
    }
}
