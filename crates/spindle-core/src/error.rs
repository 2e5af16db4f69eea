// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Spindle storage access layer.

use std::time::Duration;

use thiserror::Error;

/// Boxed error used to carry storage-engine failures without depending on the engine crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type used across the pool, bridge, transaction, and queue layers.
#[derive(Debug, Error)]
pub enum SpindleError {
    /// Configuration errors (invalid TOML, out-of-range values).
    #[error("configuration error: {0}")]
    Config(String),

    /// The store could not be opened or migrated. Fatal at pool initialization.
    #[error("store unavailable at {path}: {source}")]
    StoreUnavailable { path: String, source: BoxError },

    /// `acquire` waited past its deadline without a connection becoming free.
    #[error("connection pool exhausted: no connection freed within {waited:?} (pool size {size})")]
    PoolExhausted { waited: Duration, size: usize },

    /// The pool has been shut down; no further connections are handed out.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A connection failed mid-operation or during rollback and was taken out of rotation.
    #[error("connection {connection_id} is unhealthy: {reason}")]
    ConnectionUnhealthy { connection_id: u64, reason: String },

    /// The underlying storage call failed (constraint violation, syntax error, busy, ...).
    ///
    /// `busy` is set when the engine reported lock contention.
    #[error("storage operation failed: {source}")]
    OperationFailed { source: BoxError, busy: bool },

    /// A transaction body failed and its changes were rolled back.
    #[error("transaction aborted and rolled back: {source}")]
    TransactionAborted { source: Box<SpindleError> },

    /// No task exists with the given identifier.
    #[error("task {id} not found")]
    TaskNotFound { id: i64 },

    /// A bridged blocking operation panicked on its worker thread.
    #[error("blocking worker panicked: {0}")]
    WorkerPanicked(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SpindleError {
    /// Wrap an engine error as [`SpindleError::OperationFailed`].
    pub fn operation(source: impl Into<BoxError>) -> Self {
        Self::OperationFailed {
            source: source.into(),
            busy: false,
        }
    }

    /// Wrap an engine error that was caused by lock contention.
    pub fn busy(source: impl Into<BoxError>) -> Self {
        Self::OperationFailed {
            source: source.into(),
            busy: true,
        }
    }

    /// Whether a caller may reasonably retry the whole operation later.
    ///
    /// Pool exhaustion and lock contention are transient. Nothing in this
    /// crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } => true,
            Self::OperationFailed { busy, .. } => *busy,
            Self::TransactionAborted { source } => source.is_retryable(),
            _ => false,
        }
    }

    /// The innermost error, looking through [`SpindleError::TransactionAborted`].
    pub fn root(&self) -> &SpindleError {
        match self {
            Self::TransactionAborted { source } => source.root(),
            other => other,
        }
    }
}
