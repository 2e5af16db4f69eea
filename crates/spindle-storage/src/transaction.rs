// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! All-or-nothing units of work on a pooled connection.
//!
//! The whole transaction, from `BEGIN` to `COMMIT` or `ROLLBACK`, runs inside
//! one closure on the connection's worker thread. No other caller can
//! interleave statements, and the connection is back in autocommit mode
//! before it can be released.

use rusqlite::TransactionBehavior;
use spindle_core::{SpindleError, TransactionMode};
use tracing::debug;

use crate::connection::{Checked, Poison, fatal_reason, storage_error};
use crate::pool::PooledConnection;

enum TxOutcome<T> {
    Committed(T),
    BeginFailed(rusqlite::Error),
    CommitFailed(rusqlite::Error),
    RolledBack(rusqlite::Error),
}

fn behavior(mode: TransactionMode) -> TransactionBehavior {
    match mode {
        TransactionMode::Deferred => TransactionBehavior::Deferred,
        TransactionMode::Immediate => TransactionBehavior::Immediate,
        TransactionMode::Exclusive => TransactionBehavior::Exclusive,
    }
}

/// Run `body` inside a transaction on `conn`.
///
/// - `body` succeeds and the commit succeeds: its value is returned.
/// - `body` fails: the transaction is rolled back and the failure comes
///   back as [`SpindleError::TransactionAborted`].
/// - `BEGIN` or `COMMIT` fails: [`SpindleError::OperationFailed`]; a failed
///   commit is rolled back.
/// - The rollback itself fails: the connection is marked unhealthy and the
///   caller gets [`SpindleError::ConnectionUnhealthy`].
///
/// Application errors can leave `body` as
/// `rusqlite::Error::ToSqlConversionFailure(Box::new(err))`.
///
/// Use [`TransactionMode::Immediate`] for read-then-write bodies so that
/// concurrent writers queue on the busy timeout instead of failing with
/// `SQLITE_BUSY` at upgrade time.
pub async fn with_transaction<F, T>(
    conn: &mut PooledConnection,
    mode: TransactionMode,
    body: F,
) -> Result<T, SpindleError>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let connection_id = conn.id();
    let outcome = conn
        .connection_mut()
        .call_checked(move |raw| {
            let tx = match raw.transaction_with_behavior(behavior(mode)) {
                Ok(tx) => tx,
                Err(e) => return flag(Checked::new(TxOutcome::BeginFailed(e))),
            };

            match body(&tx) {
                Ok(value) => match tx.commit() {
                    Ok(()) => Checked::new(TxOutcome::Committed(value)),
                    Err(e) => flag(Checked::new(TxOutcome::CommitFailed(e))),
                },
                Err(body_err) => match tx.rollback() {
                    Ok(()) => flag(Checked::new(TxOutcome::RolledBack(body_err))),
                    Err(rollback_err) => {
                        let reason =
                            format!("rollback failed ({rollback_err}) after: {body_err}");
                        Checked::broken(TxOutcome::RolledBack(body_err), reason)
                    }
                },
            }
        })
        .await?;

    match outcome {
        TxOutcome::Committed(value) => {
            debug!(connection_id, %mode, "transaction committed");
            Ok(value)
        }
        TxOutcome::BeginFailed(e) | TxOutcome::CommitFailed(e) => Err(storage_error(e)),
        TxOutcome::RolledBack(e) => {
            debug!(connection_id, %mode, error = %e, "transaction rolled back");
            Err(SpindleError::TransactionAborted {
                source: Box::new(storage_error(e)),
            })
        }
    }
}

/// Mark the connection for discard when the failure is a fatal engine error.
fn flag<T>(mut checked: Checked<TxOutcome<T>>) -> Checked<TxOutcome<T>> {
    if let TxOutcome::BeginFailed(e) | TxOutcome::CommitFailed(e) | TxOutcome::RolledBack(e) =
        &checked.value
    {
        checked.poison = fatal_reason(e).map(Poison::Fatal);
    }
    checked
}
