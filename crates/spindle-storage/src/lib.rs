// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Non-blocking access layer over SQLite.
//!
//! - [`BlockingBridge`] runs synchronous work on Tokio's blocking pool with
//!   a bound on how much runs at once.
//! - [`ConnectionPool`] lends a fixed set of WAL-mode connections to
//!   concurrent callers in arrival order.
//! - [`with_transaction`] runs an all-or-nothing unit of work on one
//!   borrowed connection.
//! - [`TaskQueue`] stores tasks and records their outcomes exactly once.

pub mod adapter;
pub mod bridge;
pub mod connection;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod queue;
pub mod transaction;

pub use adapter::SqliteTaskStore;
pub use bridge::{BlockingBridge, BridgeHandle};
pub use connection::Connection;
pub use models::*;
pub use pool::{ConnectionPool, PooledConnection};
pub use queue::TaskQueue;
pub use transaction::with_transaction;
