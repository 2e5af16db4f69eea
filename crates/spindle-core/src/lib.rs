// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for Spindle.
//!
//! This crate provides the error taxonomy, the task and pool types shared
//! across the workspace, and the [`TaskStore`] trait implemented by the
//! SQLite-backed queue.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{BoxError, SpindleError};
pub use traits::TaskStore;
pub use types::{
    CompleteOutcome, FailOutcome, HealthStatus, PoolStatus, ProcessReport, QueueStats, Task,
    TaskId, TaskStatus, TransactionMode,
};
