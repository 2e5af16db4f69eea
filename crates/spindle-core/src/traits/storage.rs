// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task store trait: the surface the queue exposes to outer collaborators.

use async_trait::async_trait;

use crate::error::SpindleError;
use crate::types::{
    CompleteOutcome, FailOutcome, HealthStatus, QueueStats, Task, TaskId,
};

/// A durable, concurrently accessible task ledger.
///
/// Producers call [`enqueue`](TaskStore::enqueue); consumers read
/// [`list_pending`](TaskStore::list_pending), do the work, and record the
/// outcome with [`complete`](TaskStore::complete) or [`fail`](TaskStore::fail).
/// Processing is at-least-once: a task whose outcome was never recorded is
/// handed out again.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Inserts a new pending task and returns its store-assigned id.
    async fn enqueue(&self, name: &str) -> Result<TaskId, SpindleError>;

    /// Moves one pending task to `completed`, recording `result`.
    async fn complete(&self, id: TaskId, result: &str) -> Result<CompleteOutcome, SpindleError>;

    /// Records a failed processing attempt.
    async fn fail(&self, id: TaskId, error: &str) -> Result<FailOutcome, SpindleError>;

    /// Snapshot of pending tasks in creation order.
    async fn list_pending(&self) -> Result<Vec<Task>, SpindleError>;

    /// Fetches one task by id.
    async fn get(&self, id: TaskId) -> Result<Task, SpindleError>;

    /// Aggregate counts by status.
    async fn stats(&self) -> Result<QueueStats, SpindleError>;

    /// Verifies the backing store answers queries.
    async fn health_check(&self) -> Result<HealthStatus, SpindleError>;

    /// Releases the backing store. Further calls fail.
    async fn close(&self) -> Result<(), SpindleError>;
}
