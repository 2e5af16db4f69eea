// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the storage layer, the configuration, and the binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Identifier assigned to a task by the store at insertion.
pub type TaskId = i64;

/// Lifecycle state of a persisted task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Enqueued and waiting to be processed.
    Pending,
    /// Processed; `result` is set.
    Completed,
    /// Every allowed processing attempt failed.
    Failed,
}

impl TaskStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A persisted work item, mapped from a `tasks` row by column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    /// ISO 8601 UTC timestamp, millisecond precision.
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl Task {
    /// Parsed creation time, if the stored timestamp is well-formed.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.created_at)
    }

    /// Parsed completion time.
    pub fn completed_at_utc(&self) -> Option<DateTime<Utc>> {
        self.completed_at.as_deref().and_then(parse_timestamp)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Aggregate counts over the task ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: u64,
    pub pending: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Result of marking a task complete.
///
/// Only `Completed` changed the row; the other outcomes are benign no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompleteOutcome {
    /// The task moved from `pending` to `completed`.
    Completed,
    /// The task was already completed; its first result is kept.
    AlreadyCompleted,
    /// The task exhausted its attempts and is `failed`.
    NotPending,
    /// No task has this id.
    NotFound,
}

/// Result of recording a failed processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailOutcome {
    /// Attempt recorded; the task stays `pending` and will be retried.
    Retrying { attempts: u32 },
    /// Attempt recorded; the task reached `max_attempts` and is now `failed`.
    Exhausted { attempts: u32 },
    /// The task is already terminal; nothing changed.
    NotPending,
    /// No task has this id.
    NotFound,
}

/// Summary of one `process_pending` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    /// Tasks whose handler succeeded and whose completion was recorded.
    pub completed: Vec<TaskId>,
    /// Tasks whose handler failed and will be retried.
    pub retrying: Vec<TaskId>,
    /// Tasks whose handler failed on their last allowed attempt.
    pub exhausted: Vec<TaskId>,
    /// Tasks another consumer finished first.
    pub skipped: Vec<TaskId>,
}

impl ProcessReport {
    /// Number of tasks this pass looked at.
    pub fn processed(&self) -> usize {
        self.completed.len() + self.retrying.len() + self.exhausted.len() + self.skipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed() == 0
    }
}

/// Point-in-time view of connection pool bookkeeping.
///
/// `idle + in_use + vacant == size` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    /// Slots whose connection was discarded as unhealthy and not yet reopened.
    pub vacant: usize,
    /// Callers currently queued in `acquire`.
    pub waiting: usize,
    pub closed: bool,
}

/// Health status reported by health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational but running below capacity.
    Degraded(String),
    /// Not operational.
    Unhealthy(String),
}

/// How a transaction acquires SQLite's write lock.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Lock taken lazily by the first statement that needs it.
    #[default]
    Deferred,
    /// Write lock taken at `BEGIN`.
    Immediate,
    /// Exclusive lock taken at `BEGIN`.
    Exclusive,
}
