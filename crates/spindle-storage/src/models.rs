// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row mapping for storage entities.
//!
//! The canonical types live in `spindle-core::types` so they can cross the
//! [`TaskStore`](spindle_core::TaskStore) boundary. Columns are read by name,
//! so queries may select them in any order.

use std::str::FromStr;

use rusqlite::Row;
use rusqlite::types::Type;

pub use spindle_core::types::{QueueStats, Task, TaskId, TaskStatus};

/// Columns selected by every task query, in declaration order.
pub(crate) const TASK_COLUMNS: &str =
    "id, name, status, result, attempts, max_attempts, last_error, created_at, completed_at";

/// Build a [`Task`] from a row carrying [`TASK_COLUMNS`].
pub fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        name: row.get("name")?,
        status: status_from_row(row)?,
        result: row.get("result")?,
        attempts: row.get("attempts")?,
        max_attempts: row.get("max_attempts")?,
        last_error: row.get("last_error")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn status_from_row(row: &Row<'_>) -> rusqlite::Result<TaskStatus> {
    let raw: String = row.get("status")?;
    TaskStatus::from_str(&raw).map_err(|e| {
        let index = row.as_ref().column_index("status").unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e))
    })
}
