// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `spindle stats` and `spindle pending` command implementations.
//!
//! Print queue counts and the pending task list, either as a human-readable
//! table or, with `--json`, as structured output for scripting.

use std::io::IsTerminal;

use serde::Serialize;
use spindle_core::{PoolStatus, QueueStats, SpindleError, Task};
use spindle_storage::TaskQueue;

/// Structured stats output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub database_path: String,
    pub tasks: QueueStats,
    pub pool: PoolStatus,
}

/// Run the `spindle stats` command.
pub async fn run_stats(queue: &TaskQueue, json: bool, plain: bool) -> Result<(), SpindleError> {
    let response = StatsResponse {
        database_path: queue.pool().database_path().to_string(),
        tasks: queue.stats().await?,
        pool: queue.pool().status(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| "{}".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print!("{}", render_stats(&response, use_color));
    }
    Ok(())
}

/// Run the `spindle pending` command.
pub async fn run_pending(queue: &TaskQueue, json: bool, plain: bool) -> Result<(), SpindleError> {
    let pending = queue.list_pending().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&pending).unwrap_or_else(|_| "[]".to_string())
        );
    } else {
        let use_color = !plain && std::io::stdout().is_terminal();
        print!("{}", render_pending(&pending, use_color));
    }
    Ok(())
}

fn render_stats(response: &StatsResponse, use_color: bool) -> String {
    let tasks = &response.tasks;
    let mut out = String::new();
    out.push_str("\n  spindle stats\n");
    out.push_str(&format!("  {}\n", "-".repeat(35)));
    out.push_str(&format!("    Database:  {}\n", response.database_path));
    out.push_str(&format!("    Total:     {}\n", tasks.total));

    if use_color {
        use colored::Colorize;
        out.push_str(&format!(
            "    Pending:   {}\n",
            tasks.pending.to_string().yellow()
        ));
        out.push_str(&format!(
            "    Completed: {}\n",
            tasks.completed.to_string().green()
        ));
        out.push_str(&format!("    Failed:    {}\n", tasks.failed.to_string().red()));
    } else {
        out.push_str(&format!("    Pending:   {}\n", tasks.pending));
        out.push_str(&format!("    Completed: {}\n", tasks.completed));
        out.push_str(&format!("    Failed:    {}\n", tasks.failed));
    }

    out.push_str(&format!("    Pool size: {}\n\n", response.pool.size));
    out
}

fn render_pending(tasks: &[Task], use_color: bool) -> String {
    if tasks.is_empty() {
        return "  No pending tasks.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("\n  {:>6}  {:<24} {:>8}  {}\n", "ID", "NAME", "ATTEMPTS", "CREATED"));
    for task in tasks {
        let attempts = format!("{}/{}", task.attempts, task.max_attempts);
        let attempts = if use_color && task.attempts > 0 {
            use colored::Colorize;
            attempts.yellow().to_string()
        } else {
            attempts
        };
        out.push_str(&format!(
            "  {:>6}  {:<24} {:>8}  {}\n",
            task.id, task.name, attempts, task.created_at
        ));
    }
    out.push_str(&format!("\n  {} pending\n\n", tasks.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_core::TaskStatus;

    fn pending_task(id: i64, name: &str) -> Task {
        Task {
            id,
            name: name.to_string(),
            status: TaskStatus::Pending,
            result: None,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            completed_at: None,
        }
    }

    fn sample_response() -> StatsResponse {
        StatsResponse {
            database_path: "/tmp/spindle.db".to_string(),
            tasks: QueueStats {
                total: 5,
                pending: 2,
                completed: 3,
                failed: 0,
            },
            pool: PoolStatus {
                size: 4,
                idle: 4,
                in_use: 0,
                vacant: 0,
                waiting: 0,
                closed: false,
            },
        }
    }

    #[test]
    fn stats_render_plain() {
        let out = render_stats(&sample_response(), false);
        assert!(out.contains("Total:     5"));
        assert!(out.contains("Pending:   2"));
        assert!(out.contains("Completed: 3"));
        assert!(out.contains("Pool size: 4"));
    }

    #[test]
    fn stats_response_serializes() {
        let json = serde_json::to_string(&sample_response()).unwrap();
        assert!(json.contains("\"pending\":2"));
        assert!(json.contains("\"database_path\":\"/tmp/spindle.db\""));
    }

    #[test]
    fn pending_render_lists_tasks() {
        let out = render_pending(&[pending_task(1, "T1"), pending_task(2, "T2")], false);
        assert!(out.contains("T1"));
        assert!(out.contains("0/3"));
        assert!(out.contains("2 pending"));
    }

    #[test]
    fn pending_render_empty() {
        assert_eq!(render_pending(&[], false), "  No pending tasks.\n");
    }
}
