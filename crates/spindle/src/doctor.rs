// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `spindle doctor` command implementation.
//!
//! Runs diagnostic checks against the configuration and the database to
//! identify problems before the worker is started.

use std::io::IsTerminal;
use std::time::{Duration, Instant};

use spindle_config::SpindleConfig;
use spindle_core::{HealthStatus, SpindleError};
use spindle_storage::{ConnectionPool, TaskQueue};

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed successfully.
    Pass,
    /// Check passed with a warning.
    Warn,
    /// Check failed.
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Name of the check.
    pub name: String,
    /// Check status.
    pub status: CheckStatus,
    /// Human-readable message.
    pub message: String,
    /// Duration the check took.
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run the `spindle doctor` command.
///
/// Runs quick diagnostic checks. With `--deep`, also runs an integrity check
/// and reports the memory baseline. With `--plain`, disables colored output.
pub async fn run_doctor(
    config: &SpindleConfig,
    deep: bool,
    plain: bool,
) -> Result<(), SpindleError> {
    let use_color = !plain && std::io::stdout().is_terminal();
    let results = collect_checks(config, deep).await;

    println!();
    println!("  spindle doctor");
    println!("  {}", "-".repeat(50));

    for result in &results {
        println!("{}", format_line(result, use_color));
    }
    println!();

    let issues = results
        .iter()
        .filter(|r| r.status != CheckStatus::Pass)
        .count();
    if issues > 0 {
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
        if !deep {
            println!("  Run with --deep for detailed diagnostics.");
        }
    } else {
        println!("  All checks passed.");
    }
    println!();

    Ok(())
}

async fn collect_checks(config: &SpindleConfig, deep: bool) -> Vec<CheckResult> {
    let mut results = vec![check_config(config), check_database_file(config)];

    // Opening a pool creates the file, so skip pool checks until it exists.
    let db_exists = config.storage.is_in_memory()
        || std::path::Path::new(&config.storage.database_path).exists();
    if db_exists {
        let start = Instant::now();
        match ConnectionPool::open(&config.storage, &config.pool).await {
            Ok(pool) => {
                results.push(check_pool(&pool, start).await);
                results.push(check_queue(&TaskQueue::new(pool.clone(), &config.queue)).await);
                if deep {
                    results.push(check_integrity(&pool).await);
                }
                pool.close().await;
            }
            Err(e) => results.push(CheckResult::new(
                "Connection pool",
                CheckStatus::Fail,
                format!("open failed: {e}"),
                start,
            )),
        }
    }

    if deep {
        results.push(check_memory_baseline());
    }
    results
}

fn format_line(result: &CheckResult, use_color: bool) -> String {
    let duration_ms = result.duration.as_millis();
    if use_color {
        use colored::Colorize;
        let (symbol, message) = match result.status {
            CheckStatus::Pass => ("✓".green(), result.message.normal()),
            CheckStatus::Warn => ("!".yellow(), result.message.yellow()),
            CheckStatus::Fail => ("✗".red(), result.message.red()),
        };
        format!(
            "    {symbol} {:<20} {message} ({duration_ms}ms)",
            result.name
        )
    } else {
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => "[WARN]",
            CheckStatus::Fail => "[FAIL]",
        };
        format!(
            "    {tag} {:<20} {} ({duration_ms}ms)",
            result.name, result.message
        )
    }
}

/// Check the effective configuration passes validation.
fn check_config(config: &SpindleConfig) -> CheckResult {
    let start = Instant::now();
    match spindle_config::validation::validate_config(config) {
        Ok(()) => CheckResult::new("Configuration", CheckStatus::Pass, "valid", start),
        Err(errors) => CheckResult::new(
            "Configuration",
            CheckStatus::Fail,
            format!("{} error(s)", errors.len()),
            start,
        ),
    }
}

/// Check the database file exists.
fn check_database_file(config: &SpindleConfig) -> CheckResult {
    let start = Instant::now();
    let db_path = &config.storage.database_path;
    if config.storage.is_in_memory() {
        return CheckResult::new("Database", CheckStatus::Warn, "in-memory (not durable)", start);
    }

    match std::fs::metadata(db_path) {
        Ok(meta) => {
            let size_mb = meta.len() as f64 / (1024.0 * 1024.0);
            CheckResult::new(
                "Database",
                CheckStatus::Pass,
                format!("{db_path} ({size_mb:.1} MB)"),
                start,
            )
        }
        Err(_) => CheckResult::new(
            "Database",
            CheckStatus::Warn,
            format!("not found: {db_path} (will be created on first run)"),
            start,
        ),
    }
}

/// Check every pooled connection answers.
async fn check_pool(pool: &ConnectionPool, start: Instant) -> CheckResult {
    match pool.health_check().await {
        Ok(HealthStatus::Healthy) => CheckResult::new(
            "Connection pool",
            CheckStatus::Pass,
            format!("{} connections healthy", pool.size()),
            start,
        ),
        Ok(HealthStatus::Degraded(msg)) => {
            CheckResult::new("Connection pool", CheckStatus::Warn, msg, start)
        }
        Ok(HealthStatus::Unhealthy(msg)) => {
            CheckResult::new("Connection pool", CheckStatus::Fail, msg, start)
        }
        Err(e) => CheckResult::new("Connection pool", CheckStatus::Fail, e.to_string(), start),
    }
}

/// Summarize the queue; failed tasks are a warning.
async fn check_queue(queue: &TaskQueue) -> CheckResult {
    let start = Instant::now();
    match queue.stats().await {
        Ok(stats) if stats.failed > 0 => CheckResult::new(
            "Task queue",
            CheckStatus::Warn,
            format!("{} failed of {} total", stats.failed, stats.total),
            start,
        ),
        Ok(stats) => CheckResult::new(
            "Task queue",
            CheckStatus::Pass,
            format!("{} pending, {} completed", stats.pending, stats.completed),
            start,
        ),
        Err(e) => CheckResult::new("Task queue", CheckStatus::Fail, e.to_string(), start),
    }
}

/// Deep check: SQLite integrity check.
async fn check_integrity(pool: &ConnectionPool) -> CheckResult {
    let start = Instant::now();
    let rows = match pool.acquire().await {
        Ok(mut conn) => {
            conn.call(|conn| {
                let mut stmt = conn.prepare("PRAGMA integrity_check")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .await
        }
        Err(e) => Err(e),
    };

    match rows {
        Ok(rows) if rows.len() == 1 && rows[0] == "ok" => {
            CheckResult::new("DB integrity", CheckStatus::Pass, "ok", start)
        }
        Ok(rows) => CheckResult::new(
            "DB integrity",
            CheckStatus::Fail,
            format!("{} issue(s) found", rows.len()),
            start,
        ),
        Err(e) => CheckResult::new(
            "DB integrity",
            CheckStatus::Fail,
            format!("check failed: {e}"),
            start,
        ),
    }
}

/// Deep check: memory baseline via jemalloc.
fn check_memory_baseline() -> CheckResult {
    let start = Instant::now();

    #[cfg(not(target_env = "msvc"))]
    {
        let _ = tikv_jemalloc_ctl::epoch::advance();
        let allocated = tikv_jemalloc_ctl::stats::allocated::read().unwrap_or(0);
        let resident = tikv_jemalloc_ctl::stats::resident::read().unwrap_or(0);
        let allocated_mb = allocated as f64 / (1024.0 * 1024.0);
        let resident_mb = resident as f64 / (1024.0 * 1024.0);

        CheckResult::new(
            "Memory baseline",
            CheckStatus::Pass,
            format!("heap: {allocated_mb:.1} MB, resident: {resident_mb:.1} MB"),
            start,
        )
    }

    #[cfg(target_env = "msvc")]
    {
        CheckResult::new(
            "Memory baseline",
            CheckStatus::Warn,
            "jemalloc not available on MSVC",
            start,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> SpindleConfig {
        let mut config = SpindleConfig::default();
        config.storage.database_path = dir.path().join("doctor.db").to_string_lossy().into_owned();
        config.pool.size = 2;
        config
    }

    #[test]
    fn plain_lines_carry_status_tags() {
        let result = CheckResult {
            name: "Database".to_string(),
            status: CheckStatus::Warn,
            message: "not found".to_string(),
            duration: Duration::from_millis(5),
        };
        let line = format_line(&result, false);
        assert!(line.contains("[WARN]"));
        assert!(line.contains("not found"));
        assert!(line.contains("(5ms)"));
    }

    #[test]
    fn invalid_config_fails_check() {
        let mut config = SpindleConfig::default();
        config.pool.size = 0;
        assert_eq!(check_config(&config).status, CheckStatus::Fail);
        assert_eq!(check_config(&SpindleConfig::default()).status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn missing_database_warns_and_skips_pool() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let results = collect_checks(&config, false).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].status, CheckStatus::Warn);
        assert!(results[1].message.contains("not found"));
        assert!(!std::path::Path::new(&config.storage.database_path).exists());
    }

    #[tokio::test]
    async fn existing_database_passes_deep_checks() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        {
            let pool = ConnectionPool::open(&config.storage, &config.pool).await.unwrap();
            pool.close().await;
        }

        let results = collect_checks(&config, true).await;
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Configuration",
                "Database",
                "Connection pool",
                "Task queue",
                "DB integrity",
                "Memory baseline"
            ]
        );
        for result in &results[..5] {
            assert_eq!(result.status, CheckStatus::Pass, "{}: {}", result.name, result.message);
        }
    }
}
