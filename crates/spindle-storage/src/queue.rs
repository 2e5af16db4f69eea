// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent task queue over the connection pool.
//!
//! Tasks are rows in the `tasks` table. A task is `pending` until one
//! `complete` records its result, or until `fail` has been recorded
//! `max_attempts` times. Both transitions are guarded by
//! `WHERE status = 'pending'`, so a terminal task never changes again and a
//! second completion keeps the first result.

use std::sync::Arc;

use rusqlite::{OptionalExtension, params};
use spindle_config::model::QueueConfig;
use spindle_core::{
    CompleteOutcome, FailOutcome, ProcessReport, QueueStats, SpindleError, Task, TaskId,
    TaskStatus, TransactionMode,
};
use tracing::{debug, info, warn};

use crate::bridge::BlockingBridge;
use crate::models::{TASK_COLUMNS, task_from_row};
use crate::pool::ConnectionPool;
use crate::transaction::with_transaction;

/// Task queue backed by a [`ConnectionPool`].
///
/// Cloning is cheap; clones share the pool.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    pool: ConnectionPool,
    max_attempts: u32,
    batch_size: usize,
}

impl TaskQueue {
    pub fn new(pool: ConnectionPool, config: &QueueConfig) -> Self {
        Self {
            pool,
            max_attempts: config.max_attempts.max(1),
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Add a pending task. Returns its id, unique and increasing for the
    /// lifetime of the store.
    pub async fn enqueue(&self, name: &str) -> Result<TaskId, SpindleError> {
        let name = name.to_string();
        let max_attempts = self.max_attempts;
        let mut conn = self.pool.acquire().await?;
        let id = conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (name, max_attempts) VALUES (?1, ?2)",
                    params![name, max_attempts],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        debug!(task_id = id, "task enqueued");
        Ok(id)
    }

    /// Add several pending tasks atomically. Either every task is stored or none is.
    pub async fn enqueue_batch<S>(&self, names: &[S]) -> Result<Vec<TaskId>, SpindleError>
    where
        S: AsRef<str>,
    {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let max_attempts = self.max_attempts;
        let mut conn = self.pool.acquire().await?;
        let ids = with_transaction(&mut conn, TransactionMode::Immediate, move |tx| {
            let mut stmt =
                tx.prepare_cached("INSERT INTO tasks (name, max_attempts) VALUES (?1, ?2)")?;
            let mut ids = Vec::with_capacity(names.len());
            for name in &names {
                stmt.execute(params![name, max_attempts])?;
                ids.push(tx.last_insert_rowid());
            }
            Ok(ids)
        })
        .await?;
        debug!(count = ids.len(), "task batch enqueued");
        Ok(ids)
    }

    /// Every pending task, oldest first, as of one consistent snapshot.
    pub async fn list_pending(&self) -> Result<Vec<Task>, SpindleError> {
        let mut conn = self.pool.acquire().await?;
        conn.call(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending' ORDER BY id ASC"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map([], task_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Up to `limit` pending tasks, oldest first.
    pub async fn pending_batch(&self, limit: usize) -> Result<Vec<Task>, SpindleError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut conn = self.pool.acquire().await?;
        conn.call(move |conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = 'pending' ORDER BY id ASC LIMIT ?1"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params![limit], task_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Fetch one task by id.
    pub async fn get(&self, id: TaskId) -> Result<Task, SpindleError> {
        let mut conn = self.pool.acquire().await?;
        conn.call(move |conn| {
            let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
            conn.query_row(&sql, params![id], task_from_row).optional()
        })
        .await?
        .ok_or(SpindleError::TaskNotFound { id })
    }

    /// Record `result` for a pending task.
    ///
    /// Only the first completion of a task takes effect. Completing a task
    /// that is already terminal, or that does not exist, is reported through
    /// the returned [`CompleteOutcome`] and changes nothing.
    pub async fn complete(
        &self,
        id: TaskId,
        result: &str,
    ) -> Result<CompleteOutcome, SpindleError> {
        let result = result.to_string();
        let mut conn = self.pool.acquire().await?;
        let outcome = with_transaction(&mut conn, TransactionMode::Immediate, move |tx| {
            let changed = tx.execute(
                "UPDATE tasks
                 SET status = 'completed',
                     result = ?2,
                     completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1 AND status = 'pending'",
                params![id, result],
            )?;
            if changed == 1 {
                return Ok(CompleteOutcome::Completed);
            }
            let status = current_status(tx, id)?;
            Ok(match status {
                None => CompleteOutcome::NotFound,
                Some(TaskStatus::Completed) => CompleteOutcome::AlreadyCompleted,
                Some(_) => CompleteOutcome::NotPending,
            })
        })
        .await?;

        match outcome {
            CompleteOutcome::Completed => debug!(task_id = id, "task completed"),
            CompleteOutcome::NotFound => warn!(task_id = id, "complete for unknown task"),
            other => debug!(task_id = id, ?other, "complete ignored"),
        }
        Ok(outcome)
    }

    /// Record a failed processing attempt.
    ///
    /// The task stays pending until its attempts reach `max_attempts`, then
    /// becomes `failed`.
    pub async fn fail(&self, id: TaskId, error: &str) -> Result<FailOutcome, SpindleError> {
        let error = error.to_string();
        let mut conn = self.pool.acquire().await?;
        let outcome = with_transaction(&mut conn, TransactionMode::Immediate, move |tx| {
            let row: Option<(String, u32, u32)> = tx
                .query_row(
                    "SELECT status, attempts, max_attempts FROM tasks WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get("status")?,
                            row.get("attempts")?,
                            row.get("max_attempts")?,
                        ))
                    },
                )
                .optional()?;

            let Some((status, attempts, max_attempts)) = row else {
                return Ok(FailOutcome::NotFound);
            };
            if status != TaskStatus::Pending.to_string() {
                return Ok(FailOutcome::NotPending);
            }

            let attempts = attempts.saturating_add(1);
            if attempts >= max_attempts {
                tx.execute(
                    "UPDATE tasks SET status = 'failed', attempts = ?2, last_error = ?3
                     WHERE id = ?1",
                    params![id, attempts, error],
                )?;
                Ok(FailOutcome::Exhausted { attempts })
            } else {
                tx.execute(
                    "UPDATE tasks SET attempts = ?2, last_error = ?3 WHERE id = ?1",
                    params![id, attempts, error],
                )?;
                Ok(FailOutcome::Retrying { attempts })
            }
        })
        .await?;

        match outcome {
            FailOutcome::Exhausted { attempts } => {
                warn!(task_id = id, attempts, "task failed permanently")
            }
            other => debug!(task_id = id, ?other, "task failure recorded"),
        }
        Ok(outcome)
    }

    /// Counts by status.
    pub async fn stats(&self) -> Result<QueueStats, SpindleError> {
        let mut conn = self.pool.acquire().await?;
        conn.call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) AS total,
                        COALESCE(SUM(status = 'pending'), 0) AS pending,
                        COALESCE(SUM(status = 'completed'), 0) AS completed,
                        COALESCE(SUM(status = 'failed'), 0) AS failed
                 FROM tasks",
                [],
                |row| {
                    Ok(QueueStats {
                        total: row.get("total")?,
                        pending: row.get("pending")?,
                        completed: row.get("completed")?,
                        failed: row.get("failed")?,
                    })
                },
            )
        })
        .await
    }

    /// Process one batch of pending tasks.
    ///
    /// Takes a snapshot of up to `batch_size` pending tasks, runs `handler`
    /// on each of them concurrently through `bridge`, then records every
    /// outcome one at a time: `Ok(result)` completes the task, `Err` records
    /// a failed attempt. Tasks that turned terminal in the meantime are
    /// reported as skipped.
    pub async fn process_pending<F>(
        &self,
        bridge: &BlockingBridge,
        handler: F,
    ) -> Result<ProcessReport, SpindleError>
    where
        F: Fn(&Task) -> Result<String, SpindleError> + Send + Sync + 'static,
    {
        let pending = self.pending_batch(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(ProcessReport::default());
        }

        let handler = Arc::new(handler);
        let ids: Vec<TaskId> = pending.iter().map(|task| task.id).collect();
        let outcomes = bridge
            .run_all(pending.into_iter().map(|task| {
                let handler = Arc::clone(&handler);
                move || handler(&task)
            }))
            .await;

        let mut report = ProcessReport::default();
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(result) => match self.complete(id, &result).await? {
                    CompleteOutcome::Completed => report.completed.push(id),
                    _ => report.skipped.push(id),
                },
                Err(e) => {
                    warn!(task_id = id, error = %e, "task handler failed");
                    match self.fail(id, &e.to_string()).await? {
                        FailOutcome::Retrying { .. } => report.retrying.push(id),
                        FailOutcome::Exhausted { .. } => report.exhausted.push(id),
                        FailOutcome::NotPending | FailOutcome::NotFound => {
                            report.skipped.push(id)
                        }
                    }
                }
            }
        }

        info!(
            completed = report.completed.len(),
            retrying = report.retrying.len(),
            exhausted = report.exhausted.len(),
            skipped = report.skipped.len(),
            "processed pending tasks"
        );
        Ok(report)
    }
}

fn current_status(
    tx: &rusqlite::Transaction<'_>,
    id: TaskId,
) -> rusqlite::Result<Option<TaskStatus>> {
    let raw: Option<String> = tx
        .query_row(
            "SELECT status FROM tasks WHERE id = ?1",
            params![id],
            |row| row.get("status"),
        )
        .optional()?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_config::model::{PoolConfig, StorageConfig};
    use std::collections::HashSet;
    use tempfile::TempDir;

    async fn open_queue(size: usize, max_attempts: u32) -> (TempDir, TaskQueue) {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            database_path: dir.path().join("queue.db").to_string_lossy().into_owned(),
            wal_mode: true,
            busy_timeout_ms: 5_000,
        };
        let pool = PoolConfig {
            size,
            ..PoolConfig::default()
        };
        let pool = ConnectionPool::open(&storage, &pool).await.unwrap();
        let queue = TaskQueue::new(
            pool,
            &QueueConfig {
                max_attempts,
                ..QueueConfig::default()
            },
        );
        (dir, queue)
    }

    #[tokio::test]
    async fn enqueue_then_list_pending_in_id_order() {
        let (_dir, queue) = open_queue(2, 3).await;
        let a = queue.enqueue("T1").await.unwrap();
        let b = queue.enqueue("T2").await.unwrap();
        assert!(b > a);

        let pending = queue.list_pending().await.unwrap();
        let names: Vec<&str> = pending.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["T1", "T2"]);
        assert!(pending.iter().all(|t| t.status == TaskStatus::Pending));
        assert!(pending[0].created_at_utc().is_some());
    }

    #[tokio::test]
    async fn enqueue_batch_is_atomic_and_ordered() {
        let (_dir, queue) = open_queue(1, 3).await;
        let ids = queue.enqueue_batch(&["a", "b", "c"]).await.unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(queue.stats().await.unwrap().pending, 3);
        assert!(queue.enqueue_batch::<&str>(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_completion_keeps_first_result() {
        let (_dir, queue) = open_queue(1, 3).await;
        let id = queue.enqueue("T1").await.unwrap();

        assert_eq!(
            queue.complete(id, "R1").await.unwrap(),
            CompleteOutcome::Completed
        );
        assert_eq!(
            queue.complete(id, "R2").await.unwrap(),
            CompleteOutcome::AlreadyCompleted
        );

        let task = queue.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("R1"));
        assert!(task.completed_at.is_some());
        assert!(queue.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_reported_not_raised() {
        let (_dir, queue) = open_queue(1, 3).await;
        assert_eq!(
            queue.complete(999, "R").await.unwrap(),
            CompleteOutcome::NotFound
        );
        assert_eq!(queue.fail(999, "E").await.unwrap(), FailOutcome::NotFound);
        assert!(matches!(
            queue.get(999).await.unwrap_err(),
            SpindleError::TaskNotFound { id: 999 }
        ));
        assert_eq!(queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn failures_retry_until_attempts_are_exhausted() {
        let (_dir, queue) = open_queue(1, 2).await;
        let id = queue.enqueue("flaky").await.unwrap();

        assert_eq!(
            queue.fail(id, "first").await.unwrap(),
            FailOutcome::Retrying { attempts: 1 }
        );
        assert_eq!(queue.list_pending().await.unwrap().len(), 1);

        assert_eq!(
            queue.fail(id, "second").await.unwrap(),
            FailOutcome::Exhausted { attempts: 2 }
        );
        let task = queue.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.last_error.as_deref(), Some("second"));

        assert_eq!(queue.fail(id, "third").await.unwrap(), FailOutcome::NotPending);
        assert_eq!(
            queue.complete(id, "late").await.unwrap(),
            CompleteOutcome::NotPending
        );
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueues_yield_unique_ids() {
        let (_dir, queue) = open_queue(4, 3).await;
        let mut producers = Vec::new();
        for p in 0..8 {
            let queue = queue.clone();
            producers.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for i in 0..25 {
                    ids.push(queue.enqueue(&format!("p{p}-{i}")).await.unwrap());
                }
                ids
            }));
        }

        let mut all = HashSet::new();
        for producer in producers {
            for id in producer.await.unwrap() {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(all.len(), 200);
        assert_eq!(queue.stats().await.unwrap().total, 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_completions_pick_one_winner() {
        let (_dir, queue) = open_queue(4, 3).await;
        let id = queue.enqueue("contested").await.unwrap();

        let mut racers = Vec::new();
        for r in 0..8 {
            let queue = queue.clone();
            racers.push(tokio::spawn(async move {
                queue.complete(id, &format!("R{r}")).await.unwrap()
            }));
        }
        let mut winners = 0;
        for racer in racers {
            if racer.await.unwrap() == CompleteOutcome::Completed {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(queue.stats().await.unwrap().completed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn process_pending_completes_every_task() {
        let (_dir, queue) = open_queue(3, 3).await;
        for name in ["T1", "T2", "T3", "T4", "T5"] {
            queue.enqueue(name).await.unwrap();
        }
        assert_eq!(
            queue.stats().await.unwrap(),
            QueueStats {
                total: 5,
                pending: 5,
                completed: 0,
                failed: 0
            }
        );

        let bridge = BlockingBridge::new(4);
        let report = queue
            .process_pending(&bridge, |task| Ok(format!("done:{}", task.name)))
            .await
            .unwrap();

        assert_eq!(report.completed.len(), 5);
        assert_eq!(report.processed(), 5);
        assert_eq!(
            queue.stats().await.unwrap(),
            QueueStats {
                total: 5,
                pending: 0,
                completed: 5,
                failed: 0
            }
        );
        let first = queue.get(report.completed[0]).await.unwrap();
        assert_eq!(first.result.as_deref(), Some("done:T1"));
    }

    #[tokio::test]
    async fn process_pending_records_handler_failures() {
        let (_dir, queue) = open_queue(2, 1).await;
        let ok = queue.enqueue("good").await.unwrap();
        let bad = queue.enqueue("bad").await.unwrap();

        let bridge = BlockingBridge::new(2);
        let report = queue
            .process_pending(&bridge, |task| {
                if task.name == "bad" {
                    Err(SpindleError::Internal("handler rejected task".to_string()))
                } else {
                    Ok("fine".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(report.completed, vec![ok]);
        assert_eq!(report.exhausted, vec![bad]);
        let failed = queue.get(bad).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.last_error.unwrap().contains("handler rejected task"));

        let again = queue
            .process_pending(&bridge, |_| Ok(String::new()))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn process_pending_survives_handler_panic() {
        let (_dir, queue) = open_queue(1, 3).await;
        let id = queue.enqueue("explosive").await.unwrap();

        let bridge = BlockingBridge::new(1);
        let report = queue
            .process_pending(&bridge, |_| panic!("kaboom"))
            .await
            .unwrap();

        assert_eq!(report.retrying, vec![id]);
        let task = queue.get(id).await.unwrap();
        assert_eq!(task.attempts, 1);
        assert!(task.last_error.unwrap().contains("kaboom"));
    }
}
