// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a pool, a bridge, and a task queue over a temp
//! SQLite database. The database is deleted when the harness is dropped.

use std::sync::Arc;

use spindle_config::SpindleConfig;
use spindle_core::{ProcessReport, SpindleError, Task, TaskId, TaskStore};
use spindle_storage::{BlockingBridge, ConnectionPool, SqliteTaskStore, TaskQueue};

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: SpindleConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = SpindleConfig::default();
        config.pool.acquire_timeout_ms = 10_000;
        config.pool.shutdown_timeout_ms = 500;
        Self { config }
    }

    /// Number of pooled connections.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.config.pool.size = size;
        self
    }

    /// Attempts allowed per task before it is marked failed.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.queue.max_attempts = attempts;
        self
    }

    /// Concurrent blocking operations allowed through the bridge.
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.config.bridge.max_in_flight = limit;
        self
    }

    /// Default acquire deadline in milliseconds (0 waits forever).
    pub fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.config.pool.acquire_timeout_ms = ms;
        self
    }

    /// Tasks taken per `process_pending` pass.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.config.queue.batch_size = size;
        self
    }

    /// Build the test harness, opening the pool and running migrations.
    pub async fn build(mut self) -> Result<TestHarness, SpindleError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| SpindleError::Internal(e.to_string()))?;
        self.config.storage.database_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .into_owned();

        let store = SqliteTaskStore::open(&self.config).await?;
        let queue = store.queue()?.clone();
        let pool = queue.pool().clone();
        let bridge = BlockingBridge::from_config(&self.config.bridge);

        Ok(TestHarness {
            store: Arc::new(store),
            queue,
            pool,
            bridge,
            config: self.config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment over temp storage.
pub struct TestHarness {
    /// The queue behind the [`TaskStore`] trait.
    pub store: Arc<dyn TaskStore>,
    /// The queue with its full inherent API.
    pub queue: TaskQueue,
    /// The shared connection pool.
    pub pool: ConnectionPool,
    /// Bridge used to run task handlers.
    pub bridge: BlockingBridge,
    /// Effective configuration.
    pub config: SpindleConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with default settings.
    pub async fn new() -> Result<Self, SpindleError> {
        Self::builder().build().await
    }

    /// Path of the temp database file.
    pub fn database_path(&self) -> &str {
        &self.config.storage.database_path
    }

    /// Enqueue every name in order and return the assigned ids.
    pub async fn enqueue_all(&self, names: &[&str]) -> Result<Vec<TaskId>, SpindleError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.queue.enqueue(name).await?);
        }
        Ok(ids)
    }

    /// Run `process_pending` passes until a pass finds nothing to do.
    ///
    /// Returns the merged report of every pass. Stops after `max_passes`
    /// passes even if tasks remain.
    pub async fn drain<F>(
        &self,
        handler: F,
        max_passes: usize,
    ) -> Result<ProcessReport, SpindleError>
    where
        F: Fn(&Task) -> Result<String, SpindleError> + Clone + Send + Sync + 'static,
    {
        let mut total = ProcessReport::default();
        for _ in 0..max_passes {
            let report = self
                .queue
                .process_pending(&self.bridge, handler.clone())
                .await?;
            if report.is_empty() {
                break;
            }
            total.completed.extend(report.completed);
            total.retrying.extend(report.retrying);
            total.exhausted.extend(report.exhausted);
            total.skipped.extend(report.skipped);
        }
        Ok(total)
    }
}
