// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the TaskStore trait.

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::debug;

use spindle_config::model::{PoolConfig, QueueConfig, StorageConfig};
use spindle_config::SpindleConfig;
use spindle_core::{
    CompleteOutcome, FailOutcome, HealthStatus, QueueStats, SpindleError, Task, TaskId, TaskStore,
};

use crate::pool::ConnectionPool;
use crate::queue::TaskQueue;

/// SQLite-backed task store.
///
/// Wraps a [`TaskQueue`] and its pool. The pool is not opened until
/// [`initialize`](SqliteTaskStore::initialize) is called.
pub struct SqliteTaskStore {
    storage: StorageConfig,
    pool: PoolConfig,
    queue_config: QueueConfig,
    queue: OnceCell<TaskQueue>,
}

impl SqliteTaskStore {
    pub fn new(config: &SpindleConfig) -> Self {
        Self {
            storage: config.storage.clone(),
            pool: config.pool.clone(),
            queue_config: config.queue.clone(),
            queue: OnceCell::new(),
        }
    }

    /// Create and initialize in one step.
    pub async fn open(config: &SpindleConfig) -> Result<Self, SpindleError> {
        let store = Self::new(config);
        store.initialize().await?;
        Ok(store)
    }

    /// Open the connection pool and run migrations.
    pub async fn initialize(&self) -> Result<(), SpindleError> {
        let pool = ConnectionPool::open(&self.storage, &self.pool).await?;
        self.queue
            .set(TaskQueue::new(pool, &self.queue_config))
            .map_err(|_| SpindleError::Internal("task store already initialized".to_string()))?;
        debug!(path = %self.storage.database_path, "SQLite task store initialized");
        Ok(())
    }

    /// The underlying queue, or an error if not initialized.
    pub fn queue(&self) -> Result<&TaskQueue, SpindleError> {
        self.queue.get().ok_or_else(|| {
            SpindleError::Internal("task store not initialized -- call initialize() first".into())
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn enqueue(&self, name: &str) -> Result<TaskId, SpindleError> {
        self.queue()?.enqueue(name).await
    }

    async fn complete(&self, id: TaskId, result: &str) -> Result<CompleteOutcome, SpindleError> {
        self.queue()?.complete(id, result).await
    }

    async fn fail(&self, id: TaskId, error: &str) -> Result<FailOutcome, SpindleError> {
        self.queue()?.fail(id, error).await
    }

    async fn list_pending(&self) -> Result<Vec<Task>, SpindleError> {
        self.queue()?.list_pending().await
    }

    async fn get(&self, id: TaskId) -> Result<Task, SpindleError> {
        self.queue()?.get(id).await
    }

    async fn stats(&self) -> Result<QueueStats, SpindleError> {
        self.queue()?.stats().await
    }

    async fn health_check(&self) -> Result<HealthStatus, SpindleError> {
        self.queue()?.pool().health_check().await
    }

    async fn close(&self) -> Result<(), SpindleError> {
        // Close delegates to the pool if it was opened.
        if let Some(queue) = self.queue.get() {
            queue.pool().close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_config(dir: &tempfile::TempDir) -> SpindleConfig {
        let mut config = SpindleConfig::default();
        config.storage.database_path = dir.path().join("store.db").to_string_lossy().into_owned();
        config.pool.size = 2;
        config
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(&test_config(&dir));
        let err = store.enqueue("T1").await.unwrap_err();
        assert!(err.to_string().contains("not initialized"));
        // Closing an unopened store is harmless.
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn double_initialize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::open(&test_config(&dir)).await.unwrap();
        assert!(store.initialize().await.is_err());
    }

    #[tokio::test]
    async fn works_through_trait_object() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TaskStore> =
            Arc::new(SqliteTaskStore::open(&test_config(&dir)).await.unwrap());

        let id = store.enqueue("T1").await.unwrap();
        assert_eq!(store.list_pending().await.unwrap().len(), 1);
        assert_eq!(
            store.complete(id, "R1").await.unwrap(),
            CompleteOutcome::Completed
        );
        assert_eq!(store.get(id).await.unwrap().result.as_deref(), Some("R1"));
        assert_eq!(store.stats().await.unwrap().completed, 1);
        assert_eq!(store.health_check().await.unwrap(), HealthStatus::Healthy);

        store.close().await.unwrap();
        assert!(matches!(
            store.enqueue("T2").await.unwrap_err(),
            SpindleError::PoolClosed
        ));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        {
            let store = SqliteTaskStore::open(&config).await.unwrap();
            store.enqueue("durable").await.unwrap();
            store.close().await.unwrap();
        }
        let store = SqliteTaskStore::open(&config).await.unwrap();
        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "durable");
    }
}
