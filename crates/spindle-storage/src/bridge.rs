// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run blocking work off the async executor.
//!
//! [`BlockingBridge::run`] hands a synchronous closure to Tokio's blocking
//! thread pool and returns a future for its result. At most
//! `max_in_flight` closures occupy blocking threads at once; the rest wait
//! their turn in submission order.
//!
//! Dropping a [`BridgeHandle`] does not cancel the work. Once submitted, a
//! closure runs to completion and its result is discarded.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::join_all;
use spindle_config::model::BridgeConfig;
use spindle_core::SpindleError;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

/// Bounded gateway from async code to blocking work.
///
/// Cloning is cheap; clones share the same in-flight limit.
#[derive(Debug, Clone)]
pub struct BlockingBridge {
    slots: Arc<Semaphore>,
    max_in_flight: usize,
}

impl BlockingBridge {
    /// A bridge admitting at most `max_in_flight` concurrent operations (minimum 1).
    pub fn new(max_in_flight: usize) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.max_in_flight)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Operations currently holding a blocking thread.
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.slots.available_permits()
    }

    /// Submit `op` for execution on the blocking pool.
    ///
    /// Must be called from within a Tokio runtime. The returned handle
    /// resolves to `op`'s own result, or to [`SpindleError::WorkerPanicked`]
    /// if `op` panicked.
    pub fn run<F, T>(&self, op: F) -> BridgeHandle<T>
    where
        F: FnOnce() -> Result<T, SpindleError> + Send + 'static,
        T: Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let task = tokio::spawn(async move {
            let _slot = slots
                .acquire_owned()
                .await
                .map_err(|_| SpindleError::Internal("blocking bridge closed".to_string()))?;
            tokio::task::spawn_blocking(op)
                .await
                .map_err(join_error)?
        });
        BridgeHandle { task }
    }

    /// Submit every operation and wait for all of them.
    ///
    /// Results come back in the order the operations were given, regardless
    /// of the order they finish in.
    pub async fn run_all<I, F, T>(&self, ops: I) -> Vec<Result<T, SpindleError>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Result<T, SpindleError> + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<BridgeHandle<T>> = ops.into_iter().map(|op| self.run(op)).collect();
        join_all(handles).await
    }
}

/// Future for the result of one bridged operation.
#[must_use = "dropping the handle discards the result; the operation still runs"]
pub struct BridgeHandle<T> {
    task: JoinHandle<Result<T, SpindleError>>,
}

impl<T> Future for BridgeHandle<T> {
    type Output = Result<T, SpindleError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(join_error(e))),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn join_error(err: JoinError) -> SpindleError {
    if err.is_panic() {
        SpindleError::WorkerPanicked(panic_message(err.into_panic()))
    } else {
        SpindleError::Internal(format!("blocking task cancelled: {err}"))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn run_returns_the_closure_result() {
        let bridge = BlockingBridge::new(2);
        let value = bridge.run(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);

        let err = bridge
            .run(|| Err::<(), _>(SpindleError::TaskNotFound { id: 7 }))
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::TaskNotFound { id: 7 }));
    }

    #[tokio::test]
    async fn panics_surface_as_worker_panicked() {
        let bridge = BlockingBridge::new(1);
        let err = bridge
            .run(|| -> Result<(), SpindleError> { panic!("handler exploded") })
            .await
            .unwrap_err();
        match err {
            SpindleError::WorkerPanicked(msg) => assert!(msg.contains("handler exploded")),
            other => panic!("expected WorkerPanicked, got {other:?}"),
        }

        // The bridge keeps working after a panic.
        assert_eq!(bridge.run(|| Ok("still up")).await.unwrap(), "still up");
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn in_flight_limit_is_respected() {
        let bridge = BlockingBridge::new(3);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ops = (0..12).map(|_| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let results = bridge.run_all(ops).await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_all_preserves_input_order() {
        let bridge = BlockingBridge::new(4);
        let finished = Arc::new(Mutex::new(Vec::new()));

        // Earlier operations sleep longer, so they finish last.
        let ops = (0..4u64).map(|i| {
            let finished = Arc::clone(&finished);
            move || {
                std::thread::sleep(Duration::from_millis(80 - i * 20));
                finished.lock().unwrap().push(i);
                Ok(i)
            }
        });
        let results: Vec<u64> = bridge
            .run_all(ops)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(results, vec![0, 1, 2, 3]);
        assert_eq!(*finished.lock().unwrap(), vec![3, 2, 1, 0]);
    }

    #[tokio::test]
    async fn dropped_handle_still_runs_to_completion() {
        let bridge = BlockingBridge::new(1);
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            drop(bridge.run(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        // A second op queues behind the first on the single slot.
        bridge.run(|| Ok(())).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        assert_eq!(BlockingBridge::new(0).max_in_flight(), 1);
    }
}
