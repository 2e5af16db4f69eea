// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `spindle work` command implementation.
//!
//! Polls the queue, runs each pending task through the blocking bridge, and
//! records the outcome. Stops on shutdown signal, or once the queue is empty
//! when running with `--once`.

use std::time::Duration;

use spindle_core::{ProcessReport, SpindleError, Task};
use spindle_storage::{BlockingBridge, TaskQueue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the consumer loop behaves.
#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Simulated processing time per task.
    pub work: Duration,
    /// Exit as soon as a pass finds no pending tasks.
    pub once: bool,
}

/// Simulated task work: hold a blocking thread for `work`, then report.
fn simulate(task: &Task, work: Duration) -> Result<String, SpindleError> {
    if !work.is_zero() {
        std::thread::sleep(work);
    }
    Ok(format!("processed {}", task.name))
}

/// Run the consumer loop until `shutdown` fires (or the queue drains with `once`).
///
/// Transient failures (pool exhaustion, lock contention) are logged and
/// retried on the next poll; anything else stops the loop.
pub async fn run_worker(
    queue: &TaskQueue,
    bridge: &BlockingBridge,
    options: WorkerOptions,
    shutdown: CancellationToken,
) -> Result<ProcessReport, SpindleError> {
    let mut total = ProcessReport::default();
    let work = options.work;
    info!(
        poll_interval_ms = options.poll_interval.as_millis() as u64,
        once = options.once,
        "worker started"
    );

    while !shutdown.is_cancelled() {
        let idle = match queue
            .process_pending(bridge, move |task| simulate(task, work))
            .await
        {
            Ok(report) => {
                let idle = report.is_empty();
                total.completed.extend(report.completed);
                total.retrying.extend(report.retrying);
                total.exhausted.extend(report.exhausted);
                total.skipped.extend(report.skipped);
                idle
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "transient failure while processing; will retry");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(options.poll_interval) => {}
                }
                continue;
            }
            Err(e) => return Err(e),
        };

        if idle {
            if options.once {
                debug!("queue drained");
                break;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
        }
    }

    info!(
        completed = total.completed.len(),
        retrying = total.retrying.len(),
        exhausted = total.exhausted.len(),
        "worker stopped"
    );
    Ok(total)
}
