// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spindle - a non-blocking task queue over pooled SQLite connections.
//!
//! This is the binary entry point: it loads configuration, installs
//! logging, and drives the queue from the command line.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod doctor;
mod shutdown;
mod status;
mod worker;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use spindle_config::SpindleConfig;
use spindle_core::{CompleteOutcome, SpindleError, TaskId};
use spindle_storage::{BlockingBridge, ConnectionPool, TaskQueue};
use tracing::error;

/// Spindle - a non-blocking task queue over pooled SQLite connections.
#[derive(Parser, Debug)]
#[command(name = "spindle", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, global = true)]
    plain: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Add pending tasks.
    Enqueue {
        /// Task names, one task per name.
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Record the result of a pending task.
    Complete {
        /// Task id.
        id: TaskId,
        /// Result text to store.
        result: String,
    },
    /// List pending tasks, oldest first.
    Pending {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show task counts by status.
    Stats {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run the consumer loop until interrupted.
    Work {
        /// Exit once no pending tasks remain.
        #[arg(long)]
        once: bool,
        /// Simulated processing time per task, in milliseconds.
        #[arg(long, default_value_t = 0)]
        work_ms: u64,
    },
    /// Diagnose configuration and database health.
    Doctor {
        /// Run integrity and memory checks too.
        #[arg(long)]
        deep: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load and validate configuration at startup
    let loaded = match &cli.config {
        Some(path) => spindle_config::load_and_validate_path(path),
        None => spindle_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            spindle_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging.level);

    if let Err(e) = run(cli, &config).await {
        error!(error = %e, "command failed");
        eprintln!("spindle: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: &SpindleConfig) -> Result<(), SpindleError> {
    if let Commands::Doctor { deep } = cli.command {
        return doctor::run_doctor(config, deep, cli.plain).await;
    }

    let pool = ConnectionPool::open(&config.storage, &config.pool).await?;
    let queue = TaskQueue::new(pool.clone(), &config.queue);

    let result = match cli.command {
        Commands::Enqueue { names } => enqueue(&queue, &names).await,
        Commands::Complete { id, result } => complete(&queue, id, &result).await,
        Commands::Pending { json } => status::run_pending(&queue, json, cli.plain).await,
        Commands::Stats { json } => status::run_stats(&queue, json, cli.plain).await,
        Commands::Work { once, work_ms } => {
            let bridge = BlockingBridge::from_config(&config.bridge);
            let options = worker::WorkerOptions {
                poll_interval: config.queue.poll_interval(),
                work: Duration::from_millis(work_ms),
                once,
            };
            let token = shutdown::install_signal_handler();
            worker::run_worker(&queue, &bridge, options, token)
                .await
                .map(|report| {
                    println!(
                        "processed {} task(s): {} completed, {} retrying, {} failed",
                        report.processed(),
                        report.completed.len(),
                        report.retrying.len(),
                        report.exhausted.len()
                    );
                })
        }
        Commands::Doctor { .. } => Ok(()),
    };

    pool.close().await;
    result
}

async fn enqueue(queue: &TaskQueue, names: &[String]) -> Result<(), SpindleError> {
    let ids = queue.enqueue_batch(names).await?;
    for (id, name) in ids.iter().zip(names) {
        println!("{id}\t{name}");
    }
    Ok(())
}

async fn complete(queue: &TaskQueue, id: TaskId, result: &str) -> Result<(), SpindleError> {
    match queue.complete(id, result).await? {
        CompleteOutcome::Completed => println!("task {id} completed"),
        CompleteOutcome::AlreadyCompleted => println!("task {id} was already completed"),
        CompleteOutcome::NotPending => println!("task {id} is not pending"),
        CompleteOutcome::NotFound => return Err(SpindleError::TaskNotFound { id }),
    }
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spindle={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();
}
