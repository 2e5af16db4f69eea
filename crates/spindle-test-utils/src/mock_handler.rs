// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted task handler for deterministic queue tests.
//!
//! `MockHandler` answers each task by name: tasks named in its failure set
//! return an error, tasks in its panic set panic, and everything else
//! succeeds with `done:<name>`. Every invocation is recorded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use spindle_core::{SpindleError, Task};

/// A task handler with scripted outcomes and call capture.
#[derive(Clone, Default)]
pub struct MockHandler {
    failing: Arc<HashSet<String>>,
    panicking: Arc<HashSet<String>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockHandler {
    /// A handler that succeeds for every task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every task whose name is in `names`.
    pub fn failing<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing = Arc::new(names.into_iter().map(Into::into).collect());
        self
    }

    /// Panic on every task whose name is in `names`.
    pub fn panicking<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.panicking = Arc::new(names.into_iter().map(Into::into).collect());
        self
    }

    /// Handle one task.
    pub fn handle(&self, task: &Task) -> Result<String, SpindleError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.name.clone());

        if self.panicking.contains(&task.name) {
            panic!("mock handler panicked on {}", task.name);
        }
        if self.failing.contains(&task.name) {
            return Err(SpindleError::Internal(format!(
                "mock handler rejected {}",
                task.name
            )));
        }
        Ok(format!("done:{}", task.name))
    }

    /// Turn the handler into a closure accepted by `TaskQueue::process_pending`.
    pub fn as_fn(
        &self,
    ) -> impl Fn(&Task) -> Result<String, SpindleError> + Clone + Send + Sync + 'static {
        let handler = self.clone();
        move |task| handler.handle(task)
    }

    /// Names of every task handled so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
