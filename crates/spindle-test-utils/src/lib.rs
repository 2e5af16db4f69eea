// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Spindle integration tests.
//!
//! Provides a scripted task handler and test harness infrastructure for
//! fast, deterministic tests against a throwaway SQLite database.
//!
//! # Components
//!
//! - [`TestHarness`] - Pool, bridge, and queue over a temp database
//! - [`MockHandler`] - Task handler with scripted failures and call capture

pub mod harness;
pub mod mock_handler;

pub use harness::TestHarness;
pub use mock_handler::MockHandler;
