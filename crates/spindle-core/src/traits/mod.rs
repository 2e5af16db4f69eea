// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait definitions implemented by storage backends.

pub mod storage;

pub use storage::TaskStore;
