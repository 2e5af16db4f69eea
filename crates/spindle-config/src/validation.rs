// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as pool bounds, non-empty paths, and valid log levels.

use crate::diagnostic::ConfigError;
use crate::model::SpindleConfig;

/// Largest pool a single process may open against one SQLite file.
pub const MAX_POOL_SIZE: usize = 64;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &SpindleConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.logging.level.trim().to_lowercase().as_str()) {
        errors.push(ConfigError::Validation {
            message: format!(
                "logging.level `{}` is not one of {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        });
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.database_path must not be empty".to_string(),
        });
    }

    if config.pool.size == 0 || config.pool.size > MAX_POOL_SIZE {
        errors.push(ConfigError::Validation {
            message: format!(
                "pool.size must be between 1 and {MAX_POOL_SIZE}, got {}",
                config.pool.size
            ),
        });
    }

    // Every connection to `:memory:` opens a separate, empty database.
    if config.storage.is_in_memory() && config.pool.size != 1 {
        errors.push(ConfigError::Validation {
            message: format!(
                "storage.database_path `:memory:` requires pool.size = 1, got {}",
                config.pool.size
            ),
        });
    }

    if config.bridge.max_in_flight == 0 {
        errors.push(ConfigError::Validation {
            message: "bridge.max_in_flight must be at least 1".to_string(),
        });
    }

    if config.queue.max_attempts == 0 {
        errors.push(ConfigError::Validation {
            message: "queue.max_attempts must be at least 1".to_string(),
        });
    }

    if config.queue.batch_size == 0 {
        errors.push(ConfigError::Validation {
            message: "queue.batch_size must be at least 1".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
