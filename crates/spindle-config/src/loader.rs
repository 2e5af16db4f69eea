// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./spindle.toml` > `~/.config/spindle/spindle.toml` >
//! `/etc/spindle/spindle.toml`
//! with environment variable overrides via `SPINDLE_` prefix.

// figment::Error is external and cannot be boxed without a wrapper.
#![allow(clippy::result_large_err)]

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::SpindleConfig;

/// System-wide config file location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/spindle/spindle.toml";

/// Local config file name, resolved against the working directory.
pub const LOCAL_CONFIG_FILE: &str = "spindle.toml";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/spindle/spindle.toml` (system-wide)
/// 3. `~/.config/spindle/spindle.toml` (user XDG config)
/// 4. `./spindle.toml` (local directory)
/// 5. `SPINDLE_*` environment variables
pub fn load_config() -> Result<SpindleConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<SpindleConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SpindleConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<SpindleConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(SpindleConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(SpindleConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG_FILE))
        .merge(env_provider())
}

/// `~/.config/spindle/spindle.toml` on Linux, the platform equivalent elsewhere.
pub fn user_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("spindle").join("spindle.toml"))
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `SPINDLE_POOL_ACQUIRE_TIMEOUT_MS` must map to
/// `pool.acquire_timeout_ms`, not `pool.acquire.timeout.ms`.
fn env_provider() -> Env {
    Env::prefixed("SPINDLE_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: SPINDLE_STORAGE_DATABASE_PATH -> "storage_database_path"
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("logging_", "logging.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("pool_", "pool.", 1)
            .replacen("bridge_", "bridge.", 1)
            .replacen("queue_", "queue.", 1);
        mapped.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SPINDLE_POOL_SIZE", "7");
            jail.set_env("SPINDLE_POOL_ACQUIRE_TIMEOUT_MS", "250");
            jail.set_env("SPINDLE_STORAGE_DATABASE_PATH", "/tmp/from-env.db");
            jail.set_env("SPINDLE_QUEUE_MAX_ATTEMPTS", "5");

            let config = load_config_from_path(Path::new("does-not-exist.toml"))?;
            assert_eq!(config.pool.size, 7);
            assert_eq!(config.pool.acquire_timeout_ms, 250);
            assert_eq!(config.storage.database_path, "/tmp/from-env.db");
            assert_eq!(config.queue.max_attempts, 5);
            Ok(())
        });
    }

    #[test]
    fn local_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                LOCAL_CONFIG_FILE,
                r#"
[pool]
size = 2

[bridge]
max_in_flight = 3
"#,
            )?;

            let config = load_config()?;
            assert_eq!(config.pool.size, 2);
            assert_eq!(config.bridge.max_in_flight, 3);
            assert_eq!(config.queue.batch_size, 64);
            Ok(())
        });
    }
}
