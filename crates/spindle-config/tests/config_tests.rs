// SPDX-FileCopyrightText: 2026 Spindle Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Spindle configuration system.

use proptest::prelude::*;
use spindle_config::diagnostic::ConfigError;
use spindle_config::model::SpindleConfig;
use spindle_config::validation::{MAX_POOL_SIZE, validate_config};
use spindle_config::{load_and_validate, load_and_validate_str, load_config_from_str};
use spindle_core::TransactionMode;

/// Valid TOML with all known fields deserializes successfully.
#[test]
fn valid_toml_deserializes_into_spindle_config() {
    let toml = r#"
[logging]
level = "debug"

[storage]
database_path = "/tmp/spindle-test.db"
wal_mode = false
busy_timeout_ms = 250

[pool]
size = 3
acquire_timeout_ms = 100
shutdown_timeout_ms = 1000
transaction_mode = "exclusive"

[bridge]
max_in_flight = 8

[queue]
max_attempts = 5
poll_interval_ms = 50
batch_size = 10
"#;

    let config = load_config_from_str(toml).expect("valid TOML should deserialize");
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.storage.database_path, "/tmp/spindle-test.db");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.storage.busy_timeout_ms, 250);
    assert_eq!(config.pool.size, 3);
    assert_eq!(config.pool.acquire_timeout_ms, 100);
    assert_eq!(config.pool.shutdown_timeout_ms, 1000);
    assert_eq!(config.pool.transaction_mode, TransactionMode::Exclusive);
    assert_eq!(config.bridge.max_in_flight, 8);
    assert_eq!(config.queue.max_attempts, 5);
    assert_eq!(config.queue.poll_interval_ms, 50);
    assert_eq!(config.queue.batch_size, 10);
}

/// Empty TOML yields the compiled defaults.
#[test]
fn empty_toml_uses_defaults() {
    let config = load_and_validate_str("").expect("defaults should validate");
    assert_eq!(config.pool.size, SpindleConfig::default().pool.size);
    assert_eq!(config.queue.max_attempts, 3);
}

/// Unknown field in [pool] is rejected with a suggestion.
#[test]
fn unknown_field_in_pool_suggests_correction() {
    let toml = r#"
[pool]
sise = 3
"#;

    let errors = load_and_validate_str(toml).expect_err("should reject unknown field");
    let unknown = errors
        .iter()
        .find_map(|e| match e {
            ConfigError::UnknownKey {
                key, suggestion, ..
            } => Some((key.clone(), suggestion.clone())),
            _ => None,
        })
        .expect("should produce an UnknownKey diagnostic");
    assert_eq!(unknown.0, "sise");
    assert_eq!(unknown.1.as_deref(), Some("size"));
}

/// Unknown top-level section is rejected.
#[test]
fn unknown_section_is_rejected() {
    let toml = r#"
[telemetry]
enabled = true
"#;
    let err = load_config_from_str(toml).expect_err("should reject unknown section");
    let err_str = format!("{err}");
    assert!(
        err_str.contains("unknown field") || err_str.contains("telemetry"),
        "error should mention the unknown section, got: {err_str}"
    );
}

/// Wrong value types produce InvalidType diagnostics.
#[test]
fn wrong_type_produces_invalid_type() {
    let toml = r#"
[pool]
size = "three"
"#;
    let errors = load_and_validate_str(toml).expect_err("should reject string size");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidType { key, .. } if key.contains("size"))),
        "expected InvalidType for pool.size, got: {errors:?}"
    );
}

/// An unknown transaction mode is reported, not silently defaulted.
#[test]
fn unknown_transaction_mode_is_rejected() {
    let toml = r#"
[pool]
transaction_mode = "optimistic"
"#;
    assert!(load_and_validate_str(toml).is_err());
}

/// Semantic validation runs after successful deserialization.
#[test]
fn validation_errors_surface_through_load() {
    let toml = r#"
[storage]
database_path = ":memory:"

[pool]
size = 2
"#;
    let errors = load_and_validate_str(toml).expect_err("in-memory pool of 2 is invalid");
    assert!(matches!(
        &errors[0],
        ConfigError::Validation { message } if message.contains(":memory:")
    ));
}

/// The full XDG + env path honors `SPINDLE_*` overrides.
#[test]
fn env_vars_override_files() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("spindle.toml", "[pool]\nsize = 2\n")?;
        jail.set_env("SPINDLE_POOL_SIZE", "5");
        jail.set_env("SPINDLE_LOGGING_LEVEL", "warn");

        let config = load_and_validate().expect("config should load");
        assert_eq!(config.pool.size, 5);
        assert_eq!(config.logging.level, "warn");
        Ok(())
    });
}

proptest! {
    /// Pool sizes validate exactly on 1..=MAX_POOL_SIZE.
    #[test]
    fn pool_size_bounds(size in 0usize..200) {
        let mut config = SpindleConfig::default();
        config.storage.database_path = "/tmp/prop.db".to_string();
        config.pool.size = size;
        let valid = validate_config(&config).is_ok();
        prop_assert_eq!(valid, (1..=MAX_POOL_SIZE).contains(&size));
    }
}
