//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

const TARGET_SSL_MODES: &[&str] = &["disable", "require", "verify-ca", "verify-full"];
const SOURCE_SSL_MODES: &[&str] = &[
    "disabled",
    "preferred",
    "required",
    "verify-ca",
    "verify-full",
];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.sources.is_empty() {
        return Err(MigrateError::Config(
            "at least one source connection is required".into(),
        ));
    }
    for (name, source) in &config.sources {
        if source.host.is_empty() {
            return Err(MigrateError::Config(format!("sources.{}.host is required", name)));
        }
        if source.database.is_empty() {
            return Err(MigrateError::Config(format!(
                "sources.{}.database is required",
                name
            )));
        }
        if source.user.is_empty() {
            return Err(MigrateError::Config(format!("sources.{}.user is required", name)));
        }
        if !SOURCE_SSL_MODES.contains(&source.ssl_mode.to_lowercase().as_str()) {
            return Err(MigrateError::Config(format!(
                "sources.{}.ssl_mode must be one of {}, got '{}'",
                name,
                SOURCE_SSL_MODES.join(", "),
                source.ssl_mode
            )));
        }
    }

    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if !TARGET_SSL_MODES.contains(&config.target.ssl_mode.to_lowercase().as_str()) {
        return Err(MigrateError::Config(format!(
            "target.ssl_mode must be one of {}, got '{}'",
            TARGET_SSL_MODES.join(", "),
            config.target.ssl_mode
        )));
    }

    let rate = config.migration.max_error_rate;
    if !(0.0..=1.0).contains(&rate) {
        return Err(MigrateError::Config(format!(
            "migration.max_error_rate must be between 0 and 1, got {}",
            rate
        )));
    }
    if config.migration.copy_batch_rows == 0 {
        return Err(MigrateError::Config(
            "migration.copy_batch_rows must be at least 1".into(),
        ));
    }
    if config.migration.max_pg_connections == 0 {
        return Err(MigrateError::Config(
            "migration.max_pg_connections must be at least 1".into(),
        ));
    }

    Ok(())
}
