//! Hardware configuration loading.
//!
//! Layers, later ones override earlier ones:
//! 1. Serde defaults
//! 2. The TOML file
//! 3. `STAGECTL_` environment variables, nested keys split on `__`
//!    (`STAGECTL_MOTION__TIMEOUT_MS=5000`)

use super::schema::HardwareConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "STAGECTL_";

/// Error types for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    /// File not found
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Parse error (invalid TOML or wrong types)
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Validation error
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    ValidationError(Vec<String>),
}

/// Load and validate a hardware configuration file with `STAGECTL_` overrides.
pub fn load_hardware_config(path: &Path) -> Result<HardwareConfig> {
    load_with_env_prefix(path, ENV_PREFIX)
}

/// Same as [`load_hardware_config`] with a custom environment prefix.
pub fn load_with_env_prefix(path: &Path, env_prefix: &str) -> Result<HardwareConfig> {
    if !path.exists() {
        return Err(ConfigLoadError::NotFound(path.display().to_string()).into());
    }
    debug!(path = %path.display(), "Loading hardware config");

    let config: HardwareConfig = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .map_err(|e| ConfigLoadError::ParseError(e.to_string()))
        .with_context(|| format!("Failed to load {}", path.display()))?;

    validate_hardware_config(&config)?;
    info!(
        path = %path.display(),
        stages = config.stages.len(),
        "Loaded hardware config"
    );
    Ok(config)
}

/// Parse and validate a configuration from a TOML string (no environment layer).
pub fn load_hardware_config_from_str(toml_content: &str) -> Result<HardwareConfig> {
    let config: HardwareConfig = Figment::new()
        .merge(Toml::string(toml_content))
        .extract()
        .map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
    validate_hardware_config(&config)?;
    Ok(config)
}

/// Cross-field checks that serde cannot express.
///
/// Driver-specific tables are checked later by each driver's factory.
pub fn validate_hardware_config(config: &HardwareConfig) -> Result<(), ConfigLoadError> {
    let mut errors = Vec::new();
    let mut ids = HashSet::new();

    for stage in &config.stages {
        if stage.id.trim().is_empty() {
            errors.push("stage id must not be empty".to_string());
        } else if !ids.insert(stage.id.as_str()) {
            errors.push(format!("duplicate stage id '{}'", stage.id));
        }
        if stage.driver.trim().is_empty() {
            errors.push(format!("stage '{}': driver must not be empty", stage.id));
        }
        if !stage.config.is_table() {
            errors.push(format!("stage '{}': config must be a table", stage.id));
        }

        for (label, values) in [("minimums", &stage.minimums), ("maximums", &stage.maximums)] {
            if let Some(values) = values {
                if values.iter().any(|v| v.is_infinite()) {
                    errors.push(format!(
                        "stage '{}': {label} must be finite (use nan for unbounded)",
                        stage.id
                    ));
                }
            }
        }

        if let (Some(mins), Some(maxs)) = (&stage.minimums, &stage.maximums) {
            if mins.len() != maxs.len() {
                errors.push(format!(
                    "stage '{}': {} minimums but {} maximums",
                    stage.id,
                    mins.len(),
                    maxs.len()
                ));
            }
            for (axis, (min, max)) in mins.iter().zip(maxs).enumerate() {
                if min > max {
                    errors.push(format!(
                        "stage '{}': axis {axis} minimum {min} exceeds maximum {max}",
                        stage.id
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigLoadError::ValidationError(errors))
    }
}
