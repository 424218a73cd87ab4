// crates/risk-batch-config/src/config.rs
// ============================================================================
// Module: Risk Batch Configuration
// Description: Configuration loading and validation for the batch writer.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: risk-batch-core, risk-batch-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed.
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use risk_batch_core::RunCreationMode;
use risk_batch_core::SnapshotMode;
use risk_batch_store_sqlite::SqliteBatchStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Limits and Defaults
// ============================================================================

/// Default config file name.
const DEFAULT_CONFIG_NAME: &str = "risk-batch.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "RISK_BATCH_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of run parameters.
pub(crate) const MAX_RUN_PARAMETERS: usize = 256;
/// Maximum length of a run parameter key or value.
pub(crate) const MAX_PARAMETER_LENGTH: usize = 1024;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Risk batch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskBatchConfig {
    /// `SQLite` store configuration.
    pub store: SqliteBatchStoreConfig,
    /// Writer defaults.
    #[serde(default)]
    pub writer: WriterConfig,
}

impl RiskBatchConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate().map_err(|err| ConfigError::Invalid(format!("store: {err}")))?;
        self.writer.validate()
    }
}

/// Defaults applied when the writer starts runs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WriterConfig {
    /// Run creation mode.
    #[serde(default)]
    pub creation_mode: RunCreationMode,
    /// Snapshot mode.
    #[serde(default)]
    pub snapshot_mode: SnapshotMode,
    /// Parameters recorded with every run.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl WriterConfig {
    /// Validates writer defaults.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.len() > MAX_RUN_PARAMETERS {
            return Err(ConfigError::Invalid(format!(
                "writer.parameters exceeds {MAX_RUN_PARAMETERS} entries"
            )));
        }
        for (key, value) in &self.parameters {
            if key.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "writer.parameters keys must be non-empty".to_string(),
                ));
            }
            if key.len() > MAX_PARAMETER_LENGTH || value.len() > MAX_PARAMETER_LENGTH {
                return Err(ConfigError::Invalid(format!(
                    "writer.parameters entry {key} exceeds max length"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the argument or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
