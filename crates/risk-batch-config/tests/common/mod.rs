// crates/risk-batch-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for risk-batch-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use std::fs;
use std::path::PathBuf;

use risk_batch_config::RiskBatchConfig;
use tempfile::TempDir;

/// Parses a TOML string into a `RiskBatchConfig` for tests.
pub fn config_from_toml(toml_str: &str) -> Result<RiskBatchConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns a minimal config with only the store path set.
pub fn minimal_config() -> Result<RiskBatchConfig, toml::de::Error> {
    config_from_toml("[store]\npath = \"risk-batch.db\"\n")
}

/// Writes `bytes` to a config file inside `dir` and returns its path.
pub fn write_config(dir: &TempDir, bytes: &[u8]) -> Result<PathBuf, String> {
    let path = dir.path().join("risk-batch.toml");
    fs::write(&path, bytes).map_err(|err| err.to_string())?;
    Ok(path)
}
