// crates/risk-batch-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payload.
// Purpose: Deterministic example for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for the risk batch configuration. It parses and
//! validates against the current model.

/// Returns a canonical example `risk-batch.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[store]
path = "risk-batch.db"
journal_mode = "wal"
sync_mode = "full"
busy_timeout_ms = 5000
max_retries = 3
retry_backoff_ms = 25

[writer]
creation_mode = "auto"
snapshot_mode = "write_through"

[writer.parameters]
desk = "rates"
"#,
    )
}
