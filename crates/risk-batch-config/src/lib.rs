// crates/risk-batch-config/src/lib.rs
// ============================================================================
// Module: Risk Batch Config Library
// Description: Canonical config model and validation for the batch writer.
// Purpose: Single source of truth for risk-batch.toml semantics.
// Dependencies: risk-batch-core, risk-batch-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `risk-batch-config` defines the configuration model for the batch run
//! writer: the `SQLite` store settings and the defaults used when runs are
//! started. Validation is strict and fail-closed.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
