// crates/risk-batch-store-sqlite/src/lib.rs
// ============================================================================
// Module: Risk Batch SQLite Store Library
// Description: Public API surface for the SQLite batch run writer.
// Purpose: Expose the writer, its configuration, and read-side records.
// Dependencies: crate::{store, writer, queries, ingest, lifecycle}
// ============================================================================

//! ## Overview
//! Relational persistence for batch risk runs. Reference data is interned
//! once per distinct tuple, compute failures once per signature, and fact
//! rows reference both. All ids come from one shared sequence reserved
//! inside the writing transaction.
//!
//! Security posture: database contents are untrusted and decoded fail-closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod failure_cache;
mod ingest;
mod interner;
mod journal;
mod lifecycle;
mod market_data;
mod queries;
mod repository;
mod status;
mod store;
mod writer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use failure_cache::ComputeFailureCache;
pub use ingest::BatchWriteOutcome;
pub use interner::ReferenceDataInterner;
pub use lifecycle::RunCaches;
pub use queries::StoredRiskFailure;
pub use queries::StoredRiskValue;
pub use queries::StoredRunStatus;
pub use status::StatusTracker;
pub use store::MAX_RETRIES;
pub use store::MAX_RETRY_BACKOFF_MS;
pub use store::SqliteBatchStoreConfig;
pub use store::SqliteBatchStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
pub use writer::SqliteBatchRunWriter;
