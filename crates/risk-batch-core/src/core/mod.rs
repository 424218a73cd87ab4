// crates/risk-batch-core/src/core/mod.rs
// ============================================================================
// Module: Risk Batch Core Types
// Description: Canonical risk run, value, and failure structures.
// Purpose: Provide stable types shared by the writer, store, and listener.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Risk batch core types describe runs, computed values, market data, and
//! compute failures. They are store-agnostic; the relational mapping lives
//! in the store crate.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod failure;
pub mod identifiers;
pub mod results;
pub mod run;
pub mod status;
pub mod values;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use failure::ComputeFailure;
pub use failure::ComputeFailureKey;
pub use failure::NO_LOGGING_INFORMATION;
pub use failure::NOT_APPLICABLE;
pub use identifiers::ComputeFailureId;
pub use identifiers::ComputeNodeId;
pub use identifiers::FunctionId;
pub use identifiers::MarketDataId;
pub use identifiers::RunId;
pub use identifiers::UniqueId;
pub use results::ConfigurationResults;
pub use results::MarketData;
pub use results::MarketDataValue;
pub use results::ResultFragment;
pub use run::ConfigurationMetadata;
pub use run::CycleMetadata;
pub use run::RiskRun;
pub use run::RunCreationMode;
pub use run::SnapshotMode;
pub use run::VersionCorrection;
pub use status::RunStatus;
pub use values::ComputationTargetSpecification;
pub use values::ComputationTargetType;
pub use values::ComputedValue;
pub use values::ComputedValueResult;
pub use values::ExecutionLog;
pub use values::InvocationResult;
pub use values::ResultValue;
pub use values::ValueProperties;
pub use values::ValueRequirement;
pub use values::ValueSpecification;
