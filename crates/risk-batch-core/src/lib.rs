// crates/risk-batch-core/src/lib.rs
// ============================================================================
// Module: Risk Batch Core Library
// Description: Public API surface for the risk batch core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Risk batch core models the output of a distributed risk computation
//! cycle and the contracts for persisting it. It is store-agnostic: the
//! relational write path lives in `risk-batch-store-sqlite`, which plugs in
//! through [`BatchRunWriter`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::core::*;

pub use interfaces::BatchError;
pub use interfaces::BatchRunMaster;
pub use interfaces::BatchRunWriter;
pub use interfaces::ComputationTarget;
pub use interfaces::ComputeFailureResolver;
pub use interfaces::DescribableTarget;
pub use interfaces::NullTargetResolver;
pub use interfaces::TargetResolver;
pub use runtime::BatchRunListener;
pub use runtime::SingleWriterSerializer;
