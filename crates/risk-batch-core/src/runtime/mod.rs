// crates/risk-batch-core/src/runtime/mod.rs
// ============================================================================
// Module: Risk Batch Runtime
// Description: Store-agnostic write path helpers and the writer facade.
// Purpose: Share failure attribution, conversion, and serialization logic.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules hold the parts of the write path that do not depend on a
//! particular store: failure cause aggregation, value conversion, the
//! single-writer serializer, and the cycle listener.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod converter;
pub mod failure_causes;
pub mod listener;
pub mod serializer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use converter::ConversionError;
pub use converter::DATABASE_PRECISION;
pub use converter::NamedValue;
pub use converter::convert_value;
pub use converter::ensure_database_precision;
pub use failure_causes::FailureCauses;
pub use failure_causes::aggregate_failure_causes;
pub use listener::BatchRunListener;
pub use serializer::SingleWriterSerializer;
