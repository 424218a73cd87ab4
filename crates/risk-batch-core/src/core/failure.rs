// crates/risk-batch-core/src/core/failure.rs
// ============================================================================
// Module: Risk Batch Compute Failures
// Description: Normalized compute failure signatures.
// Purpose: Identify distinct (function, error class, message, trace) tuples.
// Dependencies: crate::core::{identifiers, values}
// ============================================================================

//! ## Overview
//! A [`ComputeFailureKey`] is the normalized signature of a computation
//! error. Absent diagnostics normalize to [`NO_LOGGING_INFORMATION`] so that
//! signatures with missing metadata still compare equal. Present fields are
//! kept verbatim: whitespace and trailing newlines are part of the signature.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::identifiers::ComputeFailureId;
use crate::core::identifiers::FunctionId;
use crate::core::values::ExecutionLog;
use crate::core::values::ValueSpecification;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Placeholder recorded when a failure carries no diagnostics.
pub const NO_LOGGING_INFORMATION: &str = "No logging information available";
/// Placeholder for fields that do not apply to a synthesized failure.
pub const NOT_APPLICABLE: &str = "N/A";

// ============================================================================
// SECTION: Failure Keys
// ============================================================================

/// Normalized compute failure signature.
///
/// # Invariants
/// - Absent values are replaced with placeholders; present values are
///   stored exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputeFailureKey {
    /// Function that failed.
    pub function_id: String,
    /// Error class.
    pub exception_class: String,
    /// Error message.
    pub exception_message: String,
    /// Stack trace or detail.
    pub stack_trace: String,
}

impl ComputeFailureKey {
    /// Creates a key, replacing absent fields with the placeholder.
    #[must_use]
    pub fn new(
        function_id: impl Into<String>,
        exception_class: Option<&str>,
        exception_message: Option<&str>,
        stack_trace: Option<&str>,
    ) -> Self {
        Self {
            function_id: function_id.into(),
            exception_class: normalize(exception_class),
            exception_message: normalize(exception_message),
            stack_trace: normalize(stack_trace),
        }
    }

    /// Creates the key for a function that raised an error.
    #[must_use]
    pub fn from_execution_log(function_id: &FunctionId, log: &ExecutionLog) -> Self {
        Self::new(
            function_id.as_str(),
            log.exception_class.as_deref(),
            log.exception_message.as_deref(),
            log.exception_stack_trace.as_deref(),
        )
    }

    /// Creates the key synthesized for a missing input without a known cause.
    #[must_use]
    pub fn missing_input(input: &ValueSpecification) -> Self {
        let message = format!("Missing input {input}");
        Self::new(
            input.function_id.as_str(),
            Some(NOT_APPLICABLE),
            Some(&message),
            Some(NOT_APPLICABLE),
        )
    }
}

/// Returns the field verbatim or the no-logging placeholder when absent.
fn normalize(value: Option<&str>) -> String {
    value.map_or_else(|| NO_LOGGING_INFORMATION.to_string(), str::to_string)
}

/// Interned compute failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComputeFailure {
    /// Store-assigned id.
    pub id: ComputeFailureId,
    /// Normalized signature.
    pub key: ComputeFailureKey,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
