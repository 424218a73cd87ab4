// crates/risk-batch-core/src/runtime/failure_causes.rs
// ============================================================================
// Module: Failure Cause Aggregation
// Description: Transitive root-cause sets for failed values in a fragment.
// Purpose: Attribute every failed value to the compute failures behind it.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Walks a fragment in delivery order. A value whose function raised an
//! error is caused by that error. A value with missing inputs inherits the
//! causes of each missing input already seen; an input with no known cause
//! gets a synthesized "missing input" failure. Because inputs are delivered
//! before their dependents, a single pass yields the transitive closure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::HashMap;

use crate::core::ComputeFailureId;
use crate::core::ComputeFailureKey;
use crate::core::InvocationResult;
use crate::core::ResultFragment;
use crate::core::ValueSpecification;
use crate::interfaces::BatchError;
use crate::interfaces::ComputeFailureResolver;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Root failure-cause ids per failed value specification.
pub type FailureCauses = HashMap<ValueSpecification, BTreeSet<ComputeFailureId>>;

// ============================================================================
// SECTION: Aggregation
// ============================================================================

/// Computes root failure causes for every failed value in `fragment`.
///
/// # Errors
///
/// Returns [`BatchError`] when `resolver` cannot intern a failure.
pub fn aggregate_failure_causes<R>(
    fragment: &ResultFragment,
    resolver: &mut R,
) -> Result<FailureCauses, BatchError>
where
    R: ComputeFailureResolver + ?Sized,
{
    let mut causes = FailureCauses::new();
    for item in fragment.all_values() {
        match item.invocation_result {
            InvocationResult::FunctionThrewException => {
                let key = ComputeFailureKey::from_execution_log(
                    &item.specification.function_id,
                    &item.execution_log,
                );
                let id = resolver.resolve(&key)?;
                causes.entry(item.specification.clone()).or_default().insert(id);
            }
            InvocationResult::MissingInputs => {
                let mut collected = BTreeSet::new();
                for input in &item.missing_inputs {
                    if let Some(known) = causes.get(input) {
                        collected.extend(known.iter().copied());
                    } else {
                        let id = resolver.resolve(&ComputeFailureKey::missing_input(input))?;
                        collected.insert(id);
                    }
                }
                causes.entry(item.specification.clone()).or_default().extend(collected);
            }
            InvocationResult::Success | InvocationResult::Suppressed => {}
        }
    }
    Ok(causes)
}
