// crates/risk-batch-core/tests/proptest_value_properties.rs
// ============================================================================
// Module: Value Property Property-Based Tests
// Description: Property tests for synthesized property forms and conversion.
// Purpose: Guard the interning key and row expansion across wide inputs.
// ============================================================================

//! Property-based tests for property synthesis and value conversion.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use proptest::prelude::*;
use risk_batch_core::ResultValue;
use risk_batch_core::ValueProperties;
use risk_batch_core::runtime::DATABASE_PRECISION;
use risk_batch_core::runtime::convert_value;

/// Names and values drawn over the synthesis delimiters.
fn token_strategy() -> impl Strategy<Value = String> {
    "[ab\\\\{}\\[\\]=,]{0,4}"
}

fn pairs_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec((token_strategy(), token_strategy()), 0 .. 6)
}

fn build(pairs: &[(String, String)]) -> ValueProperties {
    pairs.iter().fold(ValueProperties::new(), |properties, (name, value)| {
        properties.with(name.clone(), value.clone())
    })
}

proptest! {
    #[test]
    fn synthesis_ignores_insertion_order(pairs in pairs_strategy()) {
        let forward = build(&pairs);
        let reversed: Vec<(String, String)> = pairs.iter().rev().cloned().collect();
        let backward = build(&reversed);
        prop_assert_eq!(forward.synthesize(), backward.synthesize());
    }

    #[test]
    fn synthesis_distinguishes_distinct_property_sets(
        left in pairs_strategy(),
        right in pairs_strategy(),
    ) {
        let left = build(&left);
        let right = build(&right);
        prop_assert_eq!(left == right, left.synthesize() == right.synthesize());
    }

    #[test]
    fn vectors_expand_to_one_row_per_element(
        numbers in prop::collection::vec(
            any::<f64>().prop_filter("finite", |value| value.is_finite()),
            0 .. 16,
        ),
    ) {
        let rows = convert_value("Delta", &ResultValue::Vector(numbers.clone())).unwrap();
        prop_assert_eq!(rows.len(), numbers.len());
        for (index, (row, number)) in rows.iter().zip(&numbers).enumerate() {
            prop_assert_eq!(&row.name, &format!("Delta[{index}]"));
            if number.abs() < DATABASE_PRECISION {
                prop_assert!(row.value.abs() < f64::EPSILON);
            } else {
                prop_assert_eq!(row.value.to_bits(), number.to_bits());
            }
        }
    }
}
