// crates/risk-batch-core/src/runtime/converter.rs
// ============================================================================
// Module: Result Conversion
// Description: Flattens result values into named numeric rows.
// Purpose: Map each supported value type onto storable scalar components.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! Scalars keep the value name. Vectors expand to `name[i]`, labelled
//! vectors and snapshot bundles to `name[label]`, and matrices to
//! `name[i][j]`. Magnitudes below [`DATABASE_PRECISION`] are stored as zero.
//! Text and missing values have no numeric form and are recorded as failures.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ResultValue;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Smallest magnitude stored without clamping to zero.
pub const DATABASE_PRECISION: f64 = 1e-300;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Reasons a value cannot be stored numerically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// The value type has no numeric form.
    #[error("no converter for value of type {0}")]
    Unsupported(&'static str),
    /// A component is NaN or infinite.
    #[error("non-finite component {0}")]
    NonFinite(String),
}

impl ConversionError {
    /// Returns the class label recorded with the derived compute failure.
    #[must_use]
    pub const fn class_name(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "UnsupportedValueType",
            Self::NonFinite(_) => "NonFiniteValue",
        }
    }
}

// ============================================================================
// SECTION: Conversion
// ============================================================================

/// One storable component of a value.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    /// Component name.
    pub name: String,
    /// Component value after precision clamping.
    pub value: f64,
}

/// Converts `value` into named components keyed off `value_name`.
///
/// # Errors
///
/// Returns [`ConversionError`] when the type has no numeric form or a
/// component is not finite.
pub fn convert_value(
    value_name: &str,
    value: &ResultValue,
) -> Result<Vec<NamedValue>, ConversionError> {
    let raw: Vec<(String, f64)> = match value {
        ResultValue::Double(number) => vec![(value_name.to_string(), *number)],
        ResultValue::Vector(numbers) => numbers
            .iter()
            .enumerate()
            .map(|(index, number)| (format!("{value_name}[{index}]"), *number))
            .collect(),
        ResultValue::LabelledVector(entries) => entries
            .iter()
            .map(|(label, number)| (format!("{value_name}[{label}]"), *number))
            .collect(),
        ResultValue::Matrix(rows) => rows
            .iter()
            .enumerate()
            .flat_map(|(row_index, row)| {
                row.iter().enumerate().map(move |(column_index, number)| {
                    (format!("{value_name}[{row_index}][{column_index}]"), *number)
                })
            })
            .collect(),
        ResultValue::SnapshotBundle(entries) => entries
            .iter()
            .map(|(key, number)| (format!("{value_name}[{key}]"), *number))
            .collect(),
        ResultValue::Text(_) | ResultValue::Missing => {
            return Err(ConversionError::Unsupported(value.type_name()));
        }
    };
    raw.into_iter()
        .map(|(name, number)| {
            if number.is_finite() {
                Ok(NamedValue {
                    name,
                    value: ensure_database_precision(number),
                })
            } else {
                Err(ConversionError::NonFinite(name))
            }
        })
        .collect()
}

/// Clamps magnitudes below [`DATABASE_PRECISION`] to zero.
#[must_use]
pub fn ensure_database_precision(value: f64) -> f64 {
    if value.abs() < DATABASE_PRECISION { 0.0 } else { value }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Test-only assertions favor direct unwrap for clarity.")]
mod tests {
    use super::ConversionError;
    use super::convert_value;
    use super::ensure_database_precision;
    use crate::core::ResultValue;

    #[test]
    fn matrix_cells_expand_row_major() {
        let rows = convert_value("Delta", &ResultValue::Matrix(vec![vec![1.0, 2.0], vec![3.0]]))
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, ["Delta[0][0]", "Delta[0][1]", "Delta[1][0]"]);
    }

    #[test]
    fn snapshot_bundle_entries_are_keyed_by_label() {
        let bundle = ResultValue::SnapshotBundle(
            [("USD".to_string(), 1.5), ("EUR".to_string(), 0.5)].into_iter().collect(),
        );
        let rows = convert_value("Curve", &bundle).unwrap();
        let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, ["Curve[EUR]", "Curve[USD]"]);
    }

    #[test]
    fn tiny_magnitudes_clamp_to_zero() {
        assert!(ensure_database_precision(1e-301).abs() < f64::EPSILON);
        assert!(ensure_database_precision(-1e-301).abs() < f64::EPSILON);
        assert!((ensure_database_precision(1e-299) - 1e-299).abs() < f64::EPSILON);
    }

    #[test]
    fn text_and_non_finite_values_are_rejected() {
        assert_eq!(
            convert_value("Name", &ResultValue::Text("x".to_string())),
            Err(ConversionError::Unsupported("Text"))
        );
        assert_eq!(
            convert_value("PV", &ResultValue::Vector(vec![1.0, f64::NAN])),
            Err(ConversionError::NonFinite("PV[1]".to_string()))
        );
    }
}
