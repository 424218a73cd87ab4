// crates/risk-batch-core/src/core/results.rs
// ============================================================================
// Module: Risk Batch Results
// Description: Result fragments and market data snapshot records.
// Purpose: Carry one cycle fragment's computed values into the writer.
// Dependencies: crate::core::{identifiers, values}
// ============================================================================

//! ## Overview
//! A [`ResultFragment`] groups computed values by calculation configuration,
//! preserving delivery order. Producers emit inputs before the values that
//! depend on them; failure cause aggregation relies on that order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::identifiers::MarketDataId;
use crate::core::identifiers::UniqueId;
use crate::core::values::ComputationTargetSpecification;
use crate::core::values::ComputedValue;
use crate::core::values::ComputedValueResult;

// ============================================================================
// SECTION: Fragments
// ============================================================================

/// Computed values of one calculation configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationResults {
    /// Calculation configuration name.
    pub configuration: String,
    /// Values in delivery order.
    pub values: Vec<ComputedValueResult>,
}

/// One incremental slice of a cycle's results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFragment {
    /// Per-configuration results in delivery order.
    pub configurations: Vec<ConfigurationResults>,
    /// Market data observed by the cycle.
    pub market_data: Vec<ComputedValue>,
}

impl ResultFragment {
    /// Creates an empty fragment.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            configurations: Vec::new(),
            market_data: Vec::new(),
        }
    }

    /// Appends a value under `configuration`, keeping delivery order.
    pub fn push(&mut self, configuration: &str, value: ComputedValueResult) {
        if let Some(existing) =
            self.configurations.iter_mut().find(|entry| entry.configuration == configuration)
        {
            existing.values.push(value);
        } else {
            self.configurations.push(ConfigurationResults {
                configuration: configuration.to_string(),
                values: vec![value],
            });
        }
    }

    /// Returns the fragment with `value` appended under `configuration`.
    #[must_use]
    pub fn with(mut self, configuration: &str, value: ComputedValueResult) -> Self {
        self.push(configuration, value);
        self
    }

    /// Returns every computed value across configurations, in order.
    pub fn all_values(&self) -> impl Iterator<Item = &ComputedValueResult> {
        self.configurations.iter().flat_map(|entry| entry.values.iter())
    }

    /// Returns true when the fragment carries no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.market_data.is_empty() && self.configurations.iter().all(|c| c.values.is_empty())
    }
}

// ============================================================================
// SECTION: Market Data
// ============================================================================

/// Persisted market data snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketData {
    /// Store-assigned id.
    pub id: MarketDataId,
    /// Base identifier.
    pub base_id: UniqueId,
}

/// One stored market data point.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketDataValue {
    /// Target the point belongs to.
    pub target: ComputationTargetSpecification,
    /// Field name.
    pub name: String,
    /// Numeric value.
    pub value: f64,
}
