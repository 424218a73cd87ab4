// crates/risk-batch-core/src/core/status.rs
// ============================================================================
// Module: Risk Batch Status
// Description: Per (configuration, target) run status.
// Purpose: Define the status values tracked during a run.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Status is tracked per calculation configuration and computation target.
//! Untracked pairs read as [`RunStatus::NotRunning`].

use serde::Deserialize;
use serde::Serialize;

/// Status of one (configuration, target) pair within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing recorded yet.
    #[default]
    NotRunning,
    /// Every recorded value succeeded.
    Success,
    /// At least one value failed.
    Failure,
}

impl RunStatus {
    /// Returns the stored ordinal.
    #[must_use]
    pub const fn ordinal(self) -> i64 {
        match self {
            Self::NotRunning => 0,
            Self::Success => 1,
            Self::Failure => 2,
        }
    }

    /// Parses a stored ordinal.
    #[must_use]
    pub const fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::NotRunning),
            1 => Some(Self::Success),
            2 => Some(Self::Failure),
            _ => None,
        }
    }
}
