// crates/risk-batch-core/src/core/run.rs
// ============================================================================
// Module: Risk Batch Runs
// Description: Risk run records, creation modes, and cycle metadata.
// Purpose: Describe a persisted run and the cycle that starts it.
// Dependencies: crate::core::{identifiers, values}, serde, time
// ============================================================================

//! ## Overview
//! A [`RiskRun`] is created (or reused) when a computation cycle starts and
//! is marked complete when it ends. [`CycleMetadata`] identifies the cycle
//! and lists the reference data known up front, which warms the per-run
//! caches.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use crate::core::identifiers::MarketDataId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::UniqueId;
use crate::core::values::ComputationTargetSpecification;
use crate::core::values::ValueRequirement;
use crate::core::values::ValueSpecification;

// ============================================================================
// SECTION: Modes
// ============================================================================

/// How `start_risk_run` treats a pre-existing run with the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunCreationMode {
    /// Restart a matching run, failing if its parameters differ; create when none matches.
    #[default]
    Auto,
    /// Delete any matching run, then create.
    CreateNewOverwrite,
    /// Always create.
    CreateNew,
    /// Reuse a matching run; fail when none exists.
    ReuseExisting,
}

/// How the run interacts with its market data snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// Market data is not touched.
    #[default]
    None,
    /// Market data is read from the snapshot.
    Read,
    /// Market data seen in results is written to the snapshot.
    WriteThrough,
}

impl SnapshotMode {
    /// Returns the stored label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::WriteThrough => "write_through",
        }
    }

    /// Parses a stored label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "none" => Some(Self::None),
            "read" => Some(Self::Read),
            "write_through" => Some(Self::WriteThrough),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Version Correction
// ============================================================================

/// Bitemporal view of reference data; an absent instant means "latest".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VersionCorrection {
    /// Version-as-of instant.
    pub version_as_of: Option<OffsetDateTime>,
    /// Corrected-to instant.
    pub corrected_to: Option<OffsetDateTime>,
}

impl VersionCorrection {
    /// Returns the "latest" version correction.
    #[must_use]
    pub const fn latest() -> Self {
        Self {
            version_as_of: None,
            corrected_to: None,
        }
    }

    /// Returns a version correction fixed at the given instants.
    #[must_use]
    pub const fn of(version_as_of: OffsetDateTime, corrected_to: OffsetDateTime) -> Self {
        Self {
            version_as_of: Some(version_as_of),
            corrected_to: Some(corrected_to),
        }
    }
}

// ============================================================================
// SECTION: Cycle Metadata
// ============================================================================

/// Reference data a calculation configuration is known to produce.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationMetadata {
    /// Terminal output specifications and the requirements they satisfy.
    pub terminal_outputs: BTreeMap<ValueSpecification, BTreeSet<ValueRequirement>>,
    /// Computation targets in the dependency graph.
    pub targets: BTreeSet<ComputationTargetSpecification>,
}

/// Identity and reference data of a starting computation cycle.
///
/// # Invariants
/// - `(valuation_time, version_correction, view_definition_id,
///   market_data_snapshot_id)` identifies a run for creation-mode matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleMetadata {
    /// View definition being computed.
    pub view_definition_id: UniqueId,
    /// Market data snapshot base identifier.
    pub market_data_snapshot_id: UniqueId,
    /// Valuation time of the cycle.
    pub valuation_time: OffsetDateTime,
    /// Version correction used to resolve reference data.
    pub version_correction: VersionCorrection,
    /// Optional cycle name.
    pub name: Option<String>,
    /// Per calculation configuration metadata keyed by configuration name.
    pub configurations: BTreeMap<String, ConfigurationMetadata>,
}

// ============================================================================
// SECTION: Risk Run
// ============================================================================

/// A persisted batch run.
///
/// # Invariants
/// - `end_instant` is set and `complete` is true only after the run ends.
/// - Never mutated after `end_risk_run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskRun {
    /// Store-assigned run id.
    pub id: RunId,
    /// View definition being computed.
    pub view_definition_id: UniqueId,
    /// Market data snapshot used by the run.
    pub market_data_id: MarketDataId,
    /// Base identifier of the market data snapshot.
    pub market_data_base_id: UniqueId,
    /// Valuation time.
    pub valuation_time: OffsetDateTime,
    /// Version correction.
    pub version_correction: VersionCorrection,
    /// Creation instant.
    pub create_instant: OffsetDateTime,
    /// Instant of the latest (re)start.
    pub start_instant: OffsetDateTime,
    /// End instant, once ended.
    pub end_instant: Option<OffsetDateTime>,
    /// Number of restarts.
    pub num_restarts: u32,
    /// Completion flag.
    pub complete: bool,
    /// Snapshot mode.
    pub snapshot_mode: SnapshotMode,
    /// Optional run name.
    pub name: Option<String>,
    /// Run parameters.
    pub parameters: BTreeMap<String, String>,
}
