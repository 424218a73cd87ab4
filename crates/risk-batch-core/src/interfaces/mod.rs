// crates/risk-batch-core/src/interfaces/mod.rs
// ============================================================================
// Module: Risk Batch Interfaces
// Description: Backend-agnostic writer, master, and resolver traits.
// Purpose: Define the seams between cycle producers, the writer, and stores.
// Dependencies: crate::core, thiserror
// ============================================================================

//! ## Overview
//! [`BatchRunWriter`] is the single-threaded writer contract implemented by
//! stores. [`BatchRunMaster`] is the thread-safe facade handed to cycle
//! producers; it is implemented by the single-writer serializer.
//! [`TargetResolver`] and [`ComputeFailureResolver`] are the collaborators
//! the write path consults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::core::ComputationTargetSpecification;
use crate::core::ComputeFailureId;
use crate::core::ComputeFailureKey;
use crate::core::ComputedValue;
use crate::core::CycleMetadata;
use crate::core::MarketDataId;
use crate::core::MarketDataValue;
use crate::core::ResultFragment;
use crate::core::RiskRun;
use crate::core::RunCreationMode;
use crate::core::RunId;
use crate::core::SnapshotMode;
use crate::core::UniqueId;
use crate::core::VersionCorrection;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Batch writer errors.
///
/// # Invariants
/// - `Configuration` is fatal for the requested operation and nothing from
///   that operation is committed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// Conflicting or invalid run configuration.
    #[error("batch configuration error: {0}")]
    Configuration(String),
    /// Referenced run or snapshot does not exist.
    #[error("batch entity not found: {0}")]
    NotFound(String),
    /// Store failure after retries were exhausted.
    #[error("batch store error: {0}")]
    Store(String),
    /// Invalid request data.
    #[error("batch invalid data: {0}")]
    Invalid(String),
    /// The writer worker is no longer accepting work.
    #[error("batch writer unavailable: {0}")]
    Unavailable(String),
    /// A serialized unit of work failed.
    #[error("batch task failed: {0}")]
    Task(Box<Self>),
}

impl BatchError {
    /// Returns the innermost error, unwrapping serialized task failures.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Task(inner) => inner.root(),
            other => other,
        }
    }
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Single-threaded batch run writer.
///
/// Implementations keep per-run caches and assume exclusive access; callers
/// needing concurrency wrap the writer in the single-writer serializer.
pub trait BatchRunWriter {
    /// Creates, reuses, or overwrites the run for `cycle` per `creation_mode`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Configuration`] on a parameter mismatch in
    /// [`RunCreationMode::Auto`] or a missing run in
    /// [`RunCreationMode::ReuseExisting`].
    fn start_risk_run(
        &mut self,
        cycle: &CycleMetadata,
        parameters: &BTreeMap<String, String>,
        creation_mode: RunCreationMode,
        snapshot_mode: SnapshotMode,
    ) -> Result<RiskRun, BatchError>;

    /// Marks the run complete and discards its caches.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the run is unknown or the store fails.
    fn end_risk_run(&mut self, run_id: RunId) -> Result<(), BatchError>;

    /// Persists one result fragment for a started run.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the run was not started or the store fails.
    fn add_job_results(&mut self, run_id: RunId, fragment: &ResultFragment)
    -> Result<(), BatchError>;

    /// Returns the snapshot with `base_id`, creating it when absent.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the store fails.
    fn create_market_data(&mut self, base_id: &UniqueId) -> Result<MarketDataId, BatchError>;

    /// Adds values to a snapshot, ignoring duplicates and snapshot bundles.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the snapshot is unknown or the store fails.
    fn add_values_to_market_data(
        &mut self,
        market_data_id: MarketDataId,
        values: &[ComputedValue],
    ) -> Result<(), BatchError>;

    /// Deletes a snapshot and its values.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the store fails.
    fn delete_market_data(&mut self, market_data_id: MarketDataId) -> Result<(), BatchError>;

    /// Returns the stored values of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the snapshot is unknown or the store fails.
    fn market_data_values(
        &mut self,
        market_data_id: MarketDataId,
    ) -> Result<Vec<MarketDataValue>, BatchError>;

    /// Returns a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NotFound`] when the run does not exist.
    fn risk_run(&mut self, run_id: RunId) -> Result<RiskRun, BatchError>;

    /// Returns every stored run, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the store fails.
    fn risk_runs(&mut self) -> Result<Vec<RiskRun>, BatchError>;

    /// Deletes a run and every fact row recorded for it.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NotFound`] when the run does not exist.
    fn delete_risk_run(&mut self, run_id: RunId) -> Result<(), BatchError>;
}

// ============================================================================
// SECTION: Master Facade
// ============================================================================

/// Thread-safe batch run facade used by cycle producers.
///
/// `start_risk_run`, `create_market_data`, and the read operations block for
/// their result. The remaining writes are queued and their failures logged.
pub trait BatchRunMaster: Send + Sync {
    /// Starts a run; blocks until the run is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Task`] wrapping the writer failure.
    fn start_risk_run(
        &self,
        cycle: CycleMetadata,
        parameters: BTreeMap<String, String>,
        creation_mode: RunCreationMode,
        snapshot_mode: SnapshotMode,
    ) -> Result<RiskRun, BatchError>;

    /// Queues the end of a run.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when the worker has stopped.
    fn end_risk_run(&self, run_id: RunId) -> Result<(), BatchError>;

    /// Queues a result fragment.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when the worker has stopped.
    fn add_job_results(&self, run_id: RunId, fragment: ResultFragment) -> Result<(), BatchError>;

    /// Creates or gets a snapshot; blocks for the id.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Task`] wrapping the writer failure.
    fn create_market_data(&self, base_id: UniqueId) -> Result<MarketDataId, BatchError>;

    /// Queues values for a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when the worker has stopped.
    fn add_values_to_market_data(
        &self,
        market_data_id: MarketDataId,
        values: Vec<ComputedValue>,
    ) -> Result<(), BatchError>;

    /// Queues deletion of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when the worker has stopped.
    fn delete_market_data(&self, market_data_id: MarketDataId) -> Result<(), BatchError>;

    /// Returns the stored values of a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Task`] wrapping the writer failure.
    fn market_data_values(
        &self,
        market_data_id: MarketDataId,
    ) -> Result<Vec<MarketDataValue>, BatchError>;

    /// Returns a run by id.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Task`] wrapping the writer failure.
    fn risk_run(&self, run_id: RunId) -> Result<RiskRun, BatchError>;

    /// Returns every stored run.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Task`] wrapping the writer failure.
    fn risk_runs(&self) -> Result<Vec<RiskRun>, BatchError>;

    /// Deletes a run; blocks until the deletion commits.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Task`] wrapping the writer failure.
    fn delete_risk_run(&self, run_id: RunId) -> Result<(), BatchError>;
}

// ============================================================================
// SECTION: Target Resolution
// ============================================================================

/// Target capability exposing descriptive key/value properties.
pub trait DescribableTarget {
    /// Returns the properties to persist for the target.
    fn properties(&self) -> BTreeMap<String, String>;
}

/// Resolved computation target.
pub trait ComputationTarget: Send + Sync {
    /// Returns the target's specification.
    fn specification(&self) -> &ComputationTargetSpecification;

    /// Returns the describable view of the target, when it has one.
    fn as_describable(&self) -> Option<&dyn DescribableTarget> {
        None
    }
}

/// Resolves target specifications into targets.
pub trait TargetResolver: Send + Sync {
    /// Resolves `specification` as of `version_correction`.
    ///
    /// Returns `Ok(None)` when the target is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when resolution fails; the write path logs and
    /// continues.
    fn resolve(
        &self,
        specification: &ComputationTargetSpecification,
        version_correction: &VersionCorrection,
    ) -> Result<Option<Arc<dyn ComputationTarget>>, BatchError>;
}

/// Resolver that knows no targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTargetResolver;

impl TargetResolver for NullTargetResolver {
    fn resolve(
        &self,
        _specification: &ComputationTargetSpecification,
        _version_correction: &VersionCorrection,
    ) -> Result<Option<Arc<dyn ComputationTarget>>, BatchError> {
        Ok(None)
    }
}

// ============================================================================
// SECTION: Compute Failure Resolution
// ============================================================================

/// Resolves compute failure signatures into interned ids.
pub trait ComputeFailureResolver {
    /// Returns the id for `key`, interning it when first seen.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the backing store fails.
    fn resolve(&mut self, key: &ComputeFailureKey) -> Result<ComputeFailureId, BatchError>;
}
