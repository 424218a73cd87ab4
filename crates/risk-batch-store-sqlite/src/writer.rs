// crates/risk-batch-store-sqlite/src/writer.rs
// ============================================================================
// Module: SQLite Batch Run Writer
// Description: BatchRunWriter implementation over a single SQLite connection.
// Purpose: Own the connection and per-run caches for the write path.
// Dependencies: risk-batch-core, rusqlite, time, tracing
// ============================================================================

//! ## Overview
//! [`SqliteBatchRunWriter`] is single-threaded: it holds one connection and
//! the caches of every started run. Each operation runs in its own retrying
//! `IMMEDIATE` transaction. Concurrent producers reach it through
//! `SingleWriterSerializer`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use risk_batch_core::BatchError;
use risk_batch_core::BatchRunWriter;
use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputedValue;
use risk_batch_core::CycleMetadata;
use risk_batch_core::MarketDataId;
use risk_batch_core::MarketDataValue;
use risk_batch_core::NullTargetResolver;
use risk_batch_core::ResultFragment;
use risk_batch_core::RiskRun;
use risk_batch_core::RunCreationMode;
use risk_batch_core::RunId;
use risk_batch_core::SnapshotMode;
use risk_batch_core::TargetResolver;
use risk_batch_core::UniqueId;
use rusqlite::Connection;
use time::OffsetDateTime;

use crate::ingest::BatchWriteOutcome;
use crate::ingest::add_fragment;
use crate::interner::ReferenceDataInterner;
use crate::lifecycle::RunCaches;
use crate::lifecycle::delete_run;
use crate::lifecycle::end_run;
use crate::lifecycle::list_runs;
use crate::lifecycle::load_run;
use crate::lifecycle::start_run;
use crate::market_data;
use crate::queries;
use crate::queries::StoredRiskFailure;
use crate::queries::StoredRiskValue;
use crate::queries::StoredRunStatus;
use crate::store::RetryPolicy;
use crate::store::SqliteBatchStoreConfig;
use crate::store::SqliteBatchStoreError;
use crate::store::open_store;
use crate::store::run_in_transaction;
use crate::store::to_nanos;

// ============================================================================
// SECTION: Writer
// ============================================================================

/// `SQLite`-backed batch run writer.
///
/// # Invariants
/// - `runs` holds caches only for runs started and not yet ended by this
///   writer.
pub struct SqliteBatchRunWriter {
    /// Store connection.
    connection: Connection,
    /// Retry policy for transient failures.
    policy: RetryPolicy,
    /// Resolver for target properties.
    resolver: Arc<dyn TargetResolver>,
    /// Caches of started runs.
    runs: HashMap<RunId, RunCaches>,
    /// Target cache for market data writes outside any run.
    market_data_interner: ReferenceDataInterner,
}

impl SqliteBatchRunWriter {
    /// Opens the store at `config.path`, creating the schema when needed.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when the configuration is invalid or
    /// the store cannot be opened.
    pub fn open(config: &SqliteBatchStoreConfig) -> Result<Self, SqliteBatchStoreError> {
        let connection = open_store(config)?;
        tracing::info!(path = %config.path.display(), "opened sqlite batch store");
        Ok(Self {
            connection,
            policy: RetryPolicy::from_config(config),
            resolver: Arc::new(NullTargetResolver),
            runs: HashMap::new(),
            market_data_interner: ReferenceDataInterner::new(),
        })
    }

    /// Replaces the target resolver used for target properties.
    #[must_use]
    pub fn with_target_resolver(mut self, resolver: Arc<dyn TargetResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns true when `run_id` was started and not yet ended here.
    #[must_use]
    pub fn is_active(&self, run_id: RunId) -> bool {
        self.runs.contains_key(&run_id)
    }

    /// Persists a fragment and reports whether its values were stored.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError::NotFound`] when the run was not
    /// started; other variants when the fragment could not be written.
    pub fn write_fragment(
        &mut self,
        run_id: RunId,
        fragment: &ResultFragment,
    ) -> Result<BatchWriteOutcome, SqliteBatchStoreError> {
        let caches = self.runs.get_mut(&run_id).ok_or_else(|| {
            SqliteBatchStoreError::NotFound(format!("risk run {run_id} was not started"))
        })?;
        let resolver = Arc::clone(&self.resolver);
        let eval_instant = to_nanos(OffsetDateTime::now_utc())?;
        run_in_transaction(&mut self.connection, self.policy, caches, |tx, caches| {
            add_fragment(tx, caches, resolver.as_ref(), fragment, eval_instant)
        })
    }

    /// Returns the stored values of a run.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when the query fails.
    pub fn risk_values(
        &self,
        run_id: RunId,
    ) -> Result<Vec<StoredRiskValue>, SqliteBatchStoreError> {
        queries::risk_values(&self.connection, run_id)
    }

    /// Returns the stored failures of a run with their reasons.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when the query fails.
    pub fn risk_failures(
        &self,
        run_id: RunId,
    ) -> Result<Vec<StoredRiskFailure>, SqliteBatchStoreError> {
        queries::risk_failures(&self.connection, run_id)
    }

    /// Returns the stored statuses of a run.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when the query fails.
    pub fn run_statuses(
        &self,
        run_id: RunId,
    ) -> Result<Vec<StoredRunStatus>, SqliteBatchStoreError> {
        queries::run_statuses(&self.connection, run_id)
    }

    /// Returns the stored descriptive properties of a target.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when the query fails.
    pub fn target_properties(
        &self,
        target: &ComputationTargetSpecification,
    ) -> Result<BTreeMap<String, String>, SqliteBatchStoreError> {
        queries::target_properties(&self.connection, target)
    }
}

// ============================================================================
// SECTION: BatchRunWriter
// ============================================================================

impl BatchRunWriter for SqliteBatchRunWriter {
    fn start_risk_run(
        &mut self,
        cycle: &CycleMetadata,
        parameters: &BTreeMap<String, String>,
        creation_mode: RunCreationMode,
        snapshot_mode: SnapshotMode,
    ) -> Result<RiskRun, BatchError> {
        let now = OffsetDateTime::now_utc();
        let caches = run_in_transaction(&mut self.connection, self.policy, &mut (), |tx, _| {
            start_run(tx, cycle, parameters, creation_mode, snapshot_mode, now)
        })?;
        let run = caches.run.clone();
        self.runs.insert(run.id, caches);
        Ok(run)
    }

    fn end_risk_run(&mut self, run_id: RunId) -> Result<(), BatchError> {
        let now = OffsetDateTime::now_utc();
        let result = run_in_transaction(&mut self.connection, self.policy, &mut (), |tx, _| {
            end_run(tx, run_id, now)
        });
        self.runs.remove(&run_id);
        Ok(result?)
    }

    fn add_job_results(
        &mut self,
        run_id: RunId,
        fragment: &ResultFragment,
    ) -> Result<(), BatchError> {
        self.write_fragment(run_id, fragment)?;
        Ok(())
    }

    fn create_market_data(&mut self, base_id: &UniqueId) -> Result<MarketDataId, BatchError> {
        Ok(run_in_transaction(&mut self.connection, self.policy, &mut (), |tx, _| {
            market_data::create_or_get_market_data(tx, base_id)
        })?)
    }

    fn add_values_to_market_data(
        &mut self,
        market_data_id: MarketDataId,
        values: &[ComputedValue],
    ) -> Result<(), BatchError> {
        run_in_transaction(
            &mut self.connection,
            self.policy,
            &mut self.market_data_interner,
            |tx, interner| {
                market_data::add_values_to_market_data(tx, interner, market_data_id, values)
            },
        )?;
        Ok(())
    }

    fn delete_market_data(&mut self, market_data_id: MarketDataId) -> Result<(), BatchError> {
        let deleted = run_in_transaction(&mut self.connection, self.policy, &mut (), |tx, _| {
            market_data::delete_market_data(tx, market_data_id)
        })?;
        if !deleted {
            return Err(BatchError::NotFound(format!("market data snapshot {market_data_id}")));
        }
        tracing::info!(market_data_id = %market_data_id, "deleted market data snapshot");
        Ok(())
    }

    fn market_data_values(
        &mut self,
        market_data_id: MarketDataId,
    ) -> Result<Vec<MarketDataValue>, BatchError> {
        Ok(market_data::market_data_values(&self.connection, market_data_id)?)
    }

    fn risk_run(&mut self, run_id: RunId) -> Result<RiskRun, BatchError> {
        load_run(&self.connection, run_id)?
            .ok_or_else(|| BatchError::NotFound(format!("risk run {run_id}")))
    }

    fn risk_runs(&mut self) -> Result<Vec<RiskRun>, BatchError> {
        Ok(list_runs(&self.connection)?)
    }

    fn delete_risk_run(&mut self, run_id: RunId) -> Result<(), BatchError> {
        run_in_transaction(&mut self.connection, self.policy, &mut (), |tx, _| {
            delete_run(tx, run_id)
        })?;
        self.runs.remove(&run_id);
        Ok(())
    }
}
