// crates/risk-batch-store-sqlite/src/lifecycle.rs
// ============================================================================
// Module: Run Lifecycle
// Description: Create, find, restart, delete, end, and load risk runs.
// Purpose: Apply run creation modes and own the per-run caches.
// Dependencies: risk-batch-core, rusqlite, time, tracing
// ============================================================================

//! ## Overview
//! A run is identified by (valuation time, version correction, view
//! definition, market data base id). Starting a run resolves the creation
//! mode against that identity, then warms the per-run caches from the cycle
//! metadata. Every function here runs inside the caller's transaction, so a
//! rejected start leaves nothing behind.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::CycleMetadata;
use risk_batch_core::MarketDataId;
use risk_batch_core::RiskRun;
use risk_batch_core::RunCreationMode;
use risk_batch_core::RunId;
use risk_batch_core::SnapshotMode;
use risk_batch_core::UniqueId;
use risk_batch_core::VersionCorrection;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use time::OffsetDateTime;

use crate::failure_cache::ComputeFailureCache;
use crate::interner::ReferenceDataInterner;
use crate::journal::AttemptState;
use crate::market_data::create_or_get_market_data;
use crate::status::StatusTracker;
use crate::store::SqliteBatchStoreError;
use crate::store::db_error;
use crate::store::from_nanos;
use crate::store::next_id;
use crate::store::reserve_ids;
use crate::store::to_nanos;
use crate::store::to_optional_nanos;

// ============================================================================
// SECTION: Run Caches
// ============================================================================

/// Per-run state owned by the writer between start and end.
///
/// # Invariants
/// - Every cache belongs to `run.id`; the whole value is dropped at end.
#[derive(Debug)]
pub struct RunCaches {
    /// Run as persisted at start.
    pub run: RiskRun,
    /// Reference data caches.
    pub interner: ReferenceDataInterner,
    /// Compute failure cache.
    pub failures: ComputeFailureCache,
    /// Status matrix cache.
    pub statuses: StatusTracker,
}

impl RunCaches {
    /// Creates empty caches for `run`.
    #[must_use]
    pub fn new(run: RiskRun) -> Self {
        let statuses = StatusTracker::new(run.id);
        Self {
            run,
            interner: ReferenceDataInterner::new(),
            failures: ComputeFailureCache::new(),
            statuses,
        }
    }

    /// Interns the reference data named by the cycle metadata.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when interning fails.
    pub fn warm(
        &mut self,
        connection: &Connection,
        cycle: &CycleMetadata,
    ) -> Result<(), SqliteBatchStoreError> {
        self.interner.intern_configurations(
            connection,
            self.run.id,
            cycle.configurations.keys().map(String::as_str),
        )?;
        let mut targets: BTreeSet<&ComputationTargetSpecification> = BTreeSet::new();
        for metadata in cycle.configurations.values() {
            targets.extend(metadata.targets.iter());
            targets.extend(metadata.terminal_outputs.keys().map(|spec| &spec.target));
            self.interner.intern_specifications(connection, metadata.terminal_outputs.keys())?;
            self.interner.intern_requirements(
                connection,
                metadata.terminal_outputs.iter().flat_map(|(specification, requirements)| {
                    requirements.iter().map(move |requirement| (requirement, specification))
                }),
            )?;
            targets.extend(
                metadata.terminal_outputs.values().flatten().map(|requirement| &requirement.target),
            );
        }
        self.interner.intern_targets(connection, targets)
    }
}

impl AttemptState for RunCaches {
    fn begin_attempt(&mut self) {
        self.interner.begin_attempt();
        self.failures.begin_attempt();
        self.statuses.begin_attempt();
    }

    fn commit_attempt(&mut self) {
        self.interner.commit_attempt();
        self.failures.commit_attempt();
        self.statuses.commit_attempt();
    }

    fn rollback_attempt(&mut self) {
        self.interner.rollback_attempt();
        self.failures.rollback_attempt();
        self.statuses.rollback_attempt();
    }
}

// ============================================================================
// SECTION: Start
// ============================================================================

/// Starts a run for `cycle` according to `creation_mode`.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError::Configuration`] when `Auto` finds a run
/// with different parameters or `ReuseExisting` finds none; other variants
/// when the store fails.
pub(crate) fn start_run(
    connection: &Connection,
    cycle: &CycleMetadata,
    parameters: &BTreeMap<String, String>,
    creation_mode: RunCreationMode,
    snapshot_mode: SnapshotMode,
    now: OffsetDateTime,
) -> Result<RunCaches, SqliteBatchStoreError> {
    let run = match creation_mode {
        RunCreationMode::Auto => match find_run(connection, cycle)? {
            Some(existing) => {
                ensure_parameters_match(&existing, parameters)?;
                restart_run(connection, existing, snapshot_mode, now)?
            }
            None => create_run(connection, cycle, parameters, snapshot_mode, now)?,
        },
        RunCreationMode::CreateNewOverwrite => {
            if let Some(existing) = find_run(connection, cycle)? {
                delete_run(connection, existing.id)?;
            }
            create_run(connection, cycle, parameters, snapshot_mode, now)?
        }
        RunCreationMode::CreateNew => {
            create_run(connection, cycle, parameters, snapshot_mode, now)?
        }
        RunCreationMode::ReuseExisting => {
            let existing = find_run(connection, cycle)?.ok_or_else(|| {
                SqliteBatchStoreError::Configuration(format!(
                    "no existing run for view {} at {}",
                    cycle.view_definition_id, cycle.valuation_time
                ))
            })?;
            restart_run(connection, existing, snapshot_mode, now)?
        }
    };
    let mut caches = RunCaches::new(run);
    caches.warm(connection, cycle)?;
    Ok(caches)
}

/// Fails unless the stored and requested parameters are identical.
fn ensure_parameters_match(
    existing: &RiskRun,
    parameters: &BTreeMap<String, String>,
) -> Result<(), SqliteBatchStoreError> {
    if existing.parameters == *parameters {
        return Ok(());
    }
    let stored: BTreeSet<(&String, &String)> = existing.parameters.iter().collect();
    let requested: BTreeSet<(&String, &String)> = parameters.iter().collect();
    let difference: Vec<String> = stored
        .symmetric_difference(&requested)
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    Err(SqliteBatchStoreError::Configuration(format!(
        "run {} exists with different parameters: [{}]",
        existing.id,
        difference.join(", ")
    )))
}

/// Inserts a new run and its parameters.
fn create_run(
    connection: &Connection,
    cycle: &CycleMetadata,
    parameters: &BTreeMap<String, String>,
    snapshot_mode: SnapshotMode,
    now: OffsetDateTime,
) -> Result<RiskRun, SqliteBatchStoreError> {
    let market_data_id = create_or_get_market_data(connection, &cycle.market_data_snapshot_id)?;
    let id = RunId::new(next_id(connection)?);
    let now_nanos = to_nanos(now)?;
    connection
        .prepare_cached(
            "INSERT INTO rsk_run (id, view_definition_uid, live_data_snapshot_id, \
             valuation_time, version_as_of, corrected_to, create_instant, start_instant, \
             end_instant, num_restarts, complete, snapshot_mode, name) VALUES (?1, ?2, ?3, ?4, \
             ?5, ?6, ?7, ?7, NULL, 0, 0, ?8, ?9)",
        )
        .map_err(db_error)?
        .execute(params![
            id.get(),
            cycle.view_definition_id.to_string(),
            market_data_id.get(),
            to_nanos(cycle.valuation_time)?,
            to_optional_nanos(cycle.version_correction.version_as_of)?,
            to_optional_nanos(cycle.version_correction.corrected_to)?,
            now_nanos,
            snapshot_mode.as_str(),
            cycle.name,
        ])
        .map_err(db_error)?;
    if !parameters.is_empty() {
        let first_id = reserve_ids(connection, parameters.len())?;
        let mut statement = connection
            .prepare_cached(
                "INSERT INTO rsk_run_property (id, run_id, property_key, property_value) VALUES \
                 (?1, ?2, ?3, ?4)",
            )
            .map_err(db_error)?;
        for ((key, value), property_id) in parameters.iter().zip(first_id ..) {
            statement.execute(params![property_id, id.get(), key, value]).map_err(db_error)?;
        }
    }
    tracing::info!(run_id = %id, view = %cycle.view_definition_id, "created risk run");
    Ok(RiskRun {
        id,
        view_definition_id: cycle.view_definition_id.clone(),
        market_data_id,
        market_data_base_id: cycle.market_data_snapshot_id.clone(),
        valuation_time: cycle.valuation_time,
        version_correction: cycle.version_correction,
        create_instant: now,
        start_instant: now,
        end_instant: None,
        num_restarts: 0,
        complete: false,
        snapshot_mode,
        name: cycle.name.clone(),
        parameters: parameters.clone(),
    })
}

/// Clears failure facts of an existing run and marks it restarted.
fn restart_run(
    connection: &Connection,
    mut run: RiskRun,
    snapshot_mode: SnapshotMode,
    now: OffsetDateTime,
) -> Result<RiskRun, SqliteBatchStoreError> {
    delete_failures(connection, run.id)?;
    connection
        .execute(
            "UPDATE rsk_run SET num_restarts = num_restarts + 1, complete = 0, start_instant = \
             ?2, end_instant = NULL, snapshot_mode = ?3 WHERE id = ?1",
            params![run.id.get(), to_nanos(now)?, snapshot_mode.as_str()],
        )
        .map_err(db_error)?;
    run.num_restarts += 1;
    run.complete = false;
    run.start_instant = now;
    run.end_instant = None;
    run.snapshot_mode = snapshot_mode;
    tracing::info!(run_id = %run.id, restarts = run.num_restarts, "restarted risk run");
    Ok(run)
}

// ============================================================================
// SECTION: End and Delete
// ============================================================================

/// Marks a run complete at `now`.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError::NotFound`] when the run does not exist.
pub(crate) fn end_run(
    connection: &Connection,
    run_id: RunId,
    now: OffsetDateTime,
) -> Result<(), SqliteBatchStoreError> {
    let changed = connection
        .execute(
            "UPDATE rsk_run SET complete = 1, end_instant = ?2 WHERE id = ?1",
            params![run_id.get(), to_nanos(now)?],
        )
        .map_err(db_error)?;
    if changed == 0 {
        return Err(SqliteBatchStoreError::NotFound(format!("risk run {run_id}")));
    }
    tracing::info!(run_id = %run_id, "ended risk run");
    Ok(())
}

/// Deletes a run with every fact row recorded for it.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError::NotFound`] when the run does not exist.
pub(crate) fn delete_run(
    connection: &Connection,
    run_id: RunId,
) -> Result<(), SqliteBatchStoreError> {
    delete_failures(connection, run_id)?;
    for sql in [
        "DELETE FROM rsk_value WHERE run_id = ?1",
        "DELETE FROM rsk_run_status WHERE run_id = ?1",
        "DELETE FROM rsk_run_property WHERE run_id = ?1",
        "DELETE FROM rsk_run_calculation_configuration WHERE run_id = ?1",
    ] {
        connection.execute(sql, params![run_id.get()]).map_err(db_error)?;
    }
    let deleted = connection
        .execute("DELETE FROM rsk_run WHERE id = ?1", params![run_id.get()])
        .map_err(db_error)?;
    if deleted == 0 {
        return Err(SqliteBatchStoreError::NotFound(format!("risk run {run_id}")));
    }
    tracing::info!(run_id = %run_id, "deleted risk run");
    Ok(())
}

/// Deletes failure rows and their reasons for a run.
fn delete_failures(connection: &Connection, run_id: RunId) -> Result<(), SqliteBatchStoreError> {
    connection
        .execute(
            "DELETE FROM rsk_failure_reason WHERE rsk_failure_id IN (SELECT id FROM rsk_failure \
             WHERE run_id = ?1)",
            params![run_id.get()],
        )
        .map_err(db_error)?;
    connection
        .execute("DELETE FROM rsk_failure WHERE run_id = ?1", params![run_id.get()])
        .map_err(db_error)?;
    Ok(())
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Columns selected for every run query.
const RUN_COLUMNS: &str = "r.id, r.view_definition_uid, r.live_data_snapshot_id, s.base_uid, \
                           r.valuation_time, r.version_as_of, r.corrected_to, r.create_instant, \
                           r.start_instant, r.end_instant, r.num_restarts, r.complete, \
                           r.snapshot_mode, r.name";

/// Raw run columns before decoding.
struct RunRecord {
    /// Run id.
    id: i64,
    /// View definition uid text.
    view_definition: String,
    /// Snapshot id.
    market_data_id: i64,
    /// Snapshot base uid text.
    market_data_base: String,
    /// Valuation time nanos.
    valuation_time: i64,
    /// Version-as-of nanos.
    version_as_of: Option<i64>,
    /// Corrected-to nanos.
    corrected_to: Option<i64>,
    /// Creation nanos.
    create_instant: i64,
    /// Start nanos.
    start_instant: i64,
    /// End nanos.
    end_instant: Option<i64>,
    /// Restart count.
    num_restarts: i64,
    /// Completion flag.
    complete: bool,
    /// Snapshot mode label.
    snapshot_mode: String,
    /// Optional run name.
    name: Option<String>,
}

impl RunRecord {
    /// Reads a record from a row selected with [`RUN_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            view_definition: row.get(1)?,
            market_data_id: row.get(2)?,
            market_data_base: row.get(3)?,
            valuation_time: row.get(4)?,
            version_as_of: row.get(5)?,
            corrected_to: row.get(6)?,
            create_instant: row.get(7)?,
            start_instant: row.get(8)?,
            end_instant: row.get(9)?,
            num_restarts: row.get(10)?,
            complete: row.get(11)?,
            snapshot_mode: row.get(12)?,
            name: row.get(13)?,
        })
    }

    /// Decodes the record and attaches the run parameters.
    fn into_run(self, connection: &Connection) -> Result<RiskRun, SqliteBatchStoreError> {
        let id = RunId::new(self.id);
        Ok(RiskRun {
            id,
            view_definition_id: parse_uid(&self.view_definition)?,
            market_data_id: MarketDataId::new(self.market_data_id),
            market_data_base_id: parse_uid(&self.market_data_base)?,
            valuation_time: from_nanos(self.valuation_time)?,
            version_correction: VersionCorrection {
                version_as_of: self.version_as_of.map(from_nanos).transpose()?,
                corrected_to: self.corrected_to.map(from_nanos).transpose()?,
            },
            create_instant: from_nanos(self.create_instant)?,
            start_instant: from_nanos(self.start_instant)?,
            end_instant: self.end_instant.map(from_nanos).transpose()?,
            num_restarts: u32::try_from(self.num_restarts).map_err(|_| {
                SqliteBatchStoreError::Invalid(format!("restart count out of range for run {id}"))
            })?,
            complete: self.complete,
            snapshot_mode: SnapshotMode::parse(&self.snapshot_mode).ok_or_else(|| {
                SqliteBatchStoreError::Invalid(format!(
                    "unknown snapshot mode {}",
                    self.snapshot_mode
                ))
            })?,
            name: self.name,
            parameters: run_parameters(connection, id)?,
        })
    }
}

/// Finds the most recent run matching the identity of `cycle`.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query fails.
pub(crate) fn find_run(
    connection: &Connection,
    cycle: &CycleMetadata,
) -> Result<Option<RiskRun>, SqliteBatchStoreError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM rsk_run r JOIN rsk_live_data_snapshot s ON s.id = \
         r.live_data_snapshot_id WHERE r.valuation_time = ?1 AND r.version_as_of IS ?2 AND \
         r.corrected_to IS ?3 AND r.view_definition_uid = ?4 AND s.base_uid = ?5 ORDER BY r.id \
         DESC LIMIT 1"
    );
    let record = connection
        .prepare_cached(&sql)
        .map_err(db_error)?
        .query_row(
            params![
                to_nanos(cycle.valuation_time)?,
                to_optional_nanos(cycle.version_correction.version_as_of)?,
                to_optional_nanos(cycle.version_correction.corrected_to)?,
                cycle.view_definition_id.to_string(),
                cycle.market_data_snapshot_id.to_string(),
            ],
            RunRecord::from_row,
        )
        .optional()
        .map_err(db_error)?;
    record.map(|record| record.into_run(connection)).transpose()
}

/// Loads a run by id.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query fails or the row is
/// corrupt.
pub(crate) fn load_run(
    connection: &Connection,
    run_id: RunId,
) -> Result<Option<RiskRun>, SqliteBatchStoreError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM rsk_run r JOIN rsk_live_data_snapshot s ON s.id = \
         r.live_data_snapshot_id WHERE r.id = ?1"
    );
    let record = connection
        .prepare_cached(&sql)
        .map_err(db_error)?
        .query_row(params![run_id.get()], RunRecord::from_row)
        .optional()
        .map_err(db_error)?;
    record.map(|record| record.into_run(connection)).transpose()
}

/// Lists every run, oldest first.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query fails or a row is
/// corrupt.
pub(crate) fn list_runs(connection: &Connection) -> Result<Vec<RiskRun>, SqliteBatchStoreError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM rsk_run r JOIN rsk_live_data_snapshot s ON s.id = \
         r.live_data_snapshot_id ORDER BY r.id"
    );
    let mut statement = connection.prepare_cached(&sql).map_err(db_error)?;
    let records = statement
        .query_map(params![], RunRecord::from_row)
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;
    records.into_iter().map(|record| record.into_run(connection)).collect()
}

/// Returns the stored parameters of a run.
fn run_parameters(
    connection: &Connection,
    run_id: RunId,
) -> Result<BTreeMap<String, String>, SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached(
            "SELECT property_key, property_value FROM rsk_run_property WHERE run_id = ?1",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![run_id.get()], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(db_error)?;
    rows.collect::<rusqlite::Result<BTreeMap<String, String>>>().map_err(db_error)
}

/// Parses a stored unique identifier.
fn parse_uid(text: &str) -> Result<UniqueId, SqliteBatchStoreError> {
    UniqueId::parse(text)
        .ok_or_else(|| SqliteBatchStoreError::Invalid(format!("stored unique id invalid: {text}")))
}
