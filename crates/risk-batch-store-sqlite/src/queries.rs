// crates/risk-batch-store-sqlite/src/queries.rs
// ============================================================================
// Module: Read Queries
// Description: Read-side views of stored values, failures, and statuses.
// Purpose: Let operators and tests inspect what a run persisted.
// Dependencies: risk-batch-core, rusqlite, time
// ============================================================================

//! ## Overview
//! Queries join fact rows back to their reference data so callers never see
//! raw interned ids other than row ids.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputeFailure;
use risk_batch_core::ComputeFailureId;
use risk_batch_core::ComputeFailureKey;
use risk_batch_core::RunId;
use risk_batch_core::RunStatus;
use rusqlite::Connection;
use rusqlite::params;
use time::OffsetDateTime;

use crate::market_data::decode_target;
use crate::repository::ComputationTargetEntity;
use crate::repository::InternedEntity;
use crate::store::SqliteBatchStoreError;
use crate::store::db_error;
use crate::store::from_nanos;

// ============================================================================
// SECTION: Records
// ============================================================================

/// Stored successful value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRiskValue {
    /// Row id.
    pub id: i64,
    /// Calculation configuration name.
    pub configuration: String,
    /// Value name (component name for expanded values).
    pub value_name: String,
    /// Synthesized value specification properties.
    pub specification: String,
    /// Producing function id.
    pub function_id: String,
    /// Computation target.
    pub target: ComputationTargetSpecification,
    /// Stored value.
    pub value: f64,
    /// Ingestion instant.
    pub eval_instant: OffsetDateTime,
    /// Compute node name.
    pub compute_node: String,
}

/// Stored failed value with its root causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRiskFailure {
    /// Row id.
    pub id: i64,
    /// Calculation configuration name.
    pub configuration: String,
    /// Value name.
    pub value_name: String,
    /// Producing function id.
    pub function_id: String,
    /// Computation target.
    pub target: ComputationTargetSpecification,
    /// Compute node name.
    pub compute_node: String,
    /// Root compute failures, ordered by id.
    pub reasons: Vec<ComputeFailure>,
}

/// Stored status of one (configuration, target) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRunStatus {
    /// Calculation configuration name.
    pub configuration: String,
    /// Computation target.
    pub target: ComputationTargetSpecification,
    /// Status.
    pub status: RunStatus,
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Returns the value rows of a run ordered by id.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query fails or a row is corrupt.
pub(crate) fn risk_values(
    connection: &Connection,
    run_id: RunId,
) -> Result<Vec<StoredRiskValue>, SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached(
            "SELECT v.id, c.name, v.value_name, s.synthetic_form, f.unique_id, t.target_type, \
             t.id_scheme, t.id_value, t.id_version, v.value, v.eval_instant, n.node_name FROM \
             rsk_value v JOIN rsk_calculation_configuration c ON c.id = \
             v.calculation_configuration_id JOIN rsk_value_specification s ON s.id = \
             v.value_specification_id JOIN rsk_function_unique_id f ON f.id = \
             v.function_unique_id JOIN rsk_computation_target t ON t.id = \
             v.computation_target_id JOIN rsk_compute_node n ON n.id = v.compute_node_id WHERE \
             v.run_id = ?1 ORDER BY v.id",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![run_id.get()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                (
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ),
                row.get::<_, f64>(9)?,
                row.get::<_, i64>(10)?,
                row.get::<_, String>(11)?,
            ))
        })
        .map_err(db_error)?;
    let mut values = Vec::new();
    for row in rows {
        let (id, configuration, value_name, specification, function_id, target, value, eval, node) =
            row.map_err(db_error)?;
        values.push(StoredRiskValue {
            id,
            configuration,
            value_name,
            specification,
            function_id,
            target: decode_target(&target.0, target.1, target.2, target.3)?,
            value,
            eval_instant: from_nanos(eval)?,
            compute_node: node,
        });
    }
    Ok(values)
}

/// Returns the failure rows of a run with their reasons, ordered by id.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when a query fails or a row is corrupt.
pub(crate) fn risk_failures(
    connection: &Connection,
    run_id: RunId,
) -> Result<Vec<StoredRiskFailure>, SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached(
            "SELECT r.id, c.name, r.value_name, f.unique_id, t.target_type, t.id_scheme, \
             t.id_value, t.id_version, n.node_name FROM rsk_failure r JOIN \
             rsk_calculation_configuration c ON c.id = r.calculation_configuration_id JOIN \
             rsk_function_unique_id f ON f.id = r.function_unique_id JOIN rsk_computation_target \
             t ON t.id = r.computation_target_id JOIN rsk_compute_node n ON n.id = \
             r.compute_node_id WHERE r.run_id = ?1 ORDER BY r.id",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![run_id.get()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                (
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ),
                row.get::<_, String>(8)?,
            ))
        })
        .map_err(db_error)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_error)?;

    let mut failures = Vec::with_capacity(rows.len());
    for (id, configuration, value_name, function_id, target, compute_node) in rows {
        failures.push(StoredRiskFailure {
            id,
            configuration,
            value_name,
            function_id,
            target: decode_target(&target.0, target.1, target.2, target.3)?,
            compute_node,
            reasons: failure_reasons(connection, id)?,
        });
    }
    Ok(failures)
}

/// Returns the compute failures recorded for one failure row.
fn failure_reasons(
    connection: &Connection,
    failure_id: i64,
) -> Result<Vec<ComputeFailure>, SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached(
            "SELECT c.id, c.function_id, c.exception_class, c.exception_msg, c.stack_trace FROM \
             rsk_failure_reason r JOIN rsk_compute_failure c ON c.id = r.compute_failure_id \
             WHERE r.rsk_failure_id = ?1 ORDER BY c.id",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![failure_id], |row| {
            Ok(ComputeFailure {
                id: ComputeFailureId::new(row.get(0)?),
                key: ComputeFailureKey {
                    function_id: row.get(1)?,
                    exception_class: row.get(2)?,
                    exception_message: row.get(3)?,
                    stack_trace: row.get(4)?,
                },
            })
        })
        .map_err(db_error)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_error)
}

/// Returns the status rows of a run.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query fails or a row is corrupt.
pub(crate) fn run_statuses(
    connection: &Connection,
    run_id: RunId,
) -> Result<Vec<StoredRunStatus>, SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached(
            "SELECT c.name, t.target_type, t.id_scheme, t.id_value, t.id_version, s.status FROM \
             rsk_run_status s JOIN rsk_calculation_configuration c ON c.id = \
             s.calculation_configuration_id JOIN rsk_computation_target t ON t.id = \
             s.computation_target_id WHERE s.run_id = ?1 ORDER BY s.id",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![run_id.get()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })
        .map_err(db_error)?;
    let mut statuses = Vec::new();
    for row in rows {
        let (configuration, target_type, scheme, value, version, ordinal) =
            row.map_err(db_error)?;
        let status = RunStatus::from_ordinal(ordinal)
            .ok_or_else(|| SqliteBatchStoreError::Invalid(format!("unknown status {ordinal}")))?;
        statuses.push(StoredRunStatus {
            configuration,
            target: decode_target(&target_type, scheme, value, version)?,
            status,
        });
    }
    Ok(statuses)
}

/// Returns the stored descriptive properties of a target.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when a query fails.
pub(crate) fn target_properties(
    connection: &Connection,
    target: &ComputationTargetSpecification,
) -> Result<BTreeMap<String, String>, SqliteBatchStoreError> {
    let target_id = ComputationTargetEntity::find(connection, target)?;
    let Some(target_id) = target_id else {
        return Ok(BTreeMap::new());
    };
    let mut statement = connection
        .prepare_cached(
            "SELECT property_key, property_value FROM rsk_target_property WHERE target_id = ?1",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![target_id], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(db_error)?;
    rows.collect::<rusqlite::Result<BTreeMap<String, String>>>().map_err(db_error)
}
