// crates/risk-batch-store-sqlite/src/repository.rs
// ============================================================================
// Module: Batch Store Repositories
// Description: Per-entity SQL for reference data and per-run fact rows.
// Purpose: Keep parameterized SQL behind small typed functions.
// Dependencies: risk-batch-core, rusqlite
// ============================================================================

//! ## Overview
//! Reference entities implement [`InternedEntity`]: an exact-attribute
//! lookup plus a batched insert of pre-allocated ids. Fact rows (values,
//! failures, failure reasons, statuses, target properties) have plain insert
//! functions. Batched inserts reuse one cached prepared statement per call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::hash::Hash;

use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputeFailureId;
use risk_batch_core::ComputeNodeId;
use risk_batch_core::FunctionId;
use risk_batch_core::RunId;
use risk_batch_core::RunStatus;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::store::SqliteBatchStoreError;
use crate::store::db_error;

// ============================================================================
// SECTION: Interned Entities
// ============================================================================

/// Reference entity interned once per distinct attribute tuple.
pub(crate) trait InternedEntity {
    /// Attribute tuple identifying a row.
    type Key: Clone + Eq + Hash;

    /// Table name used in diagnostics.
    const TABLE: &'static str;

    /// Returns the id of the row matching `key` exactly.
    fn find(
        connection: &Connection,
        key: &Self::Key,
    ) -> Result<Option<i64>, SqliteBatchStoreError>;

    /// Inserts rows whose ids were allocated by the caller.
    fn batch_insert(
        connection: &Connection,
        rows: &[(i64, Self::Key)],
    ) -> Result<(), SqliteBatchStoreError>;
}

/// Calculation configuration names (unique across the store).
pub(crate) struct CalculationConfigurationEntity;

impl InternedEntity for CalculationConfigurationEntity {
    type Key = String;

    const TABLE: &'static str = "rsk_calculation_configuration";

    fn find(
        connection: &Connection,
        key: &Self::Key,
    ) -> Result<Option<i64>, SqliteBatchStoreError> {
        connection
            .prepare_cached("SELECT id FROM rsk_calculation_configuration WHERE name = ?1")
            .map_err(db_error)?
            .query_row(params![key], |row| row.get(0))
            .optional()
            .map_err(db_error)
    }

    fn batch_insert(
        connection: &Connection,
        rows: &[(i64, Self::Key)],
    ) -> Result<(), SqliteBatchStoreError> {
        let mut statement = connection
            .prepare_cached("INSERT INTO rsk_calculation_configuration (id, name) VALUES (?1, ?2)")
            .map_err(db_error)?;
        for (id, name) in rows {
            statement.execute(params![id, name]).map_err(db_error)?;
        }
        Ok(())
    }
}

/// Value specifications keyed by synthesized property form.
pub(crate) struct ValueSpecificationEntity;

impl InternedEntity for ValueSpecificationEntity {
    type Key = String;

    const TABLE: &'static str = "rsk_value_specification";

    fn find(
        connection: &Connection,
        key: &Self::Key,
    ) -> Result<Option<i64>, SqliteBatchStoreError> {
        connection
            .prepare_cached("SELECT id FROM rsk_value_specification WHERE synthetic_form = ?1")
            .map_err(db_error)?
            .query_row(params![key], |row| row.get(0))
            .optional()
            .map_err(db_error)
    }

    fn batch_insert(
        connection: &Connection,
        rows: &[(i64, Self::Key)],
    ) -> Result<(), SqliteBatchStoreError> {
        let mut statement = connection
            .prepare_cached(
                "INSERT INTO rsk_value_specification (id, synthetic_form) VALUES (?1, ?2)",
            )
            .map_err(db_error)?;
        for (id, form) in rows {
            statement.execute(params![id, form]).map_err(db_error)?;
        }
        Ok(())
    }
}

/// Value requirements keyed by (synthesized constraints, specification id).
pub(crate) struct ValueRequirementEntity;

impl InternedEntity for ValueRequirementEntity {
    type Key = (String, i64);

    const TABLE: &'static str = "rsk_value_requirement";

    fn find(
        connection: &Connection,
        key: &Self::Key,
    ) -> Result<Option<i64>, SqliteBatchStoreError> {
        connection
            .prepare_cached(
                "SELECT id FROM rsk_value_requirement WHERE synthetic_form = ?1 AND \
                 specification_id = ?2",
            )
            .map_err(db_error)?
            .query_row(params![key.0, key.1], |row| row.get(0))
            .optional()
            .map_err(db_error)
    }

    fn batch_insert(
        connection: &Connection,
        rows: &[(i64, Self::Key)],
    ) -> Result<(), SqliteBatchStoreError> {
        let mut statement = connection
            .prepare_cached(
                "INSERT INTO rsk_value_requirement (id, synthetic_form, specification_id) VALUES \
                 (?1, ?2, ?3)",
            )
            .map_err(db_error)?;
        for (id, (form, specification_id)) in rows {
            statement.execute(params![id, form, specification_id]).map_err(db_error)?;
        }
        Ok(())
    }
}

/// Computation targets keyed by type and optional identifier.
pub(crate) struct ComputationTargetEntity;

impl InternedEntity for ComputationTargetEntity {
    type Key = ComputationTargetSpecification;

    const TABLE: &'static str = "rsk_computation_target";

    fn find(
        connection: &Connection,
        key: &Self::Key,
    ) -> Result<Option<i64>, SqliteBatchStoreError> {
        let (scheme, value, version) = target_columns(key);
        connection
            .prepare_cached(
                "SELECT id FROM rsk_computation_target WHERE target_type = ?1 AND id_scheme IS ?2 \
                 AND id_value IS ?3 AND id_version IS ?4 ORDER BY id LIMIT 1",
            )
            .map_err(db_error)?
            .query_row(params![key.target_type.as_str(), scheme, value, version], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_error)
    }

    fn batch_insert(
        connection: &Connection,
        rows: &[(i64, Self::Key)],
    ) -> Result<(), SqliteBatchStoreError> {
        let mut statement = connection
            .prepare_cached(
                "INSERT INTO rsk_computation_target (id, target_type, id_scheme, id_value, \
                 id_version) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .map_err(db_error)?;
        for (id, target) in rows {
            let (scheme, value, version) = target_columns(target);
            statement
                .execute(params![id, target.target_type.as_str(), scheme, value, version])
                .map_err(db_error)?;
        }
        Ok(())
    }
}

/// Returns the nullable identifier columns of a target.
fn target_columns(
    target: &ComputationTargetSpecification,
) -> (Option<&str>, Option<&str>, Option<&str>) {
    target.unique_id.as_ref().map_or((None, None, None), |uid| {
        (Some(uid.scheme.as_str()), Some(uid.value.as_str()), uid.version.as_deref())
    })
}

/// Function unique identifiers.
pub(crate) struct FunctionUniqueIdEntity;

impl InternedEntity for FunctionUniqueIdEntity {
    type Key = FunctionId;

    const TABLE: &'static str = "rsk_function_unique_id";

    fn find(
        connection: &Connection,
        key: &Self::Key,
    ) -> Result<Option<i64>, SqliteBatchStoreError> {
        connection
            .prepare_cached("SELECT id FROM rsk_function_unique_id WHERE unique_id = ?1")
            .map_err(db_error)?
            .query_row(params![key.as_str()], |row| row.get(0))
            .optional()
            .map_err(db_error)
    }

    fn batch_insert(
        connection: &Connection,
        rows: &[(i64, Self::Key)],
    ) -> Result<(), SqliteBatchStoreError> {
        let mut statement = connection
            .prepare_cached("INSERT INTO rsk_function_unique_id (id, unique_id) VALUES (?1, ?2)")
            .map_err(db_error)?;
        for (id, function_id) in rows {
            statement.execute(params![id, function_id.as_str()]).map_err(db_error)?;
        }
        Ok(())
    }
}

/// Compute nodes with their derived host.
pub(crate) struct ComputeNodeEntity;

impl InternedEntity for ComputeNodeEntity {
    type Key = ComputeNodeId;

    const TABLE: &'static str = "rsk_compute_node";

    fn find(
        connection: &Connection,
        key: &Self::Key,
    ) -> Result<Option<i64>, SqliteBatchStoreError> {
        connection
            .prepare_cached("SELECT id FROM rsk_compute_node WHERE node_name = ?1")
            .map_err(db_error)?
            .query_row(params![key.as_str()], |row| row.get(0))
            .optional()
            .map_err(db_error)
    }

    fn batch_insert(
        connection: &Connection,
        rows: &[(i64, Self::Key)],
    ) -> Result<(), SqliteBatchStoreError> {
        let mut statement = connection
            .prepare_cached(
                "INSERT INTO rsk_compute_node (id, node_name, host_name) VALUES (?1, ?2, ?3)",
            )
            .map_err(db_error)?;
        for (id, node) in rows {
            statement.execute(params![id, node.as_str(), node.host()]).map_err(db_error)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Fact Rows
// ============================================================================

/// Reference ids shared by value and failure rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FactKey {
    /// Calculation configuration id.
    pub(crate) configuration_id: i64,
    /// Value name (component name for expanded values).
    pub(crate) value_name: String,
    /// Value specification id.
    pub(crate) specification_id: i64,
    /// Function unique id row.
    pub(crate) function_row_id: i64,
    /// Producing function, kept for failure attribution.
    pub(crate) function_id: FunctionId,
    /// Computation target id.
    pub(crate) target_id: i64,
    /// Compute node id.
    pub(crate) compute_node_id: i64,
}

/// Successful value row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RiskValueRow {
    /// Row id.
    pub(crate) id: i64,
    /// Reference ids.
    pub(crate) key: FactKey,
    /// Stored value.
    pub(crate) value: f64,
}

/// Failed value row with its causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RiskFailureRow {
    /// Row id.
    pub(crate) id: i64,
    /// Reference ids.
    pub(crate) key: FactKey,
    /// Root compute failures.
    pub(crate) causes: Vec<ComputeFailureId>,
}

/// Inserts value rows.
///
/// # Errors
///
/// Returns the raw `rusqlite` error so callers can record it as a failure.
pub(crate) fn insert_risk_values(
    connection: &Connection,
    run_id: RunId,
    eval_instant: i64,
    rows: &[RiskValueRow],
) -> rusqlite::Result<()> {
    let mut statement = connection.prepare_cached(
        "INSERT INTO rsk_value (id, run_id, calculation_configuration_id, value_name, \
         value_specification_id, function_unique_id, computation_target_id, value, eval_instant, \
         compute_node_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for row in rows {
        statement.execute(params![
            row.id,
            run_id.get(),
            row.key.configuration_id,
            row.key.value_name,
            row.key.specification_id,
            row.key.function_row_id,
            row.key.target_id,
            row.value,
            eval_instant,
            row.key.compute_node_id,
        ])?;
    }
    Ok(())
}

/// Inserts failure rows and their failure reasons.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when an insert fails.
pub(crate) fn insert_risk_failures(
    connection: &Connection,
    run_id: RunId,
    eval_instant: i64,
    rows: &[RiskFailureRow],
    reason_ids: i64,
) -> Result<(), SqliteBatchStoreError> {
    let mut failure_statement = connection
        .prepare_cached(
            "INSERT INTO rsk_failure (id, run_id, calculation_configuration_id, value_name, \
             value_specification_id, function_unique_id, computation_target_id, eval_instant, \
             compute_node_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .map_err(db_error)?;
    let mut reason_statement = connection
        .prepare_cached(
            "INSERT INTO rsk_failure_reason (id, rsk_failure_id, compute_failure_id) VALUES (?1, \
             ?2, ?3)",
        )
        .map_err(db_error)?;
    let mut next_reason_id = reason_ids;
    for row in rows {
        failure_statement
            .execute(params![
                row.id,
                run_id.get(),
                row.key.configuration_id,
                row.key.value_name,
                row.key.specification_id,
                row.key.function_row_id,
                row.key.target_id,
                eval_instant,
                row.key.compute_node_id,
            ])
            .map_err(db_error)?;
        for cause in &row.causes {
            reason_statement
                .execute(params![next_reason_id, row.id, cause.get()])
                .map_err(db_error)?;
            next_reason_id += 1;
        }
    }
    Ok(())
}

/// Returns the number of failure reasons `rows` will insert.
pub(crate) fn failure_reason_count(rows: &[RiskFailureRow]) -> usize {
    rows.iter().map(|row| row.causes.len()).sum()
}

/// Upserts descriptive properties of a target.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when an upsert fails.
pub(crate) fn upsert_target_properties(
    connection: &Connection,
    target_id: i64,
    properties: &BTreeMap<String, String>,
    first_id: i64,
) -> Result<(), SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached(
            "INSERT INTO rsk_target_property (id, target_id, property_key, property_value) VALUES \
             (?1, ?2, ?3, ?4) ON CONFLICT (target_id, property_key) DO UPDATE SET property_value \
             = excluded.property_value",
        )
        .map_err(db_error)?;
    let mut next = first_id;
    for (key, value) in properties {
        statement.execute(params![next, target_id, key, value]).map_err(db_error)?;
        next += 1;
    }
    Ok(())
}

// ============================================================================
// SECTION: Status Rows
// ============================================================================

/// Returns the stored status row of one (configuration, target) pair.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query fails or the stored
/// ordinal is unknown.
pub(crate) fn find_status(
    connection: &Connection,
    run_id: RunId,
    configuration_id: i64,
    target_id: i64,
) -> Result<Option<(i64, RunStatus)>, SqliteBatchStoreError> {
    let row: Option<(i64, i64)> = connection
        .prepare_cached(
            "SELECT id, status FROM rsk_run_status WHERE run_id = ?1 AND \
             calculation_configuration_id = ?2 AND computation_target_id = ?3",
        )
        .map_err(db_error)?
        .query_row(params![run_id.get(), configuration_id, target_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()
        .map_err(db_error)?;
    row.map(|(id, ordinal)| {
        RunStatus::from_ordinal(ordinal)
            .map(|status| (id, status))
            .ok_or_else(|| SqliteBatchStoreError::Invalid(format!("unknown status {ordinal}")))
    })
    .transpose()
}

/// Inserts status rows; returns the number of rows written.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when an insert fails.
pub(crate) fn insert_statuses(
    connection: &Connection,
    run_id: RunId,
    configuration_id: i64,
    status: RunStatus,
    rows: &[(i64, i64)],
) -> Result<usize, SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached(
            "INSERT INTO rsk_run_status (id, run_id, calculation_configuration_id, \
             computation_target_id, status) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(db_error)?;
    let mut written = 0;
    for (id, target_id) in rows {
        written += statement
            .execute(params![id, run_id.get(), configuration_id, target_id, status.ordinal()])
            .map_err(db_error)?;
    }
    Ok(written)
}

/// Updates status rows by id; returns the number of rows written.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when an update fails.
pub(crate) fn update_statuses(
    connection: &Connection,
    status: RunStatus,
    row_ids: &[i64],
) -> Result<usize, SqliteBatchStoreError> {
    let mut statement = connection
        .prepare_cached("UPDATE rsk_run_status SET status = ?1 WHERE id = ?2")
        .map_err(db_error)?;
    let mut written = 0;
    for id in row_ids {
        written += statement.execute(params![status.ordinal(), id]).map_err(db_error)?;
    }
    Ok(written)
}
