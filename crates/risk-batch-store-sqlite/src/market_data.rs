// crates/risk-batch-store-sqlite/src/market_data.rs
// ============================================================================
// Module: Market Data Snapshots
// Description: Create-or-get, populate, read, and delete market data snapshots.
// Purpose: Persist the market data a run was computed against.
// Dependencies: risk-batch-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! Snapshots are keyed by base identifier. Values are unique per
//! (snapshot, target, field name); duplicates are ignored. Values already
//! belonging to a snapshot (snapshot bundles) are never written back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputationTargetType;
use risk_batch_core::ComputedValue;
use risk_batch_core::MarketDataId;
use risk_batch_core::MarketDataValue;
use risk_batch_core::ResultValue;
use risk_batch_core::UniqueId;
use risk_batch_core::runtime::convert_value;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::interner::ReferenceDataInterner;
use crate::store::SqliteBatchStoreError;
use crate::store::db_error;
use crate::store::next_id;
use crate::store::reserve_ids;

// ============================================================================
// SECTION: Snapshots
// ============================================================================

/// Returns the snapshot id for `base_id`, if stored.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query fails.
pub(crate) fn find_market_data(
    connection: &Connection,
    base_id: &UniqueId,
) -> Result<Option<MarketDataId>, SqliteBatchStoreError> {
    connection
        .prepare_cached("SELECT id FROM rsk_live_data_snapshot WHERE base_uid = ?1")
        .map_err(db_error)?
        .query_row(params![base_id.to_string()], |row| row.get(0))
        .optional()
        .map(|id| id.map(MarketDataId::new))
        .map_err(db_error)
}

/// Returns the snapshot id for `base_id`, creating the snapshot when absent.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the query or insert fails.
pub(crate) fn create_or_get_market_data(
    connection: &Connection,
    base_id: &UniqueId,
) -> Result<MarketDataId, SqliteBatchStoreError> {
    if let Some(id) = find_market_data(connection, base_id)? {
        return Ok(id);
    }
    let id = next_id(connection)?;
    connection
        .prepare_cached("INSERT INTO rsk_live_data_snapshot (id, base_uid) VALUES (?1, ?2)")
        .map_err(db_error)?
        .execute(params![id, base_id.to_string()])
        .map_err(db_error)?;
    tracing::info!(market_data_id = id, base_id = %base_id, "created market data snapshot");
    Ok(MarketDataId::new(id))
}

/// Fails with `NotFound` unless the snapshot exists.
fn ensure_market_data(
    connection: &Connection,
    market_data_id: MarketDataId,
) -> Result<(), SqliteBatchStoreError> {
    let exists: Option<i64> = connection
        .prepare_cached("SELECT id FROM rsk_live_data_snapshot WHERE id = ?1")
        .map_err(db_error)?
        .query_row(params![market_data_id.get()], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match exists {
        Some(_) => Ok(()),
        None => Err(SqliteBatchStoreError::NotFound(format!(
            "market data snapshot {market_data_id}"
        ))),
    }
}

// ============================================================================
// SECTION: Values
// ============================================================================

/// Adds `values` to a snapshot; returns the number of new rows.
///
/// Snapshot bundles are skipped; values without a numeric form are logged
/// and skipped; duplicates of stored points are ignored.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the snapshot is unknown or a write
/// fails.
pub(crate) fn add_values_to_market_data(
    connection: &Connection,
    interner: &mut ReferenceDataInterner,
    market_data_id: MarketDataId,
    values: &[ComputedValue],
) -> Result<usize, SqliteBatchStoreError> {
    ensure_market_data(connection, market_data_id)?;
    let mut points = Vec::new();
    for computed in values {
        if matches!(computed.value, ResultValue::SnapshotBundle(_)) {
            continue;
        }
        match convert_value(&computed.specification.value_name, &computed.value) {
            Ok(named) => {
                for component in named {
                    points.push((&computed.specification.target, component.name, component.value));
                }
            }
            Err(err) => {
                tracing::warn!(
                    value = %computed.specification,
                    error = %err,
                    "skipping market data value"
                );
            }
        }
    }
    if points.is_empty() {
        return Ok(0);
    }
    interner.intern_targets(connection, points.iter().map(|(target, _, _)| *target))?;
    let first_id = reserve_ids(connection, points.len())?;
    let mut statement = connection
        .prepare_cached(
            "INSERT OR IGNORE INTO rsk_live_data_snapshot_entry (id, snapshot_id, \
             computation_target_id, name, value) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(db_error)?;
    let mut inserted = 0;
    for ((target, name, value), id) in points.iter().zip(first_id ..) {
        let target_id = interner.target_id(target).ok_or_else(|| {
            SqliteBatchStoreError::Invalid(format!("computation target not interned: {target}"))
        })?;
        inserted += statement
            .execute(params![id, market_data_id.get(), target_id, name, value])
            .map_err(db_error)?;
    }
    tracing::debug!(
        market_data_id = %market_data_id,
        offered = points.len(),
        inserted,
        "added market data values"
    );
    Ok(inserted)
}

/// Returns the stored values of a snapshot ordered by insertion.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the snapshot is unknown, the query
/// fails, or a stored target is corrupt.
pub(crate) fn market_data_values(
    connection: &Connection,
    market_data_id: MarketDataId,
) -> Result<Vec<MarketDataValue>, SqliteBatchStoreError> {
    ensure_market_data(connection, market_data_id)?;
    let mut statement = connection
        .prepare_cached(
            "SELECT t.target_type, t.id_scheme, t.id_value, t.id_version, e.name, e.value FROM \
             rsk_live_data_snapshot_entry e JOIN rsk_computation_target t ON t.id = \
             e.computation_target_id WHERE e.snapshot_id = ?1 ORDER BY e.id",
        )
        .map_err(db_error)?;
    let rows = statement
        .query_map(params![market_data_id.get()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })
        .map_err(db_error)?;
    let mut values = Vec::new();
    for row in rows {
        let (target_type, scheme, value_id, version, name, value) = row.map_err(db_error)?;
        values.push(MarketDataValue {
            target: decode_target(&target_type, scheme, value_id, version)?,
            name,
            value,
        });
    }
    Ok(values)
}

/// Deletes a snapshot and its values; returns whether it existed.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when a delete fails, including when a
/// run still references the snapshot.
pub(crate) fn delete_market_data(
    connection: &Connection,
    market_data_id: MarketDataId,
) -> Result<bool, SqliteBatchStoreError> {
    connection
        .execute(
            "DELETE FROM rsk_live_data_snapshot_entry WHERE snapshot_id = ?1",
            params![market_data_id.get()],
        )
        .map_err(db_error)?;
    let deleted = connection
        .execute("DELETE FROM rsk_live_data_snapshot WHERE id = ?1", params![market_data_id.get()])
        .map_err(db_error)?;
    Ok(deleted == 1)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rebuilds a target specification from stored columns.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError::Invalid`] for unknown target types or
/// partial identifiers.
pub(crate) fn decode_target(
    target_type: &str,
    scheme: Option<String>,
    value: Option<String>,
    version: Option<String>,
) -> Result<ComputationTargetSpecification, SqliteBatchStoreError> {
    let target_type = ComputationTargetType::parse(target_type).ok_or_else(|| {
        SqliteBatchStoreError::Invalid(format!("unknown computation target type {target_type}"))
    })?;
    match (scheme, value) {
        (Some(scheme), Some(value)) => Ok(ComputationTargetSpecification::new(
            target_type,
            UniqueId {
                scheme,
                value,
                version,
            },
        )),
        (None, None) => Ok(ComputationTargetSpecification::anonymous(target_type)),
        _ => Err(SqliteBatchStoreError::Invalid(
            "computation target identifier is partially stored".to_string(),
        )),
    }
}
