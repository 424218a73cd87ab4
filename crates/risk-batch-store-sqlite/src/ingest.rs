// crates/risk-batch-store-sqlite/src/ingest.rs
// ============================================================================
// Module: Result Ingestion
// Description: Persists one result fragment of a started run.
// Purpose: Turn computed values into value, failure, and status rows.
// Dependencies: risk-batch-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! A fragment is written inside the caller's transaction in a fixed order:
//! failure causes, write-through market data, reference data and row
//! building, value rows, target properties, failure rows, and statuses.
//! Value rows of each configuration, target properties, and failure rows each
//! run in their own savepoint. A failed value insert is not an error: every
//! value row of that configuration is recorded as a failure carrying the
//! insert error instead. A failed property or failure insert is logged and
//! skipped.
//!
//! Security posture: target resolvers are external code; their failures are
//! logged and never abort ingestion.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputeFailureKey;
use risk_batch_core::ComputedValueResult;
use risk_batch_core::InvocationResult;
use risk_batch_core::NOT_APPLICABLE;
use risk_batch_core::ResultFragment;
use risk_batch_core::RunStatus;
use risk_batch_core::SnapshotMode;
use risk_batch_core::TargetResolver;
use risk_batch_core::runtime::FailureCauses;
use risk_batch_core::runtime::aggregate_failure_causes;
use risk_batch_core::runtime::convert_value;
use rusqlite::Connection;
use rusqlite::Transaction;

use crate::lifecycle::RunCaches;
use crate::market_data::add_values_to_market_data;
use crate::repository::FactKey;
use crate::repository::RiskFailureRow;
use crate::repository::RiskValueRow;
use crate::repository::failure_reason_count;
use crate::repository::insert_risk_failures;
use crate::repository::insert_risk_values;
use crate::repository::upsert_target_properties;
use crate::store::SqliteBatchStoreError;
use crate::store::db_error;
use crate::store::reserve_ids;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of the value-row insert of one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchWriteOutcome {
    /// Every value row was stored.
    AllSucceeded,
    /// Value rows were rejected and recorded as failures with this reason.
    PartiallyFailed(String),
}

/// Targets touched by one configuration of a fragment.
#[derive(Debug, Default)]
struct TargetOutcomes {
    /// Targets with at least one stored value.
    succeeded: BTreeSet<i64>,
    /// Targets with at least one failed value.
    failed: BTreeSet<i64>,
}

/// Rows built from a fragment before any fact insert.
#[derive(Debug, Default)]
struct FragmentRows {
    /// Value rows.
    values: Vec<RiskValueRow>,
    /// Failure rows.
    failures: Vec<RiskFailureRow>,
    /// Target outcomes per configuration id.
    targets: BTreeMap<i64, TargetOutcomes>,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Writes `fragment` for the run owning `caches`.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when reference data, compute failures,
/// or statuses cannot be written; the caller's transaction then rolls back.
pub(crate) fn add_fragment(
    tx: &mut Transaction<'_>,
    caches: &mut RunCaches,
    resolver: &dyn TargetResolver,
    fragment: &ResultFragment,
    eval_instant: i64,
) -> Result<BatchWriteOutcome, SqliteBatchStoreError> {
    let causes = resolve_causes(tx, caches, fragment)?;

    if caches.run.snapshot_mode == SnapshotMode::WriteThrough && !fragment.market_data.is_empty() {
        add_values_to_market_data(
            tx,
            &mut caches.interner,
            caches.run.market_data_id,
            &fragment.market_data,
        )?;
    }

    let mut rows = build_rows(tx, caches, fragment, &causes)?;
    let outcome = write_values(tx, caches, &mut rows, eval_instant)?;
    if outcome == BatchWriteOutcome::AllSucceeded {
        write_target_properties(tx, caches, resolver, fragment);
    }
    write_failures(tx, caches, &rows.failures, eval_instant);
    write_statuses(tx, caches, &rows.targets)?;

    tracing::debug!(
        run_id = %caches.run.id,
        values = rows.values.len(),
        failures = rows.failures.len(),
        degraded = outcome != BatchWriteOutcome::AllSucceeded,
        "ingested result fragment"
    );
    Ok(outcome)
}

/// Aggregates failure causes, keeping the underlying store error.
fn resolve_causes(
    connection: &Connection,
    caches: &mut RunCaches,
    fragment: &ResultFragment,
) -> Result<FailureCauses, SqliteBatchStoreError> {
    let mut resolver = caches.failures.resolver(connection);
    aggregate_failure_causes(fragment, &mut resolver).map_err(|err| {
        resolver.take_error().unwrap_or_else(|| SqliteBatchStoreError::Invalid(err.to_string()))
    })
}

// ============================================================================
// SECTION: Row Building
// ============================================================================

/// Interns unseen reference data and builds value and failure rows.
fn build_rows(
    connection: &Connection,
    caches: &mut RunCaches,
    fragment: &ResultFragment,
    causes: &FailureCauses,
) -> Result<FragmentRows, SqliteBatchStoreError> {
    let mut rows = FragmentRows::default();
    for results in &fragment.configurations {
        if results.values.is_empty() {
            continue;
        }
        caches.interner.intern_configurations(
            connection,
            caches.run.id,
            [results.configuration.as_str()],
        )?;
        let configuration_id =
            caches.interner.configuration_id(&results.configuration).ok_or_else(|| {
                SqliteBatchStoreError::Invalid(format!(
                    "calculation configuration not interned: {}",
                    results.configuration
                ))
            })?;
        intern_references(connection, caches, &results.values)?;
        for item in &results.values {
            let key = fact_key(caches, configuration_id, item)?;
            let outcomes = rows.targets.entry(configuration_id).or_default();
            if item.invocation_result != InvocationResult::Success {
                outcomes.failed.insert(key.target_id);
                let item_causes = causes
                    .get(&item.specification)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default();
                rows.failures.push(RiskFailureRow {
                    id: 0,
                    key,
                    causes: item_causes,
                });
                continue;
            }
            match convert_value(&item.specification.value_name, &item.value) {
                Ok(components) => {
                    outcomes.succeeded.insert(key.target_id);
                    for component in components {
                        let mut component_key = key.clone();
                        component_key.value_name = component.name;
                        rows.values.push(RiskValueRow {
                            id: 0,
                            key: component_key,
                            value: component.value,
                        });
                    }
                }
                Err(err) => {
                    outcomes.failed.insert(key.target_id);
                    let failure_key = ComputeFailureKey::new(
                        item.specification.function_id.as_str(),
                        Some(err.class_name()),
                        Some(&err.to_string()),
                        Some(NOT_APPLICABLE),
                    );
                    let failure = caches.failures.get_or_create(connection, &failure_key)?;
                    rows.failures.push(RiskFailureRow {
                        id: 0,
                        key,
                        causes: vec![failure.id],
                    });
                }
            }
        }
    }

    let total = rows.values.len() + rows.failures.len();
    if total > 0 {
        let first_id = reserve_ids(connection, total)?;
        let ids = first_id ..;
        let row_ids = rows
            .values
            .iter_mut()
            .map(|row| &mut row.id)
            .chain(rows.failures.iter_mut().map(|row| &mut row.id));
        for (slot, id) in row_ids.zip(ids) {
            *slot = id;
        }
    }
    Ok(rows)
}

/// Interns the specifications, targets, functions, and nodes of `values`.
fn intern_references(
    connection: &Connection,
    caches: &mut RunCaches,
    values: &[ComputedValueResult],
) -> Result<(), SqliteBatchStoreError> {
    let interner = &mut caches.interner;
    interner.intern_specifications(connection, values.iter().map(|item| &item.specification))?;
    interner.intern_targets(connection, values.iter().map(|item| &item.specification.target))?;
    interner.intern_functions(
        connection,
        values.iter().map(|item| &item.specification.function_id),
    )?;
    interner.intern_compute_nodes(connection, values.iter().map(|item| &item.compute_node_id))
}

/// Resolves the reference ids of one value from the caches.
fn fact_key(
    caches: &RunCaches,
    configuration_id: i64,
    item: &ComputedValueResult,
) -> Result<FactKey, SqliteBatchStoreError> {
    let specification = &item.specification;
    let missing = |what: &str| {
        SqliteBatchStoreError::Invalid(format!("{what} not interned for {specification}"))
    };
    let interner = &caches.interner;
    Ok(FactKey {
        configuration_id,
        value_name: specification.value_name.clone(),
        specification_id: interner
            .specification_id(specification)
            .ok_or_else(|| missing("value specification"))?,
        function_row_id: interner
            .function_id(&specification.function_id)
            .ok_or_else(|| missing("function"))?,
        function_id: specification.function_id.clone(),
        target_id: interner
            .target_id(&specification.target)
            .ok_or_else(|| missing("computation target"))?,
        compute_node_id: interner
            .compute_node_id(&item.compute_node_id)
            .ok_or_else(|| missing("compute node"))?,
    })
}

// ============================================================================
// SECTION: Fact Writes
// ============================================================================

/// Inserts value rows one configuration at a time.
///
/// Each configuration's rows go through their own savepoint; when a batch is
/// rejected, every value row of that configuration is recorded as a failure
/// carrying the insert error and the other configurations are unaffected.
fn write_values(
    tx: &mut Transaction<'_>,
    caches: &mut RunCaches,
    rows: &mut FragmentRows,
    eval_instant: i64,
) -> Result<BatchWriteOutcome, SqliteBatchStoreError> {
    rows.values.sort_by_key(|row| row.key.configuration_id);
    let mut rejected: BTreeMap<i64, rusqlite::Error> = BTreeMap::new();
    for batch in rows.values.chunk_by(|left, right| {
        left.key.configuration_id == right.key.configuration_id
    }) {
        let Some(configuration_id) = batch.first().map(|row| row.key.configuration_id) else {
            continue;
        };
        if let Some(err) = insert_configuration_values(tx, caches, eval_instant, batch)? {
            tracing::error!(
                run_id = %caches.run.id,
                configuration_id,
                rows = batch.len(),
                error = %err,
                "value insert failed; recording values as failures"
            );
            rejected.insert(configuration_id, err);
        }
    }
    if rejected.is_empty() {
        return Ok(BatchWriteOutcome::AllSucceeded);
    }

    let (failed, stored): (Vec<RiskValueRow>, Vec<RiskValueRow>) = rows
        .values
        .drain(..)
        .partition(|row| rejected.contains_key(&row.key.configuration_id));
    rows.values = stored;
    for configuration_id in rejected.keys() {
        if let Some(outcomes) = rows.targets.get_mut(configuration_id) {
            outcomes.succeeded.clear();
        }
    }
    for row in failed {
        let Some(err) = rejected.get(&row.key.configuration_id) else {
            continue;
        };
        let key = insert_failure_key(row.key.function_id.as_str(), err);
        let id = caches.failures.get_or_create(tx, &key)?.id;
        let outcomes = rows.targets.entry(row.key.configuration_id).or_default();
        outcomes.failed.insert(row.key.target_id);
        rows.failures.push(RiskFailureRow {
            id: row.id,
            key: row.key,
            causes: vec![id],
        });
    }
    let reason = rejected.values().map(ToString::to_string).collect::<Vec<_>>().join("; ");
    Ok(BatchWriteOutcome::PartiallyFailed(reason))
}

/// Inserts one configuration's value rows inside a savepoint.
///
/// Returns the insert error after rolling the savepoint back.
fn insert_configuration_values(
    tx: &mut Transaction<'_>,
    caches: &RunCaches,
    eval_instant: i64,
    batch: &[RiskValueRow],
) -> Result<Option<rusqlite::Error>, SqliteBatchStoreError> {
    let savepoint = tx.savepoint().map_err(db_error)?;
    match insert_risk_values(&savepoint, caches.run.id, eval_instant, batch) {
        Ok(()) => {
            savepoint.commit().map_err(db_error)?;
            Ok(None)
        }
        Err(err) => {
            savepoint.finish().map_err(db_error)?;
            Ok(Some(err))
        }
    }
}

/// Builds the compute failure recorded for values whose insert failed.
fn insert_failure_key(function: &str, err: &rusqlite::Error) -> ComputeFailureKey {
    let detail = match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            format!("sqlite extended code {}", code.extended_code)
        }
        _ => NOT_APPLICABLE.to_string(),
    };
    let class = match err.sqlite_error_code() {
        Some(_) => "SqliteFailure",
        None => "StoreError",
    };
    ComputeFailureKey::new(function, Some(class), Some(&err.to_string()), Some(&detail))
}

/// Upserts descriptive properties of the fragment's targets.
fn write_target_properties(
    tx: &mut Transaction<'_>,
    caches: &RunCaches,
    resolver: &dyn TargetResolver,
    fragment: &ResultFragment,
) {
    let targets: BTreeSet<&ComputationTargetSpecification> =
        fragment.all_values().map(|item| &item.specification.target).collect();
    let mut described = Vec::new();
    for target in targets {
        let Some(target_id) = caches.interner.target_id(target) else {
            continue;
        };
        match resolver.resolve(target, &caches.run.version_correction) {
            Ok(Some(resolved)) => {
                if let Some(describable) = resolved.as_describable() {
                    let properties = describable.properties();
                    if !properties.is_empty() {
                        described.push((target_id, properties));
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    computation_target = %target,
                    error = %err,
                    "target resolution failed"
                );
            }
        }
    }
    if described.is_empty() {
        return;
    }

    let result = tx.savepoint().map_err(db_error).and_then(|savepoint| {
        for (target_id, properties) in &described {
            let first_id = reserve_ids(&savepoint, properties.len())?;
            upsert_target_properties(&savepoint, *target_id, properties, first_id)?;
        }
        savepoint.commit().map_err(db_error)
    });
    if let Err(err) = result {
        tracing::warn!(run_id = %caches.run.id, error = %err, "target property write skipped");
    }
}

/// Inserts failure rows and reasons; a failure is logged and skipped.
fn write_failures(
    tx: &mut Transaction<'_>,
    caches: &RunCaches,
    failures: &[RiskFailureRow],
    eval_instant: i64,
) {
    if failures.is_empty() {
        return;
    }
    let result = tx.savepoint().map_err(db_error).and_then(|savepoint| {
        let reasons = failure_reason_count(failures);
        let first_reason_id = if reasons == 0 { 0 } else { reserve_ids(&savepoint, reasons)? };
        insert_risk_failures(&savepoint, caches.run.id, eval_instant, failures, first_reason_id)?;
        savepoint.commit().map_err(db_error)
    });
    if let Err(err) = result {
        tracing::warn!(
            run_id = %caches.run.id,
            rows = failures.len(),
            error = %err,
            "failure row write skipped"
        );
    }
}

// ============================================================================
// SECTION: Statuses
// ============================================================================

/// Updates run statuses from the fragment's target outcomes.
///
/// A target is failed when any of its values failed in this fragment or its
/// stored status already is [`RunStatus::Failure`].
fn write_statuses(
    connection: &Connection,
    caches: &mut RunCaches,
    targets: &BTreeMap<i64, TargetOutcomes>,
) -> Result<(), SqliteBatchStoreError> {
    for (configuration_id, outcomes) in targets {
        let mut failed = outcomes.failed.clone();
        let mut succeeded = BTreeSet::new();
        for target_id in outcomes.succeeded.difference(&outcomes.failed) {
            let stored = caches.statuses.status(connection, *configuration_id, *target_id)?;
            if stored == RunStatus::Failure {
                failed.insert(*target_id);
            } else {
                succeeded.insert(*target_id);
            }
        }
        if !succeeded.is_empty() {
            caches.statuses.update_statuses(
                connection,
                *configuration_id,
                RunStatus::Success,
                &succeeded,
            )?;
        }
        if !failed.is_empty() {
            caches.statuses.update_statuses(
                connection,
                *configuration_id,
                RunStatus::Failure,
                &failed,
            )?;
        }
        tracing::info!(
            run_id = %caches.run.id,
            configuration_id,
            succeeded = succeeded.len(),
            failed = failed.len(),
            "recorded target statuses"
        );
    }
    Ok(())
}
