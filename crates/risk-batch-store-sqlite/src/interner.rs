// crates/risk-batch-store-sqlite/src/interner.rs
// ============================================================================
// Module: Reference Data Interner
// Description: Per-run caches mapping reference data to interned row ids.
// Purpose: Normalize high-cardinality reference data without double inserts.
// Dependencies: risk-batch-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! Every reference entity is interned the same way: distinct uncached keys
//! are looked up by exact attributes; misses get ids from the shared
//! sequence before the insert and are cached immediately; all misses are
//! then written in one batched insert. Keys are attribute tuples, so
//! distinct objects with identical synthesized forms share one id.
//!
//! Every cache is journaled, so the ids interned by an attempt that rolls
//! back are forgotten with it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;

use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputeNodeId;
use risk_batch_core::FunctionId;
use risk_batch_core::RunId;
use risk_batch_core::ValueRequirement;
use risk_batch_core::ValueSpecification;
use rusqlite::Connection;
use rusqlite::params;

use crate::repository::CalculationConfigurationEntity;
use crate::repository::ComputationTargetEntity;
use crate::repository::ComputeNodeEntity;
use crate::repository::FunctionUniqueIdEntity;
use crate::repository::InternedEntity;
use crate::repository::ValueRequirementEntity;
use crate::repository::ValueSpecificationEntity;
use crate::journal::AttemptState;
use crate::journal::JournaledMap;
use crate::store::SqliteBatchStoreError;
use crate::store::db_error;
use crate::store::reserve_ids;

// ============================================================================
// SECTION: Interner
// ============================================================================

/// Per-run reference data caches.
///
/// # Invariants
/// - Every cached id names a row visible to the current transaction.
#[derive(Debug, Clone, Default)]
pub struct ReferenceDataInterner {
    /// Calculation configuration ids by name.
    configurations: JournaledMap<String, i64>,
    /// Configurations already linked to the run.
    linked_configurations: JournaledMap<i64, ()>,
    /// Value specification ids by synthesized form.
    specifications: JournaledMap<String, i64>,
    /// Value requirement ids by (synthesized constraints, specification id).
    requirements: JournaledMap<(String, i64), i64>,
    /// Computation target ids.
    targets: JournaledMap<ComputationTargetSpecification, i64>,
    /// Function unique id rows.
    functions: JournaledMap<FunctionId, i64>,
    /// Compute node rows.
    compute_nodes: JournaledMap<ComputeNodeId, i64>,
}

impl ReferenceDataInterner {
    /// Creates empty caches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns configuration names and links them to `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when a lookup or insert fails.
    pub fn intern_configurations<'a, I>(
        &mut self,
        connection: &Connection,
        run_id: RunId,
        names: I,
    ) -> Result<(), SqliteBatchStoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<String> = names.into_iter().map(str::to_string).collect();
        intern_all::<CalculationConfigurationEntity>(
            connection,
            &mut self.configurations,
            names.iter().cloned(),
        )?;
        let mut statement = connection
            .prepare_cached(
                "INSERT OR IGNORE INTO rsk_run_calculation_configuration (run_id, \
                 calculation_configuration_id) VALUES (?1, ?2)",
            )
            .map_err(db_error)?;
        for name in &names {
            let Some(id) = self.configurations.get(name).copied() else {
                continue;
            };
            if self.linked_configurations.insert(id, ()).is_none() {
                statement.execute(params![run_id.get(), id]).map_err(db_error)?;
            }
        }
        Ok(())
    }

    /// Interns value specifications by synthesized property form.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when a lookup or insert fails.
    pub fn intern_specifications<'a, I>(
        &mut self,
        connection: &Connection,
        specifications: I,
    ) -> Result<(), SqliteBatchStoreError>
    where
        I: IntoIterator<Item = &'a ValueSpecification>,
    {
        intern_all::<ValueSpecificationEntity>(
            connection,
            &mut self.specifications,
            specifications.into_iter().map(|spec| spec.properties.synthesize()),
        )
    }

    /// Interns value requirements against their satisfying specifications.
    ///
    /// Specifications are interned first when not yet cached.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when a lookup or insert fails.
    pub fn intern_requirements<'a, I>(
        &mut self,
        connection: &Connection,
        pairs: I,
    ) -> Result<(), SqliteBatchStoreError>
    where
        I: IntoIterator<Item = (&'a ValueRequirement, &'a ValueSpecification)>,
    {
        let pairs: Vec<(&ValueRequirement, &ValueSpecification)> = pairs.into_iter().collect();
        self.intern_specifications(connection, pairs.iter().map(|(_, spec)| *spec))?;
        let mut keys = Vec::with_capacity(pairs.len());
        for (requirement, specification) in &pairs {
            let specification_id = self.specification_id(specification).ok_or_else(|| {
                SqliteBatchStoreError::Invalid(format!(
                    "value specification not interned: {specification}"
                ))
            })?;
            keys.push((requirement.constraints.synthesize(), specification_id));
        }
        intern_all::<ValueRequirementEntity>(connection, &mut self.requirements, keys)
    }

    /// Interns computation targets.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when a lookup or insert fails.
    pub fn intern_targets<'a, I>(
        &mut self,
        connection: &Connection,
        targets: I,
    ) -> Result<(), SqliteBatchStoreError>
    where
        I: IntoIterator<Item = &'a ComputationTargetSpecification>,
    {
        intern_all::<ComputationTargetEntity>(
            connection,
            &mut self.targets,
            targets.into_iter().cloned(),
        )
    }

    /// Interns function identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when a lookup or insert fails.
    pub fn intern_functions<'a, I>(
        &mut self,
        connection: &Connection,
        functions: I,
    ) -> Result<(), SqliteBatchStoreError>
    where
        I: IntoIterator<Item = &'a FunctionId>,
    {
        intern_all::<FunctionUniqueIdEntity>(
            connection,
            &mut self.functions,
            functions.into_iter().cloned(),
        )
    }

    /// Interns compute nodes.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when a lookup or insert fails.
    pub fn intern_compute_nodes<'a, I>(
        &mut self,
        connection: &Connection,
        nodes: I,
    ) -> Result<(), SqliteBatchStoreError>
    where
        I: IntoIterator<Item = &'a ComputeNodeId>,
    {
        intern_all::<ComputeNodeEntity>(
            connection,
            &mut self.compute_nodes,
            nodes.into_iter().cloned(),
        )
    }

    /// Returns the cached configuration id.
    #[must_use]
    pub fn configuration_id(&self, name: &str) -> Option<i64> {
        self.configurations.get(name).copied()
    }

    /// Returns the cached specification id.
    #[must_use]
    pub fn specification_id(&self, specification: &ValueSpecification) -> Option<i64> {
        self.specifications.get(&specification.properties.synthesize()).copied()
    }

    /// Returns the cached target id.
    #[must_use]
    pub fn target_id(&self, target: &ComputationTargetSpecification) -> Option<i64> {
        self.targets.get(target).copied()
    }

    /// Returns the cached function row id.
    #[must_use]
    pub fn function_id(&self, function: &FunctionId) -> Option<i64> {
        self.functions.get(function).copied()
    }

    /// Returns the cached compute node id.
    #[must_use]
    pub fn compute_node_id(&self, node: &ComputeNodeId) -> Option<i64> {
        self.compute_nodes.get(node).copied()
    }
}

impl AttemptState for ReferenceDataInterner {
    fn begin_attempt(&mut self) {
        self.configurations.begin_attempt();
        self.linked_configurations.begin_attempt();
        self.specifications.begin_attempt();
        self.requirements.begin_attempt();
        self.targets.begin_attempt();
        self.functions.begin_attempt();
        self.compute_nodes.begin_attempt();
    }

    fn commit_attempt(&mut self) {
        self.configurations.commit_attempt();
        self.linked_configurations.commit_attempt();
        self.specifications.commit_attempt();
        self.requirements.commit_attempt();
        self.targets.commit_attempt();
        self.functions.commit_attempt();
        self.compute_nodes.commit_attempt();
    }

    fn rollback_attempt(&mut self) {
        self.configurations.rollback_attempt();
        self.linked_configurations.rollback_attempt();
        self.specifications.rollback_attempt();
        self.requirements.rollback_attempt();
        self.targets.rollback_attempt();
        self.functions.rollback_attempt();
        self.compute_nodes.rollback_attempt();
    }
}

// ============================================================================
// SECTION: Interning
// ============================================================================

/// Interns every key not yet in `cache`.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when a lookup, id reservation, or insert
/// fails.
fn intern_all<E: InternedEntity>(
    connection: &Connection,
    cache: &mut JournaledMap<E::Key, i64>,
    keys: impl IntoIterator<Item = E::Key>,
) -> Result<(), SqliteBatchStoreError> {
    let mut misses: Vec<E::Key> = Vec::new();
    let mut seen: HashSet<E::Key> = HashSet::new();
    for key in keys {
        if cache.contains_key(&key) || !seen.insert(key.clone()) {
            continue;
        }
        match E::find(connection, &key)? {
            Some(id) => {
                cache.insert(key, id);
            }
            None => misses.push(key),
        }
    }
    if misses.is_empty() {
        return Ok(());
    }
    let first_id = reserve_ids(connection, misses.len())?;
    let rows: Vec<(i64, E::Key)> =
        misses.into_iter().zip(first_id ..).map(|(key, id)| (id, key)).collect();
    for (id, key) in &rows {
        cache.insert(key.clone(), *id);
    }
    E::batch_insert(connection, &rows)?;
    tracing::debug!(table = E::TABLE, inserted = rows.len(), "interned reference rows");
    Ok(())
}
