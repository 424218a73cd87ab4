// crates/risk-batch-store-sqlite/src/status.rs
// ============================================================================
// Module: Status Tracker
// Description: Per-run (configuration, target) status cache backed by the store.
// Purpose: Maintain the incrementally updated status matrix of a run.
// Dependencies: risk-batch-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! Reads are cache-first; a pair with no stored row reads as
//! [`RunStatus::NotRunning`] and that answer is cached. Updates split into
//! one batched insert for pairs without a row and one batched update for
//! pairs with one; each batch must touch exactly the requested rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use risk_batch_core::RunId;
use risk_batch_core::RunStatus;
use rusqlite::Connection;

use crate::journal::AttemptState;
use crate::journal::JournaledMap;
use crate::repository::find_status;
use crate::repository::insert_statuses;
use crate::repository::update_statuses;
use crate::store::SqliteBatchStoreError;
use crate::store::reserve_ids;

// ============================================================================
// SECTION: Tracker
// ============================================================================

/// Cached status of one (configuration, target) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatusEntry {
    /// Stored row id, when a row exists.
    row_id: Option<i64>,
    /// Current status.
    status: RunStatus,
}

/// Per-run status cache.
///
/// # Invariants
/// - A cached entry with `row_id = None` has no stored row.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    /// Run the statuses belong to.
    run_id: RunId,
    /// Cached entries keyed by (configuration id, target id).
    entries: JournaledMap<(i64, i64), StatusEntry>,
}

impl StatusTracker {
    /// Creates an empty tracker for `run_id`.
    #[must_use]
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            entries: JournaledMap::default(),
        }
    }

    /// Returns the status of a pair, consulting the store on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when the store query fails.
    pub fn status(
        &mut self,
        connection: &Connection,
        configuration_id: i64,
        target_id: i64,
    ) -> Result<RunStatus, SqliteBatchStoreError> {
        Ok(self.entry(connection, configuration_id, target_id)?.status)
    }

    /// Sets `status` for every target of `configuration_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when a write fails or touches a
    /// different number of rows than requested.
    pub fn update_statuses(
        &mut self,
        connection: &Connection,
        configuration_id: i64,
        status: RunStatus,
        targets: &BTreeSet<i64>,
    ) -> Result<(), SqliteBatchStoreError> {
        let mut untracked = Vec::new();
        let mut tracked = Vec::new();
        for target_id in targets {
            match self.entry(connection, configuration_id, *target_id)?.row_id {
                Some(row_id) => tracked.push((row_id, *target_id)),
                None => untracked.push(*target_id),
            }
        }

        let mut inserts = Vec::with_capacity(untracked.len());
        if !untracked.is_empty() {
            let first_id = reserve_ids(connection, untracked.len())?;
            inserts.extend((first_id ..).zip(untracked.iter().copied()));
            let written =
                insert_statuses(connection, self.run_id, configuration_id, status, &inserts)?;
            ensure_written("insert", written, inserts.len())?;
        }
        let row_ids: Vec<i64> = tracked.iter().map(|(row_id, _)| *row_id).collect();
        if !row_ids.is_empty() {
            let written = update_statuses(connection, status, &row_ids)?;
            ensure_written("update", written, row_ids.len())?;
        }

        for (row_id, target_id) in inserts.into_iter().chain(tracked) {
            self.entries.insert(
                (configuration_id, target_id),
                StatusEntry {
                    row_id: Some(row_id),
                    status,
                },
            );
        }
        tracing::debug!(
            run_id = %self.run_id,
            configuration_id,
            status = status.ordinal(),
            inserted = untracked.len(),
            updated = row_ids.len(),
            "updated run statuses"
        );
        Ok(())
    }

    /// Returns the cached entry, loading it from the store on a miss.
    fn entry(
        &mut self,
        connection: &Connection,
        configuration_id: i64,
        target_id: i64,
    ) -> Result<StatusEntry, SqliteBatchStoreError> {
        if let Some(entry) = self.entries.get(&(configuration_id, target_id)) {
            return Ok(*entry);
        }
        let entry = match find_status(connection, self.run_id, configuration_id, target_id)? {
            Some((row_id, status)) => StatusEntry {
                row_id: Some(row_id),
                status,
            },
            None => StatusEntry {
                row_id: None,
                status: RunStatus::NotRunning,
            },
        };
        self.entries.insert((configuration_id, target_id), entry);
        Ok(entry)
    }
}

impl AttemptState for StatusTracker {
    fn begin_attempt(&mut self) {
        self.entries.begin_attempt();
    }

    fn commit_attempt(&mut self) {
        self.entries.commit_attempt();
    }

    fn rollback_attempt(&mut self) {
        self.entries.rollback_attempt();
    }
}

/// Verifies a batched status write touched every requested row.
fn ensure_written(
    operation: &str,
    written: usize,
    expected: usize,
) -> Result<(), SqliteBatchStoreError> {
    if written == expected {
        Ok(())
    } else {
        Err(SqliteBatchStoreError::Db(format!(
            "status {operation} wrote {written} rows, expected {expected}"
        )))
    }
}
