// crates/risk-batch-core/src/runtime/listener.rs
// ============================================================================
// Module: Batch Run Listener
// Description: Maps computation cycle lifecycle events onto the batch master.
// Purpose: Drive run start, result ingestion, and run end from cycle events.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! The listener remembers the run started for the current cycle. Fragments
//! and completed cycles are written in full; execution failures and
//! interrupted terminations end the run on a best-effort basis.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::CycleMetadata;
use crate::core::ResultFragment;
use crate::core::RunCreationMode;
use crate::core::RunId;
use crate::core::SnapshotMode;
use crate::interfaces::BatchError;
use crate::interfaces::BatchRunMaster;

// ============================================================================
// SECTION: Listener
// ============================================================================

/// Cycle event listener writing results through a [`BatchRunMaster`].
///
/// # Invariants
/// - At most one run is current at a time.
pub struct BatchRunListener {
    /// Batch facade.
    master: Arc<dyn BatchRunMaster>,
    /// Run parameters recorded on start.
    parameters: BTreeMap<String, String>,
    /// Creation mode used on start.
    creation_mode: RunCreationMode,
    /// Snapshot mode used on start.
    snapshot_mode: SnapshotMode,
    /// Run started for the current cycle.
    current_run: Mutex<Option<RunId>>,
}

impl BatchRunListener {
    /// Creates a listener with the given run settings.
    #[must_use]
    pub fn new(
        master: Arc<dyn BatchRunMaster>,
        parameters: BTreeMap<String, String>,
        creation_mode: RunCreationMode,
        snapshot_mode: SnapshotMode,
    ) -> Self {
        Self {
            master,
            parameters,
            creation_mode,
            snapshot_mode,
            current_run: Mutex::new(None),
        }
    }

    /// Returns the run started for the current cycle.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when listener state is poisoned.
    pub fn current_run(&self) -> Result<Option<RunId>, BatchError> {
        let guard = self.lock_current()?;
        Ok(*guard)
    }

    /// Starts (or reuses) the run for a new cycle.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when the run cannot be started.
    pub fn cycle_started(&self, cycle: CycleMetadata) -> Result<RunId, BatchError> {
        let run = self.master.start_risk_run(
            cycle,
            self.parameters.clone(),
            self.creation_mode,
            self.snapshot_mode,
        )?;
        *self.lock_current()? = Some(run.id);
        tracing::info!(run_id = %run.id, restarts = run.num_restarts, "batch run started");
        Ok(run.id)
    }

    /// Writes a completed fragment.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NotFound`] when no run has been started.
    pub fn cycle_fragment_completed(&self, fragment: ResultFragment) -> Result<(), BatchError> {
        let run_id = self.require_run("cycle_fragment_completed")?;
        self.master.add_job_results(run_id, fragment)
    }

    /// Writes the full result of a completed cycle.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NotFound`] when no run has been started.
    pub fn cycle_completed(&self, result: ResultFragment) -> Result<(), BatchError> {
        let run_id = self.require_run("cycle_completed")?;
        self.master.add_job_results(run_id, result)
    }

    /// Ends the current run after a cycle execution failure.
    pub fn cycle_execution_failed(&self, reason: &str) {
        tracing::warn!(reason, "cycle execution failed");
        self.end_current_run("cycle_execution_failed");
    }

    /// Ends the current run after the process completes.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::NotFound`] when no run has been started.
    pub fn process_completed(&self) -> Result<(), BatchError> {
        let run_id = self.lock_current()?.take().ok_or_else(|| {
            BatchError::NotFound("process_completed received before any run started".to_string())
        })?;
        self.master.end_risk_run(run_id)
    }

    /// Ends the current run when the process was interrupted.
    pub fn process_terminated(&self, interrupted: bool) {
        if interrupted {
            self.end_current_run("process_terminated");
        }
    }

    /// Ends the current run, logging instead of failing.
    fn end_current_run(&self, event: &'static str) {
        let run_id = match self.lock_current() {
            Ok(mut guard) => guard.take(),
            Err(err) => {
                tracing::error!(event, error = %err, "cannot end batch run");
                return;
            }
        };
        let Some(run_id) = run_id else {
            tracing::warn!(event, "no batch run was started; nothing to end");
            return;
        };
        if let Err(err) = self.master.end_risk_run(run_id) {
            tracing::error!(event, run_id = %run_id, error = %err, "failed to end batch run");
        }
    }

    /// Returns the current run or a not-found error naming `event`.
    fn require_run(&self, event: &str) -> Result<RunId, BatchError> {
        self.lock_current()?
            .ok_or_else(|| BatchError::NotFound(format!("{event} received before any run started")))
    }

    /// Locks the current-run slot.
    fn lock_current(&self) -> Result<std::sync::MutexGuard<'_, Option<RunId>>, BatchError> {
        self.current_run
            .lock()
            .map_err(|_| BatchError::Unavailable("batch listener state poisoned".to_string()))
    }
}
