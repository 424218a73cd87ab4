// crates/risk-batch-core/src/runtime/serializer.rs
// ============================================================================
// Module: Single Writer Serializer
// Description: Serializes batch writer operations through one worker thread.
// Purpose: Expose a non-thread-safe writer as a thread-safe master facade.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! A dedicated worker thread owns the [`BatchRunWriter`] and executes queued
//! units of work strictly in submission order. Run starts, snapshot
//! creation, and reads block for their reply; other writes are
//! fire-and-forget and their failures are logged.
//!
//! The queue is unbounded: a producer that outpaces the store grows memory
//! without backpressure.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;

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
use crate::interfaces::BatchError;
use crate::interfaces::BatchRunMaster;
use crate::interfaces::BatchRunWriter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the writer worker thread.
const WRITER_THREAD_NAME: &str = "risk-batch-writer";

// ============================================================================
// SECTION: Serializer
// ============================================================================

/// Unit of work executed on the worker thread.
type WriterTask = Box<dyn FnOnce(&mut dyn BatchRunWriter) + Send>;

/// Thread-safe facade that funnels every operation through one writer thread.
///
/// # Invariants
/// - Units of work execute one at a time, in submission order.
/// - Only the worker thread touches the writer.
pub struct SingleWriterSerializer {
    /// Work queue feeding the worker.
    sender: mpsc::Sender<WriterTask>,
    /// Worker thread handle.
    worker: thread::JoinHandle<()>,
}

impl SingleWriterSerializer {
    /// Spawns the worker thread that owns `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when the thread cannot be spawned.
    pub fn spawn<W>(writer: W) -> Result<Self, BatchError>
    where
        W: BatchRunWriter + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<WriterTask>();
        let worker = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || writer_loop(writer, &receiver))
            .map_err(|err| {
                BatchError::Unavailable(format!("failed to spawn batch writer thread: {err}"))
            })?;
        Ok(Self {
            sender,
            worker,
        })
    }

    /// Blocks until every previously queued unit of work has run.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when the worker has stopped.
    pub fn flush(&self) -> Result<(), BatchError> {
        self.call("flush", |_| Ok(()))
    }

    /// Drains the queue and stops the worker.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Unavailable`] when the worker panicked.
    pub fn shutdown(self) -> Result<(), BatchError> {
        let Self {
            sender,
            worker,
        } = self;
        drop(sender);
        worker
            .join()
            .map_err(|_| BatchError::Unavailable("batch writer thread panicked".to_string()))
    }

    /// Queues `task` and blocks for its result.
    fn call<T, F>(&self, operation: &'static str, task: F) -> Result<T, BatchError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn BatchRunWriter) -> Result<T, BatchError> + Send + 'static,
    {
        let (response, reply) = mpsc::channel();
        self.submit(Box::new(move |writer| {
            let _ = response.send(task(writer));
        }))?;
        let result = reply.recv().map_err(|_| {
            BatchError::Unavailable(format!("batch writer stopped before completing {operation}"))
        })?;
        result.map_err(|err| BatchError::Task(Box::new(err)))
    }

    /// Queues `task` without waiting; failures are logged on the worker.
    fn post<F>(&self, operation: &'static str, task: F) -> Result<(), BatchError>
    where
        F: FnOnce(&mut dyn BatchRunWriter) -> Result<(), BatchError> + Send + 'static,
    {
        self.submit(Box::new(move |writer| {
            if let Err(err) = task(writer) {
                tracing::error!(operation, error = %err, "queued batch operation failed");
            }
        }))
    }

    /// Pushes a unit of work onto the queue.
    fn submit(&self, task: WriterTask) -> Result<(), BatchError> {
        self.sender
            .send(task)
            .map_err(|_| BatchError::Unavailable("batch writer queue is closed".to_string()))
    }
}

impl BatchRunMaster for SingleWriterSerializer {
    fn start_risk_run(
        &self,
        cycle: CycleMetadata,
        parameters: BTreeMap<String, String>,
        creation_mode: RunCreationMode,
        snapshot_mode: SnapshotMode,
    ) -> Result<RiskRun, BatchError> {
        self.call("start_risk_run", move |writer| {
            writer.start_risk_run(&cycle, &parameters, creation_mode, snapshot_mode)
        })
    }

    fn end_risk_run(&self, run_id: RunId) -> Result<(), BatchError> {
        self.post("end_risk_run", move |writer| writer.end_risk_run(run_id))
    }

    fn add_job_results(&self, run_id: RunId, fragment: ResultFragment) -> Result<(), BatchError> {
        self.post("add_job_results", move |writer| writer.add_job_results(run_id, &fragment))
    }

    fn create_market_data(&self, base_id: UniqueId) -> Result<MarketDataId, BatchError> {
        self.call("create_market_data", move |writer| writer.create_market_data(&base_id))
    }

    fn add_values_to_market_data(
        &self,
        market_data_id: MarketDataId,
        values: Vec<ComputedValue>,
    ) -> Result<(), BatchError> {
        self.post("add_values_to_market_data", move |writer| {
            writer.add_values_to_market_data(market_data_id, &values)
        })
    }

    fn delete_market_data(&self, market_data_id: MarketDataId) -> Result<(), BatchError> {
        self.post("delete_market_data", move |writer| writer.delete_market_data(market_data_id))
    }

    fn market_data_values(
        &self,
        market_data_id: MarketDataId,
    ) -> Result<Vec<MarketDataValue>, BatchError> {
        self.call("market_data_values", move |writer| writer.market_data_values(market_data_id))
    }

    fn risk_run(&self, run_id: RunId) -> Result<RiskRun, BatchError> {
        self.call("risk_run", move |writer| writer.risk_run(run_id))
    }

    fn risk_runs(&self) -> Result<Vec<RiskRun>, BatchError> {
        self.call("risk_runs", |writer| writer.risk_runs())
    }

    fn delete_risk_run(&self, run_id: RunId) -> Result<(), BatchError> {
        self.call("delete_risk_run", move |writer| writer.delete_risk_run(run_id))
    }
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Executes queued units of work until every sender is dropped.
fn writer_loop<W: BatchRunWriter>(mut writer: W, receiver: &mpsc::Receiver<WriterTask>) {
    while let Ok(task) = receiver.recv() {
        task(&mut writer);
    }
    tracing::debug!("batch writer queue closed; worker exiting");
}
