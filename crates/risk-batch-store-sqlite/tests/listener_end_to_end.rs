// crates/risk-batch-store-sqlite/tests/listener_end_to_end.rs
// ============================================================================
// Module: Listener End-to-End Tests
// Description: Cycle events flowing through the serializer into SQLite.
// Purpose: Validate the full write path from listener callbacks to rows.
// Dependencies: risk-batch-store-sqlite, risk-batch-core, rusqlite, tempfile, time
// ============================================================================

//! ## Overview
//! End-to-end tests wiring `BatchRunListener` to a `SingleWriterSerializer`
//! that owns a `SqliteBatchRunWriter`:
//! - A full cycle persists values, failures, market data, and completion
//! - Synchronous errors surface to the caller wrapped as task failures
//! - Queued failures are logged without stopping the writer

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use risk_batch_core::BatchError;
use risk_batch_core::BatchRunListener;
use risk_batch_core::BatchRunMaster;
use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputationTargetType;
use risk_batch_core::ComputeNodeId;
use risk_batch_core::ComputedValue;
use risk_batch_core::ComputedValueResult;
use risk_batch_core::ConfigurationMetadata;
use risk_batch_core::CycleMetadata;
use risk_batch_core::ExecutionLog;
use risk_batch_core::FunctionId;
use risk_batch_core::ResultFragment;
use risk_batch_core::ResultValue;
use risk_batch_core::RunCreationMode;
use risk_batch_core::SingleWriterSerializer;
use risk_batch_core::SnapshotMode;
use risk_batch_core::UniqueId;
use risk_batch_core::ValueProperties;
use risk_batch_core::ValueSpecification;
use risk_batch_core::VersionCorrection;
use risk_batch_store_sqlite::SqliteBatchRunWriter;
use risk_batch_store_sqlite::SqliteBatchStoreConfig;
use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("risk.db")
}

fn spawn_master(dir: &TempDir) -> Arc<SingleWriterSerializer> {
    let writer = SqliteBatchRunWriter::open(&SqliteBatchStoreConfig::new(db_path(dir)))
        .expect("open writer");
    Arc::new(SingleWriterSerializer::spawn(writer).expect("spawn serializer"))
}

fn listener(
    master: &Arc<SingleWriterSerializer>,
    creation_mode: RunCreationMode,
    snapshot_mode: SnapshotMode,
) -> BatchRunListener {
    let master: Arc<dyn BatchRunMaster> = Arc::clone(master) as _;
    let parameters = BTreeMap::from([("desk".to_string(), "rates".to_string())]);
    BatchRunListener::new(master, parameters, creation_mode, snapshot_mode)
}

fn security(id: &str) -> ComputationTargetSpecification {
    ComputationTargetSpecification::new(ComputationTargetType::Security, UniqueId::of("SEC", id))
}

fn present_value(id: &str) -> ValueSpecification {
    ValueSpecification::new(
        "Present Value",
        security(id),
        FunctionId::new("fn-pv"),
        ValueProperties::new().with("Currency", "USD"),
    )
}

fn node() -> ComputeNodeId {
    ComputeNodeId::new("grid-01/worker-0")
}

fn cycle() -> CycleMetadata {
    CycleMetadata {
        view_definition_id: UniqueId::of("View", "eod"),
        market_data_snapshot_id: UniqueId::of("Snap", "close"),
        valuation_time: OffsetDateTime::from_unix_timestamp(1_700_000_000)
            .expect("valuation time"),
        version_correction: VersionCorrection::latest(),
        name: Some("eod".to_string()),
        configurations: BTreeMap::from([(
            "Default".to_string(),
            ConfigurationMetadata::default(),
        )]),
    }
}

fn count(path: &Path, sql: &str) -> i64 {
    let connection = Connection::open(path).expect("open inspector");
    connection.query_row(sql, params![], |row| row.get(0)).expect("count query")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn full_cycle_persists_results_and_completes_run() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let master = spawn_master(&dir);
    let listener = listener(&master, RunCreationMode::Auto, SnapshotMode::WriteThrough);

    let run_id = listener.cycle_started(cycle()).expect("cycle started");
    assert_eq!(listener.current_run().expect("current run"), Some(run_id));

    let mut fragment = ResultFragment::new().with(
        "Default",
        ComputedValueResult::success(present_value("AAPL"), ResultValue::Double(10.0), node()),
    );
    fragment.market_data = vec![ComputedValue::new(
        ValueSpecification::new(
            "Market_Value",
            security("AAPL"),
            FunctionId::new("market-data"),
            ValueProperties::new(),
        ),
        ResultValue::Double(187.5),
    )];
    listener.cycle_fragment_completed(fragment).expect("fragment");

    let log = ExecutionLog {
        exception_class: Some("ArithmeticError".to_string()),
        exception_message: Some("divide by zero".to_string()),
        exception_stack_trace: None,
    };
    let result = ResultFragment::new()
        .with("Default", ComputedValueResult::threw(present_value("MSFT"), log, node()));
    listener.cycle_completed(result).expect("cycle completed");
    listener.process_completed().expect("process completed");
    master.flush().expect("flush");

    assert_eq!(listener.current_run().expect("current run"), None);
    let run = master.risk_run(run_id).expect("run");
    assert!(run.complete);
    assert_eq!(run.snapshot_mode, SnapshotMode::WriteThrough);
    assert_eq!(run.parameters.get("desk").map(String::as_str), Some("rates"));
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_value"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_failure"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_run_status"), 2);
    let market_data = master.market_data_values(run.market_data_id).expect("market data");
    assert_eq!(market_data.len(), 1);

    drop(listener);
    let master = Arc::try_unwrap(master).ok().expect("sole owner");
    master.shutdown().expect("shutdown");
}

#[test]
fn start_errors_surface_as_task_failures() {
    let dir = TempDir::new().expect("temp dir");
    let master = spawn_master(&dir);
    let listener = listener(&master, RunCreationMode::ReuseExisting, SnapshotMode::None);

    let err = listener.cycle_started(cycle()).expect_err("nothing to reuse");

    match err {
        BatchError::Task(inner) => assert!(matches!(*inner, BatchError::Configuration(_))),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(listener.current_run().expect("current run"), None);
    assert!(matches!(
        listener.cycle_fragment_completed(ResultFragment::new()),
        Err(BatchError::NotFound(_))
    ));
}

#[test]
fn interrupted_termination_ends_the_run() {
    let dir = TempDir::new().expect("temp dir");
    let master = spawn_master(&dir);
    let listener = listener(&master, RunCreationMode::Auto, SnapshotMode::None);
    let run_id = listener.cycle_started(cycle()).expect("cycle started");

    listener.process_terminated(false);
    master.flush().expect("flush");
    assert!(!master.risk_run(run_id).expect("run").complete);

    listener.process_terminated(true);
    master.flush().expect("flush");
    assert!(master.risk_run(run_id).expect("run").complete);
    assert_eq!(listener.current_run().expect("current run"), None);
}

#[test]
fn queued_failures_do_not_stop_the_writer() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let master = spawn_master(&dir);
    let listener = listener(&master, RunCreationMode::Auto, SnapshotMode::None);
    let run_id = listener.cycle_started(cycle()).expect("cycle started");
    listener.process_completed().expect("process completed");

    let late = ResultFragment::new().with(
        "Default",
        ComputedValueResult::success(present_value("AAPL"), ResultValue::Double(1.0), node()),
    );
    master.add_job_results(run_id, late).expect("queued");
    master.flush().expect("writer still serving");

    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_value"), 0);
    let restarted = listener.cycle_started(cycle()).expect("restart");
    assert_eq!(restarted, run_id);
    assert_eq!(master.risk_run(run_id).expect("run").num_restarts, 1);
}
