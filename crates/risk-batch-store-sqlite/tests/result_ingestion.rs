// crates/risk-batch-store-sqlite/tests/result_ingestion.rs
// ============================================================================
// Module: Result Ingestion Tests
// Description: Fragment persistence into values, failures, and statuses.
// Purpose: Validate interning, failure attribution, and degraded writes.
// Dependencies: risk-batch-store-sqlite, risk-batch-core, rusqlite, tempfile, time
// ============================================================================

//! ## Overview
//! Integration tests for fragment ingestion:
//! - Reference data and compute failures are interned exactly once
//! - Missing-input chains inherit their root causes
//! - A failed value insert degrades that configuration's values to failures
//! - A rolled back fragment leaves no cached ids behind
//! - Failure status is sticky; untracked pairs read as not running
//! - Target properties and write-through market data are persisted

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
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use risk_batch_core::BatchError;
use risk_batch_core::BatchRunWriter;
use risk_batch_core::ComputationTarget;
use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputationTargetType;
use risk_batch_core::ComputeNodeId;
use risk_batch_core::ComputedValue;
use risk_batch_core::ComputedValueResult;
use risk_batch_core::ConfigurationMetadata;
use risk_batch_core::CycleMetadata;
use risk_batch_core::DescribableTarget;
use risk_batch_core::ExecutionLog;
use risk_batch_core::FunctionId;
use risk_batch_core::NOT_APPLICABLE;
use risk_batch_core::ResultFragment;
use risk_batch_core::ResultValue;
use risk_batch_core::RiskRun;
use risk_batch_core::RunCreationMode;
use risk_batch_core::RunId;
use risk_batch_core::RunStatus;
use risk_batch_core::SnapshotMode;
use risk_batch_core::TargetResolver;
use risk_batch_core::UniqueId;
use risk_batch_core::ValueProperties;
use risk_batch_core::ValueRequirement;
use risk_batch_core::ValueSpecification;
use risk_batch_core::VersionCorrection;
use risk_batch_store_sqlite::BatchWriteOutcome;
use risk_batch_store_sqlite::SqliteBatchRunWriter;
use risk_batch_store_sqlite::SqliteBatchStoreConfig;
use risk_batch_store_sqlite::SqliteBatchStoreError;
use risk_batch_store_sqlite::StatusTracker;
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

fn open_writer(dir: &TempDir) -> SqliteBatchRunWriter {
    SqliteBatchRunWriter::open(&SqliteBatchStoreConfig::new(db_path(dir))).expect("open writer")
}

fn security(id: &str) -> ComputationTargetSpecification {
    ComputationTargetSpecification::new(ComputationTargetType::Security, UniqueId::of("SEC", id))
}

fn spec(
    value_name: &str,
    target: ComputationTargetSpecification,
    function: &str,
) -> ValueSpecification {
    ValueSpecification::new(
        value_name,
        target,
        FunctionId::new(function),
        ValueProperties::new().with("Currency", "USD"),
    )
}

fn present_value(id: &str) -> ValueSpecification {
    spec("Present Value", security(id), "fn-pv")
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
        name: None,
        configurations: BTreeMap::from([(
            "Default".to_string(),
            ConfigurationMetadata::default(),
        )]),
    }
}

fn start(writer: &mut SqliteBatchRunWriter, mode: RunCreationMode) -> RiskRun {
    writer
        .start_risk_run(&cycle(), &BTreeMap::new(), mode, SnapshotMode::None)
        .expect("start run")
}

fn success(specification: ValueSpecification, value: f64) -> ComputedValueResult {
    ComputedValueResult::success(specification, ResultValue::Double(value), node())
}

fn threw(specification: ValueSpecification, message: &str) -> ComputedValueResult {
    let log = ExecutionLog {
        exception_class: Some("ArithmeticError".to_string()),
        exception_message: Some(message.to_string()),
        exception_stack_trace: Some("at pricer".to_string()),
    };
    ComputedValueResult::threw(specification, log, node())
}

fn count(path: &Path, sql: &str) -> i64 {
    let connection = Connection::open(path).expect("open inspector");
    connection.query_row(sql, params![], |row| row.get(0)).expect("count query")
}

fn statuses(
    writer: &SqliteBatchRunWriter,
    run_id: RunId,
) -> BTreeMap<ComputationTargetSpecification, RunStatus> {
    writer
        .run_statuses(run_id)
        .expect("statuses")
        .into_iter()
        .map(|status| (status.target, status.status))
        .collect()
}

/// Target whose descriptive properties are shared with the test.
struct DescribedSecurity {
    specification: ComputationTargetSpecification,
    properties: BTreeMap<String, String>,
}

impl DescribableTarget for DescribedSecurity {
    fn properties(&self) -> BTreeMap<String, String> {
        self.properties.clone()
    }
}

impl ComputationTarget for DescribedSecurity {
    fn specification(&self) -> &ComputationTargetSpecification {
        &self.specification
    }

    fn as_describable(&self) -> Option<&dyn DescribableTarget> {
        Some(self)
    }
}

/// Resolver describing every security with the current sector.
struct SectorResolver {
    sector: Mutex<String>,
}

impl TargetResolver for SectorResolver {
    fn resolve(
        &self,
        specification: &ComputationTargetSpecification,
        _version_correction: &VersionCorrection,
    ) -> Result<Option<Arc<dyn ComputationTarget>>, BatchError> {
        if specification.target_type != ComputationTargetType::Security {
            return Ok(None);
        }
        let sector = self.sector.lock().expect("sector lock").clone();
        Ok(Some(Arc::new(DescribedSecurity {
            specification: specification.clone(),
            properties: BTreeMap::from([("sector".to_string(), sector)]),
        })))
    }
}

// ============================================================================
// SECTION: Interning
// ============================================================================

#[test]
fn reference_data_is_interned_once_across_fragments_and_runs() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let mut writer = open_writer(&dir);
    let fragment = ResultFragment::new()
        .with("Default", success(present_value("AAPL"), 1.0))
        .with("Default", success(spec("Delta", security("AAPL"), "fn-pv"), 0.5));

    let first = start(&mut writer, RunCreationMode::CreateNew);
    writer.add_job_results(first.id, &fragment).expect("first fragment");
    writer.add_job_results(first.id, &fragment).expect("repeat fragment");
    let second = start(&mut writer, RunCreationMode::CreateNew);
    writer.add_job_results(second.id, &fragment).expect("second run fragment");

    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_value_specification"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_computation_target"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_function_unique_id"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_compute_node"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_calculation_configuration"), 1);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_value"), 6);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_run_calculation_configuration"), 2);
}

#[test]
fn stored_values_carry_their_reference_data() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);

    let fragment = ResultFragment::new().with("Default", success(present_value("AAPL"), 42.0));
    let outcome = writer.write_fragment(run.id, &fragment).expect("fragment");

    assert_eq!(outcome, BatchWriteOutcome::AllSucceeded);
    let values = writer.risk_values(run.id).expect("values");
    assert_eq!(values.len(), 1);
    let value = &values[0];
    assert_eq!(value.configuration, "Default");
    assert_eq!(value.value_name, "Present Value");
    assert_eq!(value.specification, "{Currency=[USD]}");
    assert_eq!(value.function_id, "fn-pv");
    assert_eq!(value.target, security("AAPL"));
    assert!((value.value - 42.0).abs() < f64::EPSILON);
    assert_eq!(value.compute_node, "grid-01/worker-0");
    assert!(value.eval_instant >= run.start_instant);
}

#[test]
fn identical_failures_share_one_compute_failure_row() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::CreateNew);

    let fragment = ResultFragment::new()
        .with("Default", threw(present_value("AAPL"), "divide by zero"))
        .with("Default", threw(present_value("MSFT"), "divide by zero"))
        .with("Default", threw(present_value("IBM"), "  divide by zero  "));
    writer.add_job_results(run.id, &fragment).expect("fragment");
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_compute_failure"), 2);

    let other = start(&mut writer, RunCreationMode::CreateNew);
    let repeat =
        ResultFragment::new().with("Default", threw(present_value("AAPL"), "divide by zero"));
    writer.add_job_results(other.id, &repeat).expect("second run");
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_compute_failure"), 2);

    let failures = writer.risk_failures(run.id).expect("failures");
    assert_eq!(failures.len(), 3);
    assert_eq!(failures[0].reasons, failures[1].reasons);
    assert_ne!(failures[0].reasons, failures[2].reasons);
    assert_eq!(failures[0].reasons[0].key.exception_message, "divide by zero");
    assert_eq!(failures[2].reasons[0].key.exception_message, "  divide by zero  ");
    assert_eq!(failures[0].reasons[0].key.stack_trace, "at pricer");
}

#[test]
fn requirements_with_equal_constraints_share_one_row() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let mut writer = open_writer(&dir);
    let usd = ValueProperties::new().with("Currency", "USD");
    let requirements = BTreeSet::from([
        ValueRequirement::new("Present Value", security("AAPL"), usd.clone()),
        ValueRequirement::new("PV", security("MSFT"), usd),
        ValueRequirement::new(
            "Present Value",
            security("AAPL"),
            ValueProperties::new().with("Currency", "EUR"),
        ),
    ]);
    let mut metadata = cycle();
    metadata.configurations.insert(
        "Default".to_string(),
        ConfigurationMetadata {
            terminal_outputs: BTreeMap::from([(present_value("AAPL"), requirements)]),
            targets: BTreeSet::new(),
        },
    );

    let parameters = BTreeMap::new();
    for _ in 0 .. 2 {
        writer
            .start_risk_run(&metadata, &parameters, RunCreationMode::CreateNew, SnapshotMode::None)
            .expect("start run");
    }

    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_value_requirement"), 2);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_value_specification"), 1);
}

// ============================================================================
// SECTION: Failure Attribution
// ============================================================================

#[test]
fn missing_input_chain_inherits_root_cause() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);

    let curve = spec("Curve", security("AAPL"), "fn-curve");
    let price = spec("Price", security("AAPL"), "fn-price");
    let pnl = spec("PnL", security("AAPL"), "fn-pnl");
    let vol = spec("Volatility", security("MSFT"), "fn-vol");
    let vega = spec("Vega", security("MSFT"), "fn-vega");
    let fragment = ResultFragment::new()
        .with("Default", threw(curve.clone(), "no quotes"))
        .with("Default", ComputedValueResult::missing_inputs(price.clone(), vec![curve], node()))
        .with("Default", ComputedValueResult::missing_inputs(pnl, vec![price], node()))
        .with("Default", ComputedValueResult::missing_inputs(vega, vec![vol.clone()], node()));
    writer.add_job_results(run.id, &fragment).expect("fragment");

    let failures = writer.risk_failures(run.id).expect("failures");
    let names: Vec<&str> = failures.iter().map(|failure| failure.value_name.as_str()).collect();
    assert_eq!(names, ["Curve", "Price", "PnL", "Vega"]);
    let root = &failures[0].reasons;
    assert_eq!(root.len(), 1);
    assert_eq!(root[0].key.exception_message, "no quotes");
    assert_eq!(&failures[1].reasons, root);
    assert_eq!(&failures[2].reasons, root);

    let synthesized = &failures[3].reasons;
    assert_eq!(synthesized.len(), 1);
    assert_eq!(synthesized[0].key.function_id, "fn-vol");
    assert_eq!(synthesized[0].key.exception_class, NOT_APPLICABLE);
    assert_eq!(synthesized[0].key.exception_message, format!("Missing input {vol}"));
    assert_eq!(synthesized[0].key.stack_trace, NOT_APPLICABLE);
}

#[test]
fn unconvertible_success_is_recorded_as_failure() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);

    let fragment = ResultFragment::new().with(
        "Default",
        ComputedValueResult::success(
            present_value("AAPL"),
            ResultValue::Text("n/a".to_string()),
            node(),
        ),
    );
    let outcome = writer.write_fragment(run.id, &fragment).expect("fragment");

    assert_eq!(outcome, BatchWriteOutcome::AllSucceeded);
    assert!(writer.risk_values(run.id).expect("values").is_empty());
    let failures = writer.risk_failures(run.id).expect("failures");
    assert_eq!(failures.len(), 1);
    let key = &failures[0].reasons[0].key;
    assert_eq!(key.function_id, "fn-pv");
    assert_eq!(key.exception_class, "UnsupportedValueType");
    assert_eq!(key.exception_message, "no converter for value of type Text");
    assert_eq!(key.stack_trace, NOT_APPLICABLE);
    assert_eq!(statuses(&writer, run.id).get(&security("AAPL")), Some(&RunStatus::Failure));
}

#[test]
fn vector_values_expand_into_component_rows() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);

    let fragment = ResultFragment::new().with(
        "Default",
        ComputedValueResult::success(
            spec("Bucketed Delta", security("AAPL"), "fn-delta"),
            ResultValue::Vector(vec![1.5, 1e-305, -2.0]),
            node(),
        ),
    );
    writer.add_job_results(run.id, &fragment).expect("fragment");

    let values = writer.risk_values(run.id).expect("values");
    let rows: Vec<(&str, f64)> =
        values.iter().map(|value| (value.value_name.as_str(), value.value)).collect();
    assert_eq!(
        rows,
        [("Bucketed Delta[0]", 1.5), ("Bucketed Delta[1]", 0.0), ("Bucketed Delta[2]", -2.0)]
    );
}

// ============================================================================
// SECTION: Degraded Writes
// ============================================================================

#[test]
fn failed_value_insert_records_every_value_as_failure() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);
    let connection = Connection::open(&path).expect("open inspector");
    connection
        .execute_batch(
            "CREATE TRIGGER reject_values BEFORE INSERT ON rsk_value \
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .expect("install trigger");
    drop(connection);

    let fragment = ResultFragment::new()
        .with("Default", success(present_value("AAPL"), 1.0))
        .with(
            "Default",
            ComputedValueResult::success(
                present_value("MSFT"),
                ResultValue::Vector(vec![2.0, 3.0]),
                node(),
            ),
        )
        .with("Default", threw(present_value("IBM"), "divide by zero"));
    let outcome = writer.write_fragment(run.id, &fragment).expect("degraded write");

    match &outcome {
        BatchWriteOutcome::PartiallyFailed(reason) => assert!(reason.contains("injected")),
        BatchWriteOutcome::AllSucceeded => panic!("insert should have failed"),
    }
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_value"), 0);

    let failures = writer.risk_failures(run.id).expect("failures");
    assert_eq!(failures.len(), 4);
    let ids: BTreeSet<i64> = failures.iter().map(|failure| failure.id).collect();
    assert_eq!(ids.len(), 4);
    let degraded: Vec<&str> = failures
        .iter()
        .filter(|failure| failure.reasons[0].key.exception_class == "SqliteFailure")
        .map(|failure| failure.value_name.as_str())
        .collect();
    assert_eq!(degraded, ["Present Value", "Present Value[0]", "Present Value[1]"]);
    for failure in failures.iter().take(3) {
        let key = &failure.reasons[0].key;
        assert!(key.exception_message.contains("injected"));
        assert!(key.stack_trace.starts_with("sqlite extended code"));
    }
    let degraded_keys = count(
        &path,
        "SELECT COUNT(*) FROM rsk_compute_failure WHERE exception_class = 'SqliteFailure'",
    );
    assert_eq!(degraded_keys, 1);

    let statuses = statuses(&writer, run.id);
    assert_eq!(statuses.len(), 3);
    assert!(statuses.values().all(|status| *status == RunStatus::Failure));
}

#[test]
fn rolled_back_fragment_leaves_no_stale_cached_ids() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);
    let inspector = Connection::open(&path).expect("open inspector");
    inspector
        .execute_batch(
            "CREATE TRIGGER reject_statuses BEFORE INSERT ON rsk_run_status \
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .expect("install trigger");

    let fragment = ResultFragment::new()
        .with("Default", success(spec("Gamma", security("NVDA"), "fn-greeks"), 0.25))
        .with("Default", threw(spec("Gamma", security("AMD"), "fn-greeks"), "no vol surface"));
    assert!(writer.write_fragment(run.id, &fragment).is_err());
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_computation_target"), 0);
    assert_eq!(count(&path, "SELECT COUNT(*) FROM rsk_compute_failure"), 0);

    inspector.execute_batch("DROP TRIGGER reject_statuses;").expect("drop trigger");
    drop(inspector);
    let outcome = writer.write_fragment(run.id, &fragment).expect("retried fragment");

    assert_eq!(outcome, BatchWriteOutcome::AllSucceeded);
    let values = writer.risk_values(run.id).expect("values");
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].target, security("NVDA"));
    let failures = writer.risk_failures(run.id).expect("failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].reasons.len(), 1);
    assert_eq!(failures[0].reasons[0].key.exception_message, "no vol surface");
    let statuses = statuses(&writer, run.id);
    assert_eq!(statuses.get(&security("NVDA")), Some(&RunStatus::Success));
    assert_eq!(statuses.get(&security("AMD")), Some(&RunStatus::Failure));
}

#[test]
fn rejected_configuration_does_not_degrade_the_others() {
    let dir = TempDir::new().expect("temp dir");
    let path = db_path(&dir);
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);
    let connection = Connection::open(&path).expect("open inspector");
    connection
        .execute_batch(
            "CREATE TRIGGER reject_stress_values BEFORE INSERT ON rsk_value \
             WHEN NEW.calculation_configuration_id = \
             (SELECT id FROM rsk_calculation_configuration WHERE name = 'Stress') \
             BEGIN SELECT RAISE(ABORT, 'injected'); END;",
        )
        .expect("install trigger");
    drop(connection);

    let fragment = ResultFragment::new()
        .with("Default", success(present_value("AAPL"), 1.0))
        .with("Stress", success(present_value("AAPL"), 0.8))
        .with("Stress", success(present_value("MSFT"), 0.6));
    let outcome = writer.write_fragment(run.id, &fragment).expect("partial write");

    match &outcome {
        BatchWriteOutcome::PartiallyFailed(reason) => assert!(reason.contains("injected")),
        BatchWriteOutcome::AllSucceeded => panic!("stress insert should have failed"),
    }
    let values = writer.risk_values(run.id).expect("values");
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].configuration, "Default");
    assert!((values[0].value - 1.0).abs() < f64::EPSILON);

    let failures = writer.risk_failures(run.id).expect("failures");
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|failure| failure.configuration == "Stress"));
    assert!(
        failures.iter().all(|failure| failure.reasons[0].key.exception_class == "SqliteFailure")
    );

    let statuses: BTreeMap<(String, ComputationTargetSpecification), RunStatus> = writer
        .run_statuses(run.id)
        .expect("statuses")
        .into_iter()
        .map(|status| ((status.configuration, status.target), status.status))
        .collect();
    assert_eq!(
        statuses,
        BTreeMap::from([
            (("Default".to_string(), security("AAPL")), RunStatus::Success),
            (("Stress".to_string(), security("AAPL")), RunStatus::Failure),
            (("Stress".to_string(), security("MSFT")), RunStatus::Failure),
        ])
    );
}

// ============================================================================
// SECTION: Statuses
// ============================================================================

#[test]
fn untracked_pairs_read_as_not_running() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);
    let connection = Connection::open(db_path(&dir)).expect("open inspector");

    let mut tracker = StatusTracker::new(run.id);
    let status = tracker.status(&connection, 12_345, 67_890).expect("status");

    assert_eq!(status, RunStatus::NotRunning);
}

#[test]
fn failure_status_is_sticky_across_fragments() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);

    let first = ResultFragment::new()
        .with("Default", threw(present_value("AAPL"), "divide by zero"))
        .with("Default", success(present_value("MSFT"), 1.0));
    writer.add_job_results(run.id, &first).expect("first fragment");
    let second = ResultFragment::new()
        .with("Default", success(spec("Delta", security("AAPL"), "fn-delta"), 0.5))
        .with("Default", success(spec("Delta", security("MSFT"), "fn-delta"), 0.25));
    writer.add_job_results(run.id, &second).expect("second fragment");

    let statuses = statuses(&writer, run.id);
    assert_eq!(statuses.get(&security("AAPL")), Some(&RunStatus::Failure));
    assert_eq!(statuses.get(&security("MSFT")), Some(&RunStatus::Success));
}

#[test]
fn mixed_outcomes_for_one_target_mark_it_failed() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);

    let fragment = ResultFragment::new()
        .with("Default", success(present_value("AAPL"), 1.0))
        .with("Default", threw(spec("Vega", security("AAPL"), "fn-vega"), "no surface"));
    writer.add_job_results(run.id, &fragment).expect("fragment");

    let statuses = statuses(&writer, run.id);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses.get(&security("AAPL")), Some(&RunStatus::Failure));
}

// ============================================================================
// SECTION: Target Properties and Market Data
// ============================================================================

#[test]
fn describable_targets_persist_their_properties() {
    let dir = TempDir::new().expect("temp dir");
    let resolver = Arc::new(SectorResolver {
        sector: Mutex::new("Technology".to_string()),
    });
    let mut writer = open_writer(&dir).with_target_resolver(Arc::clone(&resolver) as _);
    let run = start(&mut writer, RunCreationMode::Auto);
    let fragment = ResultFragment::new().with("Default", success(present_value("AAPL"), 1.0));

    writer.add_job_results(run.id, &fragment).expect("first fragment");
    let stored = writer.target_properties(&security("AAPL")).expect("properties");
    assert_eq!(stored.get("sector").map(String::as_str), Some("Technology"));

    *resolver.sector.lock().expect("sector lock") = "Consumer".to_string();
    writer.add_job_results(run.id, &fragment).expect("second fragment");
    let stored = writer.target_properties(&security("AAPL")).expect("properties");
    assert_eq!(stored, BTreeMap::from([("sector".to_string(), "Consumer".to_string())]));

    assert!(writer.target_properties(&security("UNKNOWN")).expect("unknown").is_empty());
}

#[test]
fn write_through_runs_store_fragment_market_data() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = writer
        .start_risk_run(
            &cycle(),
            &BTreeMap::new(),
            RunCreationMode::Auto,
            SnapshotMode::WriteThrough,
        )
        .expect("start");
    let curve = ComputationTargetSpecification::new(
        ComputationTargetType::Primitive,
        UniqueId::of("CURVE", "USD-OIS"),
    );
    let mut fragment = ResultFragment::new().with("Default", success(present_value("AAPL"), 1.0));
    fragment.market_data = vec![
        ComputedValue::new(
            spec("Market_Value", curve.clone(), "market-data"),
            ResultValue::Double(0.0425),
        ),
        ComputedValue::new(
            spec("Curve Bundle", curve.clone(), "market-data"),
            ResultValue::SnapshotBundle(BTreeMap::from([("1Y".to_string(), 0.04)])),
        ),
    ];

    writer.add_job_results(run.id, &fragment).expect("fragment");

    let values = writer.market_data_values(run.market_data_id).expect("market data");
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].target, curve);
    assert_eq!(values[0].name, "Market_Value");
    assert!((values[0].value - 0.0425).abs() < f64::EPSILON);
}

#[test]
fn runs_without_write_through_ignore_fragment_market_data() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let run = start(&mut writer, RunCreationMode::Auto);
    let curve = ComputationTargetSpecification::new(
        ComputationTargetType::Primitive,
        UniqueId::of("CURVE", "USD-OIS"),
    );
    let mut fragment = ResultFragment::new();
    fragment.market_data = vec![ComputedValue::new(
        spec("Market_Value", curve, "market-data"),
        ResultValue::Double(1.0),
    )];

    writer.add_job_results(run.id, &fragment).expect("fragment");

    assert!(writer.market_data_values(run.market_data_id).expect("market data").is_empty());
}

#[test]
fn fragment_for_unstarted_run_is_not_found() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let fragment = ResultFragment::new().with("Default", success(present_value("AAPL"), 1.0));

    let result = writer.write_fragment(RunId::new(77), &fragment);

    assert!(matches!(result, Err(SqliteBatchStoreError::NotFound(_))));
    assert!(matches!(
        writer.add_job_results(RunId::new(77), &fragment),
        Err(BatchError::NotFound(_))
    ));
}
