// crates/risk-batch-store-sqlite/tests/market_data.rs
// ============================================================================
// Module: Market Data Tests
// Description: Snapshot creation, value writes, reads, and deletes.
// Purpose: Validate idempotent snapshot handling and referential integrity.
// Dependencies: risk-batch-store-sqlite, risk-batch-core, tempfile, time
// ============================================================================

//! ## Overview
//! Integration tests for market data snapshots:
//! - Create-or-get returns the same snapshot for the same base identifier
//! - Duplicate points, snapshot bundles, and text values are not stored
//! - Unknown snapshots are reported as not found
//! - Snapshots still referenced by a run cannot be deleted

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

use risk_batch_core::BatchError;
use risk_batch_core::BatchRunWriter;
use risk_batch_core::ComputationTargetSpecification;
use risk_batch_core::ComputationTargetType;
use risk_batch_core::ComputedValue;
use risk_batch_core::CycleMetadata;
use risk_batch_core::FunctionId;
use risk_batch_core::MarketDataId;
use risk_batch_core::ResultValue;
use risk_batch_core::RunCreationMode;
use risk_batch_core::SnapshotMode;
use risk_batch_core::UniqueId;
use risk_batch_core::ValueProperties;
use risk_batch_core::ValueSpecification;
use risk_batch_core::VersionCorrection;
use risk_batch_store_sqlite::SqliteBatchRunWriter;
use risk_batch_store_sqlite::SqliteBatchStoreConfig;
use tempfile::TempDir;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open_writer(dir: &TempDir) -> SqliteBatchRunWriter {
    let config = SqliteBatchStoreConfig::new(dir.path().join("risk.db"));
    SqliteBatchRunWriter::open(&config).expect("open writer")
}

fn curve(name: &str) -> ComputationTargetSpecification {
    ComputationTargetSpecification::new(
        ComputationTargetType::Primitive,
        UniqueId::of("CURVE", name),
    )
}

fn point(target: ComputationTargetSpecification, name: &str, value: ResultValue) -> ComputedValue {
    let specification = ValueSpecification::new(
        name,
        target,
        FunctionId::new("market-data"),
        ValueProperties::new(),
    );
    ComputedValue::new(specification, value)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn create_market_data_is_idempotent_per_base_id() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);

    let first = writer.create_market_data(&UniqueId::of("Snap", "close")).expect("create");
    let again = writer.create_market_data(&UniqueId::of("Snap", "close")).expect("get");
    let other = writer.create_market_data(&UniqueId::of("Snap", "open")).expect("create other");

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert!(writer.market_data_values(first).expect("values").is_empty());
}

#[test]
fn values_are_stored_once_and_in_insertion_order() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let id = writer.create_market_data(&UniqueId::of("Snap", "close")).expect("create");
    let values = vec![
        point(curve("USD-OIS"), "Market_Value", ResultValue::Double(0.0425)),
        point(curve("EUR-OIS"), "Market_Value", ResultValue::Double(0.031)),
        point(curve("USD-OIS"), "Pillars", ResultValue::Vector(vec![0.01, 0.02])),
    ];

    writer.add_values_to_market_data(id, &values).expect("first add");
    writer.add_values_to_market_data(id, &values).expect("duplicate add");

    let stored = writer.market_data_values(id).expect("values");
    let rows: Vec<(String, &str)> =
        stored.iter().map(|value| (value.target.to_string(), value.name.as_str())).collect();
    assert_eq!(
        rows,
        [
            (curve("USD-OIS").to_string(), "Market_Value"),
            (curve("EUR-OIS").to_string(), "Market_Value"),
            (curve("USD-OIS").to_string(), "Pillars[0]"),
            (curve("USD-OIS").to_string(), "Pillars[1]"),
        ]
    );
}

#[test]
fn bundles_and_text_values_are_skipped() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let id = writer.create_market_data(&UniqueId::of("Snap", "close")).expect("create");
    let values = vec![
        point(
            curve("USD-OIS"),
            "Curve",
            ResultValue::SnapshotBundle(BTreeMap::from([("1Y".to_string(), 0.04)])),
        ),
        point(curve("USD-OIS"), "Source", ResultValue::Text("BBG".to_string())),
        point(curve("USD-OIS"), "Market_Value", ResultValue::Double(0.04)),
    ];

    writer.add_values_to_market_data(id, &values).expect("add");

    let stored = writer.market_data_values(id).expect("values");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].name, "Market_Value");
}

#[test]
fn unknown_snapshot_is_not_found() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let missing = MarketDataId::new(4_242);
    let values = vec![point(curve("USD-OIS"), "Market_Value", ResultValue::Double(1.0))];

    assert!(matches!(
        writer.add_values_to_market_data(missing, &values),
        Err(BatchError::NotFound(_))
    ));
    assert!(matches!(writer.market_data_values(missing), Err(BatchError::NotFound(_))));
    assert!(matches!(writer.delete_market_data(missing), Err(BatchError::NotFound(_))));
}

#[test]
fn delete_removes_snapshot_and_values() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let id = writer.create_market_data(&UniqueId::of("Snap", "close")).expect("create");
    let values = vec![point(curve("USD-OIS"), "Market_Value", ResultValue::Double(1.0))];
    writer.add_values_to_market_data(id, &values).expect("add");

    writer.delete_market_data(id).expect("delete");

    assert!(matches!(writer.market_data_values(id), Err(BatchError::NotFound(_))));
    let recreated = writer.create_market_data(&UniqueId::of("Snap", "close")).expect("recreate");
    assert_ne!(recreated, id);
    assert!(writer.market_data_values(recreated).expect("values").is_empty());
}

#[test]
fn snapshot_referenced_by_a_run_cannot_be_deleted() {
    let dir = TempDir::new().expect("temp dir");
    let mut writer = open_writer(&dir);
    let cycle = CycleMetadata {
        view_definition_id: UniqueId::of("View", "eod"),
        market_data_snapshot_id: UniqueId::of("Snap", "close"),
        valuation_time: OffsetDateTime::from_unix_timestamp(1_700_000_000)
            .expect("valuation time"),
        version_correction: VersionCorrection::latest(),
        name: None,
        configurations: BTreeMap::new(),
    };
    let run = writer
        .start_risk_run(&cycle, &BTreeMap::new(), RunCreationMode::Auto, SnapshotMode::None)
        .expect("start");
    let values = vec![point(curve("USD-OIS"), "Market_Value", ResultValue::Double(1.0))];
    writer.add_values_to_market_data(run.market_data_id, &values).expect("add");

    let result = writer.delete_market_data(run.market_data_id);

    assert!(matches!(result, Err(BatchError::Store(_))));
    assert_eq!(writer.market_data_values(run.market_data_id).expect("values").len(), 1);

    writer.delete_risk_run(run.id).expect("delete run");
    writer.delete_market_data(run.market_data_id).expect("delete snapshot");
}
