// crates/risk-batch-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Batch Store
// Description: Connection setup, schema, id sequence, and retrying transactions.
// Purpose: Provide the durable relational foundation for the batch writer.
// Dependencies: risk-batch-core, rusqlite, serde, thiserror, time, tracing
// ============================================================================

//! ## Overview
//! This module owns everything below the repositories: store configuration,
//! connection pragmas, schema creation with a version check, the shared
//! `rsk_batch_seq` id sequence, and the `IMMEDIATE` transaction runner that
//! retries transient lock contention while restoring caller state between
//! attempts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use risk_batch_core::BatchError;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::journal::AttemptState;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default number of retries after a transient failure.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default linear backoff step between retries (ms).
const DEFAULT_RETRY_BACKOFF_MS: u64 = 25;
/// Upper bound for configured retries.
pub const MAX_RETRIES: u32 = 16;
/// Upper bound for the configured backoff step (ms).
pub const MAX_RETRY_BACKOFF_MS: u64 = 10_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Name of the shared id sequence.
const BATCH_SEQUENCE_NAME: &str = "rsk_batch_seq";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` batch store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `max_retries` is at most [`MAX_RETRIES`].
/// - `retry_backoff_ms` is at most [`MAX_RETRY_BACKOFF_MS`].
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteBatchStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Retries after a transient (busy/locked) failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step between retries in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl SqliteBatchStoreConfig {
    /// Returns a configuration for `path` with default settings.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError::Invalid`] when a limit is violated.
    pub fn validate(&self) -> Result<(), SqliteBatchStoreError> {
        validate_store_path(&self.path)?;
        if self.max_retries > MAX_RETRIES {
            return Err(SqliteBatchStoreError::Invalid(format!(
                "max_retries out of range: {} (max {MAX_RETRIES})",
                self.max_retries
            )));
        }
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(SqliteBatchStoreError::Invalid(format!(
                "retry_backoff_ms out of range: {} (max {MAX_RETRY_BACKOFF_MS})",
                self.retry_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default retry budget.
const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Returns the default retry backoff step.
const fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` batch store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteBatchStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Transient lock contention; the operation may be retried.
    #[error("sqlite store busy: {0}")]
    Busy(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
    /// Referenced row does not exist.
    #[error("sqlite store entity not found: {0}")]
    NotFound(String),
    /// Run configuration conflict.
    #[error("sqlite store configuration conflict: {0}")]
    Configuration(String),
}

impl SqliteBatchStoreError {
    /// Returns true when retrying the transaction may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<SqliteBatchStoreError> for BatchError {
    fn from(error: SqliteBatchStoreError) -> Self {
        match error {
            SqliteBatchStoreError::Io(message)
            | SqliteBatchStoreError::Db(message)
            | SqliteBatchStoreError::Busy(message)
            | SqliteBatchStoreError::VersionMismatch(message) => Self::Store(message),
            SqliteBatchStoreError::Invalid(message) => Self::Invalid(message),
            SqliteBatchStoreError::NotFound(message) => Self::NotFound(message),
            SqliteBatchStoreError::Configuration(message) => Self::Configuration(message),
        }
    }
}

/// Maps a `rusqlite` error, classifying lock contention as transient.
pub(crate) fn db_error(err: rusqlite::Error) -> SqliteBatchStoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            SqliteBatchStoreError::Busy(err.to_string())
        }
        _ => SqliteBatchStoreError::Db(err.to_string()),
    }
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// Opens the store connection and initializes the schema.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the configuration is invalid or the
/// database cannot be opened or initialized.
pub(crate) fn open_store(
    config: &SqliteBatchStoreConfig,
) -> Result<Connection, SqliteBatchStoreError> {
    config.validate()?;
    ensure_parent_dir(&config.path)?;
    let mut connection = open_connection(config)?;
    initialize_schema(&mut connection)?;
    Ok(connection)
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteBatchStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteBatchStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteBatchStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteBatchStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteBatchStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteBatchStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteBatchStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteBatchStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with the configured pragmas.
fn open_connection(config: &SqliteBatchStoreConfig) -> Result<Connection, SqliteBatchStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability and integrity.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteBatchStoreConfig,
) -> Result<(), SqliteBatchStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms)).map_err(db_error)?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteBatchStoreError> {
    let tx = connection.transaction().map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(SCHEMA_SQL).map_err(db_error)?;
            tx.execute(
                "INSERT INTO rsk_sequence (name, next_value) VALUES (?1, 1)",
                params![BATCH_SEQUENCE_NAME],
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteBatchStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}

/// Relational schema for the batch store.
const SCHEMA_SQL: &str = "
CREATE TABLE rsk_sequence (
    name TEXT PRIMARY KEY,
    next_value INTEGER NOT NULL
);
CREATE TABLE rsk_calculation_configuration (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE rsk_value_specification (
    id INTEGER PRIMARY KEY,
    synthetic_form TEXT NOT NULL UNIQUE
);
CREATE TABLE rsk_value_requirement (
    id INTEGER PRIMARY KEY,
    synthetic_form TEXT NOT NULL,
    specification_id INTEGER NOT NULL REFERENCES rsk_value_specification (id),
    UNIQUE (synthetic_form, specification_id)
);
CREATE TABLE rsk_computation_target (
    id INTEGER PRIMARY KEY,
    target_type TEXT NOT NULL,
    id_scheme TEXT,
    id_value TEXT,
    id_version TEXT
);
CREATE INDEX idx_rsk_computation_target_identity
    ON rsk_computation_target (target_type, id_scheme, id_value, id_version);
CREATE TABLE rsk_function_unique_id (
    id INTEGER PRIMARY KEY,
    unique_id TEXT NOT NULL UNIQUE
);
CREATE TABLE rsk_compute_node (
    id INTEGER PRIMARY KEY,
    node_name TEXT NOT NULL UNIQUE,
    host_name TEXT NOT NULL
);
CREATE TABLE rsk_compute_failure (
    id INTEGER PRIMARY KEY,
    function_id TEXT NOT NULL,
    exception_class TEXT NOT NULL,
    exception_msg TEXT NOT NULL,
    stack_trace TEXT NOT NULL,
    key_digest TEXT NOT NULL UNIQUE
);
CREATE TABLE rsk_live_data_snapshot (
    id INTEGER PRIMARY KEY,
    base_uid TEXT NOT NULL UNIQUE
);
CREATE TABLE rsk_live_data_snapshot_entry (
    id INTEGER PRIMARY KEY,
    snapshot_id INTEGER NOT NULL REFERENCES rsk_live_data_snapshot (id),
    computation_target_id INTEGER NOT NULL REFERENCES rsk_computation_target (id),
    name TEXT NOT NULL,
    value REAL NOT NULL,
    UNIQUE (snapshot_id, computation_target_id, name)
);
CREATE TABLE rsk_run (
    id INTEGER PRIMARY KEY,
    view_definition_uid TEXT NOT NULL,
    live_data_snapshot_id INTEGER NOT NULL REFERENCES rsk_live_data_snapshot (id),
    valuation_time INTEGER NOT NULL,
    version_as_of INTEGER,
    corrected_to INTEGER,
    create_instant INTEGER NOT NULL,
    start_instant INTEGER NOT NULL,
    end_instant INTEGER,
    num_restarts INTEGER NOT NULL,
    complete INTEGER NOT NULL,
    snapshot_mode TEXT NOT NULL,
    name TEXT
);
CREATE INDEX idx_rsk_run_identity
    ON rsk_run (valuation_time, view_definition_uid, live_data_snapshot_id);
CREATE TABLE rsk_run_property (
    id INTEGER PRIMARY KEY,
    run_id INTEGER NOT NULL REFERENCES rsk_run (id),
    property_key TEXT NOT NULL,
    property_value TEXT NOT NULL,
    UNIQUE (run_id, property_key)
);
CREATE TABLE rsk_run_calculation_configuration (
    run_id INTEGER NOT NULL REFERENCES rsk_run (id),
    calculation_configuration_id INTEGER NOT NULL
        REFERENCES rsk_calculation_configuration (id),
    PRIMARY KEY (run_id, calculation_configuration_id)
);
CREATE TABLE rsk_value (
    id INTEGER PRIMARY KEY,
    run_id INTEGER NOT NULL REFERENCES rsk_run (id),
    calculation_configuration_id INTEGER NOT NULL
        REFERENCES rsk_calculation_configuration (id),
    value_name TEXT NOT NULL,
    value_specification_id INTEGER NOT NULL REFERENCES rsk_value_specification (id),
    function_unique_id INTEGER NOT NULL REFERENCES rsk_function_unique_id (id),
    computation_target_id INTEGER NOT NULL REFERENCES rsk_computation_target (id),
    value REAL NOT NULL,
    eval_instant INTEGER NOT NULL,
    compute_node_id INTEGER NOT NULL REFERENCES rsk_compute_node (id)
);
CREATE INDEX idx_rsk_value_run ON rsk_value (run_id);
CREATE TABLE rsk_failure (
    id INTEGER PRIMARY KEY,
    run_id INTEGER NOT NULL REFERENCES rsk_run (id),
    calculation_configuration_id INTEGER NOT NULL
        REFERENCES rsk_calculation_configuration (id),
    value_name TEXT NOT NULL,
    value_specification_id INTEGER NOT NULL REFERENCES rsk_value_specification (id),
    function_unique_id INTEGER NOT NULL REFERENCES rsk_function_unique_id (id),
    computation_target_id INTEGER NOT NULL REFERENCES rsk_computation_target (id),
    eval_instant INTEGER NOT NULL,
    compute_node_id INTEGER NOT NULL REFERENCES rsk_compute_node (id)
);
CREATE INDEX idx_rsk_failure_run ON rsk_failure (run_id);
CREATE TABLE rsk_failure_reason (
    id INTEGER PRIMARY KEY,
    rsk_failure_id INTEGER NOT NULL REFERENCES rsk_failure (id),
    compute_failure_id INTEGER NOT NULL REFERENCES rsk_compute_failure (id),
    UNIQUE (rsk_failure_id, compute_failure_id)
);
CREATE TABLE rsk_run_status (
    id INTEGER PRIMARY KEY,
    run_id INTEGER NOT NULL REFERENCES rsk_run (id),
    calculation_configuration_id INTEGER NOT NULL
        REFERENCES rsk_calculation_configuration (id),
    computation_target_id INTEGER NOT NULL REFERENCES rsk_computation_target (id),
    status INTEGER NOT NULL,
    UNIQUE (run_id, calculation_configuration_id, computation_target_id)
);
CREATE TABLE rsk_target_property (
    id INTEGER PRIMARY KEY,
    target_id INTEGER NOT NULL REFERENCES rsk_computation_target (id),
    property_key TEXT NOT NULL,
    property_value TEXT NOT NULL,
    UNIQUE (target_id, property_key)
);
";

// ============================================================================
// SECTION: Sequence
// ============================================================================

/// Reserves `count` consecutive ids and returns the first.
///
/// The reservation is part of the caller's transaction: ids of a rolled back
/// transaction are handed out again.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the sequence cannot be advanced.
pub(crate) fn reserve_ids(
    connection: &Connection,
    count: usize,
) -> Result<i64, SqliteBatchStoreError> {
    let count = i64::try_from(count)
        .map_err(|_| SqliteBatchStoreError::Invalid("id reservation too large".to_string()))?;
    connection
        .query_row(
            "UPDATE rsk_sequence SET next_value = next_value + ?1 WHERE name = ?2 \
             RETURNING next_value - ?1",
            params![count, BATCH_SEQUENCE_NAME],
            |row| row.get(0),
        )
        .map_err(db_error)
}

/// Reserves a single id.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError`] when the sequence cannot be advanced.
pub(crate) fn next_id(connection: &Connection) -> Result<i64, SqliteBatchStoreError> {
    reserve_ids(connection, 1)
}

// ============================================================================
// SECTION: Transactions
// ============================================================================

/// Retry policy for transient transaction failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    /// Retries after the first attempt.
    pub(crate) max_retries: u32,
    /// Linear backoff step.
    pub(crate) backoff: Duration,
}

impl RetryPolicy {
    /// Builds the retry policy from store configuration.
    pub(crate) const fn from_config(config: &SqliteBatchStoreConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Runs `operation` in an `IMMEDIATE` transaction, retrying transient failures.
///
/// `state` journals its changes for each attempt and reverts them whenever
/// the attempt does not commit, so caches never hold ids of rolled back rows.
///
/// # Errors
///
/// Returns the last [`SqliteBatchStoreError`] once the failure is not
/// transient or the retry budget is exhausted.
pub(crate) fn run_in_transaction<S, T, F>(
    connection: &mut Connection,
    policy: RetryPolicy,
    state: &mut S,
    mut operation: F,
) -> Result<T, SqliteBatchStoreError>
where
    S: AttemptState,
    F: FnMut(&mut Transaction<'_>, &mut S) -> Result<T, SqliteBatchStoreError>,
{
    let mut attempt: u32 = 0;
    loop {
        state.begin_attempt();
        let outcome = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_error)
            .and_then(|mut tx| {
                let value = operation(&mut tx, state)?;
                tx.commit().map_err(db_error)?;
                Ok(value)
            });
        match outcome {
            Ok(value) => {
                state.commit_attempt();
                return Ok(value);
            }
            Err(err) => {
                state.rollback_attempt();
                if !err.is_transient() || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                tracing::warn!(attempt, error = %err, "retrying batch store transaction");
                thread::sleep(policy.backoff.saturating_mul(attempt));
            }
        }
    }
}

// ============================================================================
// SECTION: Time
// ============================================================================

/// Converts an instant to stored unix nanoseconds.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError::Invalid`] outside the storable range.
pub(crate) fn to_nanos(instant: OffsetDateTime) -> Result<i64, SqliteBatchStoreError> {
    i64::try_from(instant.unix_timestamp_nanos())
        .map_err(|_| SqliteBatchStoreError::Invalid("instant out of storable range".to_string()))
}

/// Converts stored unix nanoseconds back to an instant.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError::Invalid`] for corrupt timestamps.
pub(crate) fn from_nanos(nanos: i64) -> Result<OffsetDateTime, SqliteBatchStoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|err| SqliteBatchStoreError::Invalid(format!("stored instant invalid: {err}")))
}

/// Converts an optional instant to stored unix nanoseconds.
///
/// # Errors
///
/// Returns [`SqliteBatchStoreError::Invalid`] outside the storable range.
pub(crate) fn to_optional_nanos(
    instant: Option<OffsetDateTime>,
) -> Result<Option<i64>, SqliteBatchStoreError> {
    instant.map(to_nanos).transpose()
}
