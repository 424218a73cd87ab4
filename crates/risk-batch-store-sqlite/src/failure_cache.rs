// crates/risk-batch-store-sqlite/src/failure_cache.rs
// ============================================================================
// Module: Compute Failure Cache
// Description: Interns distinct compute failure signatures.
// Purpose: Give each (function, class, message, trace) tuple exactly one row.
// Dependencies: risk-batch-core, rusqlite, sha2
// ============================================================================

//! ## Overview
//! Lookups go memory cache, then store, then insert. Uniqueness is enforced
//! by the store through a unique digest column; an insert that loses a race
//! to a concurrent writer changes no rows, and the winner is re-selected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;

use risk_batch_core::BatchError;
use risk_batch_core::ComputeFailure;
use risk_batch_core::ComputeFailureId;
use risk_batch_core::ComputeFailureKey;
use risk_batch_core::ComputeFailureResolver;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use sha2::Digest;
use sha2::Sha256;

use crate::journal::AttemptState;
use crate::journal::JournaledMap;
use crate::store::SqliteBatchStoreError;
use crate::store::db_error;
use crate::store::next_id;

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Per-run compute failure cache.
#[derive(Debug, Clone, Default)]
pub struct ComputeFailureCache {
    /// Interned failure ids by signature.
    entries: JournaledMap<ComputeFailureKey, ComputeFailureId>,
}

impl ComputeFailureCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the interned failure for `key`, creating it when absent.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteBatchStoreError`] when the store lookup or insert fails.
    pub fn get_or_create(
        &mut self,
        connection: &Connection,
        key: &ComputeFailureKey,
    ) -> Result<ComputeFailure, SqliteBatchStoreError> {
        if let Some(id) = self.entries.get(key) {
            return Ok(ComputeFailure {
                id: *id,
                key: key.clone(),
            });
        }
        let digest = failure_digest(key);
        let id = match find_failure(connection, &digest, key)? {
            Some(id) => id,
            None => insert_failure(connection, &digest, key)?,
        };
        self.entries.insert(key.clone(), id);
        Ok(ComputeFailure {
            id,
            key: key.clone(),
        })
    }

    /// Returns a resolver bound to `connection`.
    pub(crate) fn resolver<'a>(
        &'a mut self,
        connection: &'a Connection,
    ) -> StoreFailureResolver<'a> {
        StoreFailureResolver {
            connection,
            cache: self,
            error: None,
        }
    }
}

impl AttemptState for ComputeFailureCache {
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

/// [`ComputeFailureResolver`] backed by the cache and a live connection.
pub(crate) struct StoreFailureResolver<'a> {
    /// Connection inside the caller's transaction.
    connection: &'a Connection,
    /// Per-run cache.
    cache: &'a mut ComputeFailureCache,
    /// Store error behind the last failed resolution.
    error: Option<SqliteBatchStoreError>,
}

impl StoreFailureResolver<'_> {
    /// Returns the store error of the last failed resolution.
    pub(crate) fn take_error(&mut self) -> Option<SqliteBatchStoreError> {
        self.error.take()
    }
}

impl ComputeFailureResolver for StoreFailureResolver<'_> {
    fn resolve(&mut self, key: &ComputeFailureKey) -> Result<ComputeFailureId, BatchError> {
        match self.cache.get_or_create(self.connection, key) {
            Ok(failure) => Ok(failure.id),
            Err(err) => {
                self.error = Some(err.clone());
                Err(err.into())
            }
        }
    }
}

// ============================================================================
// SECTION: Store Access
// ============================================================================

/// Selects the failure row with `digest`, verifying the stored tuple.
fn find_failure(
    connection: &Connection,
    digest: &str,
    key: &ComputeFailureKey,
) -> Result<Option<ComputeFailureId>, SqliteBatchStoreError> {
    let row: Option<(i64, ComputeFailureKey)> = connection
        .prepare_cached(
            "SELECT id, function_id, exception_class, exception_msg, stack_trace FROM \
             rsk_compute_failure WHERE key_digest = ?1",
        )
        .map_err(db_error)?
        .query_row(params![digest], |row| {
            Ok((
                row.get(0)?,
                ComputeFailureKey {
                    function_id: row.get(1)?,
                    exception_class: row.get(2)?,
                    exception_message: row.get(3)?,
                    stack_trace: row.get(4)?,
                },
            ))
        })
        .optional()
        .map_err(db_error)?;
    match row {
        Some((id, stored)) if stored == *key => Ok(Some(ComputeFailureId::new(id))),
        Some((id, _)) => Err(SqliteBatchStoreError::Invalid(format!(
            "compute failure digest collision with row {id}"
        ))),
        None => Ok(None),
    }
}

/// Inserts a failure row; re-selects when a concurrent insert won.
fn insert_failure(
    connection: &Connection,
    digest: &str,
    key: &ComputeFailureKey,
) -> Result<ComputeFailureId, SqliteBatchStoreError> {
    let id = next_id(connection)?;
    let changed = connection
        .prepare_cached(
            "INSERT INTO rsk_compute_failure (id, function_id, exception_class, exception_msg, \
             stack_trace, key_digest) VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT (key_digest) \
             DO NOTHING",
        )
        .map_err(db_error)?
        .execute(params![
            id,
            key.function_id,
            key.exception_class,
            key.exception_message,
            key.stack_trace,
            digest
        ])
        .map_err(db_error)?;
    if changed == 1 {
        return Ok(ComputeFailureId::new(id));
    }
    find_failure(connection, digest, key)?.ok_or_else(|| {
        SqliteBatchStoreError::Db("compute failure insert conflicted but no row found".to_string())
    })
}

/// Returns the hex SHA-256 digest of the length-prefixed signature fields.
fn failure_digest(key: &ComputeFailureKey) -> String {
    let mut hasher = Sha256::new();
    for field in [
        &key.function_id,
        &key.exception_class,
        &key.exception_message,
        &key.stack_trace,
    ] {
        hasher.update(u64::try_from(field.len()).unwrap_or(u64::MAX).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions favor direct unwrap/expect for clarity."
)]
mod tests {
    use risk_batch_core::ComputeFailureId;
    use risk_batch_core::ComputeFailureKey;
    use rusqlite::Connection;
    use rusqlite::params;
    use tempfile::TempDir;

    use super::ComputeFailureCache;
    use super::failure_digest;
    use super::insert_failure;
    use crate::store::SqliteBatchStoreConfig;
    use crate::store::open_store;

    /// Id far above anything the sequence hands out in a fresh store.
    const WINNER_ID: i64 = 9_000;

    fn failure_rows(connection: &Connection) -> i64 {
        connection
            .query_row("SELECT COUNT(*) FROM rsk_compute_failure", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn insert_losing_to_a_concurrent_writer_returns_the_winning_row() {
        let dir = TempDir::new().unwrap();
        let config = SqliteBatchStoreConfig::new(dir.path().join("risk.db"));
        let connection = open_store(&config).expect("open store");
        let key = ComputeFailureKey::new(
            "fn-pv",
            Some("ArithmeticError"),
            Some("divide by zero"),
            Some("at pricer"),
        );
        let digest = failure_digest(&key);

        let winner = Connection::open(&config.path).unwrap();
        winner
            .execute(
                "INSERT INTO rsk_compute_failure (id, function_id, exception_class, \
                 exception_msg, stack_trace, key_digest) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    WINNER_ID,
                    key.function_id,
                    key.exception_class,
                    key.exception_message,
                    key.stack_trace,
                    digest
                ],
            )
            .unwrap();
        drop(winner);

        let id = insert_failure(&connection, &digest, &key).expect("lost insert resolves");
        assert_eq!(id, ComputeFailureId::new(WINNER_ID));
        assert_eq!(failure_rows(&connection), 1);

        let mut cache = ComputeFailureCache::new();
        let interned = cache.get_or_create(&connection, &key).expect("interned");
        assert_eq!(interned.id, id);
        assert_eq!(failure_rows(&connection), 1);
    }

    #[test]
    fn digest_separates_field_boundaries() {
        let left = ComputeFailureKey::new("fn", Some("ab"), Some("c"), Some("t"));
        let right = ComputeFailureKey::new("fn", Some("a"), Some("bc"), Some("t"));
        assert_ne!(failure_digest(&left), failure_digest(&right));
        assert_eq!(failure_digest(&left), failure_digest(&left.clone()));
    }
}
