// crates/risk-batch-store-sqlite/src/journal.rs
// ============================================================================
// Module: Attempt Journal
// Description: Hash maps that can undo the writes of one transaction attempt.
// Purpose: Keep per-run caches consistent with rolled back transactions.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Per-run caches hold ids of rows written inside a store transaction. When
//! the transaction rolls back those ids no longer exist, so every cache write
//! made during an attempt is journaled as the entry's previous value and
//! replayed in reverse on rollback. Cost is proportional to the attempt's
//! writes, never to the cache size.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

// ============================================================================
// SECTION: Attempt State
// ============================================================================

/// State whose changes follow the outcome of one transaction attempt.
pub(crate) trait AttemptState {
    /// Starts journaling changes for a new attempt.
    fn begin_attempt(&mut self);
    /// Keeps the changes of a committed attempt.
    fn commit_attempt(&mut self);
    /// Reverts the changes of an attempt that did not commit.
    fn rollback_attempt(&mut self);
}

impl AttemptState for () {
    fn begin_attempt(&mut self) {}

    fn commit_attempt(&mut self) {}

    fn rollback_attempt(&mut self) {}
}

// ============================================================================
// SECTION: Journaled Map
// ============================================================================

/// Hash map journaling its writes while an attempt is open.
///
/// # Invariants
/// - `undo` is `Some` exactly while an attempt is open.
#[derive(Debug, Clone)]
pub(crate) struct JournaledMap<K, V> {
    /// Current entries.
    entries: HashMap<K, V>,
    /// Previous value of every key written during the open attempt.
    undo: Option<Vec<(K, Option<V>)>>,
}

impl<K, V> Default for JournaledMap<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            undo: None,
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> JournaledMap<K, V> {
    /// Returns the value for `key`.
    pub(crate) fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.get(key)
    }

    /// Returns true when `key` is present.
    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Returns the number of entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the map is empty.
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `value`, returning the previous value.
    pub(crate) fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.entries.insert(key.clone(), value);
        if let Some(undo) = self.undo.as_mut() {
            undo.push((key, previous.clone()));
        }
        previous
    }
}

impl<K: Eq + Hash, V> AttemptState for JournaledMap<K, V> {
    fn begin_attempt(&mut self) {
        self.undo = Some(Vec::new());
    }

    fn commit_attempt(&mut self) {
        self.undo = None;
    }

    fn rollback_attempt(&mut self) {
        let Some(undo) = self.undo.take() else {
            return;
        };
        for (key, previous) in undo.into_iter().rev() {
            match previous {
                Some(value) => {
                    self.entries.insert(key, value);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
