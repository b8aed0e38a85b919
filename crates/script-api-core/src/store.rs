// script-api-core/src/store.rs
// ============================================================================
// Module: Run Store
// Description: Backend-agnostic durable mirror of the in-memory run registry.
// Purpose: Define the contract a durable store must satisfy, plus an
//          in-memory reference implementation for tests.
// Dependencies: crate::run
// ============================================================================

//! ## Overview
//! The Run Manager treats the durable store as a single-table, upsert-only
//! key/value mirror keyed by `run_id`. Implementations must fail closed:
//! I/O, corruption, and schema mismatches are distinct error kinds rather
//! than silently dropped rows.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;

use crate::run::RunRecord;
use crate::run_id::RunId;

/// Errors raised by a [`RunStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store's underlying I/O failed.
    #[error("run store io error: {0}")]
    Io(String),
    /// Stored data failed an integrity or schema check.
    #[error("run store corruption: {0}")]
    Corrupt(String),
    /// The store's schema version does not match what this build expects.
    #[error("run store version mismatch: {0}")]
    VersionMismatch(String),
    /// The store reported an error with no more specific kind.
    #[error("run store error: {0}")]
    Store(String),
}

/// Durable mirror of the run registry, keyed by `run_id`.
///
/// Writes are idempotent upserts: saving a record with an already-present
/// `run_id` replaces it wholesale. Implementations must not leak ephemeral
/// state (child handles, open file handles) into the persisted row.
pub trait RunStore: Send + Sync {
    /// Loads a single run by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying store cannot be read.
    fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError>;

    /// Loads every persisted run, in unspecified order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the underlying store cannot be read.
    fn load_all(&self) -> Result<Vec<RunRecord>, StoreError>;

    /// Upserts a run record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn save(&self, record: &RunRecord) -> Result<(), StoreError>;
}

/// In-memory [`RunStore`] used by tests and as a fallback when no durable
/// backend is configured.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRunStore {
    runs: Arc<Mutex<BTreeMap<String, RunRecord>>>,
}

impl InMemoryRunStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        let guard = self
            .runs
            .lock()
            .map_err(|_| StoreError::Store("run store mutex poisoned".to_string()))?;
        Ok(guard.get(&run_id.as_str()).cloned())
    }

    fn load_all(&self) -> Result<Vec<RunRecord>, StoreError> {
        let guard = self
            .runs
            .lock()
            .map_err(|_| StoreError::Store("run store mutex poisoned".to_string()))?;
        Ok(guard.values().cloned().collect())
    }

    fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut guard = self
            .runs
            .lock()
            .map_err(|_| StoreError::Store("run store mutex poisoned".to_string()))?;
        guard.insert(record.run_id.as_str(), record.clone());
        Ok(())
    }
}

/// Clonable, shared handle to a [`RunStore`] trait object.
#[derive(Clone)]
pub struct SharedRunStore {
    inner: Arc<dyn RunStore>,
}

impl SharedRunStore {
    /// Wraps a store implementation in a shared, clonable handle.
    #[must_use]
    pub fn from_store(store: impl RunStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an already-shared store.
    #[must_use]
    pub const fn new(store: Arc<dyn RunStore>) -> Self {
        Self { inner: store }
    }
}

impl RunStore for SharedRunStore {
    fn load(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        self.inner.load(run_id)
    }

    fn load_all(&self) -> Result<Vec<RunRecord>, StoreError> {
        self.inner.load_all()
    }

    fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.inner.save(record)
    }
}
