//! RocksDB-backed store for runs, the deferral registry, and the run log
//!
//! Provides persistent storage with column families for logical separation.
//! Values are bincode-encoded, except events which are stored as JSON for
//! debuggability. Everything here must survive a process restart: resuming
//! a run reads back exactly what the previous process persisted.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, ALL_CFS};
use super::types::{DeferredEntry, PendingEscalation, RoundOutcome, RunRecord};
use crate::similarity::SimilarityKey;

/// Error type for run store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for run store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a RunStore
pub type SharedRunStore = Arc<RunStore>;

/// RocksDB-backed persistent run store
pub struct RunStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RunStore {
    /// Open or create a run store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedRunStore {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    /// Store a value in a column family
    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let bytes =
            bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))?;

        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Get a value from a column family
    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => {
                let value = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete a value from a column family
    fn delete(&self, cf_name: &str, key: &str) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        db.delete_cf(&cf, key.as_bytes())?;
        Ok(())
    }

    /// List all values with a key prefix, in key order
    fn list_prefix<T: DeserializeOwned>(&self, cf_name: &str, prefix: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let mut values = Vec::new();
        let iter = db.prefix_iterator_cf(&cf, prefix.as_bytes());

        for result in iter {
            let (key, bytes) = result?;
            let key_str = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            if !key_str.starts_with(prefix) {
                break; // Prefix no longer matches
            }
            let value = bincode::deserialize(&bytes)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            values.push(value);
        }

        Ok(values)
    }

    // =========================================================================
    // Run operations
    // =========================================================================

    /// Store a run record
    pub fn put_run(&self, record: &RunRecord) -> StoreResult<()> {
        let key = schema::keys::run(&record.id);
        self.put(schema::CF_RUNS, &key, record)
    }

    /// Get a run record by id
    pub fn get_run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        let key = schema::keys::run(run_id);
        self.get(schema::CF_RUNS, &key)
    }

    // =========================================================================
    // Deferred-entry operations (consensus registry backing)
    // =========================================================================

    /// Store a deferred entry under its similarity key
    pub fn put_deferred(&self, run_id: &str, entry: &DeferredEntry) -> StoreResult<()> {
        let key = schema::keys::deferred(run_id, entry.key.as_str());
        self.put(schema::CF_DEFERRED, &key, entry)
    }

    /// Look up a deferred entry by similarity key
    pub fn get_deferred(
        &self,
        run_id: &str,
        similarity_key: &SimilarityKey,
    ) -> StoreResult<Option<DeferredEntry>> {
        let key = schema::keys::deferred(run_id, similarity_key.as_str());
        self.get(schema::CF_DEFERRED, &key)
    }

    /// Remove a deferred entry (promotion or cleanup)
    pub fn delete_deferred(
        &self,
        run_id: &str,
        similarity_key: &SimilarityKey,
    ) -> StoreResult<()> {
        let key = schema::keys::deferred(run_id, similarity_key.as_str());
        self.delete(schema::CF_DEFERRED, &key)
    }

    /// List a run's deferred entries
    pub fn list_deferred(&self, run_id: &str) -> StoreResult<Vec<DeferredEntry>> {
        self.list_prefix(schema::CF_DEFERRED, &schema::keys::deferred_prefix(run_id))
    }

    // =========================================================================
    // Round outcome operations (run log)
    // =========================================================================

    /// Append a round outcome to the run log
    pub fn put_outcome(&self, run_id: &str, outcome: &RoundOutcome) -> StoreResult<()> {
        let key = schema::keys::outcome(run_id, outcome.round);
        self.put(schema::CF_OUTCOMES, &key, outcome)
    }

    /// List a run's outcomes in round order
    pub fn list_outcomes(&self, run_id: &str) -> StoreResult<Vec<RoundOutcome>> {
        let mut outcomes: Vec<RoundOutcome> =
            self.list_prefix(schema::CF_OUTCOMES, &schema::keys::outcome_prefix(run_id))?;
        outcomes.sort_by_key(|o| o.round);
        Ok(outcomes)
    }

    // =========================================================================
    // Pending escalation operations
    // =========================================================================

    /// Store a pending escalation under its similarity key
    pub fn put_escalation(&self, run_id: &str, item: &PendingEscalation) -> StoreResult<()> {
        let key = schema::keys::escalation(run_id, item.key.as_str());
        self.put(schema::CF_ESCALATIONS, &key, item)
    }

    /// Look up a pending escalation by similarity key
    pub fn get_escalation(
        &self,
        run_id: &str,
        similarity_key: &SimilarityKey,
    ) -> StoreResult<Option<PendingEscalation>> {
        let key = schema::keys::escalation(run_id, similarity_key.as_str());
        self.get(schema::CF_ESCALATIONS, &key)
    }

    /// List a run's pending escalations
    pub fn list_escalations(&self, run_id: &str) -> StoreResult<Vec<PendingEscalation>> {
        self.list_prefix(
            schema::CF_ESCALATIONS,
            &schema::keys::escalation_prefix(run_id),
        )
    }

    // =========================================================================
    // Event operations (for replay)
    // =========================================================================

    /// Store an event (serialized as JSON for debuggability)
    pub fn put_event(
        &self,
        run_id: &str,
        timestamp_nanos: i64,
        event_id: &str,
        event: &impl Serialize,
    ) -> StoreResult<()> {
        let key = schema::keys::event(run_id, timestamp_nanos, event_id);
        let bytes =
            serde_json::to_vec(event).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_EVENTS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_EVENTS.to_string()))?;

        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    /// List a run's events in chronological order
    pub fn list_run_events<T: DeserializeOwned>(&self, run_id: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(schema::CF_EVENTS)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_EVENTS.to_string()))?;

        let prefix = schema::keys::event_prefix(run_id);
        let mut events = Vec::new();
        let iter = db.prefix_iterator_cf(&cf, prefix.as_bytes());

        for result in iter {
            let (key, value) = result?;
            let key_str = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            if !key_str.starts_with(&prefix) {
                break;
            }
            let event: T = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            events.push(event);
        }

        Ok(events)
    }
}
