//! Consensus registry — durable pool of deferred findings
//!
//! Single-source, sub-threshold findings land here instead of being acted
//! on. Later rounds consult the registry: a match promotes the entry
//! (removal plus auto-apply of both findings as a unit), and entries still
//! here at run end move to the escalation surface.
//!
//! The registry is append/remove-only. There is no update operation, so an
//! entry observed at the start of round k is either still identical or gone
//! (promoted) at the start of round k+1.

use tracing::{debug, info};

use crate::similarity::SimilarityKey;
use crate::state::{DeferredEntry, RunId, SharedRunStore, StoreResult};

/// Durable view over one run's deferred findings
#[derive(Clone)]
pub struct ConsensusRegistry {
    store: SharedRunStore,
    run_id: RunId,
}

impl ConsensusRegistry {
    /// Create a registry view for a run
    pub fn new(store: SharedRunStore, run_id: impl Into<RunId>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    /// The run this registry belongs to
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// File a deferred finding under its similarity key
    pub fn defer(&self, entry: DeferredEntry) -> StoreResult<()> {
        debug!(
            run_id = %self.run_id,
            key = %entry.key,
            round = entry.deferred_in_round,
            severity = %entry.finding.severity,
            "deferring finding for future corroboration"
        );
        self.store.put_deferred(&self.run_id, &entry)
    }

    /// Look up a deferred entry by similarity key
    pub fn lookup(&self, key: &SimilarityKey) -> StoreResult<Option<DeferredEntry>> {
        self.store.get_deferred(&self.run_id, key)
    }

    /// Remove and return the entry a new finding just matched
    ///
    /// Returns `None` when no entry exists under the key.
    pub fn promote(&self, key: &SimilarityKey) -> StoreResult<Option<DeferredEntry>> {
        let Some(entry) = self.store.get_deferred(&self.run_id, key)? else {
            return Ok(None);
        };
        self.store.delete_deferred(&self.run_id, key)?;
        info!(
            run_id = %self.run_id,
            key = %key,
            deferred_in_round = entry.deferred_in_round,
            "promoting deferred finding on cross-round match"
        );
        Ok(Some(entry))
    }

    /// Entries never promoted, in (round, key) order
    pub fn survivors(&self) -> StoreResult<Vec<DeferredEntry>> {
        let mut entries = self.store.list_deferred(&self.run_id)?;
        entries.sort_by(|a, b| {
            a.deferred_in_round
                .cmp(&b.deferred_in_round)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries)
    }

    /// Number of entries currently deferred
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.store.list_deferred(&self.run_id)?.len())
    }

    /// Whether the registry holds no entries
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}
