//! State persistence for convergence runs
//!
//! RocksDB-backed storage for everything that must survive a process
//! restart mid-run:
//! - the run record (round position, ceiling, status)
//! - deferred findings backing the consensus registry
//! - the append-only round outcome log
//! - pending escalations awaiting the end-of-run decision
//! - run event history for replay and debugging
//!
//! # Architecture
//!
//! One RocksDB instance with a column family per record type:
//!
//! - `runs`: RunRecord per run
//! - `deferred`: DeferredEntry keyed by run + similarity key
//! - `outcomes`: RoundOutcome keyed by run + zero-padded round
//! - `escalations`: PendingEscalation keyed by run + similarity key
//! - `events`: run events keyed by run + timestamp, stored as JSON
//!
//! Values are bincode-encoded (events excepted). An unreadable record on
//! resume surfaces as a `StoreError::Deserialization` and aborts the
//! resume; there is no partial-recovery path.

pub mod schema;
pub mod store;
pub mod types;

// Re-export core types
pub use store::{RunStore, SharedRunStore, StoreError, StoreResult};
pub use types::{
    DeferredEntry, EscalationReason, PendingEscalation, RoundOutcome, RunId, RunRecord, RunStatus,
    SeverityCounts,
};
