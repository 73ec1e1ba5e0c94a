//! Column family definitions for the RocksDB run store
//!
//! Each column family provides logical separation of record types
//! while sharing the same RocksDB instance.

/// Column family for run records
pub const CF_RUNS: &str = "runs";

/// Column family for deferred findings (the consensus registry)
pub const CF_DEFERRED: &str = "deferred";

/// Column family for per-round outcome records (the run log)
pub const CF_OUTCOMES: &str = "outcomes";

/// Column family for pending escalations
pub const CF_ESCALATIONS: &str = "escalations";

/// Column family for run event history
pub const CF_EVENTS: &str = "events";

/// All column family names
pub const ALL_CFS: &[&str] = &[
    CF_RUNS,
    CF_DEFERRED,
    CF_OUTCOMES,
    CF_ESCALATIONS,
    CF_EVENTS,
];

/// Key builders for compound keys
///
/// Run ids are UUIDs (no colons), so every `{prefix}:{run_id}:` scan is
/// unambiguous.
pub mod keys {
    /// Create a run record key
    pub fn run(run_id: &str) -> String {
        format!("run:{}", run_id)
    }

    /// Create a deferred-entry key (run + similarity key)
    pub fn deferred(run_id: &str, similarity_key: &str) -> String {
        format!("{}{}", deferred_prefix(run_id), similarity_key)
    }

    /// Prefix covering one run's deferred entries
    pub fn deferred_prefix(run_id: &str) -> String {
        format!("def:{}:", run_id)
    }

    /// Create a round outcome key (zero-padded so lexical order is round order)
    pub fn outcome(run_id: &str, round: u32) -> String {
        format!("{}{:06}", outcome_prefix(run_id), round)
    }

    /// Prefix covering one run's outcomes
    pub fn outcome_prefix(run_id: &str) -> String {
        format!("out:{}:", run_id)
    }

    /// Create a pending-escalation key (run + similarity key)
    pub fn escalation(run_id: &str, similarity_key: &str) -> String {
        format!("{}{}", escalation_prefix(run_id), similarity_key)
    }

    /// Prefix covering one run's pending escalations
    pub fn escalation_prefix(run_id: &str) -> String {
        format!("esc:{}:", run_id)
    }

    /// Create an event key (timestamp-ordered within a run)
    pub fn event(run_id: &str, timestamp_nanos: i64, event_id: &str) -> String {
        format!("{}{:020}:{}", event_prefix(run_id), timestamp_nanos, event_id)
    }

    /// Prefix covering one run's events
    pub fn event_prefix(run_id: &str) -> String {
        format!("evt:{}:", run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(keys::run("abc123"), "run:abc123");
        assert_eq!(keys::deferred("r1", "doc#1|steps"), "def:r1:doc#1|steps");
        assert_eq!(keys::outcome("r1", 2), "out:r1:000002");
        assert_eq!(keys::escalation("r1", "doc#1|steps"), "esc:r1:doc#1|steps");
    }

    #[test]
    fn test_outcome_key_ordering() {
        // Zero padding keeps round 10 after round 2 in lexical order.
        assert!(keys::outcome("r1", 2) < keys::outcome("r1", 10));
    }

    #[test]
    fn test_event_key_ordering() {
        let key1 = keys::event("r1", 1_000_000_000, "evt-1");
        let key2 = keys::event("r1", 2_000_000_000, "evt-2");
        assert!(key1 < key2);
    }
}
