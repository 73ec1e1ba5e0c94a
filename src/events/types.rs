//! Event types emitted over the lifetime of a run
//!
//! These events drive the pub/sub system and are persisted for replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluator::Verdict;
use crate::finding::FindingId;
use crate::policy::ApplyTrigger;
use crate::similarity::SimilarityKey;
use crate::state::{RunId, RunStatus};

/// Unique identifier for events
pub type EventId = String;

/// All run lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A new run was started
    RunStarted {
        run_id: RunId,
        max_rounds: u32,
        reviewers: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An interrupted run was resumed from persisted state
    RunResumed {
        run_id: RunId,
        resumed_at_round: u32,
        timestamp: DateTime<Utc>,
    },

    /// A review round began
    RoundStarted {
        run_id: RunId,
        round: u32,
        timestamp: DateTime<Utc>,
    },

    /// A reviewer returned its findings
    ReviewerReturned {
        run_id: RunId,
        round: u32,
        source: String,
        finding_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A reviewer returned an error
    ReviewerFailed {
        run_id: RunId,
        round: u32,
        source: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A reviewer exceeded its deadline
    ReviewerTimedOut {
        run_id: RunId,
        round: u32,
        source: String,
        timeout_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// A round's findings were merged and routed through the policy
    FindingsSynthesized {
        run_id: RunId,
        round: u32,
        raised: u32,
        to_apply: u32,
        deferred: u32,
        escalated: u32,
        dropped: u32,
        timestamp: DateTime<Utc>,
    },

    /// An approved fix was applied to the artifact
    FixApplied {
        run_id: RunId,
        round: u32,
        finding_id: FindingId,
        trigger: ApplyTrigger,
        timestamp: DateTime<Utc>,
    },

    /// A fix application failed and the finding was rerouted
    FixRejected {
        run_id: RunId,
        round: u32,
        finding_id: FindingId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A finding entered the deferral registry
    EntryDeferred {
        run_id: RunId,
        round: u32,
        key: SimilarityKey,
        timestamp: DateTime<Utc>,
    },

    /// A registry entry recurred and was promoted to apply
    EntryPromoted {
        run_id: RunId,
        round: u32,
        key: SimilarityKey,
        deferred_in_round: u32,
        timestamp: DateTime<Utc>,
    },

    /// A round's outcome was evaluated against the convergence rules
    RoundEvaluated {
        run_id: RunId,
        round: u32,
        verdict: Verdict,
        timestamp: DateTime<Utc>,
    },

    /// The end-of-run escalation batch was handed to the decision maker
    EscalationPresented {
        run_id: RunId,
        item_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// The run reached a terminal status
    RunCompleted {
        run_id: RunId,
        status: RunStatus,
        rounds_completed: u32,
        timestamp: DateTime<Utc>,
    },
}

impl RunEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RunEvent::RunStarted { timestamp, .. } => *timestamp,
            RunEvent::RunResumed { timestamp, .. } => *timestamp,
            RunEvent::RoundStarted { timestamp, .. } => *timestamp,
            RunEvent::ReviewerReturned { timestamp, .. } => *timestamp,
            RunEvent::ReviewerFailed { timestamp, .. } => *timestamp,
            RunEvent::ReviewerTimedOut { timestamp, .. } => *timestamp,
            RunEvent::FindingsSynthesized { timestamp, .. } => *timestamp,
            RunEvent::FixApplied { timestamp, .. } => *timestamp,
            RunEvent::FixRejected { timestamp, .. } => *timestamp,
            RunEvent::EntryDeferred { timestamp, .. } => *timestamp,
            RunEvent::EntryPromoted { timestamp, .. } => *timestamp,
            RunEvent::RoundEvaluated { timestamp, .. } => *timestamp,
            RunEvent::EscalationPresented { timestamp, .. } => *timestamp,
            RunEvent::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::RunStarted { .. } => "run_started",
            RunEvent::RunResumed { .. } => "run_resumed",
            RunEvent::RoundStarted { .. } => "round_started",
            RunEvent::ReviewerReturned { .. } => "reviewer_returned",
            RunEvent::ReviewerFailed { .. } => "reviewer_failed",
            RunEvent::ReviewerTimedOut { .. } => "reviewer_timed_out",
            RunEvent::FindingsSynthesized { .. } => "findings_synthesized",
            RunEvent::FixApplied { .. } => "fix_applied",
            RunEvent::FixRejected { .. } => "fix_rejected",
            RunEvent::EntryDeferred { .. } => "entry_deferred",
            RunEvent::EntryPromoted { .. } => "entry_promoted",
            RunEvent::RoundEvaluated { .. } => "round_evaluated",
            RunEvent::EscalationPresented { .. } => "escalation_presented",
            RunEvent::RunCompleted { .. } => "run_completed",
        }
    }

    /// Get the run ID this event belongs to
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. } => run_id,
            RunEvent::RunResumed { run_id, .. } => run_id,
            RunEvent::RoundStarted { run_id, .. } => run_id,
            RunEvent::ReviewerReturned { run_id, .. } => run_id,
            RunEvent::ReviewerFailed { run_id, .. } => run_id,
            RunEvent::ReviewerTimedOut { run_id, .. } => run_id,
            RunEvent::FindingsSynthesized { run_id, .. } => run_id,
            RunEvent::FixApplied { run_id, .. } => run_id,
            RunEvent::FixRejected { run_id, .. } => run_id,
            RunEvent::EntryDeferred { run_id, .. } => run_id,
            RunEvent::EntryPromoted { run_id, .. } => run_id,
            RunEvent::RoundEvaluated { run_id, .. } => run_id,
            RunEvent::EscalationPresented { run_id, .. } => run_id,
            RunEvent::RunCompleted { run_id, .. } => run_id,
        }
    }

    /// Get the round number if this event is round-scoped
    pub fn round(&self) -> Option<u32> {
        match self {
            RunEvent::RoundStarted { round, .. } => Some(*round),
            RunEvent::ReviewerReturned { round, .. } => Some(*round),
            RunEvent::ReviewerFailed { round, .. } => Some(*round),
            RunEvent::ReviewerTimedOut { round, .. } => Some(*round),
            RunEvent::FindingsSynthesized { round, .. } => Some(*round),
            RunEvent::FixApplied { round, .. } => Some(*round),
            RunEvent::FixRejected { round, .. } => Some(*round),
            RunEvent::EntryDeferred { round, .. } => Some(*round),
            RunEvent::EntryPromoted { round, .. } => Some(*round),
            RunEvent::RoundEvaluated { round, .. } => Some(*round),
            _ => None,
        }
    }

    /// Create a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = RunEvent::RoundStarted {
            run_id: "run-1".to_string(),
            round: 2,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"round_started\""));

        let parsed: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "round_started");
        assert_eq!(parsed.round(), Some(2));
    }

    #[test]
    fn test_event_accessors() {
        let event = RunEvent::FixApplied {
            run_id: "run-1".to_string(),
            round: 1,
            finding_id: "finding-9".to_string(),
            trigger: ApplyTrigger::SameRoundConsensus,
            timestamp: Utc::now(),
        };

        assert_eq!(event.run_id(), "run-1");
        assert_eq!(event.round(), Some(1));
        assert_eq!(event.event_type(), "fix_applied");
    }

    #[test]
    fn test_run_level_events_have_no_round() {
        let event = RunEvent::RunCompleted {
            run_id: "run-1".to_string(),
            status: RunStatus::Converged,
            rounds_completed: 2,
            timestamp: Utc::now(),
        };

        assert_eq!(event.round(), None);
        assert_eq!(event.run_id(), "run-1");
    }
}
