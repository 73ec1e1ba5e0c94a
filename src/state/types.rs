//! Persisted record types for convergence runs
//!
//! Everything in this module is stored in RocksDB via bincode: the run
//! record, the deferral registry entries, the append-only round log, and
//! the pending escalation queue. Records survive process restarts so a
//! resumed run reconstructs its round position and deferred-findings pool
//! exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::finding::{Finding, Severity};
use crate::similarity::SimilarityKey;

/// Unique identifier for runs
pub type RunId = String;

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Rounds are still being executed
    Running,
    /// The review stabilized and the run finished cleanly
    Converged,
    /// The round ceiling was hit with blocking findings still unverified
    ForcedHalt,
}

impl RunStatus {
    /// Whether the run can no longer advance
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Converged => write!(f, "converged"),
            RunStatus::ForcedHalt => write!(f, "forced_halt"),
        }
    }
}

/// Durable core of a run's session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier
    pub id: RunId,

    /// Last round that completed (0 before the first round finishes)
    pub current_round: u32,

    /// Hard ceiling on rounds
    pub max_rounds: u32,

    /// Run status
    pub status: RunStatus,

    /// Run creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last persisted change
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    /// Create a new running record
    pub fn new(max_rounds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            current_round: 0,
            max_rounds,
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record that a round completed
    pub fn complete_round(&mut self, round: u32) {
        self.current_round = round;
        self.touch();
    }

    /// Move the run to a terminal status
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.touch();
    }

    /// Update the last-activity timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A deferred finding persisted across rounds
///
/// Created when synthesis defers a single-source, sub-threshold finding.
/// Read by every later round's registry lookup; removed the moment a later
/// finding matches it (promotion); carried into the escalation batch if it
/// survives to the end of the run. Never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredEntry {
    /// Matching key the entry is filed under
    pub key: SimilarityKey,

    /// The original finding, unchanged
    pub finding: Finding,

    /// Round the deferral happened in
    pub deferred_in_round: u32,

    /// When the deferral happened
    pub deferred_at: DateTime<Utc>,
}

impl DeferredEntry {
    /// Create an entry for a finding deferred this round
    pub fn new(key: SimilarityKey, finding: Finding, round: u32) -> Self {
        Self {
            key,
            finding,
            deferred_in_round: round,
            deferred_at: Utc::now(),
        }
    }
}

/// Finding counts broken down by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

impl SeverityCounts {
    /// Bump the counter for one severity
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    /// Fold another count set into this one
    pub fn merge(&mut self, other: SeverityCounts) {
        self.low += other.low;
        self.medium += other.medium;
        self.high += other.high;
        self.critical += other.critical;
    }

    /// Total findings counted
    pub fn total(&self) -> u32 {
        self.low + self.medium + self.high + self.critical
    }

    /// Findings serious enough to force another round
    pub fn high_or_critical(&self) -> u32 {
        self.high + self.critical
    }
}

/// Summary of one completed round, appended to the run log
///
/// Counts are over post-dedup representative findings, so three reviewers
/// agreeing on one issue count once here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Round number (1-based)
    pub round: u32,

    /// Representative findings raised, by severity
    pub raised: SeverityCounts,

    /// Auto-applied because of High/Critical severity
    pub applied_by_severity: u32,

    /// Auto-applied because another reviewer matched it this round
    pub applied_same_round: u32,

    /// Auto-applied because a deferred entry from a prior round matched
    pub applied_cross_round: u32,

    /// Deferred into the registry this round
    pub deferred: u32,

    /// Queued for end-of-run escalation this round
    pub escalated: u32,

    /// Auto-apply attempts the mutator rejected or failed
    pub apply_failures: u32,

    /// Malformed findings dropped before classification
    pub dropped: u32,

    /// Reviewers that timed out or failed this round
    pub reviewer_failures: u32,

    /// When the round finished
    pub completed_at: DateTime<Utc>,
}

impl RoundOutcome {
    /// Create an empty outcome for a round
    pub fn new(round: u32) -> Self {
        Self {
            round,
            raised: SeverityCounts::default(),
            applied_by_severity: 0,
            applied_same_round: 0,
            applied_cross_round: 0,
            deferred: 0,
            escalated: 0,
            apply_failures: 0,
            dropped: 0,
            reviewer_failures: 0,
            completed_at: Utc::now(),
        }
    }

    /// Total representative findings this round
    pub fn total_raised(&self) -> u32 {
        self.raised.total()
    }

    /// Total auto-applied, across all triggers
    pub fn applied_total(&self) -> u32 {
        self.applied_by_severity + self.applied_same_round + self.applied_cross_round
    }
}

/// Why a finding landed in the escalation queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The reviewer proposed no mechanical fix
    MissingFix,
    /// The mutator rejected or failed the auto-apply
    MutationFailed { reason: String },
    /// A registry entry that never achieved consensus by run end
    NeverPromoted,
    /// Auto-applied in the final round of a forced halt, so no later
    /// round confirmed the fix
    Unverified { round: u32 },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationReason::MissingFix => write!(f, "missing_fix"),
            EscalationReason::MutationFailed { reason } => {
                write!(f, "mutation_failed: {}", reason)
            }
            EscalationReason::NeverPromoted => write!(f, "never_promoted"),
            EscalationReason::Unverified { round } => write!(f, "unverified_round_{}", round),
        }
    }
}

/// A finding waiting for the end-of-run human decision
///
/// Keyed by similarity key; re-escalations of the same issue merge their
/// provenance instead of duplicating the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEscalation {
    /// Matching key the item is filed under
    pub key: SimilarityKey,

    /// Representative finding shown to the decision maker
    pub finding: Finding,

    /// Every round the issue surfaced in
    pub rounds_seen: Vec<u32>,

    /// Every reviewer that raised it
    pub sources: Vec<String>,

    /// Why it needs a human
    pub reason: EscalationReason,

    /// First escalation timestamp
    pub created_at: DateTime<Utc>,
}

impl PendingEscalation {
    /// Create a pending item from a finding
    pub fn new(key: SimilarityKey, finding: Finding, reason: EscalationReason) -> Self {
        Self {
            rounds_seen: vec![finding.round],
            sources: vec![finding.source.clone()],
            key,
            finding,
            reason,
            created_at: Utc::now(),
        }
    }

    /// Merge a re-escalation of the same issue into this item
    ///
    /// Provenance lists grow; the stored finding is replaced when the new
    /// one is more severe or finally carries a fix, since that is the
    /// version the decision maker should see.
    pub fn absorb(&mut self, finding: &Finding, reason: EscalationReason) {
        if !self.rounds_seen.contains(&finding.round) {
            self.rounds_seen.push(finding.round);
        }
        if !self.sources.contains(&finding.source) {
            self.sources.push(finding.source.clone());
        }
        let upgrade = finding.severity > self.finding.severity
            || (self.finding.fix.is_none() && finding.fix.is_some());
        if upgrade {
            self.finding = finding.clone();
            self.reason = reason;
        }
    }

    /// Extend provenance with extra rounds (used when merging batch items)
    pub fn merge_rounds(&mut self, rounds: &[u32]) {
        for round in rounds {
            if !self.rounds_seen.contains(round) {
                self.rounds_seen.push(*round);
            }
        }
    }
}
