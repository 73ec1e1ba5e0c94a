//! Run report — the complete account of a finished run
//!
//! A run always ends with one of these, whatever went wrong along the way:
//! reviewer failures, rejected fixes, and unanswered escalations are all
//! recorded here rather than surfaced as errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::escalation::{EscalationResolution, ResolvedEscalation};
use crate::reviewer::ReviewerFailureRecord;
use crate::state::{RoundOutcome, RunId, RunStatus, SeverityCounts};

/// The escalation batch and what became of each item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationReport {
    /// Every escalated item with its resolution
    pub items: Vec<ResolvedEscalation>,
}

impl EscalationReport {
    /// Number of escalated items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was escalated
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items whose fix was approved and went through
    pub fn applied(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.resolution == EscalationResolution::Applied)
            .count()
    }

    /// Items whose approved fix the mutator rejected or failed
    pub fn apply_failed(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.resolution, EscalationResolution::ApplyFailed { .. }))
            .count()
    }

    /// Items declined, unanswered, or without a fix to apply
    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| {
                matches!(
                    i.resolution,
                    EscalationResolution::Skipped | EscalationResolution::SkippedNoFix
                )
            })
            .count()
    }

    /// Items never presented because the run had no decision maker
    pub fn unresolved(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.resolution == EscalationResolution::Unresolved)
            .count()
    }
}

/// Aggregate counters across every round of the run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunTotals {
    /// Rounds that ran to completion
    pub rounds_completed: u32,

    /// Representative findings raised, by severity
    pub raised: SeverityCounts,

    /// Fixes auto-applied, across all triggers
    pub applied: u32,

    /// Findings parked in the deferral registry
    pub deferred: u32,

    /// Findings queued for escalation by the policy
    pub escalated: u32,

    /// Auto-apply attempts the mutator rejected or failed
    pub apply_failures: u32,

    /// Malformed findings dropped before classification
    pub dropped: u32,

    /// Reviewer timeouts and errors
    pub reviewer_failures: u32,
}

/// Complete report for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,

    /// Terminal status the run ended in
    pub status: RunStatus,

    /// Per-round outcomes, in round order
    pub rounds: Vec<RoundOutcome>,

    /// Every reviewer failure, pinned to its round
    pub reviewer_failures: Vec<ReviewerFailureRecord>,

    /// The end-of-run escalation batch and its resolutions
    pub escalations: EscalationReport,

    /// Aggregates across all rounds
    pub totals: RunTotals,

    /// When the report was produced
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    /// Assemble a report from a finished run's pieces
    pub fn new(
        run_id: impl Into<RunId>,
        status: RunStatus,
        rounds: Vec<RoundOutcome>,
        reviewer_failures: Vec<ReviewerFailureRecord>,
        resolutions: Vec<ResolvedEscalation>,
    ) -> Self {
        let mut totals = RunTotals {
            rounds_completed: rounds.len() as u32,
            ..RunTotals::default()
        };
        for outcome in &rounds {
            totals.raised.merge(outcome.raised);
            totals.applied += outcome.applied_total();
            totals.deferred += outcome.deferred;
            totals.escalated += outcome.escalated;
            totals.apply_failures += outcome.apply_failures;
            totals.dropped += outcome.dropped;
            totals.reviewer_failures += outcome.reviewer_failures;
        }

        Self {
            run_id: run_id.into(),
            status,
            rounds,
            reviewer_failures,
            escalations: EscalationReport { items: resolutions },
            totals,
            completed_at: Utc::now(),
        }
    }

    /// Whether the run converged cleanly
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Converged
    }

    /// Whether a human should look at this run
    ///
    /// True on a forced halt, on any unresolved escalation, or when an
    /// approved fix failed to apply.
    pub fn needs_attention(&self) -> bool {
        self.status == RunStatus::ForcedHalt
            || self.escalations.unresolved() > 0
            || self.escalations.apply_failed() > 0
    }

    /// Compact summary for logging
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} rounds | {} raised | {} applied | {} deferred | {} escalated | run={}",
            self.status.to_string().to_uppercase(),
            self.totals.rounds_completed,
            self.totals.raised.total(),
            self.totals.applied,
            self.totals.deferred,
            self.escalations.len(),
            self.run_id,
        )
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{Finding, Severity};
    use crate::similarity::SimilarityKey;
    use crate::state::{EscalationReason, PendingEscalation};

    fn resolved_fixture(summary: &str, resolution: EscalationResolution) -> ResolvedEscalation {
        let finding = Finding::new("security", Severity::High, "auth#1", summary);
        let key = SimilarityKey::of(&finding);
        ResolvedEscalation {
            item: PendingEscalation::new(key, finding, EscalationReason::MissingFix),
            resolution,
        }
    }

    fn two_round_outcomes() -> Vec<RoundOutcome> {
        let mut first = RoundOutcome::new(1);
        first.raised.record(Severity::High);
        first.raised.record(Severity::Low);
        first.applied_by_severity = 1;
        first.deferred = 1;

        let mut second = RoundOutcome::new(2);
        second.raised.record(Severity::Medium);
        second.applied_cross_round = 1;
        second.reviewer_failures = 1;

        vec![first, second]
    }

    #[test]
    fn test_totals_aggregate_rounds() {
        let report = RunReport::new(
            "run-1",
            RunStatus::Converged,
            two_round_outcomes(),
            vec![],
            vec![],
        );

        assert_eq!(report.totals.rounds_completed, 2);
        assert_eq!(report.totals.raised.total(), 3);
        assert_eq!(report.totals.applied, 2);
        assert_eq!(report.totals.deferred, 1);
        assert_eq!(report.totals.reviewer_failures, 1);
    }

    #[test]
    fn test_escalation_report_counts() {
        let items = vec![
            resolved_fixture("no threat model", EscalationResolution::Applied),
            resolved_fixture("missing audit trail", EscalationResolution::Skipped),
            resolved_fixture("stale dependency", EscalationResolution::SkippedNoFix),
            resolved_fixture(
                "races on shutdown",
                EscalationResolution::ApplyFailed {
                    reason: "patch conflict".to_string(),
                },
            ),
        ];
        let report = RunReport::new("run-1", RunStatus::Converged, vec![], vec![], items);

        assert_eq!(report.escalations.len(), 4);
        assert_eq!(report.escalations.applied(), 1);
        assert_eq!(report.escalations.skipped(), 2);
        assert_eq!(report.escalations.apply_failed(), 1);
        assert_eq!(report.escalations.unresolved(), 0);
        assert!(report.needs_attention());
    }

    #[test]
    fn test_clean_run_needs_no_attention() {
        let report = RunReport::new(
            "run-1",
            RunStatus::Converged,
            two_round_outcomes(),
            vec![],
            vec![],
        );
        assert!(report.is_success());
        assert!(!report.needs_attention());
    }

    #[test]
    fn test_forced_halt_needs_attention() {
        let report = RunReport::new("run-1", RunStatus::ForcedHalt, vec![], vec![], vec![]);
        assert!(!report.is_success());
        assert!(report.needs_attention());
    }

    #[test]
    fn test_summary_line() {
        let report = RunReport::new(
            "run-7",
            RunStatus::Converged,
            two_round_outcomes(),
            vec![],
            vec![resolved_fixture(
                "no threat model",
                EscalationResolution::Unresolved,
            )],
        );

        let line = report.summary_line();
        assert!(line.contains("[CONVERGED]"));
        assert!(line.contains("2 rounds"));
        assert!(line.contains("3 raised"));
        assert!(line.contains("1 escalated"));
        assert!(line.contains("run=run-7"));
        assert_eq!(format!("{}", report), line);
    }
}
