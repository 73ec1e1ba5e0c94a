//! Auto-apply policy
//!
//! Pure decision rules mapping a representative finding plus its consensus
//! evidence to an action. No I/O, no clock, no logging: call sites own the
//! side effects, which keeps classification trivially testable and
//! replayable.

use serde::{Deserialize, Serialize};

use crate::finding::{Finding, Severity};

/// What fired an auto-apply decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyTrigger {
    /// High or Critical severity applies unconditionally
    Severity,
    /// Another reviewer independently raised a matching finding this round
    SameRoundConsensus,
    /// A matching finding was deferred in an earlier round and recurred
    CrossRoundConsensus,
}

impl std::fmt::Display for ApplyTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyTrigger::Severity => write!(f, "severity"),
            ApplyTrigger::SameRoundConsensus => write!(f, "same_round_consensus"),
            ApplyTrigger::CrossRoundConsensus => write!(f, "cross_round_consensus"),
        }
    }
}

/// Classification outcome for one representative finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Apply the fix mechanically, without a human in the loop
    AutoApply(ApplyTrigger),
    /// Park the finding in the registry for future corroboration
    Defer,
    /// Queue the finding for the end-of-run human decision
    Escalate,
}

/// Classify a finding given its consensus evidence
///
/// Rules are evaluated in order, first match wins:
/// 1. no fix attached: escalate (no mechanical action exists, whatever the
///    severity or agreement)
/// 2. severity High or Critical: auto-apply
/// 3. at least one other reviewer matched it this round: auto-apply
/// 4. a deferred entry from a previous round matches: auto-apply, and the
///    caller removes the promoted entry
/// 5. otherwise: defer
pub fn classify(finding: &Finding, same_round_matches: u32, registry_match: bool) -> Action {
    if finding.fix.is_none() {
        return Action::Escalate;
    }
    if finding.severity >= Severity::High {
        return Action::AutoApply(ApplyTrigger::Severity);
    }
    if same_round_matches >= 1 {
        return Action::AutoApply(ApplyTrigger::SameRoundConsensus);
    }
    if registry_match {
        return Action::AutoApply(ApplyTrigger::CrossRoundConsensus);
    }
    Action::Defer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Fix;

    fn finding_with_fix(severity: Severity) -> Finding {
        Finding::new("tester", severity, "doc#1", "needs work").with_fix(Fix::new("do it"))
    }

    #[test]
    fn test_missing_fix_escalates_over_everything() {
        let critical = Finding::new("tester", Severity::Critical, "doc#1", "needs judgement");
        assert_eq!(classify(&critical, 5, true), Action::Escalate);
        assert_eq!(classify(&critical, 0, false), Action::Escalate);
    }

    #[test]
    fn test_high_severity_auto_applies() {
        let high = finding_with_fix(Severity::High);
        let critical = finding_with_fix(Severity::Critical);
        assert_eq!(
            classify(&high, 0, false),
            Action::AutoApply(ApplyTrigger::Severity)
        );
        assert_eq!(
            classify(&critical, 0, false),
            Action::AutoApply(ApplyTrigger::Severity)
        );
    }

    #[test]
    fn test_severity_trigger_wins_over_consensus() {
        let high = finding_with_fix(Severity::High);
        assert_eq!(
            classify(&high, 3, true),
            Action::AutoApply(ApplyTrigger::Severity)
        );
    }

    #[test]
    fn test_same_round_consensus_auto_applies() {
        let medium = finding_with_fix(Severity::Medium);
        assert_eq!(
            classify(&medium, 1, false),
            Action::AutoApply(ApplyTrigger::SameRoundConsensus)
        );
        // Same-round agreement outranks a registry hit.
        assert_eq!(
            classify(&medium, 2, true),
            Action::AutoApply(ApplyTrigger::SameRoundConsensus)
        );
    }

    #[test]
    fn test_registry_match_auto_applies() {
        let low = finding_with_fix(Severity::Low);
        assert_eq!(
            classify(&low, 0, true),
            Action::AutoApply(ApplyTrigger::CrossRoundConsensus)
        );
    }

    #[test]
    fn test_single_source_sub_threshold_defers() {
        for severity in [Severity::Low, Severity::Medium] {
            let finding = finding_with_fix(severity);
            assert_eq!(classify(&finding, 0, false), Action::Defer);
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        let medium = finding_with_fix(Severity::Medium);
        let first = classify(&medium, 1, true);
        let second = classify(&medium, 1, true);
        assert_eq!(first, second);
    }
}
