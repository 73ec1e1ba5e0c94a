//! Convergence decision for a completed round
//!
//! Pure rules over the round's outcome record. The asymmetry is the point:
//! High/Critical findings force another round because the fix just applied
//! is unverified until a later pass finds nothing serious, while Low/Medium
//! findings never keep the run alive chasing cosmetic churn.

use serde::{Deserialize, Serialize};

use crate::state::RoundOutcome;

/// Round-level verdict from the convergence rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Run another round
    Continue,
    /// The review stabilized; finish cleanly
    Converged,
    /// The round ceiling was hit with blocking findings still unverified
    ForcedHalt,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Continue => write!(f, "continue"),
            Verdict::Converged => write!(f, "converged"),
            Verdict::ForcedHalt => write!(f, "forced_halt"),
        }
    }
}

/// Decide whether the run continues after a completed round
///
/// Evaluated once per round, in order:
/// - zero findings raised: converged, nothing left to find
/// - any High or Critical raised: another round is mandatory, unless the
///   round ceiling is strictly reached, which forces the halt
/// - only Low/Medium raised: converged
pub fn evaluate(outcome: &RoundOutcome, max_rounds: u32) -> Verdict {
    if outcome.total_raised() == 0 {
        return Verdict::Converged;
    }
    if outcome.raised.high_or_critical() > 0 {
        if outcome.round >= max_rounds {
            return Verdict::ForcedHalt;
        }
        return Verdict::Continue;
    }
    Verdict::Converged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;

    fn outcome_with(round: u32, severities: &[Severity]) -> RoundOutcome {
        let mut outcome = RoundOutcome::new(round);
        for severity in severities {
            outcome.raised.record(*severity);
        }
        outcome
    }

    #[test]
    fn test_clean_round_converges() {
        let outcome = outcome_with(1, &[]);
        assert_eq!(evaluate(&outcome, 3), Verdict::Converged);
    }

    #[test]
    fn test_clean_final_round_still_converges() {
        let outcome = outcome_with(3, &[]);
        assert_eq!(evaluate(&outcome, 3), Verdict::Converged);
    }

    #[test]
    fn test_high_severity_forces_continuation() {
        for round in 1..3 {
            let outcome = outcome_with(round, &[Severity::High]);
            assert_eq!(evaluate(&outcome, 3), Verdict::Continue);
        }
    }

    #[test]
    fn test_critical_at_ceiling_forces_halt() {
        let outcome = outcome_with(3, &[Severity::Critical, Severity::Low]);
        assert_eq!(evaluate(&outcome, 3), Verdict::ForcedHalt);
    }

    #[test]
    fn test_cosmetic_round_converges() {
        let outcome = outcome_with(1, &[Severity::Low, Severity::Medium, Severity::Medium]);
        assert_eq!(evaluate(&outcome, 3), Verdict::Converged);
    }

    #[test]
    fn test_high_wins_over_cosmetic_mix() {
        let outcome = outcome_with(2, &[Severity::Low, Severity::High]);
        assert_eq!(evaluate(&outcome, 5), Verdict::Continue);
    }
}
