//! Run state machine — phases, transitions, and the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a convergence run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    /// Run created but no round started.
    Idle,
    /// Reviewers are being fanned out over the artifact.
    Dispatching,
    /// Findings are being merged and classified.
    Synthesizing,
    /// Approved fixes are being applied to the artifact.
    Applying,
    /// The round outcome is being checked against the convergence rules.
    Evaluating,
    /// Escalation batch assembly and the end-of-run decision.
    Finalizing,
    /// The review stabilized — run succeeded.
    Converged,
    /// Round ceiling hit with blocking findings still open.
    ForcedHalt,
}

impl RunPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::ForcedHalt)
    }

    /// Whether this phase allows transition to a new phase.
    pub fn can_transition(self) -> bool {
        !self.is_terminal()
    }

    /// Valid transitions from this phase.
    ///
    /// Idle → Finalizing covers a resumed run whose rounds are already
    /// exhausted in the log; nothing is left to do but close it out.
    pub fn valid_transitions(self) -> &'static [RunPhase] {
        match self {
            Self::Idle => &[Self::Dispatching, Self::Finalizing],
            Self::Dispatching => &[Self::Synthesizing],
            Self::Synthesizing => &[Self::Applying],
            Self::Applying => &[Self::Evaluating],
            Self::Evaluating => &[Self::Dispatching, Self::Finalizing],
            Self::Finalizing => &[Self::Converged, Self::ForcedHalt],
            Self::Converged | Self::ForcedHalt => &[],
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Synthesizing => write!(f, "synthesizing"),
            Self::Applying => write!(f, "applying"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Converged => write!(f, "converged"),
            Self::ForcedHalt => write!(f, "forced_halt"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    /// Previous phase.
    pub from: RunPhase,
    /// New phase.
    pub to: RunPhase,
    /// When the transition occurred.
    pub at: DateTime<Utc>,
    /// Reason for the transition.
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: RunPhase,
    pub to: RunPhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

/// In-memory phase machine with a full audit trail.
///
/// The durable round position lives in the run record; the tracker exists
/// so an out-of-order step inside the scheduler fails loudly instead of
/// silently corrupting a round.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    phase: RunPhase,
    transitions: Vec<PhaseTransition>,
}

impl PhaseTracker {
    /// Create a tracker in the idle phase.
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            transitions: Vec::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Every transition taken so far, in order.
    pub fn history(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: RunPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }

        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    /// Whether the run can no longer advance.
    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}
