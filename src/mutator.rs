//! Mutator seam — serialized, atomic artifact mutation
//!
//! The mutator is the only component that ever changes the artifact, and
//! it runs with exclusive access during a single round's applying phase.
//! Reviewers hold shared references, so the borrow checker rules out a
//! review overlapping a mutation.

use async_trait::async_trait;

use crate::finding::Fix;

/// Error from an attempted fix application
#[derive(Debug, Clone, thiserror::Error)]
pub enum MutationError {
    /// The mutator declined the fix outright
    #[error("fix rejected: {reason}")]
    Rejected { reason: String },

    /// The mutator tried and could not complete the change
    #[error("fix failed: {reason}")]
    Failed { reason: String },
}

impl MutationError {
    /// The human-readable reason, whichever variant carried it
    pub fn reason(&self) -> &str {
        match self {
            MutationError::Rejected { reason } | MutationError::Failed { reason } => reason,
        }
    }
}

/// Applies approved fixes to the artifact
///
/// Each call must be atomic: on an error return the artifact is exactly as
/// it was before the call. A failed item is re-routed to escalation, so a
/// half-applied change would corrupt the artifact for every later round.
#[async_trait]
pub trait Mutator<A>: Send + Sync {
    /// Apply one fix to the artifact
    async fn apply(&self, artifact: &mut A, fix: &Fix) -> Result<(), MutationError>;
}
