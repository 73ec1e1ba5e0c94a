//! Escalation surface for findings the policy refused to auto-apply
//!
//! Items accumulate durably as rounds produce them and are presented to a
//! decision maker exactly once, at the end of the run, as a single batch.
//! Re-escalations of the same issue merge provenance under the similarity
//! key instead of duplicating the item, so the decision maker sees each
//! distinct issue once with its full history.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::finding::{Finding, FindingId};
use crate::mutator::Mutator;
use crate::similarity::SimilarityKey;
use crate::state::{
    DeferredEntry, EscalationReason, PendingEscalation, RunId, SharedRunStore, StoreError,
};

/// Error type for escalation operations
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for escalation operations
pub type EscalationResult<T> = Result<T, EscalationError>;

/// The choice a decision maker can make for one batch item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    /// Apply the item's proposed fix
    Apply,
    /// Leave the artifact untouched
    Skip,
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Choice::Apply => write!(f, "apply"),
            Choice::Skip => write!(f, "skip"),
        }
    }
}

/// One answer from the decision maker
///
/// Keyed by finding ID rather than batch position, so a partial or
/// reordered answer cannot misassign choices. Items without a matching
/// decision default to [`Choice::Skip`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// ID of the finding the choice applies to
    pub finding_id: FindingId,

    /// What to do with it
    pub choice: Choice,
}

impl Decision {
    /// Approve a finding's fix
    pub fn apply(finding_id: impl Into<FindingId>) -> Self {
        Self {
            finding_id: finding_id.into(),
            choice: Choice::Apply,
        }
    }

    /// Decline a finding's fix
    pub fn skip(finding_id: impl Into<FindingId>) -> Self {
        Self {
            finding_id: finding_id.into(),
            choice: Choice::Skip,
        }
    }
}

/// The complete set of unresolved items handed to the decision maker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationBatch {
    /// Run the batch belongs to
    pub run_id: RunId,

    /// Deduplicated items, in similarity-key order
    pub items: Vec<PendingEscalation>,
}

impl EscalationBatch {
    /// Number of items in the batch
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Mark every item unresolved (no decision maker was configured)
    pub fn unresolved(&self) -> Vec<ResolvedEscalation> {
        self.items
            .iter()
            .map(|item| ResolvedEscalation {
                item: item.clone(),
                resolution: EscalationResolution::Unresolved,
            })
            .collect()
    }
}

/// Answers the end-of-run escalation batch
///
/// Invoked at most once per run, never mid-round. Implementations range
/// from an interactive prompt to a policy that approves nothing.
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    /// Decide what to do with each batch item
    async fn decide(&self, batch: &EscalationBatch) -> Vec<Decision>;
}

/// What ultimately happened to one escalated item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationResolution {
    /// Approved and the fix went through
    Applied,
    /// Approved but the mutator rejected or failed the fix
    ApplyFailed { reason: String },
    /// Approved but there was no fix to apply
    SkippedNoFix,
    /// Declined by the decision maker (or unanswered)
    Skipped,
    /// Never presented: the run had no decision maker
    Unresolved,
}

impl std::fmt::Display for EscalationResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationResolution::Applied => write!(f, "applied"),
            EscalationResolution::ApplyFailed { reason } => {
                write!(f, "apply_failed: {}", reason)
            }
            EscalationResolution::SkippedNoFix => write!(f, "skipped_no_fix"),
            EscalationResolution::Skipped => write!(f, "skipped"),
            EscalationResolution::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// One batch item together with its final resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEscalation {
    /// The escalated item, provenance included
    pub item: PendingEscalation,

    /// How it ended
    pub resolution: EscalationResolution,
}

/// Durable accumulator for a run's escalations
///
/// Rounds call [`record`](EscalationSurface::record) as the policy routes
/// findings here; the scheduler calls
/// [`assemble_batch`](EscalationSurface::assemble_batch) once, at
/// finalization, after folding in registry survivors and unverified items.
#[derive(Clone)]
pub struct EscalationSurface {
    store: SharedRunStore,
    run_id: RunId,
}

impl EscalationSurface {
    /// Create a surface for one run
    pub fn new(store: SharedRunStore, run_id: impl Into<RunId>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
        }
    }

    /// Queue a finding for the end-of-run decision
    ///
    /// A second escalation of the same issue merges into the stored item.
    pub fn record(&self, finding: &Finding, reason: EscalationReason) -> EscalationResult<()> {
        let key = SimilarityKey::of(finding);
        match self.store.get_escalation(&self.run_id, &key)? {
            Some(mut existing) => {
                existing.absorb(finding, reason);
                self.store.put_escalation(&self.run_id, &existing)?;
                debug!(
                    run_id = %self.run_id,
                    key = %key,
                    rounds = existing.rounds_seen.len(),
                    "Escalation merged into existing item"
                );
            }
            None => {
                let item = PendingEscalation::new(key.clone(), finding.clone(), reason);
                self.store.put_escalation(&self.run_id, &item)?;
                debug!(run_id = %self.run_id, key = %key, "Escalation queued");
            }
        }
        Ok(())
    }

    /// Items queued so far, in similarity-key order
    pub fn pending(&self) -> EscalationResult<Vec<PendingEscalation>> {
        Ok(self.store.list_escalations(&self.run_id)?)
    }

    /// Assemble the single end-of-run batch
    ///
    /// Registry survivors enter as `NeverPromoted` and final-round applied
    /// items whose fix no later round checked enter as `Unverified`; both
    /// merge with any pending item that shares their similarity key.
    pub fn assemble_batch(
        &self,
        survivors: Vec<DeferredEntry>,
        unverified: Vec<Finding>,
    ) -> EscalationResult<EscalationBatch> {
        for survivor in survivors {
            self.record(&survivor.finding, EscalationReason::NeverPromoted)?;
        }
        for finding in unverified {
            let reason = EscalationReason::Unverified {
                round: finding.round,
            };
            self.record(&finding, reason)?;
        }

        let items = self.pending()?;
        info!(
            run_id = %self.run_id,
            items = items.len(),
            "Escalation batch assembled"
        );
        Ok(EscalationBatch {
            run_id: self.run_id.clone(),
            items,
        })
    }

    /// Resolve a decided batch against the artifact
    ///
    /// Approved items with a fix go through the mutator; failures are
    /// recorded per item and never abort the rest of the batch.
    pub async fn resolve<A: Send + Sync>(
        &self,
        batch: &EscalationBatch,
        decisions: &[Decision],
        mutator: &dyn Mutator<A>,
        artifact: &mut A,
    ) -> Vec<ResolvedEscalation> {
        let mut resolved = Vec::with_capacity(batch.items.len());

        for item in &batch.items {
            let choice = decisions
                .iter()
                .find(|d| d.finding_id == item.finding.id)
                .map(|d| d.choice)
                .unwrap_or(Choice::Skip);

            let resolution = match choice {
                Choice::Skip => EscalationResolution::Skipped,
                Choice::Apply => match &item.finding.fix {
                    None => EscalationResolution::SkippedNoFix,
                    Some(fix) => match mutator.apply(artifact, fix).await {
                        Ok(()) => {
                            info!(
                                run_id = %self.run_id,
                                finding_id = %item.finding.id,
                                "Escalated fix applied"
                            );
                            EscalationResolution::Applied
                        }
                        Err(e) => {
                            warn!(
                                run_id = %self.run_id,
                                finding_id = %item.finding.id,
                                "Escalated fix failed: {}",
                                e
                            );
                            EscalationResolution::ApplyFailed {
                                reason: e.reason().to_string(),
                            }
                        }
                    },
                },
            };

            resolved.push(ResolvedEscalation {
                item: item.clone(),
                resolution,
            });
        }

        resolved
    }
}
