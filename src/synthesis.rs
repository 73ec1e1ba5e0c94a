//! Finding synthesis — within-round dedup, consensus counting, classification
//!
//! Consumes the complete set of findings from one round's fan-out (never a
//! partial stream: consensus counting needs every reviewer's return),
//! matches them against each other and against the consensus registry, and
//! partitions them into apply/defer/escalate work. This is the registry's
//! single writer, and it writes strictly between the join barrier and the
//! applying phase.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::finding::Finding;
use crate::policy::{self, Action, ApplyTrigger};
use crate::registry::ConsensusRegistry;
use crate::similarity::SimilarityKey;
use crate::state::{DeferredEntry, StoreError};

/// Error type for synthesis operations
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("Registry store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for synthesis operations
pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// A representative finding plus its same-round consensus evidence
#[derive(Debug, Clone)]
pub struct MergedFinding {
    /// Representative member of the matching group
    pub finding: Finding,

    /// Matching key shared by the group
    pub key: SimilarityKey,

    /// Number of other reviewers that raised a matching finding this round
    pub same_round_matches: u32,

    /// Every reviewer that contributed, in first-seen order
    pub sources: Vec<String>,
}

/// An approved auto-apply work item
#[derive(Debug, Clone)]
pub struct ApplyItem {
    /// The merged finding to apply
    pub merged: MergedFinding,

    /// Which rule approved it
    pub trigger: ApplyTrigger,

    /// Registry entry promoted together with this finding, if any
    pub promoted: Option<DeferredEntry>,
}

/// Partitioned output of one round's synthesis
#[derive(Debug, Clone, Default)]
pub struct SynthesisOutcome {
    /// Findings approved for mechanical application
    pub to_apply: Vec<ApplyItem>,

    /// Findings parked in the registry this round
    pub to_defer: Vec<MergedFinding>,

    /// Findings queued for the end-of-run decision
    pub to_escalate: Vec<MergedFinding>,

    /// Malformed findings dropped before classification
    pub dropped: u32,
}

/// Deduplicates a round's findings and classifies the representatives
pub struct FindingSynthesizer {
    registry: ConsensusRegistry,
}

impl FindingSynthesizer {
    /// Create a synthesizer writing to the given registry
    pub fn new(registry: ConsensusRegistry) -> Self {
        Self { registry }
    }

    /// Synthesize one round's findings
    ///
    /// Malformed findings are dropped with a warning and never reach
    /// classification; a single bad input cannot abort the round. Registry
    /// reads and writes are the only fallible operations.
    pub fn synthesize(
        &self,
        findings: Vec<Finding>,
        round: u32,
    ) -> SynthesisResult<SynthesisOutcome> {
        let total = findings.len();
        let mut outcome = SynthesisOutcome::default();

        let mut valid = Vec::with_capacity(total);
        for finding in findings {
            match finding.validate() {
                Ok(()) => valid.push(finding),
                Err(defect) => {
                    warn!(
                        round,
                        source = %finding.source,
                        error = %defect,
                        "dropping malformed finding"
                    );
                    outcome.dropped += 1;
                }
            }
        }

        // Group by similarity key, preserving first-seen order so the
        // partition order is deterministic for a given fan-out order.
        let mut order: Vec<SimilarityKey> = Vec::new();
        let mut groups: HashMap<SimilarityKey, Vec<Finding>> = HashMap::new();
        for finding in valid {
            let key = SimilarityKey::of(&finding);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(finding);
        }

        for key in order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            let merged = fold_group(key, group);

            let registry_hit = self.registry.lookup(&merged.key)?;
            let action = policy::classify(
                &merged.finding,
                merged.same_round_matches,
                registry_hit.is_some(),
            );
            debug!(
                round,
                key = %merged.key,
                severity = %merged.finding.severity,
                same_round_matches = merged.same_round_matches,
                registry_match = registry_hit.is_some(),
                action = ?action,
                "classified finding"
            );

            match action {
                Action::AutoApply(trigger) => {
                    // A matched entry is promoted whatever the trigger was:
                    // the new finding and the stored one apply as a unit.
                    let promoted = if registry_hit.is_some() {
                        self.registry.promote(&merged.key)?
                    } else {
                        None
                    };
                    outcome.to_apply.push(ApplyItem {
                        merged,
                        trigger,
                        promoted,
                    });
                }
                Action::Defer => {
                    self.registry.defer(DeferredEntry::new(
                        merged.key.clone(),
                        merged.finding.clone(),
                        round,
                    ))?;
                    outcome.to_defer.push(merged);
                }
                Action::Escalate => {
                    // A matching registry entry stays put here; it merges
                    // with this item in the end-of-run batch.
                    outcome.to_escalate.push(merged);
                }
            }
        }

        info!(
            round,
            raw = total,
            merged = outcome.to_apply.len() + outcome.to_defer.len() + outcome.to_escalate.len(),
            to_apply = outcome.to_apply.len(),
            to_defer = outcome.to_defer.len(),
            to_escalate = outcome.to_escalate.len(),
            dropped = outcome.dropped,
            "synthesized round findings"
        );
        Ok(outcome)
    }
}

/// Fold a matching group into its representative
///
/// The representative must not understate the group: highest severity
/// wins, then fix presence, then summary/fix detail, then first-seen.
/// Same-round matches count distinct reviewers beyond the first, since a
/// reviewer repeating itself is not independent agreement.
fn fold_group(key: SimilarityKey, mut group: Vec<Finding>) -> MergedFinding {
    let mut sources: Vec<String> = Vec::new();
    for finding in &group {
        if !sources.contains(&finding.source) {
            sources.push(finding.source.clone());
        }
    }
    let same_round_matches = (sources.len() as u32).saturating_sub(1);

    let mut best = 0usize;
    for (idx, candidate) in group.iter().enumerate().skip(1) {
        if detail_rank(candidate) > detail_rank(&group[best]) {
            best = idx;
        }
    }
    let finding = group.swap_remove(best);

    MergedFinding {
        finding,
        key,
        same_round_matches,
        sources,
    }
}

fn detail_rank(finding: &Finding) -> (crate::finding::Severity, bool, usize, usize) {
    let fix_detail = finding.fix.as_ref().map(|f| f.summary.len()).unwrap_or(0);
    (
        finding.severity,
        finding.fix.is_some(),
        finding.summary.len(),
        fix_detail,
    )
}
