//! Round scheduler — drives dispatch → synthesis → apply → evaluate cycles.
//!
//! Ties together the reviewer pool, the synthesizer, the mutator, and the
//! escalation surface to run a complete convergence cycle end-to-end. The
//! scheduler owns the only mutable borrow of the artifact: reviewers see
//! `&A` during dispatch and the mutator sees `&mut A` during applying, so
//! the two can never overlap.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::phase::{PhaseTracker, RunPhase, TransitionError};
use crate::escalation::{DecisionMaker, EscalationError, EscalationSurface};
use crate::evaluator::{self, Verdict};
use crate::events::{RunEvent, SharedEventBus};
use crate::finding::{Finding, Severity};
use crate::mutator::Mutator;
use crate::policy::ApplyTrigger;
use crate::registry::ConsensusRegistry;
use crate::report::RunReport;
use crate::reviewer::{ReviewerFailure, ReviewerFailureRecord, ReviewerPool};
use crate::state::{
    EscalationReason, RoundOutcome, RunId, RunRecord, RunStatus, SharedRunStore, StoreError,
};
use crate::synthesis::{ApplyItem, FindingSynthesizer, SynthesisError};

/// Configuration for a convergence run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hard ceiling on review rounds
    pub max_rounds: u32,

    /// Per-reviewer deadline per round, in seconds
    pub reviewer_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            reviewer_timeout_secs: 60,
        }
    }
}

impl RunConfig {
    /// Load configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> RunResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunError::InvalidConfig(format!("read {}: {}", path.display(), e))
        })?;
        let config: RunConfig =
            serde_json::from_str(&content).map_err(|e| RunError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// Per-reviewer timeout as a [`Duration`]
    pub fn reviewer_timeout(&self) -> Duration {
        Duration::from_secs(self.reviewer_timeout_secs)
    }
}

/// Error type for run scheduling
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Escalation error: {0}")]
    Escalation(#[from] EscalationError),

    #[error("Phase error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Run {run_id} already complete: {status}")]
    AlreadyComplete { run_id: RunId, status: RunStatus },
}

/// Result type for run scheduling
pub type RunResult<T> = Result<T, RunError>;

/// Drives a run's rounds to a terminal status
///
/// Usage:
/// 1. Create with `new()` (fresh run) or `resume()` (persisted run)
/// 2. Optionally wire `with_decision_maker` and `with_event_bus`
/// 3. Call `run()` with exclusive access to the artifact
///
/// `run()` always drives to a terminal status and always returns a complete
/// report: reviewer failures and rejected fixes degrade the round, never
/// abort the run.
pub struct RoundScheduler<A: Send + Sync> {
    store: SharedRunStore,
    pool: ReviewerPool<A>,
    mutator: Arc<dyn Mutator<A>>,
    config: RunConfig,
    record: RunRecord,
    registry: ConsensusRegistry,
    synthesizer: FindingSynthesizer,
    escalation: EscalationSurface,
    tracker: PhaseTracker,
    decision_maker: Option<Arc<dyn DecisionMaker>>,
    event_bus: Option<SharedEventBus>,
    reviewer_failures: Vec<ReviewerFailureRecord>,
    resumed: bool,
}

impl<A: Send + Sync> RoundScheduler<A> {
    /// Create a scheduler for a fresh run and persist its record
    pub fn new(
        store: SharedRunStore,
        pool: ReviewerPool<A>,
        mutator: Arc<dyn Mutator<A>>,
        config: RunConfig,
    ) -> RunResult<Self> {
        if config.max_rounds == 0 {
            return Err(RunError::InvalidConfig(
                "max_rounds must be at least 1".to_string(),
            ));
        }

        let record = RunRecord::new(config.max_rounds);
        store.put_run(&record)?;

        info!(
            run_id = %record.id,
            max_rounds = config.max_rounds,
            reviewers = pool.len(),
            "Run created"
        );

        Ok(Self::assemble(store, pool, mutator, config, record, false))
    }

    /// Rebuild a scheduler for an interrupted run
    ///
    /// The run restarts at the next round boundary with the deferral
    /// registry and pending escalations exactly as persisted. Per-reviewer
    /// failure detail from rounds before the interruption is not
    /// reconstructed; the per-round counters in the run log still carry
    /// those totals.
    pub fn resume(
        store: SharedRunStore,
        run_id: &str,
        pool: ReviewerPool<A>,
        mutator: Arc<dyn Mutator<A>>,
    ) -> RunResult<Self> {
        let record = store
            .get_run(run_id)?
            .ok_or_else(|| RunError::RunNotFound(run_id.to_string()))?;

        if record.status.is_terminal() {
            return Err(RunError::AlreadyComplete {
                run_id: record.id,
                status: record.status,
            });
        }

        let config = RunConfig {
            max_rounds: record.max_rounds,
            ..RunConfig::default()
        };

        info!(
            run_id = %record.id,
            next_round = record.current_round + 1,
            "Run resumed from persisted state"
        );

        Ok(Self::assemble(store, pool, mutator, config, record, true))
    }

    fn assemble(
        store: SharedRunStore,
        mut pool: ReviewerPool<A>,
        mutator: Arc<dyn Mutator<A>>,
        config: RunConfig,
        record: RunRecord,
        resumed: bool,
    ) -> Self {
        pool.set_timeout(config.reviewer_timeout());
        let registry = ConsensusRegistry::new(store.clone(), record.id.clone());
        let synthesizer = FindingSynthesizer::new(registry.clone());
        let escalation = EscalationSurface::new(store.clone(), record.id.clone());

        Self {
            store,
            pool,
            mutator,
            config,
            record,
            registry,
            synthesizer,
            escalation,
            tracker: PhaseTracker::new(),
            decision_maker: None,
            event_bus: None,
            reviewer_failures: Vec::new(),
            resumed,
        }
    }

    /// Wire a decision maker for the end-of-run escalation batch
    pub fn with_decision_maker(mut self, decision_maker: Arc<dyn DecisionMaker>) -> Self {
        self.decision_maker = Some(decision_maker);
        self
    }

    /// Wire an event bus for run observability
    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// This run's identifier
    pub fn run_id(&self) -> &str {
        &self.record.id
    }

    /// Current phase of the run
    pub fn phase(&self) -> RunPhase {
        self.tracker.phase()
    }

    /// Drive the run to a terminal status
    pub async fn run(&mut self, artifact: &mut A) -> RunResult<RunReport> {
        if self.record.status.is_terminal() {
            return Err(RunError::AlreadyComplete {
                run_id: self.record.id.clone(),
                status: self.record.status,
            });
        }

        if self.resumed {
            self.publish(RunEvent::RunResumed {
                run_id: self.record.id.clone(),
                resumed_at_round: self.record.current_round + 1,
                timestamp: Utc::now(),
            });
        } else {
            self.publish(RunEvent::RunStarted {
                run_id: self.record.id.clone(),
                max_rounds: self.config.max_rounds,
                reviewers: self.pool.sources(),
                timestamp: Utc::now(),
            });
        }

        // High/Critical fixes applied in the most recent round. On a forced
        // halt no later round re-reviews them, so they join the batch.
        let mut unverified: Vec<Finding> = Vec::new();

        let status = loop {
            if self.record.current_round >= self.config.max_rounds {
                // Only reachable on resume: the final round's outcome was
                // persisted but the terminal status was not.
                break self.settle_from_log()?;
            }

            let round = self.record.current_round + 1;
            unverified.clear();

            let verdict = self.execute_round(artifact, round, &mut unverified).await?;
            match verdict {
                Verdict::Continue => {}
                Verdict::Converged => break RunStatus::Converged,
                Verdict::ForcedHalt => break RunStatus::ForcedHalt,
            }
        };

        if status != RunStatus::ForcedHalt {
            unverified.clear();
        }

        self.finalize(artifact, status, unverified).await
    }

    /// Run one complete round and evaluate it
    async fn execute_round(
        &mut self,
        artifact: &mut A,
        round: u32,
        unverified: &mut Vec<Finding>,
    ) -> RunResult<Verdict> {
        self.tracker.transition(RunPhase::Dispatching, "round start")?;
        self.publish(RunEvent::RoundStarted {
            run_id: self.record.id.clone(),
            round,
            timestamp: Utc::now(),
        });
        debug!(run_id = %self.record.id, round, reviewers = self.pool.len(), "Dispatching reviewers");

        let returns = self.pool.dispatch(artifact, round).await;

        let mut findings = Vec::new();
        let mut failures_this_round = 0u32;
        for ret in returns {
            match &ret.failure {
                None => {
                    self.publish(RunEvent::ReviewerReturned {
                        run_id: self.record.id.clone(),
                        round,
                        source: ret.source.clone(),
                        finding_count: ret.findings.len() as u32,
                        timestamp: Utc::now(),
                    });
                }
                Some(failure) => {
                    failures_this_round += 1;
                    self.reviewer_failures.push(ReviewerFailureRecord {
                        round,
                        source: ret.source.clone(),
                        failure: failure.clone(),
                    });
                    match failure {
                        ReviewerFailure::TimedOut { timeout_secs } => {
                            self.publish(RunEvent::ReviewerTimedOut {
                                run_id: self.record.id.clone(),
                                round,
                                source: ret.source.clone(),
                                timeout_secs: *timeout_secs,
                                timestamp: Utc::now(),
                            });
                        }
                        ReviewerFailure::Failed { message } => {
                            self.publish(RunEvent::ReviewerFailed {
                                run_id: self.record.id.clone(),
                                round,
                                source: ret.source.clone(),
                                error: message.clone(),
                                timestamp: Utc::now(),
                            });
                        }
                    }
                }
            }
            findings.extend(ret.findings);
        }

        self.tracker
            .transition(RunPhase::Synthesizing, "reviewers joined")?;
        let synthesis = self.synthesizer.synthesize(findings, round)?;

        self.publish(RunEvent::FindingsSynthesized {
            run_id: self.record.id.clone(),
            round,
            raised: (synthesis.to_apply.len() + synthesis.to_defer.len()
                + synthesis.to_escalate.len()) as u32,
            to_apply: synthesis.to_apply.len() as u32,
            deferred: synthesis.to_defer.len() as u32,
            escalated: synthesis.to_escalate.len() as u32,
            dropped: synthesis.dropped,
            timestamp: Utc::now(),
        });
        for merged in &synthesis.to_defer {
            self.publish(RunEvent::EntryDeferred {
                run_id: self.record.id.clone(),
                round,
                key: merged.key.clone(),
                timestamp: Utc::now(),
            });
        }
        for item in &synthesis.to_apply {
            if let Some(entry) = &item.promoted {
                self.publish(RunEvent::EntryPromoted {
                    run_id: self.record.id.clone(),
                    round,
                    key: entry.key.clone(),
                    deferred_in_round: entry.deferred_in_round,
                    timestamp: Utc::now(),
                });
            }
        }

        let mut outcome = RoundOutcome::new(round);
        outcome.dropped = synthesis.dropped;
        outcome.reviewer_failures = failures_this_round;
        outcome.deferred = synthesis.to_defer.len() as u32;
        outcome.escalated = synthesis.to_escalate.len() as u32;
        for merged in synthesis
            .to_apply
            .iter()
            .map(|item| &item.merged)
            .chain(synthesis.to_defer.iter())
            .chain(synthesis.to_escalate.iter())
        {
            outcome.raised.record(merged.finding.severity);
        }

        self.tracker.transition(RunPhase::Applying, "policy routed")?;

        for merged in &synthesis.to_escalate {
            self.escalation
                .record(&merged.finding, EscalationReason::MissingFix)?;
        }

        for item in synthesis.to_apply {
            self.apply_item(artifact, item, &mut outcome, unverified)
                .await?;
        }

        self.tracker.transition(RunPhase::Evaluating, "fixes applied")?;

        outcome.completed_at = Utc::now();
        self.store.put_outcome(&self.record.id, &outcome)?;
        self.record.complete_round(round);
        self.store.put_run(&self.record)?;

        let verdict = evaluator::evaluate(&outcome, self.config.max_rounds);
        self.publish(RunEvent::RoundEvaluated {
            run_id: self.record.id.clone(),
            round,
            verdict,
            timestamp: Utc::now(),
        });
        info!(
            run_id = %self.record.id,
            round,
            raised = outcome.total_raised(),
            applied = outcome.applied_total(),
            deferred = outcome.deferred,
            escalated = outcome.escalated,
            failures = outcome.reviewer_failures,
            verdict = %verdict,
            "Round complete"
        );

        Ok(verdict)
    }

    /// Apply one approved item, downgrading it to escalation on failure
    async fn apply_item(
        &self,
        artifact: &mut A,
        item: ApplyItem,
        outcome: &mut RoundOutcome,
        unverified: &mut Vec<Finding>,
    ) -> RunResult<()> {
        let round = outcome.round;
        let merged = item.merged;

        let Some(fix) = merged.finding.fix.clone() else {
            // The policy only approves fix-bearing findings, so this is a
            // classification defect upstream; route it like a missing fix.
            warn!(
                run_id = %self.record.id,
                finding_id = %merged.finding.id,
                "Approved item has no fix, escalating"
            );
            self.escalation
                .record(&merged.finding, EscalationReason::MissingFix)?;
            outcome.escalated += 1;
            return Ok(());
        };

        match self.mutator.apply(artifact, &fix).await {
            Ok(()) => {
                match item.trigger {
                    ApplyTrigger::Severity => outcome.applied_by_severity += 1,
                    ApplyTrigger::SameRoundConsensus => outcome.applied_same_round += 1,
                    ApplyTrigger::CrossRoundConsensus => outcome.applied_cross_round += 1,
                }
                self.publish(RunEvent::FixApplied {
                    run_id: self.record.id.clone(),
                    round,
                    finding_id: merged.finding.id.clone(),
                    trigger: item.trigger,
                    timestamp: Utc::now(),
                });
                debug!(
                    run_id = %self.record.id,
                    round,
                    finding_id = %merged.finding.id,
                    trigger = %item.trigger,
                    "Fix applied"
                );
                if merged.finding.severity >= Severity::High {
                    unverified.push(merged.finding);
                }
            }
            Err(e) => {
                outcome.apply_failures += 1;
                warn!(
                    run_id = %self.record.id,
                    round,
                    finding_id = %merged.finding.id,
                    "Fix rejected, rerouting to escalation: {}",
                    e
                );
                self.publish(RunEvent::FixRejected {
                    run_id: self.record.id.clone(),
                    round,
                    finding_id: merged.finding.id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });

                let reason = EscalationReason::MutationFailed {
                    reason: e.reason().to_string(),
                };
                self.escalation.record(&merged.finding, reason.clone())?;
                if let Some(entry) = &item.promoted {
                    // The entry left the registry with the promotion; its
                    // provenance follows the finding into the batch.
                    self.escalation.record(&entry.finding, reason)?;
                }
            }
        }

        Ok(())
    }

    /// Terminal status for a resumed run with no rounds left
    fn settle_from_log(&self) -> RunResult<RunStatus> {
        let outcomes = self.store.list_outcomes(&self.record.id)?;
        match outcomes.last() {
            Some(last) => match evaluator::evaluate(last, self.config.max_rounds) {
                Verdict::Converged => Ok(RunStatus::Converged),
                Verdict::Continue | Verdict::ForcedHalt => Ok(RunStatus::ForcedHalt),
            },
            None => {
                warn!(
                    run_id = %self.record.id,
                    "Resumed run has no logged rounds but no rounds remaining"
                );
                Ok(RunStatus::ForcedHalt)
            }
        }
    }

    /// Assemble and resolve the escalation batch, then close out the run
    async fn finalize(
        &mut self,
        artifact: &mut A,
        status: RunStatus,
        unverified: Vec<Finding>,
    ) -> RunResult<RunReport> {
        self.tracker
            .transition(RunPhase::Finalizing, "terminal verdict")?;

        let survivors = self.registry.survivors()?;
        let batch = self.escalation.assemble_batch(survivors, unverified)?;
        self.publish(RunEvent::EscalationPresented {
            run_id: self.record.id.clone(),
            item_count: batch.len() as u32,
            timestamp: Utc::now(),
        });

        let resolutions = if batch.is_empty() {
            Vec::new()
        } else if let Some(decision_maker) = &self.decision_maker {
            let decisions = decision_maker.decide(&batch).await;
            self.escalation
                .resolve(&batch, &decisions, self.mutator.as_ref(), artifact)
                .await
        } else {
            debug!(
                run_id = %self.record.id,
                items = batch.len(),
                "No decision maker wired, batch left unresolved"
            );
            batch.unresolved()
        };

        let (terminal_phase, reason) = if status == RunStatus::Converged {
            (RunPhase::Converged, "review stabilized")
        } else {
            (RunPhase::ForcedHalt, "round ceiling hit")
        };
        self.tracker.transition(terminal_phase, reason)?;

        self.record.finish(status);
        self.store.put_run(&self.record)?;

        self.publish(RunEvent::RunCompleted {
            run_id: self.record.id.clone(),
            status,
            rounds_completed: self.record.current_round,
            timestamp: Utc::now(),
        });

        let rounds = self.store.list_outcomes(&self.record.id)?;
        let report = RunReport::new(
            self.record.id.clone(),
            status,
            rounds,
            self.reviewer_failures.clone(),
            resolutions,
        );

        info!(run_id = %self.record.id, "{}", report.summary_line());
        Ok(report)
    }

    fn publish(&self, event: RunEvent) {
        if let Some(bus) = &self.event_bus {
            if let Err(e) = bus.publish(event) {
                warn!(run_id = %self.record.id, "Event publish failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Fix;
    use crate::mutator::MutationError;
    use crate::reviewer::{ReviewError, Reviewer};
    use crate::state::RunStore;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct SilentReviewer;

    #[async_trait]
    impl Reviewer<String> for SilentReviewer {
        async fn review(&self, _artifact: &String) -> Result<Vec<Finding>, ReviewError> {
            Ok(vec![])
        }
    }

    struct AppendMutator;

    #[async_trait]
    impl Mutator<String> for AppendMutator {
        async fn apply(&self, artifact: &mut String, fix: &Fix) -> Result<(), MutationError> {
            artifact.push_str(&fix.summary);
            Ok(())
        }
    }

    fn silent_pool() -> ReviewerPool<String> {
        let mut pool = ReviewerPool::new(Duration::from_secs(5));
        pool.register("silent", Arc::new(SilentReviewer));
        pool
    }

    fn test_store() -> (SharedRunStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = RunStore::open(dir.path().join("run.db")).unwrap().shared();
        (store, dir)
    }

    #[test]
    fn test_zero_max_rounds_rejected() {
        let (store, _dir) = test_store();
        let config = RunConfig {
            max_rounds: 0,
            ..RunConfig::default()
        };

        let result = RoundScheduler::new(store, silent_pool(), Arc::new(AppendMutator), config);
        assert!(matches!(result, Err(RunError::InvalidConfig(_))));
    }

    #[test]
    fn test_resume_missing_run() {
        let (store, _dir) = test_store();
        let result =
            RoundScheduler::resume(store, "no-such-run", silent_pool(), Arc::new(AppendMutator));
        assert!(matches!(result, Err(RunError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_resume_completed_run_rejected() {
        let (store, _dir) = test_store();

        let mut scheduler = RoundScheduler::new(
            store.clone(),
            silent_pool(),
            Arc::new(AppendMutator),
            RunConfig::default(),
        )
        .unwrap();
        let run_id = scheduler.run_id().to_string();

        let mut artifact = String::from("draft");
        scheduler.run(&mut artifact).await.unwrap();

        let result =
            RoundScheduler::resume(store, &run_id, silent_pool(), Arc::new(AppendMutator));
        assert!(matches!(result, Err(RunError::AlreadyComplete { .. })));
    }

    #[tokio::test]
    async fn test_clean_run_converges_in_one_round() {
        let (store, _dir) = test_store();

        let mut scheduler = RoundScheduler::new(
            store.clone(),
            silent_pool(),
            Arc::new(AppendMutator),
            RunConfig::default(),
        )
        .unwrap();

        let mut artifact = String::from("draft");
        let report = scheduler.run(&mut artifact).await.unwrap();

        assert_eq!(report.status, RunStatus::Converged);
        assert_eq!(report.totals.rounds_completed, 1);
        assert_eq!(report.totals.raised.total(), 0);
        assert!(report.escalations.is_empty());
        assert_eq!(scheduler.phase(), RunPhase::Converged);
        assert_eq!(artifact, "draft");

        let record = store.get_run(report.run_id.as_str()).unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Converged);
    }

    #[tokio::test]
    async fn test_run_twice_rejected() {
        let (store, _dir) = test_store();

        let mut scheduler = RoundScheduler::new(
            store,
            silent_pool(),
            Arc::new(AppendMutator),
            RunConfig::default(),
        )
        .unwrap();

        let mut artifact = String::from("draft");
        scheduler.run(&mut artifact).await.unwrap();

        let result = scheduler.run(&mut artifact).await;
        assert!(matches!(result, Err(RunError::AlreadyComplete { .. })));
    }

    #[test]
    fn test_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.max_rounds, 3);
        assert_eq!(config.reviewer_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_load_with_partial_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"max_rounds": 5}"#).unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.reviewer_timeout_secs, 60);

        assert!(matches!(
            RunConfig::load(dir.path().join("missing.json")),
            Err(RunError::InvalidConfig(_))
        ));
    }
}
