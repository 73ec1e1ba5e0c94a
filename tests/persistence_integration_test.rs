//! Integration tests for durable run state
//!
//! Validates that an interrupted run picks up from RocksDB with its
//! deferral registry, round log, and pending escalations intact, and that
//! the event journal survives a store reopen.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use convergence::{
    ConsensusRegistry, DeferredEntry, EscalationReason, EventBus, Finding, Fix, MutationError,
    Mutator, ReviewError, Reviewer, ReviewerPool, RoundOutcome, RoundScheduler, RunConfig,
    RunError, RunEvent, RunRecord, RunStatus, RunStore, Severity, SimilarityKey,
};
use tempfile::TempDir;

struct ScriptedReviewer {
    rounds: Mutex<VecDeque<Vec<Finding>>>,
}

impl ScriptedReviewer {
    fn new(rounds: Vec<Vec<Finding>>) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(rounds.into()),
        })
    }
}

#[async_trait]
impl Reviewer<String> for ScriptedReviewer {
    async fn review(&self, _artifact: &String) -> Result<Vec<Finding>, ReviewError> {
        Ok(self.rounds.lock().unwrap().pop_front().unwrap_or_default())
    }
}

struct AppendMutator;

#[async_trait]
impl Mutator<String> for AppendMutator {
    async fn apply(&self, artifact: &mut String, fix: &Fix) -> Result<(), MutationError> {
        artifact.push_str(&format!("[{}]", fix.summary));
        Ok(())
    }
}

fn pool_of(reviewers: Vec<(&str, Arc<ScriptedReviewer>)>) -> ReviewerPool<String> {
    let mut pool = ReviewerPool::new(Duration::from_secs(5));
    for (name, reviewer) in reviewers {
        pool.register(name, reviewer);
    }
    pool
}

fn finding_with_fix(severity: Severity, location: &str, summary: &str) -> Finding {
    Finding::new("scripted", severity, location, summary)
        .with_fix(Fix::new(format!("fix {}", location)))
}

/// Stage the durable leftovers of a run that died after completing round 1
///
/// Round 1 applied one High fix and deferred one Medium finding; the
/// process stopped before round 2 started.
fn stage_interrupted_run(dir: &TempDir) -> (String, Finding) {
    let store = RunStore::open(dir.path().join("run.db"))
        .expect("Failed to open store")
        .shared();

    let mut record = RunRecord::new(3);
    record.complete_round(1);
    store.put_run(&record).unwrap();

    let mut deferred = finding_with_fix(Severity::Medium, "src/fmt.rs:3", "inconsistent date format");
    deferred.round = 1;

    let mut outcome = RoundOutcome::new(1);
    outcome.raised.record(Severity::High);
    outcome.raised.record(Severity::Medium);
    outcome.applied_by_severity = 1;
    outcome.deferred = 1;
    store.put_outcome(&record.id, &outcome).unwrap();

    let entry = DeferredEntry::new(SimilarityKey::of(&deferred), deferred.clone(), 1);
    store.put_deferred(&record.id, &entry).unwrap();

    (record.id, deferred)
}

/// Test: A resumed run picks up at round 2 with the registry intact
#[tokio::test]
async fn test_resume_continues_with_registry_intact() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let dir = TempDir::new().expect("Failed to create temp dir");
    let (run_id, _) = stage_interrupted_run(&dir);

    // New process: reopen the store and resume. The reviewer raises an
    // equivalent of the parked finding, which must promote.
    let store = RunStore::open(dir.path().join("run.db"))
        .expect("Failed to reopen store")
        .shared();
    let pool = pool_of(vec![(
        "beta",
        ScriptedReviewer::new(vec![vec![finding_with_fix(
            Severity::Medium,
            "src/fmt.rs:3",
            "inconsistent date format",
        )]]),
    )]);

    let mut scheduler =
        RoundScheduler::resume(store.clone(), &run_id, pool, Arc::new(AppendMutator))
            .expect("Failed to resume");

    let mut artifact = String::new();
    let report = scheduler.run(&mut artifact).await.expect("Run failed");

    assert_eq!(report.status, RunStatus::Converged);
    assert_eq!(report.rounds.len(), 2, "Staged round 1 must appear in the report");
    assert_eq!(report.rounds[1].applied_cross_round, 1);

    // Totals fold the pre-interruption round in from the log.
    assert_eq!(report.totals.raised.total(), 3);
    assert_eq!(report.totals.applied, 2);
    assert_eq!(report.totals.deferred, 1);
    assert_eq!(artifact, "[fix src/fmt.rs:3]");
    assert!(report.escalations.is_empty());

    let registry = ConsensusRegistry::new(store.clone(), run_id.clone());
    assert!(registry.survivors().unwrap().is_empty());

    let record = store.get_run(&run_id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Converged);
    assert_eq!(record.current_round, 2);
}

/// Test: A never-matched survivor escalates after a resume
#[tokio::test]
async fn test_resume_survivor_escalates_at_end() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let (run_id, deferred) = stage_interrupted_run(&dir);

    // The parked finding never recurs after the resume; the run converges
    // and the survivor comes out in the batch with its provenance.
    let store = RunStore::open(dir.path().join("run.db"))
        .expect("Failed to reopen store")
        .shared();
    let pool = pool_of(vec![("beta", ScriptedReviewer::new(vec![]))]);

    let mut scheduler = RoundScheduler::resume(store, &run_id, pool, Arc::new(AppendMutator))
        .expect("Failed to resume");

    let mut artifact = String::new();
    let report = scheduler.run(&mut artifact).await.expect("Run failed");

    assert_eq!(report.status, RunStatus::Converged);
    assert_eq!(report.escalations.len(), 1);
    let item = &report.escalations.items[0].item;
    assert_eq!(item.reason, EscalationReason::NeverPromoted);
    assert_eq!(item.key, SimilarityKey::of(&deferred));
    assert_eq!(item.finding.location, deferred.location);
    assert!(item.rounds_seen.contains(&1), "Provenance must survive the restart");
}

/// Test: Resume rejects completed and unknown runs after a reopen
#[tokio::test]
async fn test_resume_rejects_completed_and_missing() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let run_id;
    {
        let store = RunStore::open(dir.path().join("run.db"))
            .expect("Failed to open store")
            .shared();
        let pool = pool_of(vec![("alpha", ScriptedReviewer::new(vec![]))]);
        let mut scheduler =
            RoundScheduler::new(store, pool, Arc::new(AppendMutator), RunConfig::default())
                .expect("Failed to create scheduler");
        let mut artifact = String::new();
        let report = scheduler.run(&mut artifact).await.expect("Run failed");
        run_id = report.run_id.clone();
    }

    let store = RunStore::open(dir.path().join("run.db"))
        .expect("Failed to reopen store")
        .shared();

    let completed = RoundScheduler::resume(
        store.clone(),
        &run_id,
        pool_of(vec![("alpha", ScriptedReviewer::new(vec![]))]),
        Arc::new(AppendMutator),
    );
    assert!(matches!(
        completed,
        Err(RunError::AlreadyComplete {
            status: RunStatus::Converged,
            ..
        })
    ));

    let missing = RoundScheduler::resume(
        store,
        "no-such-run",
        pool_of(vec![("alpha", ScriptedReviewer::new(vec![]))]),
        Arc::new(AppendMutator),
    );
    assert!(matches!(missing, Err(RunError::RunNotFound(_))));
}

/// Test: A resumed run with no rounds left settles from the log alone
#[tokio::test]
async fn test_resume_with_exhausted_rounds_settles_from_log() {
    // Converged shape: the logged final round raised only a Low finding.
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = RunStore::open(dir.path().join("run.db"))
        .expect("Failed to open store")
        .shared();

    let mut record = RunRecord::new(1);
    record.complete_round(1);
    store.put_run(&record).unwrap();
    let mut outcome = RoundOutcome::new(1);
    outcome.raised.record(Severity::Low);
    store.put_outcome(&record.id, &outcome).unwrap();

    // If the scheduler dispatched another round, this High would show up
    // in the log and flip the verdict.
    let pool = pool_of(vec![(
        "alpha",
        ScriptedReviewer::new(vec![vec![finding_with_fix(
            Severity::High,
            "src/new.rs:1",
            "should never be reviewed",
        )]]),
    )]);

    let mut scheduler =
        RoundScheduler::resume(store.clone(), &record.id, pool, Arc::new(AppendMutator))
            .expect("Failed to resume");
    let mut artifact = String::new();
    let report = scheduler.run(&mut artifact).await.expect("Run failed");

    assert_eq!(report.status, RunStatus::Converged);
    assert_eq!(report.rounds.len(), 1, "No extra round may run past the ceiling");
    assert_eq!(report.totals.rounds_completed, 1);
    assert_eq!(artifact, "");

    let record = store.get_run(&record.id).unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Converged);

    // ForcedHalt shape: the logged final round raised a Critical.
    let dir2 = TempDir::new().expect("Failed to create temp dir");
    let store2 = RunStore::open(dir2.path().join("run.db"))
        .expect("Failed to open store")
        .shared();
    let mut record2 = RunRecord::new(1);
    record2.complete_round(1);
    store2.put_run(&record2).unwrap();
    let mut outcome2 = RoundOutcome::new(1);
    outcome2.raised.record(Severity::Critical);
    outcome2.apply_failures = 1;
    store2.put_outcome(&record2.id, &outcome2).unwrap();

    let mut scheduler2 = RoundScheduler::resume(
        store2.clone(),
        &record2.id,
        pool_of(vec![("alpha", ScriptedReviewer::new(vec![]))]),
        Arc::new(AppendMutator),
    )
    .expect("Failed to resume");
    let report2 = scheduler2.run(&mut String::new()).await.expect("Run failed");

    assert_eq!(report2.status, RunStatus::ForcedHalt);
    assert!(report2.needs_attention());
}

/// Test: The event journal survives a reopen and replays in order
#[tokio::test]
async fn test_event_journal_survives_reopen() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let run_id;
    {
        let store = RunStore::open(dir.path().join("run.db"))
            .expect("Failed to open store")
            .shared();
        let bus = EventBus::with_persistence(store.clone()).shared();

        let pool = pool_of(vec![(
            "alpha",
            ScriptedReviewer::new(vec![vec![finding_with_fix(
                Severity::High,
                "src/auth.rs:12",
                "token accepted after expiry",
            )]]),
        )]);
        let mut scheduler =
            RoundScheduler::new(store, pool, Arc::new(AppendMutator), RunConfig::default())
                .expect("Failed to create scheduler")
                .with_event_bus(bus);

        let mut artifact = String::new();
        let report = scheduler.run(&mut artifact).await.expect("Run failed");
        run_id = report.run_id.clone();
    }

    let store = RunStore::open(dir.path().join("run.db"))
        .expect("Failed to reopen store")
        .shared();
    let events: Vec<RunEvent> = store.list_run_events(&run_id).unwrap();

    assert!(!events.is_empty());
    assert_eq!(events.first().map(|e| e.event_type()), Some("run_started"));
    assert_eq!(events.last().map(|e| e.event_type()), Some("run_completed"));
    assert!(events.iter().all(|e| e.run_id() == run_id));

    // Journal order is chronological.
    let stamps: Vec<_> = events.iter().map(|e| e.timestamp()).collect();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);

    // Two rounds: the High applies in round 1, round 2 is clean.
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type() == "round_started")
            .count(),
        2
    );
    assert!(events.iter().any(|e| e.event_type() == "fix_applied"));
}
