//! Convergence Review Controller Library
//!
//! This library provides:
//! - Bounded review rounds that fan concurrent reviewers out over an artifact
//! - Consensus-gated auto-apply of proposed fixes (severity, same-round
//!   agreement, or recurrence across rounds)
//! - A durable deferral registry so single-voice findings wait for a second
//!   opinion instead of being applied or lost
//! - A single end-of-run escalation batch carrying full provenance for
//!   everything automation would not touch
//!
//! # Pipeline
//!
//! Each round moves through the same steps:
//!
//! ```text
//! dispatch reviewers → synthesize findings → apply approved fixes
//!      → evaluate convergence → next round | finalize
//! ```
//!
//! Reviewers observe the artifact through `&A` while the mutator holds the
//! only `&mut A`, so reads and writes can never interleave. Every step is
//! journaled to RocksDB; an interrupted run resumes at the next round
//! boundary with its deferral registry and pending escalations intact.
//!
//! # Entry Points
//!
//! - [`RoundScheduler`]: drive a run end-to-end
//! - [`RunStore`]: open or reopen the durable state underneath a run
//! - [`Reviewer`] / [`Mutator`] / [`DecisionMaker`]: the traits callers implement
//! - [`EventBus`]: subscribe to run progress

#![allow(clippy::uninlined_format_args)]

pub mod escalation;
pub mod evaluator;
pub mod events;
pub mod finding;
pub mod mutator;
pub mod policy;
pub mod registry;
pub mod report;
pub mod reviewer;
pub mod run;
pub mod similarity;
pub mod state;
pub mod synthesis;

// Re-export key finding types
pub use finding::{Finding, FindingId, Fix, Severity};
pub use similarity::SimilarityKey;

// Re-export key policy types
pub use policy::{classify, Action, ApplyTrigger};

// Re-export the reviewer-side seam
pub use reviewer::{
    ReviewError, Reviewer, ReviewerFailure, ReviewerFailureRecord, ReviewerPool, ReviewerReturn,
};

// Re-export the mutator-side seam
pub use mutator::{MutationError, Mutator};

// Re-export key synthesis types
pub use synthesis::{
    ApplyItem, FindingSynthesizer, MergedFinding, SynthesisError, SynthesisOutcome,
};
pub use registry::ConsensusRegistry;

// Re-export convergence evaluation
pub use evaluator::{evaluate, Verdict};

// Re-export key state types
pub use state::{
    DeferredEntry, EscalationReason, PendingEscalation, RoundOutcome, RunId, RunRecord, RunStatus,
    RunStore, SeverityCounts, SharedRunStore, StoreError, StoreResult,
};

// Re-export key escalation types
pub use escalation::{
    Choice, Decision, DecisionMaker, EscalationBatch, EscalationError, EscalationResolution,
    EscalationSurface, ResolvedEscalation,
};

// Re-export key event types
pub use events::{EventBus, EventBusExt, EventFilter, FilteredReceiver, RunEvent, SharedEventBus};

// Re-export reporting types
pub use report::{EscalationReport, RunReport, RunTotals};

// Re-export run orchestration types
pub use run::{PhaseTracker, RoundScheduler, RunConfig, RunError, RunPhase, RunResult};
