//! Run Orchestration — Bounded Review-and-Repair Loop
//!
//! State machine and scheduler for driving an artifact through review
//! rounds until the findings stabilize or the round ceiling is hit.
//!
//! # Round Flow
//!
//! ```text
//! Idle → Dispatching → Synthesizing → Applying → Evaluating
//!            ▲                                       │
//!            │                                       ├─ blocking findings,
//!            └───────────────────────────────────────┤  rounds left → next round
//!                                                    │
//!                                                    ▼
//!                                               Finalizing
//!                                         (escalation batch, once)
//!                                                    │
//!                                          ┌─────────┴─────────┐
//!                                          ▼                   ▼
//!                                      Converged          ForcedHalt
//! ```

pub mod phase;
pub mod scheduler;

pub use phase::{PhaseTracker, PhaseTransition, RunPhase, TransitionError};
pub use scheduler::{RoundScheduler, RunConfig, RunError, RunResult};
