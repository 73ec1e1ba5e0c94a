//! Reviewer seam — independent review fan-out with a join barrier
//!
//! A pool dispatches every registered reviewer concurrently against a
//! read-only artifact snapshot and joins before anything else happens.
//! Reviewers never see each other's in-flight output; that independence is
//! what makes same-round agreement a meaningful signal. A reviewer that
//! times out or errors contributes zero findings for the round and the run
//! carries on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::finding::Finding;

/// Error returned by a reviewer implementation
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ReviewError {
    message: String,
}

impl ReviewError {
    /// Create a review error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An independent reviewer of the artifact
///
/// Anything satisfying this one-method contract can participate: a static
/// analyzer, a remote model call, a human behind a queue. Implementations
/// receive a shared snapshot and must not mutate the artifact.
#[async_trait]
pub trait Reviewer<A>: Send + Sync {
    /// Inspect the artifact and return a bounded list of findings
    async fn review(&self, artifact: &A) -> Result<Vec<Finding>, ReviewError>;
}

/// How a reviewer's round contribution degraded to zero findings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerFailure {
    /// The reviewer exceeded the per-round timeout
    TimedOut { timeout_secs: u64 },
    /// The reviewer returned an error
    Failed { message: String },
}

impl std::fmt::Display for ReviewerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewerFailure::TimedOut { timeout_secs } => {
                write!(f, "timed out after {}s", timeout_secs)
            }
            ReviewerFailure::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// A reviewer failure pinned to its round, kept for the final report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerFailureRecord {
    /// Round the failure happened in
    pub round: u32,

    /// Which reviewer failed
    pub source: String,

    /// What went wrong
    pub failure: ReviewerFailure,
}

/// One reviewer's return from a round's fan-out
#[derive(Debug)]
pub struct ReviewerReturn {
    /// Reviewer name
    pub source: String,

    /// Findings stamped with round and source
    pub findings: Vec<Finding>,

    /// Set when the reviewer degraded to zero findings
    pub failure: Option<ReviewerFailure>,
}

/// Named reviewers dispatched concurrently each round
pub struct ReviewerPool<A> {
    entries: Vec<PoolEntry<A>>,
    timeout: Duration,
}

struct PoolEntry<A> {
    source: String,
    reviewer: Arc<dyn Reviewer<A>>,
}

impl<A: Send + Sync> ReviewerPool<A> {
    /// Create an empty pool with a per-reviewer timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            timeout,
        }
    }

    /// Register a reviewer under a source name
    pub fn register(&mut self, source: impl Into<String>, reviewer: Arc<dyn Reviewer<A>>) {
        self.entries.push(PoolEntry {
            source: source.into(),
            reviewer,
        });
    }

    /// Replace the per-reviewer timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Registered source names, in registration order
    pub fn sources(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.source.clone()).collect()
    }

    /// Number of registered reviewers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no reviewers are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fan out to every reviewer and join
    ///
    /// Returns one entry per reviewer in registration order, stamping each
    /// finding with the round and source. Timeouts and errors become
    /// recorded failures with zero findings, never round aborts.
    pub async fn dispatch(&self, artifact: &A, round: u32) -> Vec<ReviewerReturn> {
        let timeout = self.timeout;
        let futures = self.entries.iter().map(|entry| {
            let source = entry.source.clone();
            let reviewer = entry.reviewer.clone();
            async move {
                match tokio::time::timeout(timeout, reviewer.review(artifact)).await {
                    Ok(Ok(mut findings)) => {
                        for finding in &mut findings {
                            finding.round = round;
                            finding.source = source.clone();
                        }
                        debug!(
                            round,
                            source = %source,
                            findings = findings.len(),
                            "reviewer returned"
                        );
                        ReviewerReturn {
                            source,
                            findings,
                            failure: None,
                        }
                    }
                    Ok(Err(err)) => {
                        warn!(
                            round,
                            source = %source,
                            error = %err,
                            "reviewer failed, contributing zero findings"
                        );
                        ReviewerReturn {
                            source,
                            findings: Vec::new(),
                            failure: Some(ReviewerFailure::Failed {
                                message: err.to_string(),
                            }),
                        }
                    }
                    Err(_) => {
                        warn!(
                            round,
                            source = %source,
                            timeout_secs = timeout.as_secs(),
                            "reviewer timed out, contributing zero findings"
                        );
                        ReviewerReturn {
                            source,
                            findings: Vec::new(),
                            failure: Some(ReviewerFailure::TimedOut {
                                timeout_secs: timeout.as_secs(),
                            }),
                        }
                    }
                }
            }
        });

        futures::future::join_all(futures).await
    }
}
