//! Core finding types raised by reviewers
//!
//! A finding is a single reviewer's observation about the artifact under
//! review. Findings are immutable once created: corrections show up as new
//! findings in later rounds, never as edits to past ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for findings
pub type FindingId = String;

/// Severity of a finding, ordered from least to most serious
///
/// The derived ordering is load-bearing: `severity >= Severity::High`
/// is the auto-apply threshold and the forced-continuation trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic or stylistic issue
    Low,
    /// Worth fixing, does not block correctness
    Medium,
    /// Likely defect or significant gap
    High,
    /// Confirmed defect or safety/correctness violation
    Critical,
}

impl Severity {
    /// All severities in ascending order
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ]
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A reviewer-proposed corrective action
///
/// The payload is opaque to the controller: only the mutator that applies
/// it needs to understand its shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fix {
    /// Short description of the change
    pub summary: String,

    /// Mutator-interpreted change content
    pub payload: serde_json::Value,
}

impl Fix {
    /// Create a fix with a summary and no payload
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// Attach an opaque payload for the mutator
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A single reviewer's observation about the artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique finding identifier, stable for the finding's lifetime
    pub id: FindingId,

    /// Round the finding was raised in (stamped by the reviewer pool)
    pub round: u32,

    /// Name of the reviewer that raised it (stamped by the reviewer pool)
    pub source: String,

    /// How serious the finding is
    pub severity: Severity,

    /// Opaque reference into the artifact (file+line, section, node id)
    ///
    /// Used for matching and dedup only, never dereferenced here.
    pub location: String,

    /// Short human-readable description
    pub summary: String,

    /// Proposed mechanical fix, if the reviewer has one
    pub fix: Option<Fix>,

    /// Reviewer's hint that the fix is unambiguous enough to apply unseen
    ///
    /// Advisory metadata: classification acts on fix presence, severity,
    /// and consensus, not on this flag.
    pub auto_fixable: bool,

    /// When the finding was raised
    pub raised_at: DateTime<Utc>,
}

impl Finding {
    /// Create a new finding
    ///
    /// `round` starts at zero; the reviewer pool stamps the real round and
    /// source at dispatch time, so reviewer-supplied values are provisional.
    pub fn new(
        source: impl Into<String>,
        severity: Severity,
        location: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            round: 0,
            source: source.into(),
            severity,
            location: location.into(),
            summary: summary.into(),
            fix: None,
            auto_fixable: false,
            raised_at: Utc::now(),
        }
    }

    /// Attach a proposed fix
    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    /// Mark the fix as safe to apply without review
    pub fn with_auto_fixable(mut self, auto_fixable: bool) -> Self {
        self.auto_fixable = auto_fixable;
        self
    }

    /// Check the finding carries every required field
    ///
    /// Malformed findings are dropped with a warning before classification;
    /// this is the gate.
    pub fn validate(&self) -> Result<(), FindingDefect> {
        if self.location.trim().is_empty() {
            return Err(FindingDefect::EmptyLocation {
                id: self.id.clone(),
            });
        }
        if self.summary.trim().is_empty() {
            return Err(FindingDefect::EmptySummary {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Validation failure for a malformed finding
#[derive(Debug, Clone, thiserror::Error)]
pub enum FindingDefect {
    #[error("finding {id} has an empty location")]
    EmptyLocation { id: FindingId },

    #[error("finding {id} has an empty summary")]
    EmptySummary { id: FindingId },
}
