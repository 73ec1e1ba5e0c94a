//! Similarity keys for dedup and cross-round matching
//!
//! Two findings match when they normalize to the same key. The key is a
//! pure function of location and summary, so matching is deterministic
//! across reviewers, rounds, and process restarts.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::finding::Finding;

/// Regex extracting alphanumeric tokens from a lowercased summary
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("TOKEN_RE regex should compile"));

/// Words too common to carry matching signal
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "in", "is", "it", "its", "no",
    "not", "of", "on", "or", "that", "the", "this", "to", "was", "with",
];

/// Deterministic matching key for a finding
///
/// Composed of the normalized location (trimmed, lowercased, inner
/// whitespace collapsed) and a token fingerprint of the summary
/// (lowercased, punctuation stripped, stopwords dropped, tokens sorted and
/// deduped). Word order and punctuation never affect the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SimilarityKey(String);

impl SimilarityKey {
    /// Compute the key for a finding
    pub fn of(finding: &Finding) -> Self {
        Self::from_parts(&finding.location, &finding.summary)
    }

    /// Compute a key from raw location and summary text
    pub fn from_parts(location: &str, summary: &str) -> Self {
        SimilarityKey(format!(
            "{}|{}",
            normalize_location(location),
            fingerprint(summary)
        ))
    }

    /// The key as a string slice (also used inside store keys)
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SimilarityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn normalize_location(location: &str) -> String {
    location
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn fingerprint(summary: &str) -> String {
    let lowered = summary.to_lowercase();
    let mut tokens: Vec<&str> = TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .collect();
    tokens.sort_unstable();
    tokens.dedup();

    if tokens.is_empty() {
        // All-stopword summaries still need a stable, non-empty fingerprint.
        return lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;

    #[test]
    fn test_word_order_and_punctuation_ignored() {
        let a = SimilarityKey::from_parts("src/auth.rs:42", "missing null check in parser");
        let b = SimilarityKey::from_parts("src/auth.rs:42", "The parser is missing a null-check!");
        assert_eq!(a, b);
    }

    #[test]
    fn test_location_case_and_whitespace_normalized() {
        let a = SimilarityKey::from_parts("  Section  3 ", "duplicate step");
        let b = SimilarityKey::from_parts("section 3", "duplicate step");
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_locations_differ() {
        let a = SimilarityKey::from_parts("doc#1", "duplicate step");
        let b = SimilarityKey::from_parts("doc#2", "duplicate step");
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_summaries_differ() {
        let a = SimilarityKey::from_parts("doc#1", "missing rollback");
        let b = SimilarityKey::from_parts("doc#1", "missing citation");
        assert_ne!(a, b);
    }

    #[test]
    fn test_stopword_only_summary_falls_back() {
        let a = SimilarityKey::from_parts("doc#1", "this is it");
        let b = SimilarityKey::from_parts("doc#1", "This IS it");
        assert_eq!(a, b);
        assert!(!a.as_str().ends_with('|'));
    }

    #[test]
    fn test_of_uses_location_and_summary() {
        let finding = Finding::new("style", Severity::Low, "Doc#1", "trailing whitespace");
        assert_eq!(
            SimilarityKey::of(&finding),
            SimilarityKey::from_parts("doc#1", "whitespace trailing")
        );
    }
}
