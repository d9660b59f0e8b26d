//! Immutable generation records.

use serde::{Deserialize, Serialize};

use crate::core::types::{Artifacts, FailureKind, Score};

/// One persisted candidate program plus its evaluation outcome and lineage
/// pointer. Immutable once appended to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// Monotonically increasing, contiguous from 0. Index 0 is the seed.
    pub index: u32,
    /// The generation this candidate was derived from. `None` only for the
    /// root. Always the best-so-far generation at the time of mutation.
    pub parent_index: Option<u32>,
    /// Full candidate source. Empty for proposal-failed generations.
    pub program_text: String,
    pub score: Score,
    #[serde(default)]
    pub artifacts: Artifacts,
    /// Researcher free text explaining the change. Advisory only: stored for
    /// provenance, summarized for the supervisor, never parsed for control.
    pub rationale: Option<String>,
    /// Supervisor guidance that informed this generation, for provenance.
    pub guidance_used: Option<String>,
    /// RFC 3339 UTC.
    pub timestamp: String,
}

impl Generation {
    pub fn is_valid(&self) -> bool {
        self.score.is_valid()
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.score.metric(name)
    }

    /// A generation recording an iteration that produced no candidate to
    /// evaluate (proposal retries exhausted or supervisor unavailable).
    pub fn failed(
        index: u32,
        parent_index: u32,
        failure: FailureKind,
        guidance_used: Option<String>,
        timestamp: String,
    ) -> Self {
        Self {
            index,
            parent_index: Some(parent_index),
            program_text: String::new(),
            score: Score::Failed { failure },
            artifacts: Artifacts::new(),
            rationale: None,
            guidance_used,
            timestamp,
        }
    }
}
