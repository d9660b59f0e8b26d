//! Shared deterministic types for the evolution core.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Named numeric metrics reported by the evaluator.
pub type Metrics = BTreeMap<String, f64>;

/// Auxiliary evaluator outputs (logs, rendered payloads, diagnostics).
///
/// Artifacts are stored alongside metrics but never drive acceptance decisions.
pub type Artifacts = BTreeMap<String, serde_json::Value>;

/// Direction in which the designated metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Direction {
    /// True when `candidate` is strictly better than `incumbent`.
    ///
    /// Equal values are never an improvement: the acceptance policy keeps the
    /// older incumbent on ties.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Maximize => candidate > incumbent,
            Direction::Minimize => candidate < incumbent,
        }
    }

    /// True when `value` meets or crosses `threshold`.
    pub fn meets(self, value: f64, threshold: f64) -> bool {
        match self {
            Direction::Maximize => value >= threshold,
            Direction::Minimize => value <= threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Maximize => "maximize",
            Direction::Minimize => "minimize",
        }
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "maximize" | "max" => Ok(Direction::Maximize),
            "minimize" | "min" => Ok(Direction::Minimize),
            other => Err(anyhow!(
                "unknown direction '{other}' (expected 'maximize' or 'minimize')"
            )),
        }
    }
}

/// Why a generation carries no metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The researcher exhausted its proposal retries (or the supervisor call
    /// failed after bounded retries) before a candidate could be produced.
    Proposal,
    /// The evaluator reported the candidate invalid: non-executing code, a
    /// timeout, or an evaluator-raised failure.
    Evaluation,
}

/// Evaluation outcome recorded on a persisted generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Score {
    /// The candidate executed and reported named metrics.
    Metrics { metrics: Metrics },
    /// The iteration produced no usable metrics.
    Failed { failure: FailureKind },
}

impl Score {
    pub fn is_valid(&self) -> bool {
        matches!(self, Score::Metrics { .. })
    }

    /// Value of a named metric, when present on a valid score.
    pub fn metric(&self, name: &str) -> Option<f64> {
        match self {
            Score::Metrics { metrics } => metrics.get(name).copied(),
            Score::Failed { .. } => None,
        }
    }
}

/// Terminal state of a finalized run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxIterations,
    TargetReached,
    AgentDeclaredDone,
    FatalError,
}

/// Result of one evaluator invocation.
///
/// Ephemeral: owned by the evaluator adapter until handed to the controller,
/// which copies what it needs into a [`crate::core::generation::Generation`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub valid: bool,
    pub metrics: Metrics,
    pub artifacts: Artifacts,
}

impl EvaluationResult {
    /// An invalid result carrying a `diagnostic` artifact instead of metrics.
    pub fn invalid(diagnostic: impl Into<String>) -> Self {
        let mut artifacts = Artifacts::new();
        artifacts.insert(
            "diagnostic".to_string(),
            serde_json::Value::String(diagnostic.into()),
        );
        Self {
            valid: false,
            metrics: Metrics::new(),
            artifacts,
        }
    }
}

/// Structured supervisor reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guidance {
    /// Strategic guidance consumed by the researcher on the next iteration.
    #[serde(rename = "guidance")]
    pub text: String,
    /// The single designated early-termination signal. Authoritative for the
    /// controller; nothing else in the reply may bypass the acceptance policy.
    pub done: bool,
}

/// Structured researcher reply: a complete replacement program, never a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub program: String,
    pub rationale: String,
}
