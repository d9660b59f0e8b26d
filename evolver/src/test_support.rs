//! Test-only scripted collaborators and record builders.
//!
//! Scripted doubles return predetermined replies without spawning processes,
//! so loop behavior can be driven deterministically. Queues use interior
//! mutability because the production traits take `&self`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::core::generation::Generation;
use crate::core::types::{
    Artifacts, EvaluationResult, FailureKind, Metrics, Score,
};
use crate::io::config::EvolveConfig;
use crate::io::evaluator::Evaluator;
use crate::io::model::{ModelClient, ModelRequest};

/// Deterministic generation with a single named metric.
pub fn generation_with_metric(
    index: u32,
    parent_index: Option<u32>,
    metric: &str,
    value: f64,
) -> Generation {
    let mut metrics = Metrics::new();
    metrics.insert(metric.to_string(), value);
    Generation {
        index,
        parent_index,
        program_text: format!("# candidate {index}\n"),
        score: Score::Metrics { metrics },
        artifacts: Artifacts::new(),
        rationale: None,
        guidance_used: None,
        timestamp: "2025-01-01T00:00:00Z".to_string(),
    }
}

/// Deterministic generation persisted with an evaluation failure marker.
pub fn invalid_generation(index: u32, parent_index: Option<u32>) -> Generation {
    Generation {
        index,
        parent_index,
        program_text: format!("# candidate {index}\n"),
        score: Score::Failed {
            failure: FailureKind::Evaluation,
        },
        artifacts: Artifacts::new(),
        rationale: None,
        guidance_used: None,
        timestamp: "2025-01-01T00:00:00Z".to_string(),
    }
}

/// Config with required paths filled and defaults elsewhere.
pub fn test_config() -> EvolveConfig {
    EvolveConfig {
        initial_program: PathBuf::from("seed.py"),
        evaluator: PathBuf::from("evaluator.py"),
        ..EvolveConfig::default()
    }
}

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Raw reply text handed back from `complete`.
    Json(String),
    /// Transport-level failure (as after exhausted retries).
    Fail(String),
}

/// Well-formed researcher reply.
pub fn researcher_reply(program: &str, rationale: &str) -> ScriptedReply {
    ScriptedReply::Json(
        serde_json::json!({ "program": program, "rationale": rationale }).to_string(),
    )
}

/// Well-formed supervisor reply.
pub fn supervisor_reply(guidance: &str, done: bool) -> ScriptedReply {
    ScriptedReply::Json(serde_json::json!({ "guidance": guidance, "done": done }).to_string())
}

/// Model client returning scripted replies per role, in push order.
#[derive(Default)]
pub struct ScriptedModelClient {
    researcher: Mutex<VecDeque<ScriptedReply>>,
    supervisor: Mutex<VecDeque<ScriptedReply>>,
}

impl ScriptedModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_researcher(&self, reply: ScriptedReply) {
        self.researcher.lock().expect("lock").push_back(reply);
    }

    pub fn push_supervisor(&self, reply: ScriptedReply) {
        self.supervisor.lock().expect("lock").push_back(reply);
    }
}

impl ModelClient for ScriptedModelClient {
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        let queue = match request.role {
            "researcher" => &self.researcher,
            "supervisor" => &self.supervisor,
            other => return Err(anyhow!("unexpected role '{other}'")),
        };
        let reply = queue
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left for role '{}'", request.role))?;
        match reply {
            ScriptedReply::Json(text) => Ok(text),
            ScriptedReply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

/// Valid evaluation carrying a single named metric.
pub fn valid_result(metric: &str, value: f64) -> EvaluationResult {
    let mut metrics = Metrics::new();
    metrics.insert(metric.to_string(), value);
    EvaluationResult {
        valid: true,
        metrics,
        artifacts: Artifacts::new(),
    }
}

/// Evaluator returning scripted results in push order.
#[derive(Default)]
pub struct ScriptedEvaluator {
    results: Mutex<VecDeque<EvaluationResult>>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: EvaluationResult) {
        self.results.lock().expect("lock").push_back(result);
    }
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&self, _program_path: &std::path::Path) -> Result<EvaluationResult> {
        self.results
            .lock()
            .expect("lock")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted evaluation left"))
    }
}
