//! Run configuration stored as TOML.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Direction;

/// Evolution run configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values; only the seed
/// program and evaluator paths have no default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvolveConfig {
    /// Path to the seed program. Read once at run start; becomes generation 0.
    pub initial_program: PathBuf,

    /// Path to the evaluator script (see `evaluation.command`).
    pub evaluator: PathBuf,

    /// Maximum number of mutation iterations.
    pub iterations: u32,

    /// Metric the acceptance policy and target threshold are judged on.
    pub target_metric: String,

    pub direction: Direction,

    /// Optional early-termination threshold on `target_metric`.
    pub target_threshold: Option<f64>,

    /// Inference provider handed to the model command.
    pub provider: String,

    /// Model identifier handed to the model command.
    pub model_id: String,

    /// How many well-formedness failures the researcher may accumulate per
    /// iteration before the proposal is declared failed.
    pub proposal_retries: u32,

    /// Truncate rendered prompts beyond this many bytes by dropping
    /// droppable sections.
    pub prompt_budget_bytes: usize,

    /// How many recent generations feed the supervisor digest.
    pub digest_window: usize,

    /// Character cap per rationale summary in the digest.
    pub rationale_summary_chars: usize,

    pub model: ModelConfig,
    pub evaluation: EvaluationConfig,
}

/// Settings for the external model CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command invoked per inference request. The adapter appends
    /// `--provider <provider> --model <model_id>`, feeds the prompt on stdin,
    /// and reads the reply from stdout.
    pub command: Vec<String>,

    /// Wall-clock budget per inference request.
    pub request_timeout_secs: u64,

    /// Attempts per request before the failure surfaces to the iteration.
    pub max_retries: u32,

    /// Base backoff between attempts; grows linearly with the attempt count.
    pub retry_backoff_ms: u64,

    /// Truncate model stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            request_timeout_secs: 600,
            max_retries: 3,
            retry_backoff_ms: 2_000,
            output_limit_bytes: 1_000_000,
        }
    }
}

/// Settings for the external evaluator script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Interpreter prefix; the evaluator path and the candidate program path
    /// are appended per invocation.
    pub command: Vec<String>,

    /// Wall-clock budget per evaluation.
    pub timeout_secs: u64,

    /// Truncate evaluator stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string()],
            timeout_secs: 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for EvolveConfig {
    fn default() -> Self {
        Self {
            initial_program: PathBuf::new(),
            evaluator: PathBuf::new(),
            iterations: 10,
            target_metric: "combined_score".to_string(),
            direction: Direction::Maximize,
            target_threshold: None,
            provider: "bedrock".to_string(),
            model_id: "us.anthropic.claude-sonnet-4-20250514-v1:0".to_string(),
            proposal_retries: 3,
            prompt_budget_bytes: 40_000,
            digest_window: 10,
            rationale_summary_chars: 240,
            model: ModelConfig::default(),
            evaluation: EvaluationConfig::default(),
        }
    }
}

impl EvolveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.initial_program.as_os_str().is_empty() {
            return Err(anyhow!("initial_program is required"));
        }
        if self.evaluator.as_os_str().is_empty() {
            return Err(anyhow!("evaluator is required"));
        }
        if self.iterations == 0 {
            return Err(anyhow!("iterations must be > 0"));
        }
        if self.target_metric.trim().is_empty() {
            return Err(anyhow!("target_metric must be non-empty"));
        }
        if self.proposal_retries == 0 {
            return Err(anyhow!("proposal_retries must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.digest_window == 0 {
            return Err(anyhow!("digest_window must be > 0"));
        }
        if self.rationale_summary_chars == 0 {
            return Err(anyhow!("rationale_summary_chars must be > 0"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.model.max_retries == 0 {
            return Err(anyhow!("model.max_retries must be > 0"));
        }
        if self.model.output_limit_bytes == 0 {
            return Err(anyhow!("model.output_limit_bytes must be > 0"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.evaluation.timeout_secs == 0 {
            return Err(anyhow!("evaluation.timeout_secs must be > 0"));
        }
        if self.evaluation.output_limit_bytes == 0 {
            return Err(anyhow!("evaluation.output_limit_bytes must be > 0"));
        }
        if self.evaluation.command.is_empty() || self.evaluation.command[0].trim().is_empty() {
            return Err(anyhow!("evaluation.command must be a non-empty array"));
        }
        Ok(())
    }

    /// File extension used when staging candidate programs, taken from the
    /// seed program's name.
    pub fn program_extension(&self) -> String {
        self.initial_program
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "txt".to_string())
    }
}

/// Load config from a TOML file. A missing file yields the defaults; the
/// caller is expected to fill the required paths from CLI flags before
/// validating.
pub fn load_config(path: &Path) -> Result<EvolveConfig> {
    if !path.exists() {
        return Ok(EvolveConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EvolveConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> EvolveConfig {
        EvolveConfig {
            initial_program: PathBuf::from("seed.py"),
            evaluator: PathBuf::from("evaluator.py"),
            ..EvolveConfig::default()
        }
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EvolveConfig::default());
    }

    #[test]
    fn toml_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = populated();
        fs::write(&path, toml::to_string_pretty(&cfg).expect("serialize")).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn validation_requires_paths_and_positive_budgets() {
        assert!(EvolveConfig::default().validate().is_err());
        assert!(populated().validate().is_ok());

        let mut cfg = populated();
        cfg.iterations = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = populated();
        cfg.model.command.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = populated();
        cfg.evaluation.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn program_extension_falls_back_to_txt() {
        let mut cfg = populated();
        assert_eq!(cfg.program_extension(), "py");
        cfg.initial_program = PathBuf::from("seed");
        assert_eq!(cfg.program_extension(), "txt");
    }
}
