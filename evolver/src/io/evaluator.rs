//! Evaluator adapter: invokes the external scoring script per candidate.
//!
//! The [`Evaluator`] trait decouples the controller from the scoring backend.
//! Tests use scripted evaluators that return predetermined results without
//! spawning processes.
//!
//! A crashing, hanging, or garbage-printing candidate must never take down
//! the loop: every such failure is normalized into `valid = false` with a
//! `diagnostic` artifact. `Err` is reserved for adapter-internal faults.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::core::types::{Artifacts, EvaluationResult, Metrics};
use crate::io::config::EvaluationConfig;
use crate::io::process::{CaptureSpec, ChildCapture, run_captured};

const STREAM_TAIL_CHARS: usize = 2_000;

/// Abstraction over scoring backends.
pub trait Evaluator {
    /// Score one staged candidate program.
    fn evaluate(&self, program_path: &Path) -> Result<EvaluationResult>;
}

/// What the evaluator script must print as the last JSON line of stdout.
#[derive(Debug, Deserialize)]
struct EvaluatorPayload {
    metrics: Metrics,
    #[serde(default)]
    artifacts: Artifacts,
}

/// Evaluator that spawns the configured script per candidate:
/// `<command...> <evaluator_path> <program_path>`.
pub struct ScriptEvaluator {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ScriptEvaluator {
    /// `command` is the full invocation prefix including the evaluator path;
    /// the candidate program path is appended per call.
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(cfg: &EvaluationConfig, evaluator_path: &Path) -> Self {
        let mut command = cfg.command.clone();
        command.push(evaluator_path.to_string_lossy().into_owned());
        Self::new(
            command,
            Duration::from_secs(cfg.timeout_secs),
            cfg.output_limit_bytes,
        )
    }
}

impl Evaluator for ScriptEvaluator {
    #[instrument(skip_all, fields(program = %program_path.display()))]
    fn evaluate(&self, program_path: &Path) -> Result<EvaluationResult> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).arg(program_path);

        let spec = CaptureSpec {
            timeout: self.timeout,
            limit_bytes: self.output_limit_bytes,
        };
        let capture = match run_captured(cmd, None, spec) {
            Ok(capture) => capture,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "evaluator failed to start");
                return Ok(EvaluationResult::invalid(format!(
                    "evaluator failed to start: {err:#}"
                )));
            }
        };

        if capture.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "evaluation timed out");
            return Ok(invalid_with_streams(
                format!("evaluation timed out after {}s", self.timeout.as_secs()),
                &capture,
            ));
        }
        if !capture.status.success() {
            warn!(exit_code = ?capture.status.code(), "evaluator exited with failure");
            return Ok(invalid_with_streams(
                format!("evaluator exited with status {:?}", capture.status.code()),
                &capture,
            ));
        }

        match parse_payload(&capture.stdout_lossy()) {
            Some(payload) => {
                debug!(metrics = payload.metrics.len(), "evaluation succeeded");
                Ok(EvaluationResult {
                    valid: true,
                    metrics: payload.metrics,
                    artifacts: payload.artifacts,
                })
            }
            None => {
                warn!("evaluator printed no parsable JSON result");
                Ok(invalid_with_streams(
                    "evaluator printed no parsable JSON result on stdout".to_string(),
                    &capture,
                ))
            }
        }
    }
}

/// Last stdout line that parses as the expected payload. Evaluator scripts
/// are free to log above their result line.
fn parse_payload(stdout: &str) -> Option<EvaluatorPayload> {
    stdout.lines().rev().find_map(|line| {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    })
}

fn invalid_with_streams(diagnostic: String, capture: &ChildCapture) -> EvaluationResult {
    let mut result = EvaluationResult::invalid(diagnostic);
    attach_tail(&mut result.artifacts, "stderr", capture.stderr_tail(STREAM_TAIL_CHARS));
    attach_tail(&mut result.artifacts, "stdout", tail_chars(&capture.stdout_lossy()));
    result
}

fn attach_tail(artifacts: &mut BTreeMap<String, serde_json::Value>, key: &str, tail: String) {
    if !tail.trim().is_empty() {
        artifacts.insert(key.to_string(), serde_json::Value::String(tail));
    }
}

fn tail_chars(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(STREAM_TAIL_CHARS);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_evaluator(script: &str, timeout_secs: u64) -> ScriptEvaluator {
        ScriptEvaluator::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            Duration::from_secs(timeout_secs),
            100_000,
        )
    }

    #[test]
    fn parses_metrics_from_the_last_json_line() {
        let script = r#"echo "progress: warming up"; echo '{"metrics":{"combined_score":0.5},"artifacts":{"note":"ok"}}'"#;
        let result = sh_evaluator(script, 10)
            .evaluate(Path::new("ignored.py"))
            .expect("evaluate");
        assert!(result.valid);
        assert_eq!(result.metrics.get("combined_score"), Some(&0.5));
        assert_eq!(
            result.artifacts.get("note"),
            Some(&serde_json::Value::String("ok".to_string()))
        );
    }

    #[test]
    fn nonzero_exit_is_invalid_not_an_error() {
        let script = r#"echo "boom" >&2; exit 3"#;
        let result = sh_evaluator(script, 10)
            .evaluate(Path::new("ignored.py"))
            .expect("evaluate");
        assert!(!result.valid);
        let diagnostic = result.artifacts.get("diagnostic").expect("diagnostic");
        assert!(diagnostic.as_str().expect("string").contains("status"));
        assert!(result.artifacts.contains_key("stderr"));
    }

    #[test]
    fn timeout_is_invalid_not_an_error() {
        let result = sh_evaluator("sleep 30", 1)
            .evaluate(Path::new("ignored.py"))
            .expect("evaluate");
        assert!(!result.valid);
        let diagnostic = result.artifacts.get("diagnostic").expect("diagnostic");
        assert!(diagnostic.as_str().expect("string").contains("timed out"));
    }

    #[test]
    fn missing_json_result_is_invalid() {
        let result = sh_evaluator("echo just logs", 10)
            .evaluate(Path::new("ignored.py"))
            .expect("evaluate");
        assert!(!result.valid);
    }

    #[test]
    fn non_numeric_metrics_are_rejected() {
        let script = r#"echo '{"metrics":{"combined_score":"high"}}'"#;
        let result = sh_evaluator(script, 10)
            .evaluate(Path::new("ignored.py"))
            .expect("evaluate");
        assert!(!result.valid);
    }

    #[test]
    fn unspawnable_evaluator_is_invalid_not_an_error() {
        let evaluator = ScriptEvaluator::new(
            vec!["definitely-not-a-real-binary-name".to_string()],
            Duration::from_secs(1),
            1_000,
        );
        let result = evaluator.evaluate(Path::new("ignored.py")).expect("evaluate");
        assert!(!result.valid);
    }
}
