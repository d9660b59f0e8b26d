//! Model client adapter: wraps the external inference CLI.
//!
//! The [`ModelClient`] trait decouples the two agent roles from the inference
//! backend. The command-backed implementation owns transport concerns
//! (timeout, bounded retry with backoff); content validation of replies lives
//! in [`parse_validated`], shared by both roles.

use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::io::config::EvolveConfig;
use crate::io::process::{CaptureSpec, run_captured};

/// One inference request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Which role is asking ("researcher" or "supervisor"); used for logging
    /// and for scripted test clients.
    pub role: &'static str,
    pub prompt: String,
    pub timeout: Duration,
}

/// Abstraction over inference backends. Returns the raw reply text.
pub trait ModelClient {
    fn complete(&self, request: &ModelRequest) -> Result<String>;
}

/// Client that spawns the configured provider command per request, feeding
/// the prompt on stdin and reading the reply from stdout.
pub struct CommandModelClient {
    command: Vec<String>,
    provider: String,
    model_id: String,
    max_retries: u32,
    backoff: Duration,
    output_limit_bytes: usize,
}

impl CommandModelClient {
    pub fn from_config(cfg: &EvolveConfig) -> Self {
        Self {
            command: cfg.model.command.clone(),
            provider: cfg.provider.clone(),
            model_id: cfg.model_id.clone(),
            max_retries: cfg.model.max_retries,
            backoff: Duration::from_millis(cfg.model.retry_backoff_ms),
            output_limit_bytes: cfg.model.output_limit_bytes,
        }
    }

    fn invoke(&self, request: &ModelRequest) -> Result<String> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg("--provider")
            .arg(&self.provider)
            .arg("--model")
            .arg(&self.model_id);

        let spec = CaptureSpec {
            timeout: request.timeout,
            limit_bytes: self.output_limit_bytes,
        };
        let capture = run_captured(cmd, Some(request.prompt.as_bytes()), spec)
            .context("run model command")?;

        if capture.timed_out {
            bail!("model request timed out after {:?}", request.timeout);
        }
        if !capture.status.success() {
            bail!(
                "model command failed with status {:?}: {}",
                capture.status.code(),
                capture.stderr_tail(500)
            );
        }
        Ok(capture.stdout_lossy())
    }
}

impl ModelClient for CommandModelClient {
    /// Transient failures (spawn error, timeout, nonzero exit, empty reply)
    /// are retried with linear backoff. Exhausted retries surface as an
    /// error the controller absorbs at the iteration boundary.
    #[instrument(skip_all, fields(role = request.role, timeout_secs = request.timeout.as_secs()))]
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            match self.invoke(request) {
                Ok(reply) if !reply.trim().is_empty() => {
                    debug!(attempt, bytes = reply.len(), "model reply received");
                    return Ok(reply);
                }
                Ok(_) => last_err = Some(anyhow!("model returned an empty reply")),
                Err(err) => last_err = Some(err),
            }
            if attempt < self.max_retries {
                let wait = self.backoff * attempt;
                warn!(
                    attempt,
                    backoff_ms = wait.as_millis() as u64,
                    "model request failed, backing off"
                );
                thread::sleep(wait);
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow!("model request failed"))
            .context(format!(
                "model request for {} exhausted {} attempts",
                request.role, self.max_retries
            )))
    }
}

/// Parse an agent reply: locate the JSON object, validate it against the
/// role's schema (Draft 2020-12), then deserialize.
///
/// All model-generated text is untrusted advisory input; nothing reaches the
/// controller without passing the schema.
pub fn parse_validated<T: DeserializeOwned>(reply: &str, schema: &str) -> Result<T> {
    let value = extract_json(reply)?;
    validate_schema(&value, schema)?;
    let parsed = serde_json::from_value(value).context("deserialize agent reply")?;
    Ok(parsed)
}

/// The reply should be a bare JSON object, but models sometimes wrap it in
/// prose; fall back to the outermost brace span.
fn extract_json(reply: &str) -> Result<Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        bail!("reply contains no JSON object");
    };
    if start >= end {
        bail!("reply contains no JSON object");
    }
    serde_json::from_str(&trimmed[start..=end]).context("parse JSON object in reply")
}

fn validate_schema(instance: &Value, schema_raw: &str) -> Result<()> {
    let schema: Value = serde_json::from_str(schema_raw).context("parse reply schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile reply schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("reply schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
