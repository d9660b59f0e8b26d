//! Supervisor role: strategic guidance from code-free signals.
//!
//! The supervisor's entire input is a [`RunDigest`]; there is no interface
//! through which program source can reach it. Its reply is schema-validated
//! and the `done` flag is the single designated early-termination signal.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::digest::RunDigest;
use crate::core::types::Guidance;
use crate::io::config::EvolveConfig;
use crate::io::model::{ModelClient, ModelRequest, parse_validated};
use crate::io::prompt::{PromptEngine, apply_budget};

const SUPERVISOR_SCHEMA: &str = include_str!("../../schemas/supervisor_output.schema.json");

pub struct StrategyAdvisor<'a, M: ModelClient> {
    model: &'a M,
    engine: &'a PromptEngine,
    timeout: Duration,
    prompt_budget_bytes: usize,
}

impl<'a, M: ModelClient> StrategyAdvisor<'a, M> {
    pub fn new(model: &'a M, engine: &'a PromptEngine, cfg: &EvolveConfig) -> Self {
        Self {
            model,
            engine,
            timeout: Duration::from_secs(cfg.model.request_timeout_secs),
            prompt_budget_bytes: cfg.prompt_budget_bytes,
        }
    }

    /// Produce guidance for the next mutation. Failures (transport after
    /// bounded retries, schema rejection) propagate to the controller, which
    /// absorbs them at the iteration boundary.
    #[instrument(skip_all, fields(iteration = digest.iteration))]
    pub fn advise(&self, digest: &RunDigest) -> Result<Guidance> {
        let rendered = self
            .engine
            .render_supervisor(digest)
            .context("render supervisor prompt")?;
        let prompt = apply_budget(&rendered, self.prompt_budget_bytes);

        let request = ModelRequest {
            role: "supervisor",
            prompt,
            timeout: self.timeout,
        };
        let reply = self.model.complete(&request)?;
        let guidance: Guidance =
            parse_validated(&reply, SUPERVISOR_SCHEMA).context("supervisor reply rejected")?;
        debug!(done = guidance.done, "guidance received");
        Ok(guidance)
    }
}
