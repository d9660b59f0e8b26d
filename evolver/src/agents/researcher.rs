//! Researcher role: proposes one candidate program per iteration.
//!
//! The researcher sees the parent program, its evaluation, and the
//! supervisor's guidance. It must return a complete replacement program;
//! replies that fail the schema or the well-formedness check are retried a
//! bounded number of times before the proposal is declared failed.

use std::fmt;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::generation::Generation;
use crate::core::program;
use crate::core::types::{Direction, Proposal};
use crate::io::config::EvolveConfig;
use crate::io::model::{ModelClient, ModelRequest, parse_validated};
use crate::io::prompt::{PromptEngine, ResearcherPromptInput, apply_budget, render_score};

const RESEARCHER_SCHEMA: &str = include_str!("../../schemas/researcher_output.schema.json");

/// The researcher exhausted its retries without a usable candidate.
///
/// Absorbed at the iteration boundary: the controller records a failed
/// generation and the run continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalFailedError {
    pub attempts: u32,
    pub last_error: String,
}

impl fmt::Display for ProposalFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proposal failed after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl std::error::Error for ProposalFailedError {}

/// Inputs for one proposal. The parent is always the best-so-far generation.
#[derive(Debug)]
pub struct ProposeInput<'a> {
    pub parent: &'a Generation,
    pub guidance: &'a str,
    /// EVOLVE-BLOCK count of the seed program; 0 when unfenced.
    pub seed_blocks: usize,
}

pub struct MutationProposer<'a, M: ModelClient> {
    model: &'a M,
    engine: &'a PromptEngine,
    metric: String,
    direction: Direction,
    retries: u32,
    timeout: Duration,
    prompt_budget_bytes: usize,
}

impl<'a, M: ModelClient> MutationProposer<'a, M> {
    pub fn new(model: &'a M, engine: &'a PromptEngine, cfg: &EvolveConfig) -> Self {
        Self {
            model,
            engine,
            metric: cfg.target_metric.clone(),
            direction: cfg.direction,
            retries: cfg.proposal_retries,
            timeout: Duration::from_secs(cfg.model.request_timeout_secs),
            prompt_budget_bytes: cfg.prompt_budget_bytes,
        }
    }

    /// Produce one candidate program, or a [`ProposalFailedError`] once the
    /// bounded retries are exhausted. Never loops indefinitely.
    #[instrument(skip_all, fields(parent = input.parent.index))]
    pub fn propose(&self, input: &ProposeInput<'_>) -> Result<Proposal, ProposalFailedError> {
        let prompt = match self.build_prompt(input) {
            Ok(prompt) => prompt,
            Err(err) => {
                return Err(ProposalFailedError {
                    attempts: 0,
                    last_error: format!("render researcher prompt: {err:#}"),
                });
            }
        };

        let mut last_error = String::new();
        for attempt in 1..=self.retries {
            match self.attempt(&prompt) {
                Ok(proposal) => match well_formed(&proposal.program, input.seed_blocks) {
                    Ok(()) => {
                        debug!(attempt, bytes = proposal.program.len(), "candidate accepted");
                        return Ok(proposal);
                    }
                    Err(reason) => {
                        warn!(attempt, %reason, "candidate rejected by well-formedness check");
                        last_error = reason;
                    }
                },
                Err(err) => {
                    warn!(attempt, err = %err, "researcher attempt failed");
                    last_error = err;
                }
            }
        }

        Err(ProposalFailedError {
            attempts: self.retries,
            last_error,
        })
    }

    fn build_prompt(&self, input: &ProposeInput<'_>) -> anyhow::Result<String> {
        let evaluation = render_score(&input.parent.score, &input.parent.artifacts);
        let rendered = self.engine.render_researcher(&ResearcherPromptInput {
            metric: &self.metric,
            direction: self.direction,
            guidance: input.guidance,
            parent_program: &input.parent.program_text,
            evaluation,
            fenced: input.seed_blocks > 0,
        })?;
        Ok(apply_budget(&rendered, self.prompt_budget_bytes))
    }

    fn attempt(&self, prompt: &str) -> Result<Proposal, String> {
        let request = ModelRequest {
            role: "researcher",
            prompt: prompt.to_string(),
            timeout: self.timeout,
        };
        let reply = self
            .model
            .complete(&request)
            .map_err(|err| format!("{err:#}"))?;
        parse_validated::<Proposal>(&reply, RESEARCHER_SCHEMA).map_err(|err| format!("{err:#}"))
    }
}

/// Basic well-formedness: a candidate must be non-empty, and when the seed is
/// fenced it must preserve the seed's EVOLVE-BLOCK structure.
fn well_formed(candidate: &str, seed_blocks: usize) -> Result<(), String> {
    if candidate.trim().is_empty() {
        return Err("candidate program is empty".to_string());
    }
    if seed_blocks > 0 {
        if !program::validate_markers(candidate) {
            return Err("candidate has missing or unbalanced EVOLVE-BLOCK markers".to_string());
        }
        let found = program::block_count(candidate);
        if found != seed_blocks {
            return Err(format!(
                "candidate has {found} EVOLVE-BLOCK(s), seed has {seed_blocks}"
            ));
        }
    }
    Ok(())
}
