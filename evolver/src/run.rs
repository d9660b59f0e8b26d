//! Evolution controller: the iteration state machine.
//!
//! Drives `INIT → ITERATING → {CONVERGED, MAX_ITER, AGENT_DONE, FATAL}`.
//! Each iteration is strictly sequential (advise → propose → evaluate →
//! persist) and commits through a single atomic append, so cancellation or a
//! crash between iterations leaves the store consistent and resumable.
//! Candidate-level failures are absorbed here and recorded as failed
//! generations; only infrastructure failures propagate as errors.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{info, warn};

use crate::agents::researcher::{MutationProposer, ProposeInput};
use crate::agents::supervisor::StrategyAdvisor;
use crate::core::acceptance::{RunStatus, best_so_far, check_termination};
use crate::core::digest::{DigestWindow, RunDigest};
use crate::core::generation::Generation;
use crate::core::program;
use crate::core::types::{FailureKind, Score, TerminationReason};
use crate::io::config::EvolveConfig;
use crate::io::evaluator::Evaluator;
use crate::io::model::ModelClient;
use crate::io::prompt::PromptEngine;
use crate::io::store::GenerationStore;

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Best metric met the configured target threshold.
    TargetReached,
    /// Iteration budget exhausted without reaching the target.
    MaxIterations,
    /// The supervisor declared the goal sufficiently met.
    AgentDone,
    /// The cancellation flag was observed between iterations. The run is not
    /// finalized and can be resumed.
    Cancelled,
}

impl LoopStop {
    /// Terminal reason to record in run metadata; `None` for a cancelled
    /// (resumable) run.
    pub fn termination(self) -> Option<TerminationReason> {
        match self {
            LoopStop::TargetReached => Some(TerminationReason::TargetReached),
            LoopStop::MaxIterations => Some(TerminationReason::MaxIterations),
            LoopStop::AgentDone => Some(TerminationReason::AgentDeclaredDone),
            LoopStop::Cancelled => None,
        }
    }
}

/// Summary of one persisted iteration, for progress reporting.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub index: u32,
    pub parent_index: u32,
    pub score: Score,
    /// Whether this candidate became the new best-so-far.
    pub accepted: bool,
    pub best_index: u32,
    pub best_value: Option<f64>,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvolutionOutcome {
    pub stop: LoopStop,
    /// Iterations persisted by this invocation (not the whole run).
    pub iterations_executed: u32,
    pub best_index: u32,
    pub best_value: Option<f64>,
}

/// Evaluate the seed program and persist it as generation 0.
///
/// An invalid seed is still appended: with no valid generation yet it remains
/// the mutation parent (bootstrap exception), and the run can legitimately
/// end with generation 0 as best.
pub fn bootstrap<E: Evaluator>(
    store: &mut GenerationStore,
    evaluator: &E,
    cfg: &EvolveConfig,
    seed_text: &str,
) -> Result<()> {
    if store.next_index() != 0 {
        return Err(anyhow!(
            "store already holds {} generation(s); bootstrap applies to a new run only",
            store.next_index()
        ));
    }

    let staged = store.stage_program(0, &cfg.program_extension(), seed_text)?;
    let result = evaluator.evaluate(&staged)?;
    if !result.valid {
        warn!("seed program failed evaluation; continuing under the bootstrap exception");
    }
    let score = if result.valid {
        Score::Metrics {
            metrics: result.metrics,
        }
    } else {
        Score::Failed {
            failure: FailureKind::Evaluation,
        }
    };

    let generation = Generation {
        index: 0,
        parent_index: None,
        program_text: seed_text.to_string(),
        score,
        artifacts: result.artifacts,
        rationale: None,
        guidance_used: None,
        timestamp: Utc::now().to_rfc3339(),
    };
    store.append(generation).context("persist seed generation")?;
    Ok(())
}

/// Run the evolution loop until a terminal condition or cancellation.
///
/// The store must already hold generation 0 (see [`bootstrap`]); on resume it
/// holds the reloaded history and the loop continues at `last_index + 1`.
pub fn run_evolution<M: ModelClient, E: Evaluator, F: FnMut(&IterationOutcome)>(
    store: &mut GenerationStore,
    model: &M,
    evaluator: &E,
    cfg: &EvolveConfig,
    cancel: &AtomicBool,
    mut on_iteration: F,
) -> Result<EvolutionOutcome> {
    if store.history().is_empty() {
        return Err(anyhow!("store has no generations (bootstrap a seed first)"));
    }

    let engine = PromptEngine::new();
    let proposer = MutationProposer::new(model, &engine, cfg);
    let advisor = StrategyAdvisor::new(model, &engine, cfg);
    let metric = cfg.target_metric.as_str();
    let window = DigestWindow {
        generations: cfg.digest_window,
        rationale_chars: cfg.rationale_summary_chars,
    };
    let extension = cfg.program_extension();
    let seed_blocks = program::block_count(&store.history()[0].program_text);

    let mut iterations_executed = 0u32;
    loop {
        let status = RunStatus::from_history(store.history(), metric, cfg.direction);

        // Pre-checks: a resumed run may already satisfy a terminal condition,
        // and cancellation only ever takes effect between iterations.
        if let Some(reason) = check_termination(
            &status,
            cfg.iterations,
            cfg.target_threshold,
            cfg.direction,
            false,
        ) {
            return Ok(finish(reason_to_stop(reason), iterations_executed, &status));
        }
        if cancel.load(Ordering::SeqCst) {
            info!("cancellation observed between iterations");
            return Ok(finish(LoopStop::Cancelled, iterations_executed, &status));
        }

        let parent = best_so_far(store.history(), metric, cfg.direction).clone();
        let digest = RunDigest::from_history(
            store.history(),
            metric,
            cfg.direction,
            cfg.target_threshold,
            status.best_value,
            window,
        );
        let index = store.next_index();
        let timestamp = Utc::now().to_rfc3339();

        // Advise. An unavailable supervisor costs this iteration, not the run.
        let guidance = match advisor.advise(&digest) {
            Ok(guidance) => Some(guidance),
            Err(err) => {
                warn!(iteration = index, err = %format!("{err:#}"), "supervisor unavailable, recording failed iteration");
                None
            }
        };

        // Propose and evaluate.
        let generation = match &guidance {
            None => Generation::failed(index, parent.index, FailureKind::Proposal, None, timestamp),
            Some(guidance) => {
                let input = ProposeInput {
                    parent: &parent,
                    guidance: &guidance.text,
                    seed_blocks,
                };
                match proposer.propose(&input) {
                    Err(failed) => {
                        warn!(iteration = index, %failed, "recording failed iteration");
                        Generation::failed(
                            index,
                            parent.index,
                            FailureKind::Proposal,
                            Some(guidance.text.clone()),
                            timestamp,
                        )
                    }
                    Ok(proposal) => {
                        let staged = store.stage_program(index, &extension, &proposal.program)?;
                        let result = evaluator.evaluate(&staged)?;
                        let score = if result.valid {
                            Score::Metrics {
                                metrics: result.metrics,
                            }
                        } else {
                            Score::Failed {
                                failure: FailureKind::Evaluation,
                            }
                        };
                        Generation {
                            index,
                            parent_index: Some(parent.index),
                            program_text: proposal.program,
                            score,
                            artifacts: result.artifacts,
                            rationale: Some(proposal.rationale),
                            guidance_used: Some(guidance.text.clone()),
                            timestamp,
                        }
                    }
                }
            }
        };

        // The single commit point of the iteration. A write failure here is
        // infrastructure-level and fatal to the run.
        let score = generation.score.clone();
        store.append(generation).context("persist generation")?;
        iterations_executed += 1;

        let after = RunStatus::from_history(store.history(), metric, cfg.direction);
        let accepted = after.best_index == index;
        info!(
            iteration = index,
            accepted,
            best_index = after.best_index,
            best_value = after.best_value,
            "iteration persisted"
        );
        on_iteration(&IterationOutcome {
            index,
            parent_index: parent.index,
            score,
            accepted,
            best_index: after.best_index,
            best_value: after.best_value,
        });

        let advisor_done = guidance.as_ref().is_some_and(|g| g.done);
        if let Some(reason) = check_termination(
            &after,
            cfg.iterations,
            cfg.target_threshold,
            cfg.direction,
            advisor_done,
        ) {
            return Ok(finish(reason_to_stop(reason), iterations_executed, &after));
        }
    }
}

fn reason_to_stop(reason: TerminationReason) -> LoopStop {
    match reason {
        TerminationReason::TargetReached => LoopStop::TargetReached,
        TerminationReason::MaxIterations => LoopStop::MaxIterations,
        TerminationReason::AgentDeclaredDone => LoopStop::AgentDone,
        // check_termination never yields FatalError; fatal paths propagate
        // as errors instead of loop stops.
        TerminationReason::FatalError => unreachable!("fatal errors propagate as Err"),
    }
}

fn finish(stop: LoopStop, iterations_executed: u32, status: &RunStatus) -> EvolutionOutcome {
    EvolutionOutcome {
        stop,
        iterations_executed,
        best_index: status.best_index,
        best_value: status.best_value,
    }
}
