//! Best-so-far selection, acceptance policy, and termination checks.
//!
//! The lineage is a best-so-far pointer: the next iteration always mutates
//! from the best generation, never from the most recent candidate. These
//! functions are pure over persisted history so a resumed run reconstructs
//! identical state.

use crate::core::generation::Generation;
use crate::core::types::{Direction, TerminationReason};

/// Process-scoped view of a run, reconstructed entirely from history.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatus {
    /// Index of the current best-so-far generation.
    pub best_index: u32,
    /// Designated metric of the best generation, when it has one.
    pub best_value: Option<f64>,
    /// Index the next appended generation must take.
    pub next_index: u32,
    /// Mutation iterations completed so far (the root does not count).
    pub iterations_completed: u32,
    /// Generations persisted with a failure marker.
    pub failed_generations: u32,
}

impl RunStatus {
    /// Reconstruct run state from non-empty history.
    pub fn from_history(history: &[Generation], metric: &str, direction: Direction) -> Self {
        let best = best_so_far(history, metric, direction);
        let failed = history.iter().filter(|g| !g.is_valid()).count() as u32;
        Self {
            best_index: best.index,
            best_value: best.metric(metric),
            next_index: history.len() as u32,
            iterations_completed: history.len().saturating_sub(1) as u32,
            failed_generations: failed,
        }
    }
}

/// Select the best-so-far generation.
///
/// Only valid generations carrying the designated metric are eligible; among
/// them the strictly best value wins and ties keep the earliest index. When
/// no generation is eligible the root is returned (bootstrap exception), so a
/// run always has a mutation parent even if every mutation failed.
///
/// Panics if `history` is empty; the store guarantees a root generation.
pub fn best_so_far<'a>(
    history: &'a [Generation],
    metric: &str,
    direction: Direction,
) -> &'a Generation {
    let mut best: Option<(&Generation, f64)> = None;
    for generation in history {
        let Some(value) = generation.metric(metric) else {
            continue;
        };
        match best {
            Some((_, incumbent)) if !direction.improves(value, incumbent) => {}
            _ => best = Some((generation, value)),
        }
    }
    best.map(|(generation, _)| generation)
        .unwrap_or_else(|| &history[0])
}

/// Termination decision after an iteration has been persisted.
///
/// Precedence: target reached beats the advisor's `done`, which beats the
/// iteration budget, so `MaxIterations` is reported only when nothing else
/// fired on the final iteration.
pub fn check_termination(
    status: &RunStatus,
    max_iterations: u32,
    target_threshold: Option<f64>,
    direction: Direction,
    advisor_done: bool,
) -> Option<TerminationReason> {
    if let (Some(value), Some(threshold)) = (status.best_value, target_threshold)
        && direction.meets(value, threshold)
    {
        return Some(TerminationReason::TargetReached);
    }
    if advisor_done {
        return Some(TerminationReason::AgentDeclaredDone);
    }
    if status.iterations_completed >= max_iterations {
        return Some(TerminationReason::MaxIterations);
    }
    None
}
