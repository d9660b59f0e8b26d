//! Lineage invariants validated when resuming from a persisted store.
//!
//! Restart is a pure function of persisted state: before a resumed run takes
//! another step, the reloaded history must satisfy every invariant the
//! controller maintained while writing it.

use crate::core::acceptance::best_so_far;
use crate::core::generation::Generation;
use crate::core::types::Direction;

/// Validate a reloaded history. Returns human-readable violations; empty
/// means the history is safe to resume from.
pub fn validate_history(
    history: &[Generation],
    metric: &str,
    direction: Direction,
) -> Vec<String> {
    let mut errors = Vec::new();

    if history.is_empty() {
        errors.push("history is empty (missing root generation)".to_string());
        return errors;
    }

    for (position, generation) in history.iter().enumerate() {
        let expected = position as u32;
        if generation.index != expected {
            errors.push(format!(
                "generation at position {position} has index {} (expected {expected})",
                generation.index
            ));
        }
    }
    // Parent checks are meaningless over a misnumbered sequence.
    if !errors.is_empty() {
        return errors;
    }

    if history[0].parent_index.is_some() {
        errors.push("root generation must not have a parent".to_string());
    }

    for generation in &history[1..] {
        let Some(parent_index) = generation.parent_index else {
            errors.push(format!(
                "generation {} has no parent (only the root may omit one)",
                generation.index
            ));
            continue;
        };
        if parent_index >= generation.index {
            errors.push(format!(
                "generation {} refers to parent {} which is not an earlier generation",
                generation.index, parent_index
            ));
            continue;
        }
        let prior = &history[..generation.index as usize];
        let best = best_so_far(prior, metric, direction);
        if parent_index != best.index {
            errors.push(format!(
                "generation {} has parent {} but the best-so-far at that time was {}",
                generation.index, parent_index, best.index
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{generation_with_metric, invalid_generation};

    #[test]
    fn well_formed_history_passes() {
        let history = vec![
            generation_with_metric(0, None, "fitness", 10.0),
            generation_with_metric(1, Some(0), "fitness", 7.0),
            generation_with_metric(2, Some(1), "fitness", 9.0),
            generation_with_metric(3, Some(1), "fitness", 6.0),
        ];
        assert!(validate_history(&history, "fitness", Direction::Minimize).is_empty());
    }

    #[test]
    fn gap_in_indices_is_reported() {
        let history = vec![
            generation_with_metric(0, None, "fitness", 10.0),
            generation_with_metric(2, Some(0), "fitness", 7.0),
        ];
        let errors = validate_history(&history, "fitness", Direction::Minimize);
        assert!(errors.iter().any(|e| e.contains("expected 1")));
    }

    #[test]
    fn parent_must_be_best_so_far_at_mutation_time() {
        // Generation 2 claims the rejected regression as its parent.
        let history = vec![
            generation_with_metric(0, None, "fitness", 7.0),
            generation_with_metric(1, Some(0), "fitness", 9.0),
            generation_with_metric(2, Some(1), "fitness", 6.0),
        ];
        let errors = validate_history(&history, "fitness", Direction::Minimize);
        assert!(errors.iter().any(|e| e.contains("best-so-far")));
    }

    #[test]
    fn bootstrap_exception_allows_invalid_root_as_parent() {
        let history = vec![
            invalid_generation(0, None),
            invalid_generation(1, Some(0)),
            generation_with_metric(2, Some(0), "fitness", 3.0),
        ];
        assert!(validate_history(&history, "fitness", Direction::Maximize).is_empty());
    }

    #[test]
    fn rooted_parent_on_root_is_reported() {
        let history = vec![generation_with_metric(0, Some(0), "fitness", 1.0)];
        let errors = validate_history(&history, "fitness", Direction::Maximize);
        assert!(errors.iter().any(|e| e.contains("root")));
    }
}
