//! End-to-end loop behavior with scripted collaborators.
//!
//! Each iteration consumes one supervisor reply, then (unless the proposal
//! fails) one researcher reply and one evaluation result, in strict order.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use evolver::core::acceptance::RunStatus;
use evolver::core::invariants::validate_history;
use evolver::core::types::{Direction, EvaluationResult, FailureKind, Score, TerminationReason};
use evolver::io::config::EvolveConfig;
use evolver::io::store::GenerationStore;
use evolver::run::{LoopStop, bootstrap, run_evolution};
use evolver::test_support::{
    ScriptedEvaluator, ScriptedModelClient, ScriptedReply, researcher_reply, supervisor_reply,
    test_config, valid_result,
};

fn config(iterations: u32, direction: Direction, threshold: Option<f64>) -> EvolveConfig {
    let mut cfg = test_config();
    cfg.iterations = iterations;
    cfg.target_metric = "fitness".to_string();
    cfg.direction = direction;
    cfg.target_threshold = threshold;
    cfg
}

fn seeded_store(dir: &Path, cfg: &EvolveConfig, seed_fitness: f64) -> GenerationStore {
    let mut store = GenerationStore::create(dir).expect("create store");
    let evaluator = ScriptedEvaluator::new();
    evaluator.push(valid_result("fitness", seed_fitness));
    bootstrap(&mut store, &evaluator, cfg, "seed program\n").expect("bootstrap");
    store
}

fn push_normal_iteration(model: &ScriptedModelClient, evaluator: &ScriptedEvaluator, score: f64) {
    model.push_supervisor(supervisor_reply("keep improving", false));
    model.push_researcher(researcher_reply("candidate program\n", "a focused tweak"));
    evaluator.push(valid_result("fitness", score));
}

#[test]
fn regressions_are_persisted_but_the_lineage_mutates_from_best() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(3, Direction::Minimize, None);
    let mut store = seeded_store(temp.path(), &cfg, 10.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    push_normal_iteration(&model, &evaluator, 7.0);
    push_normal_iteration(&model, &evaluator, 9.0);
    push_normal_iteration(&model, &evaluator, 6.0);

    let cancel = AtomicBool::new(false);
    let mut accepted_flags = Vec::new();
    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |iteration| {
        accepted_flags.push((iteration.index, iteration.accepted));
    })
    .expect("run");

    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    assert_eq!(outcome.iterations_executed, 3);
    assert_eq!(
        outcome.stop.termination(),
        Some(TerminationReason::MaxIterations)
    );

    // Indices are contiguous for any accept/reject sequence.
    let history = store.history();
    assert_eq!(history.len(), 4);
    for (position, generation) in history.iter().enumerate() {
        assert_eq!(generation.index, position as u32);
    }

    // The regression at g2 was persisted but rejected; g3 mutated from g1.
    assert_eq!(accepted_flags, vec![(1, true), (2, false), (3, true)]);
    assert_eq!(history[2].parent_index, Some(1));
    assert_eq!(history[3].parent_index, Some(1));
    assert!(validate_history(history, "fitness", Direction::Minimize).is_empty());
}

#[test]
fn target_threshold_terminates_before_the_iteration_budget() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(10, Direction::Minimize, Some(5.0));
    let mut store = seeded_store(temp.path(), &cfg, 10.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    push_normal_iteration(&model, &evaluator, 8.0);
    push_normal_iteration(&model, &evaluator, 6.0);
    push_normal_iteration(&model, &evaluator, 5.0);

    let cancel = AtomicBool::new(false);
    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::TargetReached);
    assert_eq!(outcome.iterations_executed, 3);
    assert_eq!(outcome.best_value, Some(5.0));
    assert_eq!(store.history().len(), 4);
}

#[test]
fn exhausted_proposal_retries_cost_one_iteration_not_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(3, Direction::Minimize, None);
    let mut store = seeded_store(temp.path(), &cfg, 10.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();

    // Iteration 1 improves to 7.
    push_normal_iteration(&model, &evaluator, 7.0);
    // Iteration 2: every researcher attempt returns garbage.
    model.push_supervisor(supervisor_reply("try something else", false));
    for _ in 0..cfg.proposal_retries {
        model.push_researcher(ScriptedReply::Json("not a json object".to_string()));
    }
    // Iteration 3 proceeds normally from the last valid best.
    push_normal_iteration(&model, &evaluator, 6.0);

    let cancel = AtomicBool::new(false);
    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    let history = store.history();
    assert_eq!(history.len(), 4);
    assert_eq!(
        history[2].score,
        Score::Failed {
            failure: FailureKind::Proposal
        }
    );
    assert!(history[2].program_text.is_empty());
    assert_eq!(history[2].parent_index, Some(1));
    assert_eq!(history[3].parent_index, Some(1));
    assert_eq!(outcome.best_index, 3);
}

#[test]
fn supervisor_done_signal_terminates_with_target_unmet() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(10, Direction::Minimize, Some(5.0));
    let mut store = seeded_store(temp.path(), &cfg, 10.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    push_normal_iteration(&model, &evaluator, 8.0);
    // The supervisor judges "close enough" well before the threshold.
    model.push_supervisor(supervisor_reply("good enough, stop here", true));
    model.push_researcher(researcher_reply("final candidate\n", "polish"));
    evaluator.push(valid_result("fitness", 7.5));

    let cancel = AtomicBool::new(false);
    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::AgentDone);
    assert_eq!(
        outcome.stop.termination(),
        Some(TerminationReason::AgentDeclaredDone)
    );
    // The declaring iteration is still persisted, and best is best-so-far.
    assert_eq!(store.history().len(), 3);
    assert_eq!(outcome.best_index, 2);
    assert_eq!(outcome.best_value, Some(7.5));
}

#[test]
fn invalid_candidates_never_become_best_or_parents() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(2, Direction::Maximize, None);
    let mut store = seeded_store(temp.path(), &cfg, 1.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    model.push_supervisor(supervisor_reply("push harder", false));
    model.push_researcher(researcher_reply("crashy candidate\n", "risky change"));
    evaluator.push(EvaluationResult::invalid("candidate raised an exception"));
    push_normal_iteration(&model, &evaluator, 2.0);

    let cancel = AtomicBool::new(false);
    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("run");

    let history = store.history();
    assert!(!history[1].is_valid());
    // The invalid candidate kept its program text for inspection but never
    // entered the lineage.
    assert!(!history[1].program_text.is_empty());
    assert_eq!(history[2].parent_index, Some(0));
    assert_eq!(outcome.best_index, 2);
}

#[test]
fn unavailable_supervisor_is_absorbed_at_the_iteration_boundary() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(2, Direction::Minimize, None);
    let mut store = seeded_store(temp.path(), &cfg, 10.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    model.push_supervisor(ScriptedReply::Fail("rate limited".to_string()));
    push_normal_iteration(&model, &evaluator, 9.0);

    let cancel = AtomicBool::new(false);
    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    let history = store.history();
    assert_eq!(history.len(), 3);
    assert_eq!(
        history[1].score,
        Score::Failed {
            failure: FailureKind::Proposal
        }
    );
    assert_eq!(history[1].guidance_used, None);
    assert_eq!(history[2].parent_index, Some(0));
}

#[test]
fn a_run_where_every_mutation_fails_still_yields_generation_zero_as_best() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(2, Direction::Minimize, None);
    let mut store = seeded_store(temp.path(), &cfg, 10.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    for _ in 0..2 {
        model.push_supervisor(ScriptedReply::Fail("provider outage".to_string()));
    }

    let cancel = AtomicBool::new(false);
    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    assert_eq!(outcome.best_index, 0);
    assert_eq!(outcome.best_value, Some(10.0));
    assert_eq!(store.history().len(), 3);
}

#[test]
fn cancellation_takes_effect_between_iterations_and_is_resumable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(5, Direction::Minimize, None);
    let mut store = seeded_store(temp.path(), &cfg, 10.0);

    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    let cancel = AtomicBool::new(false);
    cancel.store(true, Ordering::SeqCst);

    let outcome = run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::Cancelled);
    assert_eq!(outcome.stop.termination(), None);
    assert_eq!(outcome.iterations_executed, 0);
    // Nothing partial was persisted; the run resumes where it stopped.
    assert_eq!(store.history().len(), 1);
}

#[test]
fn resume_reconstructs_identical_state_from_persisted_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(3, Direction::Minimize, None);
    let (best_before, next_before) = {
        let mut store = seeded_store(temp.path(), &cfg, 10.0);
        let model = ScriptedModelClient::new();
        let evaluator = ScriptedEvaluator::new();
        push_normal_iteration(&model, &evaluator, 7.0);
        push_normal_iteration(&model, &evaluator, 9.0);
        push_normal_iteration(&model, &evaluator, 8.0);

        let cancel = AtomicBool::new(false);
        run_evolution(&mut store, &model, &evaluator, &cfg, &cancel, |_| {}).expect("run");
        let best = store.best("fitness", Direction::Minimize).expect("best");
        (best.index, store.next_index())
    };

    let mut reopened = GenerationStore::open(temp.path()).expect("open");
    assert!(validate_history(reopened.history(), "fitness", Direction::Minimize).is_empty());
    let best = reopened.best("fitness", Direction::Minimize).expect("best");
    assert_eq!(best.index, best_before);
    assert_eq!(reopened.next_index(), next_before);

    let status = RunStatus::from_history(reopened.history(), "fitness", Direction::Minimize);
    assert_eq!(status.best_index, best_before);

    // Resuming with the budget already spent terminates immediately with the
    // same best and zero further iterations.
    let model = ScriptedModelClient::new();
    let evaluator = ScriptedEvaluator::new();
    let cancel = AtomicBool::new(false);
    let outcome = run_evolution(&mut reopened, &model, &evaluator, &cfg, &cancel, |_| {})
        .expect("resume");
    assert_eq!(outcome.stop, LoopStop::MaxIterations);
    assert_eq!(outcome.iterations_executed, 0);
    assert_eq!(outcome.best_index, best_before);
}
