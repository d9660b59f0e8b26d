//! LLM-driven iterative program optimization CLI.
//!
//! `evolver run` seeds a run directory from an initial program, then drives
//! the evolution loop: supervisor guidance, researcher mutation, external
//! evaluation, acceptance, durable persistence. `evolver resume` continues an
//! interrupted run purely from its persisted records; `history` and `best`
//! expose them for offline analysis without re-evaluation.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use evolver::core::invariants::validate_history;
use evolver::core::program;
use evolver::core::types::{FailureKind, Score, TerminationReason};
use evolver::exit_codes;
use evolver::io::config::{EvolveConfig, load_config};
use evolver::io::evaluator::ScriptEvaluator;
use evolver::io::meta::{RunMeta, finalize_run_meta, load_run_meta, run_meta_path, write_run_meta};
use evolver::io::model::CommandModelClient;
use evolver::io::store::GenerationStore;
use evolver::logging;
use evolver::run::{EvolutionOutcome, LoopStop, bootstrap, run_evolution};

#[derive(Parser)]
#[command(
    name = "evolver",
    version,
    about = "Iteratively improve a program with an LLM researcher/supervisor loop"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new evolution run from a seed program.
    Run(RunArgs),
    /// Continue an interrupted run from its persisted records.
    Resume {
        #[arg(long)]
        run_dir: PathBuf,
    },
    /// Print one JSON record per generation for offline analysis.
    History {
        #[arg(long)]
        run_dir: PathBuf,
    },
    /// Print the best generation under the run's acceptance policy.
    Best {
        #[arg(long)]
        run_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the seed program (becomes generation 0).
    #[arg(long)]
    initial_program: Option<PathBuf>,

    /// Path to the evaluator script.
    #[arg(long)]
    evaluator: Option<PathBuf>,

    /// Maximum number of mutation iterations.
    #[arg(long)]
    iterations: Option<u32>,

    /// Run directory (default: evolution_<timestamp> beside the seed).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Optional TOML config; CLI flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Metric driving acceptance and the target threshold.
    #[arg(long)]
    target_metric: Option<String>,

    /// 'maximize' or 'minimize'.
    #[arg(long)]
    direction: Option<String>,

    /// Terminate early once the target metric meets this value.
    #[arg(long)]
    target_threshold: Option<f64>,

    /// Inference provider handed to the model command.
    #[arg(long)]
    provider: Option<String>,

    /// Model identifier handed to the model command.
    #[arg(long)]
    model_id: Option<String>,
}

fn main() {
    logging::init();
    match dispatch() {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit(exit_codes::INVALID);
        }
    }
}

fn dispatch() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Resume { run_dir } => cmd_resume(&run_dir),
        Command::History { run_dir } => cmd_history(&run_dir),
        Command::Best { run_dir } => cmd_best(&run_dir),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => EvolveConfig::default(),
    };
    apply_overrides(&mut cfg, &args)?;
    cfg.validate()?;

    let seed_text = read_input_file(&cfg.initial_program, "initial program")?;
    ensure_input_file(&cfg.evaluator, "evaluator")?;
    match program::block_count(&seed_text) {
        0 => warn!("seed program has no EVOLVE-BLOCK markers; the whole program is mutable"),
        count => info!(count, "seed program carries EVOLVE-BLOCK markers"),
    }

    let run_dir = match args.output_dir {
        Some(dir) => dir,
        None => default_run_dir(&cfg.initial_program),
    };
    info!(run_dir = %run_dir.display(), "starting evolution run");

    let mut store = GenerationStore::create(&run_dir)
        .with_context(|| format!("create run directory {}", run_dir.display()))?;
    let meta = RunMeta::new(Utc::now().to_rfc3339(), cfg.clone());
    write_run_meta(&run_meta_path(&run_dir), &meta)?;

    let evaluator = ScriptEvaluator::from_config(&cfg.evaluation, &cfg.evaluator);
    if let Err(err) = bootstrap(&mut store, &evaluator, &cfg, &seed_text) {
        let _ = finalize_run_meta(
            &run_meta_path(&run_dir),
            TerminationReason::FatalError,
            Utc::now().to_rfc3339(),
        );
        return Err(err.context("bootstrap seed generation"));
    }

    drive(&mut store, &cfg)
}

fn cmd_resume(run_dir: &Path) -> Result<i32> {
    let meta = load_run_meta(&run_meta_path(run_dir))?;
    if meta.is_finalized() {
        bail!(
            "run in {} is already finalized ({:?})",
            run_dir.display(),
            meta.termination.expect("finalized")
        );
    }
    let cfg = meta.config;
    cfg.validate()?;

    let mut store = GenerationStore::open(run_dir)
        .with_context(|| format!("reopen run directory {}", run_dir.display()))?;
    let errors = validate_history(store.history(), &cfg.target_metric, cfg.direction);
    if !errors.is_empty() {
        bail!("persisted history is not resumable:\n- {}", errors.join("\n- "));
    }
    info!(
        run_dir = %run_dir.display(),
        next_index = store.next_index(),
        "resuming evolution run"
    );

    drive(&mut store, &cfg)
}

/// Shared tail of `run` and `resume`: loop, finalize, summarize.
fn drive(store: &mut GenerationStore, cfg: &EvolveConfig) -> Result<i32> {
    let run_dir = store.run_dir().to_path_buf();
    let evaluator = ScriptEvaluator::from_config(&cfg.evaluation, &cfg.evaluator);
    let model = CommandModelClient::from_config(cfg);
    let cancel = AtomicBool::new(false);
    let metric = cfg.target_metric.clone();

    let outcome = match run_evolution(store, &model, &evaluator, cfg, &cancel, |iteration| {
        println!(
            "iter {:>3}: {:<28} best=g{}{}",
            iteration.index,
            describe_score(&iteration.score, &metric, iteration.accepted),
            iteration.best_index,
            iteration
                .best_value
                .map(|v| format!(" ({v:.4})"))
                .unwrap_or_default(),
        );
    }) {
        Ok(outcome) => outcome,
        Err(err) => {
            // Never silently drop the failure: record the fatal state before
            // surfacing it.
            let _ = finalize_run_meta(
                &run_meta_path(&run_dir),
                TerminationReason::FatalError,
                Utc::now().to_rfc3339(),
            );
            return Err(err);
        }
    };

    if let Some(reason) = outcome.stop.termination() {
        finalize_run_meta(&run_meta_path(&run_dir), reason, Utc::now().to_rfc3339())?;
    }
    print_summary(&run_dir, &outcome);
    Ok(stop_exit_code(outcome.stop))
}

fn cmd_history(run_dir: &Path) -> Result<i32> {
    let store = GenerationStore::open(run_dir)?;
    for generation in store.history() {
        let row = HistoryRow {
            index: generation.index,
            parent_index: generation.parent_index,
            score: &generation.score,
            timestamp: &generation.timestamp,
        };
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(exit_codes::OK)
}

fn cmd_best(run_dir: &Path) -> Result<i32> {
    let meta = load_run_meta(&run_meta_path(run_dir))?;
    let store = GenerationStore::open(run_dir)?;
    let best = store
        .best(&meta.config.target_metric, meta.config.direction)
        .ok_or_else(|| anyhow!("run in {} has no generations", run_dir.display()))?;
    let row = HistoryRow {
        index: best.index,
        parent_index: best.parent_index,
        score: &best.score,
        timestamp: &best.timestamp,
    };
    println!("{}", serde_json::to_string_pretty(&row)?);
    Ok(exit_codes::OK)
}

/// Self-sufficient per-generation record for plotting and analysis, without
/// the (potentially large) program text.
#[derive(Serialize)]
struct HistoryRow<'a> {
    index: u32,
    parent_index: Option<u32>,
    score: &'a Score,
    timestamp: &'a str,
}

fn apply_overrides(cfg: &mut EvolveConfig, args: &RunArgs) -> Result<()> {
    if let Some(path) = &args.initial_program {
        cfg.initial_program = path.clone();
    }
    if let Some(path) = &args.evaluator {
        cfg.evaluator = path.clone();
    }
    if let Some(iterations) = args.iterations {
        cfg.iterations = iterations;
    }
    if let Some(metric) = &args.target_metric {
        cfg.target_metric = metric.clone();
    }
    if let Some(direction) = &args.direction {
        cfg.direction = direction.parse()?;
    }
    if let Some(threshold) = args.target_threshold {
        cfg.target_threshold = Some(threshold);
    }
    if let Some(provider) = &args.provider {
        cfg.provider = provider.clone();
    }
    if let Some(model_id) = &args.model_id {
        cfg.model_id = model_id.clone();
    }
    Ok(())
}

fn read_input_file(path: &Path, description: &str) -> Result<String> {
    if !path.is_file() {
        bail!("{description} is not a readable file: {}", path.display());
    }
    fs::read_to_string(path).with_context(|| format!("read {description} {}", path.display()))
}

fn ensure_input_file(path: &Path, description: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{description} is not a readable file: {}", path.display());
    }
    Ok(())
}

fn default_run_dir(initial_program: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let parent = initial_program.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("evolution_{stamp}"))
}

fn describe_score(score: &Score, metric: &str, accepted: bool) -> String {
    match score {
        Score::Metrics { .. } => {
            let value = score
                .metric(metric)
                .map(|v| format!("{metric}={v:.4}"))
                .unwrap_or_else(|| format!("{metric}=missing"));
            let verdict = if accepted { "accepted" } else { "rejected" };
            format!("{value} {verdict}")
        }
        Score::Failed { failure } => match failure {
            FailureKind::Proposal => "proposal failed".to_string(),
            FailureKind::Evaluation => "invalid candidate".to_string(),
        },
    }
}

fn print_summary(run_dir: &Path, outcome: &EvolutionOutcome) {
    let stop = match outcome.stop {
        LoopStop::TargetReached => "target reached",
        LoopStop::MaxIterations => "iteration budget exhausted",
        LoopStop::AgentDone => "supervisor declared done",
        LoopStop::Cancelled => "cancelled (resumable)",
    };
    println!(
        "{stop}: best generation g{}{} after {} iteration(s)",
        outcome.best_index,
        outcome
            .best_value
            .map(|v| format!(" ({v:.4})"))
            .unwrap_or_default(),
        outcome.iterations_executed,
    );
    println!("run directory: {}", run_dir.display());
}

fn stop_exit_code(stop: LoopStop) -> i32 {
    match stop {
        LoopStop::TargetReached | LoopStop::AgentDone | LoopStop::Cancelled => exit_codes::OK,
        LoopStop::MaxIterations => exit_codes::BUDGET_EXHAUSTED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolver::core::types::Direction;

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from([
            "evolver",
            "run",
            "--initial-program",
            "seed.py",
            "--evaluator",
            "eval.py",
            "--iterations",
            "5",
            "--direction",
            "minimize",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.initial_program.as_deref(), Some(Path::new("seed.py")));
        assert_eq!(args.iterations, Some(5));

        let mut cfg = EvolveConfig::default();
        apply_overrides(&mut cfg, &args).expect("overrides");
        assert_eq!(cfg.direction, Direction::Minimize);
        assert_eq!(cfg.iterations, 5);
    }

    #[test]
    fn default_run_dir_sits_beside_the_seed() {
        let dir = default_run_dir(Path::new("examples/sorting/seed.py"));
        assert!(dir.starts_with("examples/sorting"));
        assert!(
            dir.file_name()
                .and_then(|n| n.to_str())
                .expect("name")
                .starts_with("evolution_")
        );
    }

    #[test]
    fn score_descriptions_are_stable() {
        let score = Score::Failed {
            failure: FailureKind::Proposal,
        };
        assert_eq!(describe_score(&score, "fitness", false), "proposal failed");
    }
}
