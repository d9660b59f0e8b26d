//! Durable, append-only generation storage.
//!
//! One JSON record per generation under `<run_dir>/generations/`, plus a
//! human-inspectable program copy under `<run_dir>/programs/`. Append is the
//! only mutation and commits atomically (temp file + rename), so a crash at
//! any point never leaves a partial or overwritten record.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::acceptance::best_so_far;
use crate::core::generation::Generation;
use crate::core::types::Direction;

const GENERATIONS_DIR: &str = "generations";
const PROGRAMS_DIR: &str = "programs";

/// Attempt to write an index that already holds a persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateIndexError {
    pub index: u32,
}

impl fmt::Display for DuplicateIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "generation {} is already persisted", self.index)
    }
}

impl std::error::Error for DuplicateIndexError {}

/// Append-only record store for one evolution run.
pub struct GenerationStore {
    run_dir: PathBuf,
    generations: Vec<Generation>,
}

impl GenerationStore {
    /// Create the store layout for a new run. Fails if the run directory
    /// already holds generation records.
    pub fn create(run_dir: &Path) -> Result<Self> {
        let generations_dir = run_dir.join(GENERATIONS_DIR);
        fs::create_dir_all(&generations_dir)
            .with_context(|| format!("create {}", generations_dir.display()))?;
        let programs_dir = run_dir.join(PROGRAMS_DIR);
        fs::create_dir_all(&programs_dir)
            .with_context(|| format!("create {}", programs_dir.display()))?;

        let existing = fs::read_dir(&generations_dir)
            .with_context(|| format!("read {}", generations_dir.display()))?
            .count();
        if existing > 0 {
            return Err(anyhow!(
                "{} already contains generation records (use resume)",
                generations_dir.display()
            ));
        }

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            generations: Vec::new(),
        })
    }

    /// Reopen a persisted run, reconstructing the in-memory lineage.
    ///
    /// Records are sorted by index and must be contiguous from 0; semantic
    /// lineage checks are the caller's concern
    /// (see [`crate::core::invariants::validate_history`]).
    pub fn open(run_dir: &Path) -> Result<Self> {
        let generations_dir = run_dir.join(GENERATIONS_DIR);
        let entries = fs::read_dir(&generations_dir)
            .with_context(|| format!("read {}", generations_dir.display()))?;

        let mut generations = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("read {}", generations_dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read record {}", path.display()))?;
            let generation: Generation = serde_json::from_str(&contents)
                .with_context(|| format!("parse record {}", path.display()))?;
            generations.push(generation);
        }

        generations.sort_by_key(|g| g.index);
        for (position, generation) in generations.iter().enumerate() {
            if generation.index != position as u32 {
                return Err(anyhow!(
                    "generation records are not contiguous: found index {} at position {}",
                    generation.index,
                    position
                ));
            }
        }

        debug!(run_dir = %run_dir.display(), count = generations.len(), "store reopened");
        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            generations,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn next_index(&self) -> u32 {
        self.generations.len() as u32
    }

    /// Persist a generation. The only mutation this store supports.
    ///
    /// The record's index must equal [`Self::next_index`]; re-writing an
    /// existing index fails with [`DuplicateIndexError`] (downcastable).
    pub fn append(&mut self, generation: Generation) -> Result<u32> {
        let index = generation.index;
        let next = self.next_index();
        if index < next {
            return Err(anyhow::Error::new(DuplicateIndexError { index }));
        }
        if index > next {
            return Err(anyhow!(
                "cannot append generation {index}: next expected index is {next}"
            ));
        }
        let path = self.record_path(index);
        if path.exists() {
            return Err(anyhow::Error::new(DuplicateIndexError { index }));
        }

        let mut buf = serde_json::to_string_pretty(&generation)?;
        buf.push('\n');
        write_atomic(&path, &buf)?;

        debug!(index, path = %path.display(), "generation persisted");
        self.generations.push(generation);
        Ok(index)
    }

    pub fn get(&self, index: u32) -> Option<&Generation> {
        self.generations.get(index as usize)
    }

    /// All generations, ordered by index. Records are self-sufficient
    /// (metrics embedded) so this feeds offline analysis without
    /// re-evaluation.
    pub fn history(&self) -> &[Generation] {
        &self.generations
    }

    /// Best generation under the acceptance policy, or `None` while empty.
    pub fn best(&self, metric: &str, direction: Direction) -> Option<&Generation> {
        if self.generations.is_empty() {
            return None;
        }
        Some(best_so_far(&self.generations, metric, direction))
    }

    /// Write a candidate program where the evaluator (and a human) can read
    /// it. Staged files are working copies; the appended record remains the
    /// source of truth.
    pub fn stage_program(&self, index: u32, extension: &str, text: &str) -> Result<PathBuf> {
        let path = self
            .run_dir
            .join(PROGRAMS_DIR)
            .join(format!("gen_{index:05}.{extension}"));
        fs::write(&path, text).with_context(|| format!("stage program {}", path.display()))?;
        Ok(path)
    }

    fn record_path(&self, index: u32) -> PathBuf {
        self.run_dir
            .join(GENERATIONS_DIR)
            .join(format!("gen_{index:05}.json"))
    }
}

/// Atomic write discipline: temp file in the same directory, then rename.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp record {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace record {}", path.display()))?;
    Ok(())
}
