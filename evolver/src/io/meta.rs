//! Per-run metadata (`run.json`).
//!
//! Snapshot of the resolved configuration plus run lifecycle stamps. A run is
//! finalized exactly once; an interrupted run keeps `termination = null` and
//! stays resumable.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::TerminationReason;
use crate::io::config::EvolveConfig;

pub const RUN_META_FILE: &str = "run.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMeta {
    /// RFC 3339 UTC.
    pub started_at: String,
    /// Resolved configuration the run was started with; resume reuses it
    /// verbatim so the acceptance policy never changes mid-lineage.
    pub config: EvolveConfig,
    pub termination: Option<TerminationReason>,
    pub finished_at: Option<String>,
}

impl RunMeta {
    pub fn new(started_at: String, config: EvolveConfig) -> Self {
        Self {
            started_at,
            config,
            termination: None,
            finished_at: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.termination.is_some()
    }
}

pub fn run_meta_path(run_dir: &Path) -> PathBuf {
    run_dir.join(RUN_META_FILE)
}

pub fn load_run_meta(path: &Path) -> Result<RunMeta> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run meta {}", path.display()))?;
    let meta: RunMeta = serde_json::from_str(&contents)
        .with_context(|| format!("parse run meta {}", path.display()))?;
    Ok(meta)
}

/// Atomically write run metadata (temp file + rename).
pub fn write_run_meta(path: &Path, meta: &RunMeta) -> Result<()> {
    debug!(path = %path.display(), termination = ?meta.termination, "writing run meta");
    let mut buf = serde_json::to_string_pretty(meta)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp run meta {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace run meta {}", path.display()))?;
    Ok(())
}

/// Record the terminal state of a run. Fails if the run was already
/// finalized: a finalized run is never mutated again.
pub fn finalize_run_meta(
    path: &Path,
    reason: TerminationReason,
    finished_at: String,
) -> Result<()> {
    let mut meta = load_run_meta(path)?;
    if meta.is_finalized() {
        return Err(anyhow!(
            "run already finalized as {:?}",
            meta.termination.expect("checked above")
        ));
    }
    meta.termination = Some(reason);
    meta.finished_at = Some(finished_at);
    write_run_meta(path, &meta)
}
