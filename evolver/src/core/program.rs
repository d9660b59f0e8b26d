//! EVOLVE-BLOCK marker parsing.
//!
//! Seed programs may fence the regions the researcher is expected to rewrite
//! with `# EVOLVE-BLOCK-START` / `# EVOLVE-BLOCK-END` comment lines. The
//! engine never interprets program semantics; it only checks that candidates
//! keep the marker structure of the seed so everything outside the fences
//! survives each mutation.

use anyhow::{Result, bail};

pub const BLOCK_START_MARKER: &str = "# EVOLVE-BLOCK-START";
pub const BLOCK_END_MARKER: &str = "# EVOLVE-BLOCK-END";

/// One fenced region, with 0-based line numbers of the marker lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolveBlock {
    pub id: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

pub fn has_markers(text: &str) -> bool {
    text.contains(BLOCK_START_MARKER)
}

/// True when the program has at least one marker pair, counts balance, and
/// every end marker closes an open start.
pub fn validate_markers(text: &str) -> bool {
    let mut open = 0usize;
    let mut pairs = 0usize;
    for line in text.lines() {
        if line.contains(BLOCK_START_MARKER) {
            open += 1;
        } else if line.contains(BLOCK_END_MARKER) {
            if open == 0 {
                return false;
            }
            open -= 1;
            pairs += 1;
        }
    }
    open == 0 && pairs > 0
}

/// Number of well-formed marker pairs; 0 for unfenced programs.
pub fn block_count(text: &str) -> usize {
    if !validate_markers(text) {
        return 0;
    }
    text.lines()
        .filter(|line| line.contains(BLOCK_START_MARKER))
        .count()
}

/// Extract all fenced regions, in document order.
pub fn extract_blocks(text: &str) -> Result<Vec<EvolveBlock>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if !lines[i].contains(BLOCK_START_MARKER) {
            i += 1;
            continue;
        }
        let start_line = i;
        let Some(end_line) = lines[start_line + 1..]
            .iter()
            .position(|line| line.contains(BLOCK_END_MARKER))
            .map(|offset| start_line + 1 + offset)
        else {
            bail!(
                "block starting at line {} has no matching end marker",
                start_line + 1
            );
        };
        let content = lines[start_line + 1..end_line].join("\n");
        blocks.push(EvolveBlock {
            id: blocks.len(),
            start_line,
            end_line,
            content,
        });
        i = end_line + 1;
    }

    Ok(blocks)
}

/// True when `candidate` carries the same number of well-formed blocks as
/// `seed`. Unfenced seeds accept any candidate.
pub fn same_structure(seed: &str, candidate: &str) -> bool {
    let expected = block_count(seed);
    if expected == 0 {
        return true;
    }
    validate_markers(candidate) && block_count(candidate) == expected
}
