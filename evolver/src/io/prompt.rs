//! Prompt pack builders for the two agent roles.
//!
//! Templates are rendered with section markers
//! (`<!-- section:KEY required|droppable -->`); a byte budget then drops
//! droppable sections so an oversized parent program or artifact dump cannot
//! blow up the inference request.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::digest::RunDigest;
use crate::core::types::{Artifacts, Direction, Score};

const RESEARCHER_TEMPLATE: &str = include_str!("prompts/researcher.md");
const SUPERVISOR_TEMPLATE: &str = include_str!("prompts/supervisor.md");

/// Inputs for the researcher prompt. This is the code-carrying channel; the
/// supervisor renderer deliberately accepts only a [`RunDigest`].
#[derive(Debug, Clone)]
pub struct ResearcherPromptInput<'a> {
    pub metric: &'a str,
    pub direction: Direction,
    pub guidance: &'a str,
    pub parent_program: &'a str,
    /// Pre-rendered evaluation summary of the parent (see [`render_score`]).
    pub evaluation: String,
    /// Whether the seed program carries EVOLVE-BLOCK markers.
    pub fenced: bool,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("researcher", RESEARCHER_TEMPLATE)
            .expect("researcher template should be valid");
        env.add_template("supervisor", SUPERVISOR_TEMPLATE)
            .expect("supervisor template should be valid");
        Self { env }
    }

    pub fn render_researcher(&self, input: &ResearcherPromptInput<'_>) -> Result<String> {
        let template = self.env.get_template("researcher")?;
        let rendered = template.render(context! {
            metric => input.metric,
            direction => input.direction.as_str(),
            guidance => input.guidance.trim(),
            evaluation => (!input.evaluation.trim().is_empty()).then(|| input.evaluation.trim()),
            parent_program => input.parent_program,
            fenced => input.fenced,
        })?;
        Ok(rendered)
    }

    /// The supervisor prompt is built from the digest alone: there is no
    /// parameter through which program source could arrive.
    pub fn render_supervisor(&self, digest: &RunDigest) -> Result<String> {
        let template = self.env.get_template("supervisor")?;
        let rendered = template.render(context! { digest => digest })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a generation's outcome for the researcher prompt.
pub fn render_score(score: &Score, artifacts: &Artifacts) -> String {
    let mut lines = Vec::new();
    match score {
        Score::Metrics { metrics } => {
            lines.push("Metrics:".to_string());
            for (name, value) in metrics {
                lines.push(format!("  {name}: {value:.4}"));
            }
        }
        Score::Failed { .. } => {
            lines.push("The current program has no valid evaluation.".to_string());
        }
    }
    for key in ["diagnostic", "stderr"] {
        if let Some(value) = artifacts.get(key).and_then(|v| v.as_str())
            && !value.trim().is_empty()
        {
            lines.push(format!("{key}:"));
            lines.push(value.trim().to_string());
        }
    }
    lines.join("\n")
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in matches.iter().enumerate() {
        let key = caps.get(1).unwrap().as_str().to_string();
        let required = caps.get(2).unwrap().as_str() == "required";
        let start = caps.get(0).unwrap().end();
        let end = matches
            .get(i + 1)
            .map(|m| m.get(0).unwrap().start())
            .unwrap_or(rendered.len());

        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key,
                required,
                content,
            });
        }
    }

    sections
}

/// Drop order when a rendered prompt exceeds its budget.
const DROP_ORDER: [&str; 2] = ["evaluation", "rationales"];

/// Join sections into the final prompt, dropping droppable sections (in
/// [`DROP_ORDER`]) until the budget is met. Required sections are never
/// dropped, so the result may still exceed the budget when they alone do.
pub fn apply_budget(rendered: &str, budget_bytes: usize) -> String {
    let mut sections = parse_sections(rendered);

    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(&sections) <= budget_bytes {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            tracing::debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropping prompt section to fit budget"
            );
            sections.remove(idx);
        }
    }

    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
