//! Code-free run summaries for the strategy advisor.
//!
//! [`RunDigest`] is a separate type, not a filtered view of
//! [`crate::core::generation::Generation`]: it has no field that could hold
//! program text, so source cannot reach the supervisor channel by
//! construction.

use serde::Serialize;

use crate::core::generation::Generation;
use crate::core::types::Direction;

/// One point of the recent metric trend. `None` marks a failed or invalid
/// generation, which the advisor can still see as a gap in the series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub index: u32,
    pub value: Option<f64>,
}

/// The aggregated, code-free view handed to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDigest {
    /// Iteration about to run (equals the next generation index).
    pub iteration: u32,
    pub metric: String,
    pub direction: Direction,
    pub target_threshold: Option<f64>,
    /// Designated metric of the current best generation, when it has one.
    pub best_value: Option<f64>,
    /// Metric values of the most recent generations, oldest first.
    pub trend: Vec<TrendPoint>,
    pub failed_generations: u32,
    /// Truncated first lines of recent researcher rationales, oldest first.
    pub rationales: Vec<String>,
}

/// Bounds applied while building a digest.
#[derive(Debug, Clone, Copy)]
pub struct DigestWindow {
    /// How many recent generations feed the trend and rationale lists.
    pub generations: usize,
    /// Character cap per rationale summary.
    pub rationale_chars: usize,
}

impl RunDigest {
    pub fn from_history(
        history: &[Generation],
        metric: &str,
        direction: Direction,
        target_threshold: Option<f64>,
        best_value: Option<f64>,
        window: DigestWindow,
    ) -> Self {
        let recent_start = history.len().saturating_sub(window.generations);
        let recent = &history[recent_start..];

        let trend = recent
            .iter()
            .map(|generation| TrendPoint {
                index: generation.index,
                value: generation.metric(metric),
            })
            .collect();

        let rationales = recent
            .iter()
            .filter_map(|generation| {
                let rationale = generation.rationale.as_deref()?.trim();
                if rationale.is_empty() {
                    return None;
                }
                Some(format!(
                    "g{}: {}",
                    generation.index,
                    summarize(rationale, window.rationale_chars)
                ))
            })
            .collect();

        let failed = history.iter().filter(|g| !g.is_valid()).count() as u32;

        Self {
            iteration: history.len() as u32,
            metric: metric.to_string(),
            direction,
            target_threshold,
            best_value,
            trend,
            failed_generations: failed,
            rationales,
        }
    }
}

/// First line of `text`, truncated to at most `limit` characters.
fn summarize(text: &str, limit: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default().trim();
    match first_line.char_indices().nth(limit) {
        Some((byte_offset, _)) => format!("{}…", &first_line[..byte_offset]),
        None => first_line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{generation_with_metric, invalid_generation};

    fn window() -> DigestWindow {
        DigestWindow {
            generations: 10,
            rationale_chars: 40,
        }
    }

    #[test]
    fn digest_reflects_trend_failures_and_best() {
        let mut improved = generation_with_metric(1, Some(0), "fitness", 7.0);
        improved.rationale = Some("Replaced bubble sort with merge sort\nmore detail".to_string());
        let history = vec![
            generation_with_metric(0, None, "fitness", 10.0),
            improved,
            invalid_generation(2, Some(1)),
        ];

        let digest = RunDigest::from_history(
            &history,
            "fitness",
            Direction::Minimize,
            Some(5.0),
            Some(7.0),
            window(),
        );

        assert_eq!(digest.iteration, 3);
        assert_eq!(digest.failed_generations, 1);
        assert_eq!(digest.best_value, Some(7.0));
        assert_eq!(
            digest.trend,
            vec![
                TrendPoint {
                    index: 0,
                    value: Some(10.0)
                },
                TrendPoint {
                    index: 1,
                    value: Some(7.0)
                },
                TrendPoint {
                    index: 2,
                    value: None
                },
            ]
        );
        assert_eq!(
            digest.rationales,
            vec!["g1: Replaced bubble sort with merge sort".to_string()]
        );
    }

    #[test]
    fn trend_window_keeps_only_recent_generations() {
        let history: Vec<_> = (0u32..20)
            .map(|i| generation_with_metric(i, (i > 0).then_some(0), "fitness", f64::from(i)))
            .collect();
        let digest = RunDigest::from_history(
            &history,
            "fitness",
            Direction::Maximize,
            None,
            Some(19.0),
            DigestWindow {
                generations: 5,
                rationale_chars: 40,
            },
        );
        assert_eq!(digest.trend.len(), 5);
        assert_eq!(digest.trend[0].index, 15);
        assert_eq!(digest.trend[4].index, 19);
    }

    #[test]
    fn long_rationales_are_truncated_on_a_char_boundary() {
        let summary = summarize("αβγδε and then a very long explanation", 5);
        assert_eq!(summary, "αβγδε…");
    }
}
