//! Judge boundary. The engine only consumes judge output; whether the
//! verdict comes from a remote model or a local heuristic is the backend's
//! business.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Verdict;

/// Judged outcome of a completed task.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeOutcome {
    pub verdict: Verdict,
    /// How sure the judge is, in `[0, 1]`.
    pub confidence: f64,
    /// Free-text rationale; when present the distiller prefers it as the
    /// candidate pattern content.
    pub rationale: Option<String>,
}

impl JudgeOutcome {
    pub fn new(verdict: Verdict, confidence: f64) -> Self {
        Self {
            verdict,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// Judges whether a completed task succeeded.
#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;

    /// Judge one task given its query and the transcript of what happened.
    async fn judge(&self, query: &str, transcript: &str) -> Result<JudgeOutcome>;
}

const FAILURE_MARKERS: [&str; 6] = [
    "error",
    "failed",
    "failure",
    "panic",
    "exception",
    "traceback",
];

const SUCCESS_MARKERS: [&str; 5] = ["success", "completed", "passed", "done", "resolved"];

/// Marker-counting local judge. Useful for tests and offline operation;
/// production deployments inject a model-backed implementation.
pub struct HeuristicJudge;

impl HeuristicJudge {
    fn count_markers(haystack: &str, markers: &[&str]) -> usize {
        markers
            .iter()
            .map(|marker| haystack.matches(marker).count())
            .sum()
    }
}

#[async_trait]
impl Judge for HeuristicJudge {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn judge(&self, _query: &str, transcript: &str) -> Result<JudgeOutcome> {
        let lowered = transcript.to_lowercase();
        let failures = Self::count_markers(&lowered, &FAILURE_MARKERS);
        let successes = Self::count_markers(&lowered, &SUCCESS_MARKERS);

        #[allow(clippy::cast_precision_loss)]
        let outcome = match (successes, failures) {
            (0, 0) => JudgeOutcome::new(Verdict::Partial, 0.3),
            (s, f) if s > f => {
                let margin = (s - f) as f64 / (s + f) as f64;
                JudgeOutcome::new(Verdict::Success, 0.5 + 0.4 * margin)
            }
            (s, f) if f > s => {
                let margin = (f - s) as f64 / (s + f) as f64;
                JudgeOutcome::new(Verdict::Failure, 0.5 + 0.4 * margin)
            }
            _ => JudgeOutcome::new(Verdict::Partial, 0.5),
        };

        Ok(outcome)
    }
}
