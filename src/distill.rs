//! Distillation: synthesizing a brand-new pattern from a completed, judged
//! trajectory. Runs after reinforcement and independently of it.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::{MemoryError, Result};
use crate::scrub::Scrubber;
use crate::store::PatternStore;
use crate::types::{Pattern, TaskTrajectory, Verdict};

/// The judge's confidence below which a `partial` trajectory is not worth
/// distilling.
const PARTIAL_DISTILL_FLOOR: f64 = 0.6;

/// Everything the distiller needs about one finished task.
#[derive(Debug, Clone)]
pub struct DistillationInput {
    pub trajectory: TaskTrajectory,
    /// Free-text rationale from the judge; preferred over the raw query as
    /// pattern content when present.
    pub rationale: Option<String>,
    pub domain: Option<String>,
    pub tags: Vec<String>,
}

impl DistillationInput {
    pub fn new(trajectory: TaskTrajectory) -> Self {
        Self {
            trajectory,
            rationale: None,
            domain: None,
            tags: Vec::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone)]
pub enum DistillationOutcome {
    /// A new pattern was persisted.
    Created(Pattern),
    /// The trajectory did not qualify; nothing was written.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Failures never become new patterns.
    FailureVerdict,
    /// Partial verdict below the distillation confidence floor.
    LowConfidencePartial,
}

pub struct Distiller {
    store: Arc<PatternStore>,
    embedder: Arc<dyn Embedder>,
    scrubber: Arc<dyn Scrubber>,
    config: Arc<EngineConfig>,
}

impl Distiller {
    pub fn new(
        store: Arc<PatternStore>,
        embedder: Arc<dyn Embedder>,
        scrubber: Arc<dyn Scrubber>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            embedder,
            scrubber,
            config,
        }
    }

    /// Maybe synthesize a new pattern from the trajectory.
    ///
    /// The candidate text always passes through the scrubber before it is
    /// embedded or persisted. An embedding failure aborts the distillation
    /// with no partial write.
    pub async fn distill(&self, input: &DistillationInput) -> Result<DistillationOutcome> {
        let trajectory = &input.trajectory;
        trajectory.validate()?;

        match trajectory.verdict {
            Verdict::Failure => {
                return Ok(DistillationOutcome::Skipped(SkipReason::FailureVerdict));
            }
            Verdict::Partial if trajectory.verdict_confidence < PARTIAL_DISTILL_FLOOR => {
                return Ok(DistillationOutcome::Skipped(SkipReason::LowConfidencePartial));
            }
            Verdict::Success | Verdict::Partial => {}
        }

        let candidate = input
            .rationale
            .as_deref()
            .unwrap_or(&trajectory.query_text);
        let scrubbed = self.scrubber.scrub(candidate);
        if scrubbed.trim().is_empty() {
            return Err(MemoryError::Validation(
                "pattern content empty after scrubbing".into(),
            ));
        }

        let embedding = self
            .embedder
            .embed(&scrubbed, &trajectory.namespace)
            .await?;
        if embedding.len() != self.config.embedding_dimensions {
            return Err(MemoryError::Embedding(format!(
                "embedder returned {} dimensions, engine expects {}",
                embedding.len(),
                self.config.embedding_dimensions
            )));
        }

        let mut pattern = Pattern::new(&trajectory.namespace, scrubbed, embedding);
        pattern.domain = input.domain.clone();
        pattern.tags = input.tags.clone();

        self.store.put_pattern(&pattern).await?;
        tracing::debug!(
            namespace = %trajectory.namespace,
            pattern = %pattern.id,
            "distilled new pattern"
        );
        Ok(DistillationOutcome::Created(pattern))
    }
}
