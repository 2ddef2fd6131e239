//! Retrieval scoring: composite per-candidate score plus a greedy
//! diversity-aware top-k selection.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::store::PatternStore;
use crate::types::Pattern;
use crate::vector::cosine_similarity;

/// One retrieval call: namespace, pre-embedded query, optional domain
/// filter, and the number of patterns wanted.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub namespace: String,
    pub query_embedding: Vec<f32>,
    pub domain: Option<String>,
    pub k: usize,
}

impl RetrievalRequest {
    pub fn new(namespace: impl Into<String>, query_embedding: Vec<f32>, k: usize) -> Self {
        Self {
            namespace: namespace.into(),
            query_embedding,
            domain: None,
            k,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// Score breakdown returned alongside every retrieved pattern so the
/// caller can explain why a pattern was injected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub similarity: f64,
    pub recency: f64,
    pub reliability: f64,
    pub base_score: f64,
    pub diversity_penalty: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredPattern {
    pub pattern: Pattern,
    pub scores: ScoreBreakdown,
}

pub struct Retriever {
    store: Arc<PatternStore>,
    config: Arc<EngineConfig>,
}

impl Retriever {
    pub fn new(store: Arc<PatternStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// Return the `k` best patterns for the query, strictly descending by
    /// final score, ties broken by most-recent use then by id.
    ///
    /// A pure read: candidates are scored against a snapshot and nothing
    /// is mutated (usage counting happens at reinforcement time).
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<ScoredPattern>> {
        if request.k == 0 || request.query_embedding.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self
            .store
            .get_candidates(
                &request.namespace,
                request.domain.as_deref(),
                Some(self.config.candidate_limit),
            )
            .await?;

        let now = Utc::now();
        let scored: Vec<ScoredPattern> = candidates
            .into_iter()
            .map(|pattern| {
                let scores =
                    score_candidate(&self.config, now, &request.query_embedding, &pattern);
                ScoredPattern { pattern, scores }
            })
            .collect();

        let selected = select_diverse(&self.config, scored, request.k);
        tracing::debug!(
            namespace = %request.namespace,
            k = request.k,
            returned = selected.len(),
            "retrieval pass"
        );
        Ok(selected)
    }
}

/// Composite score before any diversity adjustment.
pub fn score_candidate(
    config: &EngineConfig,
    now: DateTime<Utc>,
    query_embedding: &[f32],
    pattern: &Pattern,
) -> ScoreBreakdown {
    let similarity = cosine_similarity(query_embedding, &pattern.embedding);

    #[allow(clippy::cast_precision_loss)]
    let age_days =
        ((now - pattern.recency_anchor()).num_milliseconds() as f64 / 86_400_000.0).max(0.0);
    let recency = (-age_days / config.recency_decay_days).exp();

    #[allow(clippy::cast_precision_loss)]
    let reliability = (pattern.confidence * (pattern.usage_count as f64 / 10.0).sqrt()).min(1.0);

    let base_score = config.similarity_weight * similarity
        + config.recency_weight * recency
        + config.reliability_weight * reliability;

    ScoreBreakdown {
        similarity,
        recency,
        reliability,
        base_score,
        diversity_penalty: 0.0,
        final_score: base_score,
    }
}

/// Greedy maximal-marginal-relevance selection.
///
/// The penalty depends on the evolving selected set, so every remaining
/// candidate is re-scored after each pick rather than once up front.
pub fn select_diverse(
    config: &EngineConfig,
    mut remaining: Vec<ScoredPattern>,
    k: usize,
) -> Vec<ScoredPattern> {
    let mut selected: Vec<ScoredPattern> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_key: Option<(f64, &ScoredPattern)> = None;

        for (index, candidate) in remaining.iter().enumerate() {
            let penalty = selected
                .iter()
                .map(|picked| {
                    cosine_similarity(&candidate.pattern.embedding, &picked.pattern.embedding)
                })
                .fold(0.0_f64, f64::max);
            let adjusted = candidate.scores.base_score - config.diversity_weight * penalty;

            let replace = match &best_key {
                None => true,
                Some((best_adjusted, best_candidate)) => {
                    rank_order(adjusted, candidate, *best_adjusted, best_candidate)
                        == Ordering::Less
                }
            };
            if replace {
                best_index = index;
                best_key = Some((adjusted, candidate));
            }
        }

        let mut picked = remaining.swap_remove(best_index);
        let penalty = selected
            .iter()
            .map(|prior| cosine_similarity(&picked.pattern.embedding, &prior.pattern.embedding))
            .fold(0.0_f64, f64::max);
        picked.scores.diversity_penalty = penalty;
        picked.scores.final_score =
            picked.scores.base_score - config.diversity_weight * penalty;
        selected.push(picked);
    }

    selected
}

/// Ranking order for selection: higher adjusted score first, then the most
/// recently used, then smallest id (deterministic for reproducible tests).
/// Returns `Less` when `a` ranks ahead of `b`.
fn rank_order(
    a_adjusted: f64,
    a: &ScoredPattern,
    b_adjusted: f64,
    b: &ScoredPattern,
) -> Ordering {
    match b_adjusted.partial_cmp(&a_adjusted) {
        Some(Ordering::Equal) | None => {}
        Some(order) => return order,
    }

    let a_used = a.pattern.last_used_at;
    let b_used = b.pattern.last_used_at;
    match b_used.cmp(&a_used) {
        Ordering::Equal => {}
        order => return order,
    }

    a.pattern.id.cmp(&b.pattern.id)
}
