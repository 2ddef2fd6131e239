use crate::error::{MemoryError, Result};
use serde::{Deserialize, Serialize};

/// Engine configuration, passed explicitly at construction.
///
/// Every weight and threshold the engine consults lives here as a named
/// field; nothing is read from ambient environment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedding provider: "hash" | "openai" | "custom:URL"
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,
    /// Embedding model name (remote providers only)
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Embedding vector dimensions, fixed per engine instance
    #[serde(default = "default_embedding_dims")]
    pub embedding_dimensions: usize,

    /// Weight for cosine similarity in the composite score
    #[serde(default = "default_similarity_weight")]
    pub similarity_weight: f64,
    /// Weight for the recency decay term
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    /// Weight for the usage-backed reliability term
    #[serde(default = "default_reliability_weight")]
    pub reliability_weight: f64,
    /// Penalty weight applied against already-selected results
    #[serde(default = "default_diversity_weight")]
    pub diversity_weight: f64,
    /// Recency decays as exp(-age_days / this)
    #[serde(default = "default_recency_decay_days")]
    pub recency_decay_days: f64,

    /// Confidence bounds enforced on every pattern row
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
    #[serde(default = "default_confidence_ceiling")]
    pub confidence_ceiling: f64,
    /// Relative confidence growth on a success verdict
    #[serde(default = "default_success_multiplier")]
    pub success_multiplier: f64,
    /// Relative confidence decay on a failure verdict
    #[serde(default = "default_failure_multiplier")]
    pub failure_multiplier: f64,

    /// Cosine at or above which two patterns are duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    /// Lower bound of the similarity band checked for contradictions
    #[serde(default = "default_contradiction_threshold")]
    pub contradiction_threshold: f64,
    /// Pruning requires confidence at or below this ceiling
    #[serde(default = "default_prune_confidence_ceiling")]
    pub prune_confidence_ceiling: f64,
    /// Pruning requires usage_count at or below this ceiling
    #[serde(default = "default_prune_usage_ceiling")]
    pub prune_usage_ceiling: u64,
    /// Pruning requires the pattern to be older than this many days
    #[serde(default = "default_prune_age_days")]
    pub prune_age_days: f64,
    /// Consolidation is due every N completed tasks
    #[serde(default = "default_consolidate_every")]
    pub consolidate_every: u64,

    /// Bounded internal retries for same-row update races
    #[serde(default = "default_conflict_retry_limit")]
    pub conflict_retry_limit: u32,
    /// Cap on candidates fetched for one scoring pass
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

fn default_embedding_provider() -> String {
    "hash".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embedding_dims() -> usize {
    256
}
fn default_similarity_weight() -> f64 {
    0.65
}
fn default_recency_weight() -> f64 {
    0.15
}
fn default_reliability_weight() -> f64 {
    0.20
}
fn default_diversity_weight() -> f64 {
    0.10
}
fn default_recency_decay_days() -> f64 {
    30.0
}
fn default_confidence_floor() -> f64 {
    0.05
}
fn default_confidence_ceiling() -> f64 {
    0.95
}
fn default_success_multiplier() -> f64 {
    1.20
}
fn default_failure_multiplier() -> f64 {
    0.85
}
fn default_dedup_threshold() -> f64 {
    0.92
}
fn default_contradiction_threshold() -> f64 {
    0.75
}
fn default_prune_confidence_ceiling() -> f64 {
    0.10
}
fn default_prune_usage_ceiling() -> u64 {
    1
}
fn default_prune_age_days() -> f64 {
    90.0
}
fn default_consolidate_every() -> u64 {
    20
}
fn default_conflict_retry_limit() -> u32 {
    3
}
fn default_candidate_limit() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            embedding_provider: default_embedding_provider(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dims(),
            similarity_weight: default_similarity_weight(),
            recency_weight: default_recency_weight(),
            reliability_weight: default_reliability_weight(),
            diversity_weight: default_diversity_weight(),
            recency_decay_days: default_recency_decay_days(),
            confidence_floor: default_confidence_floor(),
            confidence_ceiling: default_confidence_ceiling(),
            success_multiplier: default_success_multiplier(),
            failure_multiplier: default_failure_multiplier(),
            dedup_threshold: default_dedup_threshold(),
            contradiction_threshold: default_contradiction_threshold(),
            prune_confidence_ceiling: default_prune_confidence_ceiling(),
            prune_usage_ceiling: default_prune_usage_ceiling(),
            prune_age_days: default_prune_age_days(),
            consolidate_every: default_consolidate_every(),
            conflict_retry_limit: default_conflict_retry_limit(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

impl EngineConfig {
    /// Parse a config from TOML, falling back to defaults for absent keys.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| MemoryError::Validation(format!("config parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scoring and consolidation math cannot
    /// operate under.
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("similarity_weight", self.similarity_weight),
            ("recency_weight", self.recency_weight),
            ("reliability_weight", self.reliability_weight),
            ("diversity_weight", self.diversity_weight),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(MemoryError::Validation(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }

        if self.embedding_dimensions == 0 {
            return Err(MemoryError::Validation(
                "embedding_dimensions must be positive".into(),
            ));
        }
        if self.recency_decay_days <= 0.0 {
            return Err(MemoryError::Validation(
                "recency_decay_days must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor)
            || !(0.0..=1.0).contains(&self.confidence_ceiling)
            || self.confidence_floor >= self.confidence_ceiling
        {
            return Err(MemoryError::Validation(
                "confidence bounds must satisfy 0 <= floor < ceiling <= 1".into(),
            ));
        }
        if self.contradiction_threshold >= self.dedup_threshold {
            return Err(MemoryError::Validation(
                "contradiction_threshold must be below dedup_threshold".into(),
            ));
        }
        if self.consolidate_every == 0 {
            return Err(MemoryError::Validation(
                "consolidate_every must be positive".into(),
            ));
        }
        if self.conflict_retry_limit == 0 {
            return Err(MemoryError::Validation(
                "conflict_retry_limit must be positive".into(),
            ));
        }

        Ok(())
    }
}
