use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Confidence assigned to every freshly distilled pattern.
pub const INITIAL_CONFIDENCE: f64 = 0.5;

/// A reusable solution fragment with a learned confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub namespace: String,
    pub content: String,
    pub domain: Option<String>,
    pub tags: Vec<String>,
    pub embedding: Vec<f32>,
    pub confidence: f64,
    pub usage_count: u64,
    pub success_count: u64,
    pub contradiction_flagged: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Row version for compare-and-swap updates. Managed by the store.
    #[serde(default)]
    pub version: i64,
}

impl Pattern {
    /// Build a fresh pattern the way the distiller creates them.
    pub fn new(
        namespace: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            namespace: namespace.into(),
            content: content.into(),
            domain: None,
            tags: Vec::new(),
            embedding,
            confidence: INITIAL_CONFIDENCE,
            usage_count: 0,
            success_count: 0,
            contradiction_flagged: false,
            created_at: Utc::now(),
            last_used_at: None,
            version: 0,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Timestamp driving the recency term: last use, falling back to
    /// creation for never-used patterns.
    #[must_use]
    pub fn recency_anchor(&self) -> DateTime<Utc> {
        self.last_used_at.unwrap_or(self.created_at)
    }

    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let millis = (now - self.created_at).num_milliseconds() as f64;
        (millis / 86_400_000.0).max(0.0)
    }

    /// Reject malformed patterns before any write reaches the store.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MemoryError::Validation("pattern id must not be empty".into()));
        }
        if self.namespace.trim().is_empty() {
            return Err(MemoryError::Validation(
                "pattern namespace must not be empty".into(),
            ));
        }
        if self.content.trim().is_empty() {
            return Err(MemoryError::Validation(
                "pattern content must not be empty".into(),
            ));
        }
        if self.embedding.is_empty() {
            return Err(MemoryError::Validation(
                "pattern embedding must not be empty".into(),
            ));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(MemoryError::Validation(format!(
                "pattern confidence must be within [0, 1], got {}",
                self.confidence
            )));
        }
        if self.success_count > self.usage_count {
            return Err(MemoryError::Validation(format!(
                "success_count {} exceeds usage_count {}",
                self.success_count, self.usage_count
            )));
        }
        Ok(())
    }
}

/// Directed, typed relation between two patterns. Advisory metadata only;
/// retrieval never requires a link to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternLink {
    pub from_id: String,
    pub to_id: String,
    pub relation: LinkRelation,
}

impl PatternLink {
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        relation: LinkRelation,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            relation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
    Requires,
    Causes,
    Enhances,
    RelatedTo,
}

impl std::fmt::Display for LinkRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Requires => "requires",
            Self::Causes => "causes",
            Self::Enhances => "enhances",
            Self::RelatedTo => "related_to",
        };
        write!(f, "{label}")
    }
}

impl std::str::FromStr for LinkRelation {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "requires" => Ok(Self::Requires),
            "causes" => Ok(Self::Causes),
            "enhances" => Ok(Self::Enhances),
            "related_to" => Ok(Self::RelatedTo),
            other => Err(MemoryError::Validation(format!(
                "invalid link relation: {other}"
            ))),
        }
    }
}

/// Judged outcome of one task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
    Partial,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        };
        write!(f, "{label}")
    }
}

impl std::str::FromStr for Verdict {
    type Err = MemoryError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "partial" => Ok(Self::Partial),
            other => Err(MemoryError::Validation(format!("invalid verdict: {other}"))),
        }
    }
}

/// Record of one task execution: the query, the patterns injected into the
/// task context, and the judged outcome. Immutable after creation except
/// for the housekeeping `consolidated` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTrajectory {
    pub id: String,
    pub namespace: String,
    pub query_text: String,
    /// Ordered as returned by retrieval.
    pub used_pattern_ids: Vec<String>,
    pub verdict: Verdict,
    pub verdict_confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub consolidated: bool,
}

impl TaskTrajectory {
    pub fn new(
        namespace: impl Into<String>,
        query_text: impl Into<String>,
        used_pattern_ids: Vec<String>,
        verdict: Verdict,
        verdict_confidence: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            namespace: namespace.into(),
            query_text: query_text.into(),
            used_pattern_ids,
            verdict,
            verdict_confidence,
            timestamp: Utc::now(),
            consolidated: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MemoryError::Validation(
                "trajectory id must not be empty".into(),
            ));
        }
        if self.namespace.trim().is_empty() {
            return Err(MemoryError::Validation(
                "trajectory namespace must not be empty".into(),
            ));
        }
        if !self.verdict_confidence.is_finite()
            || !(0.0..=1.0).contains(&self.verdict_confidence)
        {
            return Err(MemoryError::Validation(format!(
                "verdict_confidence must be within [0, 1], got {}",
                self.verdict_confidence
            )));
        }
        Ok(())
    }
}
