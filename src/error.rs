use thiserror::Error;

/// Structured error taxonomy for the memory engine.
///
/// Library callers match on these to decide recovery strategy; internal
/// store plumbing uses `anyhow::Result` for ad-hoc context chains and
/// converts at the crate boundary.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// An operation referenced a pattern or trajectory id that does not
    /// exist. Callers recover locally as a no-op where semantically safe
    /// (reinforcing a since-deleted pattern is ignored, not fatal).
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Concurrent update race on the same pattern row. Surfaced only after
    /// the bounded internal retry is exhausted.
    #[error("update conflict on pattern {id} after {attempts} attempts")]
    Conflict { id: String, attempts: u32 },

    /// External embedding provider failure. Never substituted with a
    /// default vector.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// External judge failure. Never substituted with a default verdict.
    #[error("judge failed: {0}")]
    Judge(String),

    /// Malformed input, rejected before any write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage engine failure.
    #[error("store: {0}")]
    Store(String),

    // Generic fallthrough (wraps anyhow for interop)
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for MemoryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, MemoryError>;
