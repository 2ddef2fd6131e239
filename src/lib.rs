#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod consolidation;
pub mod distill;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod judge;
pub mod reinforcement;
pub mod retrieval;
pub mod scrub;
pub mod store;
pub mod types;
pub mod vector;

pub use config::EngineConfig;
pub use consolidation::{ConsolidationDisposition, ConsolidationOutput, ConsolidationReport};
pub use distill::{DistillationInput, DistillationOutcome};
pub use embedding::{Embedder, HashEmbedder, OpenAiEmbedder, create_embedder};
pub use engine::MemoryEngine;
pub use error::{MemoryError, Result};
pub use judge::{HeuristicJudge, Judge, JudgeOutcome};
pub use reinforcement::ReinforcementReport;
pub use retrieval::{RetrievalRequest, ScoreBreakdown, ScoredPattern};
pub use scrub::{RedactingScrubber, Scrubber};
pub use store::PatternStore;
pub use types::{LinkRelation, Pattern, PatternLink, TaskTrajectory, Verdict};
