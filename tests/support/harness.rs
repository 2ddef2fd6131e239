#![allow(dead_code)]

use std::sync::Arc;

use hindsight::embedding::HashEmbedder;
use hindsight::scrub::RedactingScrubber;
use hindsight::types::Pattern;
use hindsight::{EngineConfig, MemoryEngine};

/// In-memory engine with the hash embedder at the given dimensionality.
pub async fn engine_with_dims(dims: usize) -> MemoryEngine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = EngineConfig {
        embedding_dimensions: dims,
        ..EngineConfig::default()
    };
    MemoryEngine::in_memory(
        config,
        Arc::new(HashEmbedder::new(dims)),
        Arc::new(RedactingScrubber),
    )
    .await
    .expect("construct in-memory engine")
}

/// A pattern with a fixed id and hand-picked scoring inputs.
pub fn seeded_pattern(
    namespace: &str,
    id: &str,
    embedding: Vec<f32>,
    confidence: f64,
    usage_count: u64,
) -> Pattern {
    let mut pattern = Pattern::new(namespace, format!("pattern {id}"), embedding);
    pattern.id = id.to_string();
    pattern.confidence = confidence;
    pattern.usage_count = usage_count;
    pattern.success_count = 0;
    pattern
}
