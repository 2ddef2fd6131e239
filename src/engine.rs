//! Engine facade: wires the store, embedding provider, and scrubber behind
//! the four operations the orchestration caller invokes around each task.

use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::consolidation::{ConsolidationDisposition, ConsolidationOutput, Consolidator};
use crate::distill::{DistillationInput, DistillationOutcome, Distiller};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::reinforcement::{Reinforcer, ReinforcementReport};
use crate::retrieval::{RetrievalRequest, Retriever, ScoredPattern};
use crate::scrub::Scrubber;
use crate::store::PatternStore;
use crate::types::TaskTrajectory;

/// One engine instance per workspace. Stateless between calls beyond the
/// store itself; configuration is injected, never ambient.
pub struct MemoryEngine {
    store: Arc<PatternStore>,
    embedder: Arc<dyn Embedder>,
    config: Arc<EngineConfig>,
    retriever: Retriever,
    reinforcer: Reinforcer,
    distiller: Distiller,
    consolidator: Consolidator,
}

impl MemoryEngine {
    /// Open (or create) the engine database under `workspace_dir`.
    pub async fn open(
        workspace_dir: &Path,
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        scrubber: Arc<dyn Scrubber>,
    ) -> Result<Self> {
        config.validate()?;
        let store = PatternStore::open(workspace_dir)
            .await?
            .with_retry_limit(config.conflict_retry_limit);
        Ok(Self::assemble(Arc::new(store), config, embedder, scrubber))
    }

    /// Ephemeral in-memory engine, for tests and embedded hosts.
    pub async fn in_memory(
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        scrubber: Arc<dyn Scrubber>,
    ) -> Result<Self> {
        config.validate()?;
        let store = PatternStore::in_memory()
            .await?
            .with_retry_limit(config.conflict_retry_limit);
        Ok(Self::assemble(Arc::new(store), config, embedder, scrubber))
    }

    fn assemble(
        store: Arc<PatternStore>,
        config: EngineConfig,
        embedder: Arc<dyn Embedder>,
        scrubber: Arc<dyn Scrubber>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            retriever: Retriever::new(Arc::clone(&store), Arc::clone(&config)),
            reinforcer: Reinforcer::new(Arc::clone(&store), Arc::clone(&config)),
            distiller: Distiller::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                scrubber,
                Arc::clone(&config),
            ),
            consolidator: Consolidator::new(Arc::clone(&store), Arc::clone(&config)),
            store,
            embedder,
            config,
        }
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }

    /// Embed the query text and return the `k` best patterns with score
    /// breakdowns.
    ///
    /// An embedding failure propagates; the orchestration caller recovers
    /// by proceeding with zero patterns — memory is an optimization, never
    /// a hard dependency of task execution.
    pub async fn retrieve(
        &self,
        namespace: &str,
        query_text: &str,
        domain: Option<&str>,
        k: usize,
    ) -> Result<Vec<ScoredPattern>> {
        let query_embedding = self.embedder.embed(query_text, namespace).await?;
        let mut request = RetrievalRequest::new(namespace, query_embedding, k);
        if let Some(domain) = domain {
            request = request.with_domain(domain);
        }
        self.retriever.retrieve(&request).await
    }

    /// Retrieval for callers that already hold a query embedding.
    pub async fn retrieve_embedded(&self, request: &RetrievalRequest) -> Result<Vec<ScoredPattern>> {
        self.retriever.retrieve(request).await
    }

    /// Persist one finished task's trajectory record.
    pub async fn record_trajectory(&self, trajectory: &TaskTrajectory) -> Result<()> {
        self.store.put_trajectory(trajectory).await
    }

    /// Apply the confidence-update rule to every pattern the trajectory
    /// used. Idempotent per `(trajectory, pattern)` pair.
    pub async fn reinforce(&self, trajectory: &TaskTrajectory) -> Result<ReinforcementReport> {
        self.reinforcer.reinforce(trajectory).await
    }

    /// Maybe synthesize a new pattern from a judged trajectory.
    pub async fn distill(&self, input: &DistillationInput) -> Result<DistillationOutcome> {
        self.distiller.distill(input).await
    }

    /// Run one consolidation pass over the namespace, unconditionally.
    pub async fn consolidate(&self, namespace: &str) -> Result<ConsolidationOutput> {
        self.consolidator.run(namespace).await
    }

    /// Consolidate only when the caller-owned task counter crosses the
    /// configured threshold. The counter stays with the orchestration
    /// layer; this engine holds no task count of its own.
    pub async fn consolidate_if_due(
        &self,
        namespace: &str,
        completed_tasks: u64,
    ) -> Result<Option<ConsolidationOutput>> {
        if !self.consolidator.is_due(completed_tasks) {
            return Ok(None);
        }
        let output = self.consolidator.run(namespace).await?;
        if output.disposition == ConsolidationDisposition::SkippedPassInProgress {
            tracing::warn!(namespace, "consolidation threshold hit while pass in progress");
        }
        Ok(Some(output))
    }
}
