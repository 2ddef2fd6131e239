//! Periodic maintenance pass: deduplicate near-identical patterns, flag
//! contradictory ones, prune stale low-value ones. One pass per namespace
//! at a time; retrieval and reinforcement are never blocked for the whole
//! pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::config::EngineConfig;
use crate::error::{MemoryError, Result};
use crate::store::PatternStore;
use crate::types::{Pattern, Verdict};
use crate::vector::cosine_similarity;

/// What one invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationDisposition {
    Consolidated,
    /// Another pass for the same namespace was already running. Not an
    /// error; try again at the next threshold.
    SkippedPassInProgress,
}

/// Action counts for one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub merged: u64,
    pub contradictions_flagged: u64,
    pub pruned: u64,
    pub trajectories_marked: u64,
}

impl ConsolidationReport {
    pub fn total_actions(&self) -> u64 {
        self.merged + self.contradictions_flagged + self.pruned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidationOutput {
    pub disposition: ConsolidationDisposition,
    pub report: ConsolidationReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, Default)]
struct VerdictTally {
    successes: u64,
    failures: u64,
}

impl VerdictTally {
    fn polarity(self) -> Polarity {
        if self.successes > self.failures {
            Polarity::Positive
        } else if self.failures > self.successes {
            Polarity::Negative
        } else {
            Polarity::Neutral
        }
    }
}

pub struct Consolidator {
    store: Arc<PatternStore>,
    config: Arc<EngineConfig>,
    /// Per-namespace pass exclusion. Registry access is brief; the inner
    /// lock is held for the duration of a pass.
    pass_locks: Mutex<BTreeMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Consolidator {
    pub fn new(store: Arc<PatternStore>, config: Arc<EngineConfig>) -> Self {
        Self {
            store,
            config,
            pass_locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Trigger decision for a caller-owned task counter. The counter lives
    /// with the orchestration layer, not in this engine.
    pub fn is_due(&self, completed_tasks: u64) -> bool {
        completed_tasks > 0 && completed_tasks % self.config.consolidate_every == 0
    }

    fn pass_lock(&self, namespace: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut registry = self
            .pass_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        registry
            .entry(namespace.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Run one consolidation pass over the namespace.
    ///
    /// Phases run in order — dedup, contradiction detection, prune — and
    /// each phase sees the working set as the previous one left it.
    pub async fn run(&self, namespace: &str) -> Result<ConsolidationOutput> {
        let lock = self.pass_lock(namespace);
        let Ok(_guard) = lock.try_lock() else {
            tracing::warn!(namespace, "consolidation pass already running, skipped");
            return Ok(ConsolidationOutput {
                disposition: ConsolidationDisposition::SkippedPassInProgress,
                report: ConsolidationReport::default(),
            });
        };

        let mut working = self.store.get_candidates(namespace, None, None).await?;

        let merged = self.dedup_phase(namespace, &mut working).await?;
        let (flagged, marked) = self.contradiction_phase(namespace, &mut working).await?;
        let pruned = self.prune_phase(namespace, &working).await?;
        let report = ConsolidationReport {
            merged,
            contradictions_flagged: flagged,
            pruned,
            trajectories_marked: marked,
        };

        tracing::debug!(
            namespace,
            merged = report.merged,
            flagged = report.contradictions_flagged,
            pruned = report.pruned,
            "consolidation pass complete"
        );
        Ok(ConsolidationOutput {
            disposition: ConsolidationDisposition::Consolidated,
            report,
        })
    }

    /// Phase 1: merge near-identical patterns. Transitive within the pass —
    /// a merged loser leaves the working set immediately, and scanning
    /// restarts so chains collapse into one survivor.
    async fn dedup_phase(&self, namespace: &str, working: &mut Vec<Pattern>) -> Result<u64> {
        let mut merged = 0;

        'pass: loop {
            for i in 0..working.len() {
                for j in (i + 1)..working.len() {
                    let cosine =
                        cosine_similarity(&working[i].embedding, &working[j].embedding);
                    if cosine < self.config.dedup_threshold {
                        continue;
                    }

                    let (winner_index, loser_index) =
                        if survives_merge(&working[i], &working[j]) {
                            (i, j)
                        } else {
                            (j, i)
                        };
                    let winner_id = working[winner_index].id.clone();
                    let loser_id = working[loser_index].id.clone();

                    match self
                        .store
                        .merge_patterns(namespace, &winner_id, &loser_id)
                        .await
                    {
                        Ok(updated) => {
                            working[winner_index] = updated;
                            working.remove(loser_index);
                            merged += 1;
                            continue 'pass;
                        }
                        Err(MemoryError::NotFound { id, .. }) => {
                            // Another deletion path won the race; drop the
                            // stale working entry and rescan.
                            working.retain(|p| p.id != id);
                            continue 'pass;
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            break;
        }

        Ok(merged)
    }

    /// Phase 2: flag similar-but-not-duplicate pairs whose trajectory
    /// evidence points in opposite directions. Detection only — resolution
    /// belongs to an external reviewer.
    async fn contradiction_phase(
        &self,
        namespace: &str,
        working: &mut [Pattern],
    ) -> Result<(u64, u64)> {
        let trajectories = self.store.list_trajectories(namespace, None).await?;

        let mut tallies: HashMap<String, VerdictTally> = HashMap::new();
        let mut unconsolidated: Vec<String> = Vec::new();
        for (_seq, trajectory) in &trajectories {
            if !trajectory.consolidated {
                unconsolidated.push(trajectory.id.clone());
            }
            for pattern_id in &trajectory.used_pattern_ids {
                let tally = tallies.entry(pattern_id.clone()).or_default();
                match trajectory.verdict {
                    Verdict::Success => tally.successes += 1,
                    Verdict::Failure => tally.failures += 1,
                    Verdict::Partial => {}
                }
            }
        }

        let mut newly_flagged = 0;
        for i in 0..working.len() {
            for j in (i + 1)..working.len() {
                let cosine = cosine_similarity(&working[i].embedding, &working[j].embedding);
                if cosine < self.config.contradiction_threshold
                    || cosine >= self.config.dedup_threshold
                {
                    continue;
                }

                let polarity_a = tallies
                    .get(&working[i].id)
                    .copied()
                    .unwrap_or_default()
                    .polarity();
                let polarity_b = tallies
                    .get(&working[j].id)
                    .copied()
                    .unwrap_or_default()
                    .polarity();
                let opposed = matches!(
                    (polarity_a, polarity_b),
                    (Polarity::Positive, Polarity::Negative)
                        | (Polarity::Negative, Polarity::Positive)
                );
                if !opposed {
                    continue;
                }

                for index in [i, j] {
                    if working[index].contradiction_flagged {
                        continue;
                    }
                    if self
                        .store
                        .set_contradiction_flag(namespace, &working[index].id, true)
                        .await?
                    {
                        working[index].contradiction_flagged = true;
                        newly_flagged += 1;
                    }
                }
            }
        }

        let marked = self
            .store
            .mark_trajectories_consolidated(&unconsolidated)
            .await?;

        Ok((newly_flagged, marked))
    }

    /// Phase 3: prune stale low-value patterns. All three conditions must
    /// hold; a frequently used but low-confidence pattern survives, as does
    /// a fresh low-usage one.
    async fn prune_phase(&self, namespace: &str, working: &[Pattern]) -> Result<u64> {
        let now = Utc::now();
        let mut pruned = 0;

        for pattern in working {
            let stale = pattern.confidence <= self.config.prune_confidence_ceiling
                && pattern.usage_count <= self.config.prune_usage_ceiling
                && pattern.age_days(now) > self.config.prune_age_days;
            if !stale {
                continue;
            }

            if self.store.delete_pattern(namespace, &pattern.id).await? {
                pruned += 1;
            }
        }

        Ok(pruned)
    }
}

/// Merge survivor rule: higher confidence wins; equal confidence keeps the
/// higher usage count; a full tie keeps the smaller id for determinism.
#[allow(clippy::float_cmp)]
fn survives_merge(a: &Pattern, b: &Pattern) -> bool {
    if a.confidence != b.confidence {
        return a.confidence > b.confidence;
    }
    if a.usage_count != b.usage_count {
        return a.usage_count > b.usage_count;
    }
    a.id < b.id
}
