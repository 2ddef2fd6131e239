//! Confidence learning: after a task completes, every pattern it used is
//! reinforced according to the judged verdict. Applied exactly once per
//! `(trajectory, pattern)` pair.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{MemoryError, Result};
use crate::store::PatternStore;
use crate::types::{TaskTrajectory, Verdict};

/// Outcome tally for one reinforcement call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReinforcementReport {
    /// Patterns whose stats were updated.
    pub applied: u64,
    /// Pairs already reinforced by an earlier call (no-op).
    pub skipped_duplicate: u64,
    /// Patterns deleted since the trajectory used them (no-op).
    pub skipped_missing: u64,
}

impl ReinforcementReport {
    pub fn total(&self) -> u64 {
        self.applied + self.skipped_duplicate + self.skipped_missing
    }
}

pub struct Reinforcer {
    store: Arc<PatternStore>,
    config: Arc<EngineConfig>,
}

impl Reinforcer {
    pub fn new(store: Arc<PatternStore>, config: Arc<EngineConfig>) -> Self {
        Self { store, config }
    }

    /// Apply the confidence-update rule to every pattern the trajectory
    /// used, independently per pattern.
    ///
    /// Calling this twice for the same trajectory is a no-op for every
    /// already-applied pair; partially failed calls may be retried and
    /// only the unapplied remainder runs.
    pub async fn reinforce(&self, trajectory: &TaskTrajectory) -> Result<ReinforcementReport> {
        trajectory.validate()?;

        let mut report = ReinforcementReport::default();
        for pattern_id in &trajectory.used_pattern_ids {
            // Reserve the pair first; losing the reservation means another
            // call already applied this update.
            if !self
                .store
                .record_reinforcement(&trajectory.id, pattern_id)
                .await?
            {
                report.skipped_duplicate += 1;
                continue;
            }

            let success_delta = u64::from(trajectory.verdict == Verdict::Success);
            let update = self
                .store
                .update_confidence(&trajectory.namespace, pattern_id, 1, success_delta, |p| {
                    next_confidence(&self.config, trajectory.verdict, p.confidence)
                })
                .await;

            match update {
                Ok(_) => report.applied += 1,
                Err(MemoryError::NotFound { .. }) => {
                    // The pattern was pruned or merged away; the pair stays
                    // reserved so this trajectory never reinforces a
                    // same-id successor.
                    tracing::warn!(
                        trajectory = %trajectory.id,
                        pattern = %pattern_id,
                        "reinforcing missing pattern skipped"
                    );
                    report.skipped_missing += 1;
                }
                Err(err) => {
                    // Release the reservation so a caller retry is not
                    // silently swallowed.
                    self.store
                        .remove_reinforcement(&trajectory.id, pattern_id)
                        .await?;
                    return Err(err);
                }
            }
        }

        Ok(report)
    }
}

/// The confidence-update rule. Multiplicative, clamped to the configured
/// bounds; `partial` verdicts leave confidence untouched.
pub fn next_confidence(config: &EngineConfig, verdict: Verdict, current: f64) -> f64 {
    match verdict {
        Verdict::Success => (current * config.success_multiplier).min(config.confidence_ceiling),
        Verdict::Failure => (current * config.failure_multiplier).max(config.confidence_floor),
        Verdict::Partial => current,
    }
}
