//! SQLite-backed persistent pattern store.
//!
//! The store exclusively owns all persisted rows; retrieval, reinforcement,
//! distillation, and consolidation go through it and hold no state of their
//! own across calls. Same-row mutations are serialized through a version
//! counter (compare-and-swap with bounded retry); different rows never
//! block each other.

mod schema;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;
use std::str::FromStr;

use crate::error::{MemoryError, Result};
use crate::types::{Pattern, PatternLink, TaskTrajectory, Verdict};
use crate::vector;

const DEFAULT_RETRY_LIMIT: u32 = 3;

const PATTERN_COLUMNS: &str = "id, namespace, content, domain, tags, embedding, confidence, \
     usage_count, success_count, contradiction_flagged, created_at, last_used_at, version";

type PatternRow = (
    String,         // id
    String,         // namespace
    String,         // content
    Option<String>, // domain
    String,         // tags (JSON)
    Vec<u8>,        // embedding (BLOB)
    f64,            // confidence
    i64,            // usage_count
    i64,            // success_count
    i64,            // contradiction_flagged
    String,         // created_at
    Option<String>, // last_used_at
    i64,            // version
);

type TrajectoryRow = (
    i64,    // rowid (sequence)
    String, // id
    String, // namespace
    String, // query_text
    String, // used_pattern_ids (JSON)
    String, // verdict
    f64,    // verdict_confidence
    String, // timestamp
    i64,    // consolidated
);

pub struct PatternStore {
    pool: SqlitePool,
    retry_limit: u32,
}

impl PatternStore {
    /// Open (or create) the database at `<workspace_dir>/memory/patterns.db`.
    pub async fn open(workspace_dir: &Path) -> Result<Self> {
        let db_path = workspace_dir.join("memory").join("patterns.db");

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create memory directory")?;
        }

        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .context("open SQLite database")?;
        schema::init_schema(&pool).await?;

        Ok(Self {
            pool,
            retry_limit: DEFAULT_RETRY_LIMIT,
        })
    }

    /// Open an in-memory database. Useful for tests and ephemeral hosts.
    ///
    /// Pinned to one connection: SQLite in-memory databases are private
    /// per connection, so a wider pool would see empty schemas.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("open in-memory SQLite")?;
        schema::init_schema(&pool).await?;
        Ok(Self {
            pool,
            retry_limit: DEFAULT_RETRY_LIMIT,
        })
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit.max(1);
        self
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    // ── Patterns ─────────────────────────────────────────────

    /// Insert or update by `(namespace, id)`.
    ///
    /// Updates are guarded by the row version carried on the pattern; a
    /// stale version means a concurrent writer won and the call fails with
    /// a conflict rather than silently losing either update.
    pub async fn put_pattern(&self, pattern: &Pattern) -> Result<()> {
        pattern.validate()?;

        let tags = serde_json::to_string(&pattern.tags)
            .map_err(|e| MemoryError::Validation(format!("tags serialization: {e}")))?;
        let embedding = vector::vec_to_bytes(&pattern.embedding);
        let created_at = pattern.created_at.to_rfc3339();
        let last_used_at = pattern.last_used_at.map(|ts| ts.to_rfc3339());

        let updated = sqlx::query(
            "UPDATE patterns SET content = ?1, domain = ?2, tags = ?3, embedding = ?4,
                    confidence = ?5, usage_count = ?6, success_count = ?7,
                    contradiction_flagged = ?8, created_at = ?9, last_used_at = ?10,
                    version = version + 1
             WHERE namespace = ?11 AND id = ?12 AND version = ?13",
        )
        .bind(&pattern.content)
        .bind(&pattern.domain)
        .bind(&tags)
        .bind(&embedding)
        .bind(pattern.confidence)
        .bind(to_i64(pattern.usage_count))
        .bind(to_i64(pattern.success_count))
        .bind(i64::from(pattern.contradiction_flagged))
        .bind(&created_at)
        .bind(&last_used_at)
        .bind(&pattern.namespace)
        .bind(&pattern.id)
        .bind(pattern.version)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let inserted = sqlx::query(
            "INSERT INTO patterns (id, namespace, content, domain, tags, embedding,
                    confidence, usage_count, success_count, contradiction_flagged,
                    created_at, last_used_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)",
        )
        .bind(&pattern.id)
        .bind(&pattern.namespace)
        .bind(&pattern.content)
        .bind(&pattern.domain)
        .bind(&tags)
        .bind(&embedding)
        .bind(pattern.confidence)
        .bind(to_i64(pattern.usage_count))
        .bind(to_i64(pattern.success_count))
        .bind(i64::from(pattern.contradiction_flagged))
        .bind(&created_at)
        .bind(&last_used_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(MemoryError::Conflict {
                id: pattern.id.clone(),
                attempts: 1,
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_pattern(&self, namespace: &str, id: &str) -> Result<Pattern> {
        let row: Option<PatternRow> = sqlx::query_as(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns WHERE namespace = ?1 AND id = ?2"
        ))
        .bind(namespace)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => pattern_from_row(row),
            None => Err(MemoryError::NotFound {
                kind: "pattern",
                id: id.to_string(),
            }),
        }
    }

    /// Patterns eligible for one scoring or consolidation pass.
    ///
    /// A full scan of the namespace is acceptable at the intended scale;
    /// ordering by id keeps repeated calls deterministic.
    pub async fn get_candidates(
        &self,
        namespace: &str,
        domain: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<Pattern>> {
        let cap = i64::try_from(limit.unwrap_or(usize::MAX)).unwrap_or(i64::MAX);

        let rows: Vec<PatternRow> = if let Some(domain) = domain {
            sqlx::query_as(&format!(
                "SELECT {PATTERN_COLUMNS} FROM patterns
                 WHERE namespace = ?1 AND domain = ?2 ORDER BY id LIMIT ?3"
            ))
            .bind(namespace)
            .bind(domain)
            .bind(cap)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(&format!(
                "SELECT {PATTERN_COLUMNS} FROM patterns
                 WHERE namespace = ?1 ORDER BY id LIMIT ?2"
            ))
            .bind(namespace)
            .bind(cap)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(pattern_from_row).collect()
    }

    /// Atomic read-modify-write of one pattern's learning stats.
    ///
    /// `recompute` derives the new confidence from the freshly read row, so
    /// a lost CAS round re-derives rather than replaying a stale value.
    /// Retries are bounded; exhaustion surfaces as a conflict.
    pub async fn update_confidence<F>(
        &self,
        namespace: &str,
        id: &str,
        usage_delta: u64,
        success_delta: u64,
        recompute: F,
    ) -> Result<Pattern>
    where
        F: Fn(&Pattern) -> f64 + Send + Sync,
    {
        for attempt in 0..self.retry_limit {
            let current = self.get_pattern(namespace, id).await?;
            let new_confidence = recompute(&current);
            if !new_confidence.is_finite() || !(0.0..=1.0).contains(&new_confidence) {
                return Err(MemoryError::Validation(format!(
                    "recomputed confidence out of range: {new_confidence}"
                )));
            }

            let now = Utc::now().to_rfc3339();
            let updated = sqlx::query(
                "UPDATE patterns SET confidence = ?1,
                        usage_count = usage_count + ?2,
                        success_count = success_count + ?3,
                        last_used_at = ?4,
                        version = version + 1
                 WHERE namespace = ?5 AND id = ?6 AND version = ?7",
            )
            .bind(new_confidence)
            .bind(to_i64(usage_delta))
            .bind(to_i64(success_delta))
            .bind(&now)
            .bind(namespace)
            .bind(id)
            .bind(current.version)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 1 {
                return self.get_pattern(namespace, id).await;
            }

            tracing::debug!(pattern = id, attempt, "confidence CAS lost, retrying");
        }

        Err(MemoryError::Conflict {
            id: id.to_string(),
            attempts: self.retry_limit,
        })
    }

    /// Merge `loser_id` into `winner_id` in one transaction: usage and
    /// success counts are summed, confidence becomes the max of the pair,
    /// links referencing the loser are rewritten, and the loser row is
    /// deleted.
    pub async fn merge_patterns(
        &self,
        namespace: &str,
        winner_id: &str,
        loser_id: &str,
    ) -> Result<Pattern> {
        if winner_id == loser_id {
            return Err(MemoryError::Validation(
                "cannot merge a pattern into itself".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let select =
            format!("SELECT {PATTERN_COLUMNS} FROM patterns WHERE namespace = ?1 AND id = ?2");
        let winner_row: Option<PatternRow> = sqlx::query_as(&select)
            .bind(namespace)
            .bind(winner_id)
            .fetch_optional(&mut *tx)
            .await?;
        let loser_row: Option<PatternRow> = sqlx::query_as(&select)
            .bind(namespace)
            .bind(loser_id)
            .fetch_optional(&mut *tx)
            .await?;

        let winner = winner_row.map(pattern_from_row).transpose()?.ok_or_else(|| {
            MemoryError::NotFound {
                kind: "pattern",
                id: winner_id.to_string(),
            }
        })?;
        let loser = loser_row.map(pattern_from_row).transpose()?.ok_or_else(|| {
            MemoryError::NotFound {
                kind: "pattern",
                id: loser_id.to_string(),
            }
        })?;

        let merged_confidence = winner.confidence.max(loser.confidence);
        sqlx::query(
            "UPDATE patterns SET confidence = ?1,
                    usage_count = usage_count + ?2,
                    success_count = success_count + ?3,
                    version = version + 1
             WHERE namespace = ?4 AND id = ?5",
        )
        .bind(merged_confidence)
        .bind(to_i64(loser.usage_count))
        .bind(to_i64(loser.success_count))
        .bind(namespace)
        .bind(winner_id)
        .execute(&mut *tx)
        .await?;

        // Rewrite links; rows that would collide with an existing edge are
        // dropped, as are self-edges produced by the rewrite.
        sqlx::query("UPDATE OR IGNORE pattern_links SET from_id = ?1 WHERE from_id = ?2")
            .bind(winner_id)
            .bind(loser_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE OR IGNORE pattern_links SET to_id = ?1 WHERE to_id = ?2")
            .bind(winner_id)
            .bind(loser_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pattern_links WHERE from_id = ?1 OR to_id = ?1")
            .bind(loser_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pattern_links WHERE from_id = to_id")
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM patterns WHERE namespace = ?1 AND id = ?2")
            .bind(namespace)
            .bind(loser_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.get_pattern(namespace, winner_id).await
    }

    /// Hard delete. Returns whether a row was removed.
    pub async fn delete_pattern(&self, namespace: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM patterns WHERE namespace = ?1 AND id = ?2")
            .bind(namespace)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Mark or clear the contradiction review flag. Returns whether the
    /// pattern still existed.
    pub async fn set_contradiction_flag(
        &self,
        namespace: &str,
        id: &str,
        flagged: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE patterns SET contradiction_flagged = ?1, version = version + 1
             WHERE namespace = ?2 AND id = ?3",
        )
        .bind(i64::from(flagged))
        .bind(namespace)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn count_patterns(&self, namespace: &str) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM patterns WHERE namespace = ?1")
                .bind(namespace)
                .fetch_one(&self.pool)
                .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    // ── Links ────────────────────────────────────────────────

    pub async fn put_link(&self, link: &PatternLink) -> Result<()> {
        if link.from_id.trim().is_empty() || link.to_id.trim().is_empty() {
            return Err(MemoryError::Validation(
                "link endpoints must not be empty".into(),
            ));
        }

        sqlx::query(
            "INSERT OR IGNORE INTO pattern_links (from_id, to_id, relation) VALUES (?1, ?2, ?3)",
        )
        .bind(&link.from_id)
        .bind(&link.to_id)
        .bind(link.relation.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn links_for(&self, pattern_id: &str) -> Result<Vec<PatternLink>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT from_id, to_id, relation FROM pattern_links
             WHERE from_id = ?1 OR to_id = ?1 ORDER BY from_id, to_id, relation",
        )
        .bind(pattern_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(from_id, to_id, relation)| {
                Ok(PatternLink {
                    from_id,
                    to_id,
                    relation: relation.parse()?,
                })
            })
            .collect()
    }

    // ── Trajectories ─────────────────────────────────────────

    pub async fn put_trajectory(&self, trajectory: &TaskTrajectory) -> Result<()> {
        trajectory.validate()?;

        let used = serde_json::to_string(&trajectory.used_pattern_ids)
            .map_err(|e| MemoryError::Validation(format!("used_pattern_ids: {e}")))?;

        let inserted = sqlx::query(
            "INSERT INTO trajectories (id, namespace, query_text, used_pattern_ids,
                    verdict, verdict_confidence, timestamp, consolidated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&trajectory.id)
        .bind(&trajectory.namespace)
        .bind(&trajectory.query_text)
        .bind(&used)
        .bind(trajectory.verdict.to_string())
        .bind(trajectory.verdict_confidence)
        .bind(trajectory.timestamp.to_rfc3339())
        .bind(i64::from(trajectory.consolidated))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(MemoryError::Validation(format!(
                "trajectory {} already recorded",
                trajectory.id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    /// Trajectories for a namespace in insertion order, with their store
    /// sequence numbers. `since_seq` resumes after a previously seen row.
    pub async fn list_trajectories(
        &self,
        namespace: &str,
        since_seq: Option<i64>,
    ) -> Result<Vec<(i64, TaskTrajectory)>> {
        let rows: Vec<TrajectoryRow> = sqlx::query_as(
            "SELECT rowid, id, namespace, query_text, used_pattern_ids,
                    verdict, verdict_confidence, timestamp, consolidated
             FROM trajectories
             WHERE namespace = ?1 AND rowid > ?2
             ORDER BY rowid",
        )
        .bind(namespace)
        .bind(since_seq.unwrap_or(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(trajectory_from_row).collect()
    }

    pub async fn mark_trajectories_consolidated(&self, ids: &[String]) -> Result<u64> {
        let mut marked = 0;
        for id in ids {
            let result =
                sqlx::query("UPDATE trajectories SET consolidated = 1 WHERE id = ?1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            marked += result.rows_affected();
        }
        Ok(marked)
    }

    // ── Reinforcement idempotency markers ────────────────────

    /// Reserve the `(trajectory, pattern)` pair. Returns false when the
    /// pair was already applied — the caller must treat that as a no-op.
    pub async fn record_reinforcement(
        &self,
        trajectory_id: &str,
        pattern_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO applied_reinforcements (trajectory_id, pattern_id, applied_at)
             VALUES (?1, ?2, ?3)",
        )
        .bind(trajectory_id)
        .bind(pattern_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Compensation for a reserved pair whose stats update failed.
    pub async fn remove_reinforcement(
        &self,
        trajectory_id: &str,
        pattern_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM applied_reinforcements WHERE trajectory_id = ?1 AND pattern_id = ?2",
        )
        .bind(trajectory_id)
        .bind(pattern_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ── Row mapping ──────────────────────────────────────────────

#[allow(clippy::cast_sign_loss)]
fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| MemoryError::Store(format!("malformed timestamp {raw:?}: {e}")))
}

fn pattern_from_row(row: PatternRow) -> Result<Pattern> {
    let (
        id,
        namespace,
        content,
        domain,
        tags,
        embedding,
        confidence,
        usage_count,
        success_count,
        contradiction_flagged,
        created_at,
        last_used_at,
        version,
    ) = row;

    let tags: Vec<String> = serde_json::from_str(&tags)
        .map_err(|e| MemoryError::Store(format!("malformed tags column: {e}")))?;

    Ok(Pattern {
        id,
        namespace,
        content,
        domain,
        tags,
        embedding: vector::bytes_to_vec(&embedding),
        confidence,
        usage_count: to_u64(usage_count),
        success_count: to_u64(success_count),
        contradiction_flagged: contradiction_flagged != 0,
        created_at: parse_timestamp(&created_at)?,
        last_used_at: last_used_at.as_deref().map(parse_timestamp).transpose()?,
        version,
    })
}

fn trajectory_from_row(row: TrajectoryRow) -> Result<(i64, TaskTrajectory)> {
    let (seq, id, namespace, query_text, used, verdict, verdict_confidence, timestamp, consolidated) =
        row;

    let used_pattern_ids: Vec<String> = serde_json::from_str(&used)
        .map_err(|e| MemoryError::Store(format!("malformed used_pattern_ids column: {e}")))?;

    Ok((
        seq,
        TaskTrajectory {
            id,
            namespace,
            query_text,
            used_pattern_ids,
            verdict: Verdict::from_str(&verdict)?,
            verdict_confidence,
            timestamp: parse_timestamp(&timestamp)?,
            consolidated: consolidated != 0,
        },
    ))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
