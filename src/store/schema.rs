use anyhow::Context;
use chrono::Utc;
use sqlx::SqlitePool;

pub(super) const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS patterns (
    id                     TEXT NOT NULL,
    namespace              TEXT NOT NULL,
    content                TEXT NOT NULL,
    domain                 TEXT,
    tags                   TEXT NOT NULL DEFAULT '[]',
    embedding              BLOB NOT NULL,
    confidence             REAL NOT NULL,
    usage_count            INTEGER NOT NULL DEFAULT 0,
    success_count          INTEGER NOT NULL DEFAULT 0,
    contradiction_flagged  INTEGER NOT NULL DEFAULT 0,
    created_at             TEXT NOT NULL,
    last_used_at           TEXT,
    version                INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (namespace, id)
);
CREATE INDEX IF NOT EXISTS idx_patterns_namespace ON patterns(namespace);
CREATE INDEX IF NOT EXISTS idx_patterns_namespace_domain ON patterns(namespace, domain);

CREATE TABLE IF NOT EXISTS pattern_links (
    from_id   TEXT NOT NULL,
    to_id     TEXT NOT NULL,
    relation  TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id, relation)
);

CREATE TABLE IF NOT EXISTS trajectories (
    id                  TEXT PRIMARY KEY,
    namespace           TEXT NOT NULL,
    query_text          TEXT NOT NULL,
    used_pattern_ids    TEXT NOT NULL DEFAULT '[]',
    verdict             TEXT NOT NULL,
    verdict_confidence  REAL NOT NULL,
    timestamp           TEXT NOT NULL,
    consolidated        INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_trajectories_namespace ON trajectories(namespace);

CREATE TABLE IF NOT EXISTS applied_reinforcements (
    trajectory_id  TEXT NOT NULL,
    pattern_id     TEXT NOT NULL,
    applied_at     TEXT NOT NULL,
    PRIMARY KEY (trajectory_id, pattern_id)
);

CREATE TABLE IF NOT EXISTS memory_schema_version (
    id          INTEGER PRIMARY KEY CHECK(id = 1),
    version     INTEGER NOT NULL,
    updated_at  TEXT NOT NULL
);
";

/// Create tables and reconcile schema version markers.
///
/// Refuses to open a database written by a newer engine; the version table
/// and `PRAGMA user_version` must agree.
pub(super) async fn init_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(pool)
        .await
        .context("create memory engine schema")?;

    let pragma_version = get_user_version(pool).await?;
    if pragma_version > SCHEMA_VERSION {
        anyhow::bail!("sqlite schema version unsupported: user_version={pragma_version}");
    }

    let recorded: Option<(i64,)> =
        sqlx::query_as("SELECT version FROM memory_schema_version WHERE id = 1")
            .fetch_optional(pool)
            .await
            .context("read schema version")?;

    match recorded {
        Some((version,)) if version > SCHEMA_VERSION => {
            anyhow::bail!("sqlite schema version unsupported: {version}");
        }
        Some((version,)) if pragma_version != 0 && pragma_version != version => {
            anyhow::bail!(
                "sqlite schema inconsistent: memory_schema_version={version} but PRAGMA user_version={pragma_version}"
            );
        }
        _ => {}
    }

    set_schema_version(pool, SCHEMA_VERSION).await?;
    Ok(())
}

async fn set_schema_version(pool: &SqlitePool, version: i64) -> anyhow::Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO memory_schema_version (id, version, updated_at)
         VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET
             version = excluded.version,
             updated_at = excluded.updated_at",
    )
    .bind(version)
    .bind(&now)
    .execute(pool)
    .await
    .context("record schema version")?;

    sqlx::raw_sql(&format!("PRAGMA user_version = {version}"))
        .execute(pool)
        .await
        .context("set user_version")?;
    Ok(())
}

async fn get_user_version(pool: &SqlitePool) -> anyhow::Result<i64> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .context("read user_version")?;
    Ok(version)
}
