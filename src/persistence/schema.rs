//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe
//! to re-run on every server startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// Creates all four tables idempotently. Safe to call on every startup.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS generation_lock (
    user_id         TEXT PRIMARY KEY NOT NULL,
    material_type   TEXT NOT NULL CHECK(material_type IN ('file','tag')),
    material_id     TEXT NOT NULL,
    acquired_at     TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS quiz_session (
    id              TEXT PRIMARY KEY NOT NULL,
    user_id         TEXT NOT NULL,
    material_type   TEXT NOT NULL CHECK(material_type IN ('file','tag')),
    material_id     TEXT NOT NULL,
    state           TEXT NOT NULL CHECK(state IN ('generating','active','submitting','completed','expired','failed')),
    questions       TEXT NOT NULL DEFAULT '[]',
    duration_seconds INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    finished_at     TEXT
);

CREATE TABLE IF NOT EXISTS progress_snapshot (
    user_id         TEXT NOT NULL,
    session_id      TEXT NOT NULL,
    current_index   INTEGER NOT NULL DEFAULT 0,
    answers         TEXT NOT NULL DEFAULT '[]',
    remaining_seconds INTEGER NOT NULL,
    saved_at        TEXT NOT NULL,
    PRIMARY KEY (user_id, session_id)
);

CREATE TABLE IF NOT EXISTS quiz_result (
    session_id      TEXT PRIMARY KEY NOT NULL,
    payload         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_user ON quiz_session(user_id);
CREATE INDEX IF NOT EXISTS idx_snapshot_session ON progress_snapshot(session_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
