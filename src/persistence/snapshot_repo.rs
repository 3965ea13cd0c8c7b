//! Progress snapshot repository for `SQLite` persistence.
//!
//! Saves are single `INSERT OR REPLACE` statements keyed by
//! `(user_id, session_id)`, so a concurrent reader never observes a
//! half-applied snapshot, and writes for a session are totally ordered
//! with last-write-wins.

use std::sync::Arc;

use crate::models::progress::ProgressSnapshot;
use crate::Result;

use super::db::Database;
use super::{parse_ts, to_ts};

/// Repository wrapper around `SQLite` for progress snapshots.
#[derive(Clone)]
pub struct SnapshotRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SnapshotRow {
    user_id: String,
    session_id: String,
    current_index: i64,
    answers: String,
    remaining_seconds: i64,
    saved_at: String,
}

impl SnapshotRow {
    /// Convert a database row into the domain model.
    fn into_snapshot(self) -> Result<ProgressSnapshot> {
        let answers: Vec<i32> = serde_json::from_str(&self.answers)?;
        Ok(ProgressSnapshot {
            user_id: self.user_id,
            session_id: self.session_id,
            current_index: u32::try_from(self.current_index).unwrap_or(0),
            answers,
            remaining_seconds: self.remaining_seconds,
            saved_at: parse_ts(&self.saved_at, "saved_at")?,
        })
    }
}

impl SnapshotRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Atomically overwrite the snapshot for its `(user, session)` key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn save(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let answers = serde_json::to_string(&snapshot.answers)?;

        sqlx::query(
            "INSERT OR REPLACE INTO progress_snapshot
             (user_id, session_id, current_index, answers, remaining_seconds, saved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&snapshot.user_id)
        .bind(&snapshot.session_id)
        .bind(i64::from(snapshot.current_index))
        .bind(&answers)
        .bind(snapshot.remaining_seconds)
        .bind(to_ts(snapshot.saved_at))
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Load the snapshot for exactly this `(user, session)` pair.
    ///
    /// A snapshot saved under any other session id is absence, not
    /// corruption; it is never merged into the requested session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn load(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<ProgressSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT * FROM progress_snapshot WHERE user_id = ?1 AND session_id = ?2",
        )
        .bind(user_id)
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        match row {
            Some(row) if row.session_id == session_id => row.into_snapshot().map(Some),
            _ => Ok(None),
        }
    }

    /// Most recently saved snapshot for a user across sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest_for_user(&self, user_id: &str) -> Result<Option<ProgressSnapshot>> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT * FROM progress_snapshot WHERE user_id = ?1
             ORDER BY saved_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SnapshotRow::into_snapshot).transpose()
    }

    /// Delete the snapshot for one `(user, session)` pair. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn clear(&self, user_id: &str, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM progress_snapshot WHERE user_id = ?1 AND session_id = ?2")
            .bind(user_id)
            .bind(session_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete every snapshot a user owns. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn clear_for_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM progress_snapshot WHERE user_id = ?1")
            .bind(user_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Delete every snapshot referencing a session. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn clear_for_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM progress_snapshot WHERE session_id = ?1")
            .bind(session_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}
