//! Graded result repository for `SQLite` persistence.
//!
//! The result is stored as its canonical JSON payload so repeated
//! submissions against a completed session return byte-identical
//! responses without regrading.

use std::sync::Arc;

use chrono::Utc;

use crate::models::result::QuizResult;
use crate::Result;

use super::db::Database;
use super::to_ts;

/// Repository wrapper around `SQLite` for graded results.
#[derive(Clone)]
pub struct ResultRepo {
    db: Arc<Database>,
}

impl ResultRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a result. A racing duplicate insert is a no-op; the
    /// first stored payload wins.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn insert(&self, result: &QuizResult) -> Result<()> {
        let payload = serde_json::to_string(result)?;

        sqlx::query(
            "INSERT INTO quiz_result (session_id, payload, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(&result.session_id)
        .bind(&payload)
        .bind(to_ts(Utc::now()))
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Retrieve the stored result for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query or payload parse fails.
    pub async fn get(&self, session_id: &str) -> Result<Option<QuizResult>> {
        Ok(self
            .payload(session_id)
            .await?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?)
    }

    /// Raw stored payload for a session, exactly as first written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn payload(&self, session_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM quiz_result WHERE session_id = ?1")
                .bind(session_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        Ok(row.map(|(payload,)| payload))
    }
}
