//! Quiz session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::material::MaterialRef;
use crate::models::question::Question;
use crate::models::session::{QuizSession, SessionState};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_ts, to_ts};

/// Repository wrapper around `SQLite` for quiz session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    material_type: String,
    material_id: String,
    state: String,
    questions: String,
    duration_seconds: i64,
    created_at: String,
    updated_at: String,
    finished_at: Option<String>,
}

impl SessionRow {
    /// Convert a database row into the domain model.
    fn into_session(self) -> Result<QuizSession> {
        let questions: Vec<Question> = serde_json::from_str(&self.questions)?;
        let duration_seconds = u32::try_from(self.duration_seconds)
            .map_err(|_| AppError::Db("negative duration_seconds".into()))?;
        let finished_at = self
            .finished_at
            .as_deref()
            .map(|s| parse_ts(s, "finished_at"))
            .transpose()?;

        Ok(QuizSession {
            id: self.id,
            user_id: self.user_id,
            material: MaterialRef::from_columns(&self.material_type, &self.material_id)?,
            state: parse_state(&self.state)?,
            questions,
            duration_seconds,
            created_at: parse_ts(&self.created_at, "created_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
            finished_at,
        })
    }
}

fn parse_state(s: &str) -> Result<SessionState> {
    match s {
        "generating" => Ok(SessionState::Generating),
        "active" => Ok(SessionState::Active),
        "submitting" => Ok(SessionState::Submitting),
        "completed" => Ok(SessionState::Completed),
        "expired" => Ok(SessionState::Expired),
        "failed" => Ok(SessionState::Failed),
        other => Err(AppError::Db(format!("invalid session state: {other}"))),
    }
}

fn state_str(state: SessionState) -> &'static str {
    match state {
        SessionState::Generating => "generating",
        SessionState::Active => "active",
        SessionState::Submitting => "submitting",
        SessionState::Completed => "completed",
        SessionState::Expired => "expired",
        SessionState::Failed => "failed",
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &QuizSession) -> Result<QuizSession> {
        let questions = serde_json::to_string(&session.questions)?;

        sqlx::query(
            "INSERT INTO quiz_session (id, user_id, material_type, material_id, state,
             questions, duration_seconds, created_at, updated_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.material.type_str())
        .bind(session.material.id_string())
        .bind(state_str(session.state))
        .bind(&questions)
        .bind(i64::from(session.duration_seconds))
        .bind(to_ts(session.created_at))
        .bind(to_ts(session.updated_at))
        .bind(session.finished_at.map(to_ts))
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// Returns `Ok(None)` if the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<QuizSession>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM quiz_session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Update session state, respecting the lifecycle state machine.
    ///
    /// Terminal transitions also stamp `finished_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if the transition is invalid or persistence fails.
    pub async fn update_state(&self, id: &str, next: SessionState) -> Result<QuizSession> {
        let mut current = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if !current.can_transition_to(next) {
            return Err(AppError::Db(format!(
                "invalid session state transition: {} -> {}",
                state_str(current.state),
                state_str(next)
            )));
        }

        let now = Utc::now();
        current.state = next;
        current.updated_at = now;
        if next.is_terminal() {
            current.finished_at = Some(now);
        }

        sqlx::query(
            "UPDATE quiz_session SET state = ?1, updated_at = ?2, finished_at = ?3 WHERE id = ?4",
        )
        .bind(state_str(next))
        .bind(to_ts(now))
        .bind(current.finished_at.map(to_ts))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(current)
    }

    /// Store generated questions and activate the session in one update.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the session is not `Generating` or the
    /// update fails.
    pub async fn activate_with_questions(
        &self,
        id: &str,
        questions: &[Question],
    ) -> Result<QuizSession> {
        let mut current = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if !current.can_transition_to(SessionState::Active) {
            return Err(AppError::Db(format!(
                "cannot activate session in state {}",
                state_str(current.state)
            )));
        }

        let now = Utc::now();
        let serialized = serde_json::to_string(questions)?;

        sqlx::query(
            "UPDATE quiz_session SET state = 'active', questions = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(&serialized)
        .bind(to_ts(now))
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        current.state = SessionState::Active;
        current.questions = questions.to_vec();
        current.updated_at = now;
        Ok(current)
    }

    /// Atomically claim a session for submission.
    ///
    /// Single conditional update: only an `Active` or `Expired` session
    /// can be claimed, and concurrent claimants see exactly one winner.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn try_claim_submitting(&self, id: &str) -> Result<bool> {
        let claimed = sqlx::query(
            "UPDATE quiz_session SET state = 'submitting', updated_at = ?1
             WHERE id = ?2 AND state IN ('active', 'expired')",
        )
        .bind(to_ts(Utc::now()))
        .bind(id)
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        Ok(claimed > 0)
    }

    /// Most recent non-terminal session for a user, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn live_for_user(&self, user_id: &str) -> Result<Option<QuizSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM quiz_session
             WHERE user_id = ?1 AND state IN ('generating', 'active', 'submitting', 'expired')
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Most recent session for a user regardless of state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn latest_for_user(&self, user_id: &str) -> Result<Option<QuizSession>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM quiz_session WHERE user_id = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Repair sessions a crash left claimed mid-submission.
    ///
    /// Run on startup, when no submission can be in flight: `Submitting`
    /// rows whose result already landed are completed, the rest roll
    /// back to `Expired` so their checkpointed answers can still be
    /// finalized. Returns the number rolled back.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if either update fails.
    pub async fn repair_interrupted_submitting(&self) -> Result<u64> {
        let now = to_ts(Utc::now());

        sqlx::query(
            "UPDATE quiz_session SET state = 'completed', updated_at = ?1, finished_at = ?1
             WHERE state = 'submitting'
               AND id IN (SELECT session_id FROM quiz_result)",
        )
        .bind(&now)
        .execute(self.db.as_ref())
        .await?;

        let rolled_back = sqlx::query(
            "UPDATE quiz_session SET state = 'expired', updated_at = ?1
             WHERE state = 'submitting'",
        )
        .bind(&now)
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        Ok(rolled_back)
    }

    /// Mark `Generating` sessions older than `cutoff` as `Failed`.
    ///
    /// Run on startup: such rows were abandoned by a crash and their
    /// lock TTL has lapsed, so no generator will ever activate them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn fail_stale_generating(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let now = to_ts(Utc::now());
        let failed = sqlx::query(
            "UPDATE quiz_session SET state = 'failed', updated_at = ?1, finished_at = ?1
             WHERE state = 'generating' AND created_at < ?2",
        )
        .bind(&now)
        .bind(to_ts(cutoff))
        .execute(self.db.as_ref())
        .await?
        .rows_affected();

        Ok(failed)
    }
}
