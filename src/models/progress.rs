//! Progress snapshot: the durable checkpoint of in-progress answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel stored for a question the user has not answered.
pub const UNANSWERED: i32 = -1;

/// Periodic checkpoint of an in-progress attempt, enabling recovery
/// after interruption.
///
/// Scoped by `(user_id, session_id)` so client storage shared across
/// logical identities on one device cannot cross-contaminate. A snapshot
/// is only meaningful while its session is live and non-terminal; a
/// session-id mismatch on load is treated as absence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Owning user.
    pub user_id: String,
    /// Session this checkpoint belongs to.
    pub session_id: String,
    /// Question the user is currently viewing.
    pub current_index: u32,
    /// Selected option per question position; [`UNANSWERED`] where unset.
    pub answers: Vec<i32>,
    /// Countdown value at save time, in seconds.
    pub remaining_seconds: i64,
    /// When this snapshot was persisted.
    pub saved_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Fresh snapshot for a newly activated session: nothing answered,
    /// full countdown remaining.
    #[must_use]
    pub fn fresh(
        user_id: String,
        session_id: String,
        question_count: usize,
        duration_seconds: u32,
    ) -> Self {
        Self {
            user_id,
            session_id,
            current_index: 0,
            answers: vec![UNANSWERED; question_count],
            remaining_seconds: i64::from(duration_seconds),
            saved_at: Utc::now(),
        }
    }

    /// Number of questions with a recorded answer.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| **a != UNANSWERED).count()
    }
}
