//! Quiz session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::material::MaterialRef;
use super::question::Question;

/// Lifecycle state for a quiz session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Lock granted; waiting on the generator.
    Generating,
    /// Questions ready; the countdown is running.
    Active,
    /// A submission claimed the session and is being finalized.
    Submitting,
    /// Result computed and cached; terminal.
    Completed,
    /// Countdown hit zero before an explicit submit; still submittable.
    Expired,
    /// Generation failed; terminal, retry starts a new session.
    Failed,
}

impl SessionState {
    /// Whether the session can no longer change.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The bounded lifecycle object spanning one generated question set
/// through submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizSession {
    /// Unique session identifier.
    pub id: String,
    /// Owning user; immutable after creation.
    pub user_id: String,
    /// Material the quiz was generated from.
    pub material: MaterialRef,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Generated questions in generation order; empty until Active.
    pub questions: Vec<Question>,
    /// Answering countdown budget, in seconds.
    pub duration_seconds: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last state-change timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set when the session reaches a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    /// Construct a new session in `Generating` state with a generated id.
    #[must_use]
    pub fn new(user_id: String, material: MaterialRef, duration_seconds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            material,
            state: SessionState::Generating,
            questions: Vec::new(),
            duration_seconds,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    ///
    /// `Submitting` may fall back to `Active` or `Expired` so a failed
    /// finalize can be retried without losing the attempt.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self.state, next),
            (SessionState::Generating, SessionState::Active | SessionState::Failed)
                | (SessionState::Active, SessionState::Submitting | SessionState::Expired)
                | (SessionState::Expired, SessionState::Submitting)
                | (
                    SessionState::Submitting,
                    SessionState::Completed | SessionState::Active | SessionState::Expired
                )
        )
    }

    /// Whether the session accepts a submission claim.
    #[must_use]
    pub fn is_submittable(&self) -> bool {
        matches!(self.state, SessionState::Active | SessionState::Expired)
    }
}
