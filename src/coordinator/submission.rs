//! Session finalization: deterministic grading with idempotent results.
//!
//! A submission claims the session with a single conditional update
//! *before* any grading work, so a manual submit racing timer expiry
//! produces exactly one computed result. Resubmission against a
//! completed session returns the stored payload unchanged.

use tracing::{info, info_span, warn};

use crate::models::progress::UNANSWERED;
use crate::models::result::{PerQuestionResult, QuizResult};
use crate::models::session::{QuizSession, SessionState};
use crate::persistence::result_repo::ResultRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::snapshot_repo::SnapshotRepo;
use crate::{AppError, Result};

/// Total points distributed evenly across a session's questions.
const TOTAL_POINTS: f64 = 100.0;

/// Finalizes sessions: claims, grades, persists, cleans up.
#[derive(Clone)]
pub struct SubmissionService {
    sessions: SessionRepo,
    snapshots: SnapshotRepo,
    results: ResultRepo,
}

impl SubmissionService {
    /// Create a new submission service.
    #[must_use]
    pub fn new(sessions: SessionRepo, snapshots: SnapshotRepo, results: ResultRepo) -> Self {
        Self {
            sessions,
            snapshots,
            results,
        }
    }

    /// Finalize a session against the submitted answers.
    ///
    /// Valid only for `Active` or `Expired`-but-unsubmitted sessions.
    /// Missing answers score as incorrect; extra answers beyond the
    /// question count are ignored. Submitting an already-completed
    /// session returns the previously stored result unchanged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist,
    /// `AppError::Submission` if it is not submittable or persisting
    /// the result fails (the progress snapshot is preserved in that
    /// case so answers are not lost).
    pub async fn submit(&self, session_id: &str, answers: &[i32]) -> Result<QuizResult> {
        let span = info_span!("submit", session_id);
        let _guard = span.enter();

        // Idempotent fast path: the result is cached on the session.
        if let Some(existing) = self.results.get(session_id).await? {
            info!(session_id, "returning cached result");
            return Ok(existing);
        }

        let session = self
            .sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;
        let prior_state = session.state;

        // Single-flight claim before any grading or network work.
        if !self.sessions.try_claim_submitting(session_id).await? {
            return self.resolve_lost_claim(session_id).await;
        }

        let result = grade(&session, answers);

        if let Err(err) = self.results.insert(&result).await {
            // Roll back the claim and keep the snapshot so the caller
            // can retry without losing answers.
            warn!(session_id, %err, "failed to persist result; restoring session state");
            if let Err(revert_err) = self.sessions.update_state(session_id, prior_state).await {
                warn!(session_id, %revert_err, "failed to restore session state");
            }
            return Err(AppError::Submission(format!(
                "could not persist result: {err}"
            )));
        }

        self.sessions
            .update_state(session_id, SessionState::Completed)
            .await?;
        self.snapshots.clear_for_session(session_id).await?;
        // The generation lock is never touched here: its lifecycle ends
        // at activation or failure, and the user may already hold a new
        // one for a generation running in another tab. An orphaned lock
        // is reclaimed by its TTL.

        info!(
            session_id,
            final_score = result.final_score,
            accuracy = result.accuracy,
            "session completed"
        );
        Ok(result)
    }

    /// Drive the auto-submission path when the countdown expires.
    ///
    /// Marks an `Active` session `Expired`, then submits the latest
    /// checkpointed answers; questions never answered are recorded with
    /// the unanswered sentinel rather than treated as an error.
    ///
    /// # Errors
    ///
    /// Propagates the same failures as [`submit`](Self::submit).
    pub async fn auto_submit(&self, session_id: &str) -> Result<QuizResult> {
        let span = info_span!("auto_submit", session_id);
        let _guard = span.enter();

        let session = self
            .sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?;

        if session.state == SessionState::Active {
            self.sessions
                .update_state(session_id, SessionState::Expired)
                .await?;
        }

        let answers = match self.snapshots.load(&session.user_id, session_id).await? {
            Some(snapshot) => snapshot.answers,
            None => vec![UNANSWERED; session.questions.len()],
        };

        self.submit(session_id, &answers).await
    }

    /// Losing side of the single-flight claim: surface the winner's
    /// result if it is already stored, otherwise a typed in-flight or
    /// not-submittable error.
    async fn resolve_lost_claim(&self, session_id: &str) -> Result<QuizResult> {
        if let Some(existing) = self.results.get(session_id).await? {
            return Ok(existing);
        }

        let state = self
            .sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))?
            .state;

        match state {
            SessionState::Submitting => Err(AppError::Submission(
                "a submission for this session is already in flight".into(),
            )),
            SessionState::Completed => {
                // Claimed, completed, but the result read raced the
                // writer; one more read settles it.
                self.results
                    .get(session_id)
                    .await?
                    .ok_or_else(|| AppError::Submission("completed session has no result".into()))
            }
            other => Err(AppError::Submission(format!(
                "session is not submittable in state {other:?}"
            ))),
        }
    }
}

/// Deterministic grading from the withheld answer key.
///
/// Each question is worth an equal share of 100 points. `selected`
/// values that are out of range or the unanswered sentinel score zero.
#[must_use]
pub fn grade(session: &QuizSession, answers: &[i32]) -> QuizResult {
    let count = session.questions.len();
    let points = if count == 0 {
        0.0
    } else {
        TOTAL_POINTS / f64::from(u32::try_from(count).unwrap_or(u32::MAX))
    };

    let mut per_question = Vec::with_capacity(count);
    let mut correct_count: u32 = 0;
    let mut final_score = 0.0;

    for (index, question) in session.questions.iter().enumerate() {
        let selected = answers.get(index).copied().unwrap_or(UNANSWERED);
        let is_correct =
            u32::try_from(selected).is_ok_and(|choice| choice == question.answer_index);
        let score = if is_correct { points } else { 0.0 };

        if is_correct {
            correct_count += 1;
            final_score += points;
        }

        per_question.push(PerQuestionResult {
            index: u32::try_from(index).unwrap_or(u32::MAX),
            selected,
            correct_index: question.answer_index,
            is_correct,
            score,
        });
    }

    let accuracy = if count == 0 {
        0.0
    } else {
        f64::from(correct_count) / f64::from(u32::try_from(count).unwrap_or(u32::MAX))
    };

    QuizResult {
        session_id: session.id.clone(),
        final_score,
        accuracy,
        per_question,
    }
}
