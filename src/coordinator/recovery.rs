//! Reconciliation after interruption: reload, tab loss, navigation.
//!
//! Whenever the session context is re-established, the reconciler
//! compares the latest checkpoint, the server-side lock status, and
//! material existence, and decides between resuming an attempt,
//! attaching to an in-flight generation, reporting stale content, or
//! starting fresh. Waiting for a generation prefers the per-user
//! notification channel and falls back to bounded polling; the wait is
//! never unbounded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::models::progress::ProgressSnapshot;
use crate::models::result::QuizResult;
use crate::models::session::{QuizSession, SessionState};
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::snapshot_repo::SnapshotRepo;
use crate::{AppError, Result};

use super::generation_lock::GenerationLocks;
use super::generator::MaterialCatalog;
use super::notify::{GenerationEvents, GenerationOutcome};
use super::submission::SubmissionService;

/// What the reconciler found for a user.
#[derive(Debug)]
pub enum RecoveryOutcome {
    /// A live attempt exists; restore index, answers, and countdown.
    Resumed {
        /// The still-active session.
        session: QuizSession,
        /// The checkpoint to restore from.
        snapshot: ProgressSnapshot,
    },
    /// An outstanding generation resolved; attach to the new session.
    Attached {
        /// The freshly activated session.
        session: QuizSession,
    },
    /// The attempt was already over (countdown elapsed, or a crash
    /// interrupted its submission); it was finalized from the
    /// checkpoint.
    Finalized {
        /// The graded result.
        result: QuizResult,
    },
    /// The referenced material no longer exists; lock and snapshots
    /// were cleared and the user must re-select.
    StaleContent,
    /// Nothing to recover (also returned when the caller cancels the
    /// wait via reset).
    Fresh,
}

/// Reconciles local checkpoints, lock status, and material existence.
pub struct RecoveryReconciler {
    sessions: SessionRepo,
    snapshots: SnapshotRepo,
    locks: GenerationLocks,
    events: Arc<GenerationEvents>,
    catalog: Arc<dyn MaterialCatalog>,
    submission: SubmissionService,
    poll_interval: Duration,
    poll_cap: Duration,
}

impl RecoveryReconciler {
    /// Create a new reconciler.
    #[must_use]
    pub fn new(
        sessions: SessionRepo,
        snapshots: SnapshotRepo,
        locks: GenerationLocks,
        events: Arc<GenerationEvents>,
        catalog: Arc<dyn MaterialCatalog>,
        submission: SubmissionService,
        poll_interval: Duration,
        poll_cap: Duration,
    ) -> Self {
        Self {
            sessions,
            snapshots,
            locks,
            events,
            catalog,
            submission,
            poll_interval,
            poll_cap,
        }
    }

    /// Reconcile state for a user after an interruption.
    ///
    /// `cancel` aborts a generation wait early; an explicit reset
    /// cancels it and the reconcile resolves to `Fresh`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::GenerationFailed` when the outstanding
    /// generation resolves to failure, `AppError::Timeout` when the
    /// poll cap elapses first, or `AppError::Db` on persistence errors.
    /// Finalizing an interrupted attempt propagates submission failures
    /// with the checkpoint left intact.
    pub async fn reconcile(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RecoveryOutcome> {
        let span = info_span!("reconcile", user_id);
        let _guard = span.enter();

        // Step 1: a local checkpoint referencing a non-terminal session
        // wins; its answers are never discarded while the session is
        // still submittable.
        if let Some(snapshot) = self.snapshots.latest_for_user(user_id).await? {
            if let Some(session) = self.sessions.get_by_id(&snapshot.session_id).await? {
                if session.state == SessionState::Active {
                    if !self.catalog.exists(&session.material).await? {
                        warn!(user_id, material = %session.material, "material gone; stale content");
                        self.clear_user(user_id).await?;
                        return Ok(RecoveryOutcome::StaleContent);
                    }
                    info!(
                        user_id,
                        session_id = %session.id,
                        answered = snapshot.answered_count(),
                        "resuming from checkpoint"
                    );
                    return Ok(RecoveryOutcome::Resumed { session, snapshot });
                }
                if !session.state.is_terminal() {
                    // Expired before submission (or a claim a crash
                    // interrupted): the attempt is over but the answers
                    // still count. Finalize from the checkpoint.
                    info!(
                        user_id,
                        session_id = %session.id,
                        answered = snapshot.answered_count(),
                        "finalizing interrupted attempt from checkpoint"
                    );
                    let result = self.submission.auto_submit(&session.id).await?;
                    return Ok(RecoveryOutcome::Finalized { result });
                }
            }
            // Checkpoint for a terminal or missing session: ignore,
            // never merge.
            self.snapshots
                .clear(user_id, &snapshot.session_id)
                .await?;
        }

        // Step 2: no usable checkpoint; check for an outstanding generation.
        let status = self.locks.status(user_id).await?;
        if status.is_generating {
            if let Some(material) = &status.material {
                if !self.catalog.exists(material).await? {
                    warn!(user_id, %material, "material gone mid-generation; stale content");
                    self.clear_user(user_id).await?;
                    return Ok(RecoveryOutcome::StaleContent);
                }
            }
            return self.await_generation(user_id, cancel).await;
        }

        Ok(RecoveryOutcome::Fresh)
    }

    /// Wait for the user's outstanding generation to resolve.
    ///
    /// Subscribes to the notification channel first, with interval
    /// polling as the fallback, all under a hard deadline.
    async fn await_generation(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RecoveryOutcome> {
        let mut events = self.events.subscribe(user_id).await;
        let mut events_open = true;
        let deadline = tokio::time::Instant::now() + self.poll_cap;
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.tick().await;

        info!(user_id, "waiting for outstanding generation");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(user_id, "generation wait cancelled");
                    return Ok(RecoveryOutcome::Fresh);
                }
                () = tokio::time::sleep_until(deadline) => {
                    return Err(AppError::Timeout(
                        "generation did not resolve within the recovery window".into(),
                    ));
                }
                event = events.recv(), if events_open => {
                    match event {
                        Ok(GenerationOutcome::Ready { session_id }) => {
                            let session = self
                                .sessions
                                .get_by_id(&session_id)
                                .await?
                                .ok_or_else(|| {
                                    AppError::NotFound(format!("session {session_id} not found"))
                                })?;
                            info!(user_id, %session_id, "attached via notification");
                            return Ok(RecoveryOutcome::Attached { session });
                        }
                        Ok(GenerationOutcome::Failed { reason }) => {
                            return Err(AppError::GenerationFailed(reason));
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => {
                            // Channel retired; rely on polling from here on.
                            events_open = false;
                        }
                    }
                }
                _ = poll.tick() => {
                    if let Some(found) = self.poll_once(user_id).await? {
                        return found;
                    }
                }
            }
        }
    }

    /// One polling pass: resolved session, resolved failure, or keep
    /// waiting (`None`).
    async fn poll_once(&self, user_id: &str) -> Result<Option<Result<RecoveryOutcome>>> {
        if let Some(session) = self.sessions.live_for_user(user_id).await? {
            if session.state == SessionState::Active {
                info!(user_id, session_id = %session.id, "attached via polling");
                return Ok(Some(Ok(RecoveryOutcome::Attached { session })));
            }
            return Ok(None);
        }

        // No live session: if the lock is gone too, the generation
        // ended without producing anything attachable.
        let status = self.locks.status(user_id).await?;
        if status.is_generating {
            return Ok(None);
        }

        let reason = match self.sessions.latest_for_user(user_id).await? {
            Some(session) if session.state == SessionState::Failed => {
                "generation failed".to_owned()
            }
            _ => "generation ended without a session".to_owned(),
        };
        Ok(Some(Err(AppError::GenerationFailed(reason))))
    }

    /// Clear the user's lock and snapshots (stale-content path).
    async fn clear_user(&self, user_id: &str) -> Result<()> {
        self.locks.release(user_id).await?;
        self.snapshots.clear_for_user(user_id).await?;
        Ok(())
    }
}
