//! Session lifecycle orchestration.
//!
//! [`SessionCoordinator`] owns the quiz-attempt state machine: it
//! acquires the per-user generation lock, drives the generator under
//! its own timeout, starts the countdown and checkpoint tasks once a
//! session activates, and funnels explicit submits, timer expiry,
//! recovery, and reset through one place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

use crate::clock::Clock;
use crate::config::GlobalConfig;
use crate::models::progress::ProgressSnapshot;
use crate::models::result::QuizResult;
use crate::models::session::{QuizSession, SessionState};
use crate::persistence::db::Database;
use crate::persistence::lock_repo::LockRepo;
use crate::persistence::result_repo::ResultRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::persistence::snapshot_repo::SnapshotRepo;
use crate::{AppError, Result};

use super::generation_lock::{AcquireOutcome, GenerationLocks, GenerationStatus};
use super::generator::{GenerateRequest, MaterialCatalog, QuizGenerator};
use super::notify::{GenerationEvents, GenerationOutcome};
use super::progress::{ProgressTracker, ProgressTrackerHandle};
use super::recovery::{RecoveryOutcome, RecoveryReconciler};
use super::submission::SubmissionService;
use super::timer::{QuizTimer, QuizTimerHandle, TimerEvent};

/// Capacity of the timer expiry channel.
const TIMER_CHANNEL_CAPACITY: usize = 32;

/// Owns the session state machine and its background tasks.
pub struct SessionCoordinator {
    config: Arc<GlobalConfig>,
    sessions: SessionRepo,
    snapshots: SnapshotRepo,
    locks: GenerationLocks,
    events: Arc<GenerationEvents>,
    generator: Arc<dyn QuizGenerator>,
    catalog: Arc<dyn MaterialCatalog>,
    submission: SubmissionService,
    timer_tx: mpsc::Sender<TimerEvent>,
    timers: Mutex<HashMap<String, Arc<QuizTimerHandle>>>,
    trackers: Mutex<HashMap<String, Arc<ProgressTrackerHandle>>>,
    // Keyed by user; the id distinguishes overlapping recover calls so
    // a finished wait only removes its own entry.
    recovery_polls: Mutex<HashMap<String, (u64, CancellationToken)>>,
    poll_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl SessionCoordinator {
    /// Build the coordinator and its timer expiry channel.
    ///
    /// The returned receiver must be handed to
    /// [`spawn_expiry_consumer`] so countdown expiry drives the normal
    /// submission path.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        db: &Arc<Database>,
        clock: Arc<dyn Clock>,
        generator: Arc<dyn QuizGenerator>,
        catalog: Arc<dyn MaterialCatalog>,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<TimerEvent>) {
        let sessions = SessionRepo::new(Arc::clone(db));
        let snapshots = SnapshotRepo::new(Arc::clone(db));
        let results = ResultRepo::new(Arc::clone(db));
        let locks = GenerationLocks::new(
            LockRepo::new(Arc::clone(db)),
            clock,
            config.generation.lock_ttl_seconds,
        );
        let submission = SubmissionService::new(sessions.clone(), snapshots.clone(), results);
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);

        let coordinator = Arc::new(Self {
            config,
            sessions,
            snapshots,
            locks,
            events: Arc::new(GenerationEvents::new()),
            generator,
            catalog,
            submission,
            timer_tx,
            timers: Mutex::new(HashMap::new()),
            trackers: Mutex::new(HashMap::new()),
            recovery_polls: Mutex::new(HashMap::new()),
            poll_seq: AtomicU64::new(0),
            shutdown,
        });

        (coordinator, timer_rx)
    }

    /// Generation-status query for one user.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn status(&self, user_id: &str) -> Result<GenerationStatus> {
        self.locks.status(user_id).await
    }

    /// Fetch a session by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if it does not exist.
    pub async fn session(&self, session_id: &str) -> Result<QuizSession> {
        self.sessions
            .get_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
    }

    /// Latest checkpoint for a session, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn progress(&self, session_id: &str) -> Result<Option<ProgressSnapshot>> {
        if let Some(handle) = self.trackers.lock().await.get(session_id) {
            return Ok(Some(handle.current()));
        }
        let session = self.session(session_id).await?;
        self.snapshots.load(&session.user_id, session_id).await
    }

    /// Start a new quiz session: lock, generate, activate.
    ///
    /// Validation happens before the lock is touched. The lock covers
    /// only the generation step; on success it is released as soon as
    /// the session activates, and on any failure it is released within
    /// the same call so a retry can acquire immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation`, `AppError::StaleContent`,
    /// `AppError::LockConflict`, `AppError::GenerationFailed`, or
    /// `AppError::Timeout`.
    pub async fn start_session(&self, request: &GenerateRequest) -> Result<QuizSession> {
        let span = info_span!("start_session", user_id = %request.user_id);
        let _guard = span.enter();

        request.validate(self.config.generation.max_question_count)?;
        if !self.catalog.exists(&request.material).await? {
            return Err(AppError::StaleContent(format!(
                "material {} no longer exists",
                request.material
            )));
        }

        match self
            .locks
            .acquire(&request.user_id, request.material.clone())
            .await?
        {
            AcquireOutcome::Acquired(_) => {}
            AcquireOutcome::Conflict(existing) => {
                return Err(AppError::LockConflict(format!(
                    "generation already in flight for {} since {}",
                    existing.material,
                    existing.acquired_at.to_rfc3339()
                )));
            }
        }

        let session = QuizSession::new(
            request.user_id.clone(),
            request.material.clone(),
            self.config.quiz.duration_seconds,
        );
        self.sessions.create(&session).await?;

        let budget = Duration::from_secs(self.config.generation.timeout_seconds);
        let generated = match tokio::time::timeout(budget, self.generator.generate(request)).await
        {
            Ok(Ok(quiz)) if !quiz.questions.is_empty() => quiz,
            Ok(Ok(_)) => {
                return self
                    .fail_generation(
                        &session,
                        AppError::GenerationFailed("generator returned no questions".into()),
                    )
                    .await;
            }
            Ok(Err(err)) => {
                let err = match err {
                    failed @ AppError::GenerationFailed(_) => failed,
                    other => AppError::GenerationFailed(other.to_string()),
                };
                return self.fail_generation(&session, err).await;
            }
            Err(_elapsed) => {
                return self
                    .fail_generation(
                        &session,
                        AppError::Timeout("generation request timed out".into()),
                    )
                    .await;
            }
        };

        let session = self
            .sessions
            .activate_with_questions(&session.id, &generated.questions)
            .await?;
        self.locks.release(&session.user_id).await?;
        self.events
            .publish(
                &session.user_id,
                GenerationOutcome::Ready {
                    session_id: session.id.clone(),
                },
            )
            .await;

        let snapshot = ProgressSnapshot::fresh(
            session.user_id.clone(),
            session.id.clone(),
            session.questions.len(),
            session.duration_seconds,
        );
        self.snapshots.save(&snapshot).await?;
        self.begin_attempt(&session, snapshot).await;

        info!(
            session_id = %session.id,
            questions = session.questions.len(),
            "session active"
        );
        Ok(session)
    }

    /// Record (or overwrite) the answer for one question.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an inactive session or an
    /// out-of-bounds index/option.
    pub async fn set_answer(
        &self,
        session_id: &str,
        index: u32,
        option: u32,
    ) -> Result<ProgressSnapshot> {
        let session = self.session(session_id).await?;
        if session.state != SessionState::Active {
            return Err(AppError::Validation(format!(
                "session {session_id} is not active"
            )));
        }

        let question = session
            .questions
            .get(index as usize)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "question index {index} out of bounds (0..{})",
                    session.questions.len()
                ))
            })?;
        if (option as usize) >= question.options.len() {
            return Err(AppError::Validation(format!(
                "option {option} out of bounds for question {index}"
            )));
        }

        let tracker = self.ensure_attempt(&session).await?;
        let mut snapshot = tracker.current();
        snapshot.answers[index as usize] = i32::try_from(option).unwrap_or(i32::MAX);
        self.sync_remaining(&mut snapshot).await;
        tracker.update(snapshot.clone());
        Ok(snapshot)
    }

    /// Move the current-question pointer without touching answers.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an inactive session or an
    /// out-of-bounds index.
    pub async fn go_to_question(&self, session_id: &str, index: u32) -> Result<ProgressSnapshot> {
        let session = self.session(session_id).await?;
        if session.state != SessionState::Active {
            return Err(AppError::Validation(format!(
                "session {session_id} is not active"
            )));
        }
        if (index as usize) >= session.questions.len() {
            return Err(AppError::Validation(format!(
                "question index {index} out of bounds (0..{})",
                session.questions.len()
            )));
        }

        let tracker = self.ensure_attempt(&session).await?;
        let mut snapshot = tracker.current();
        snapshot.current_index = index;
        self.sync_remaining(&mut snapshot).await;
        tracker.update(snapshot.clone());
        Ok(snapshot)
    }

    /// Persist the latest checkpoint immediately (teardown signal or
    /// explicit client checkpoint).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the save fails.
    pub async fn checkpoint(&self, session_id: &str) -> Result<()> {
        let handle = {
            let trackers = self.trackers.lock().await;
            trackers.get(session_id).map(Arc::clone)
        };
        if let Some(tracker) = handle {
            let mut snapshot = tracker.current();
            self.sync_remaining(&mut snapshot).await;
            tracker.update(snapshot);
            tracker.flush().await?;
        }
        Ok(())
    }

    /// Explicitly submit a session.
    ///
    /// # Errors
    ///
    /// Propagates [`SubmissionService::submit`] failures; the attempt's
    /// background tasks survive a failed submit so answers and the
    /// countdown are not lost.
    pub async fn submit(&self, session_id: &str, answers: &[i32]) -> Result<QuizResult> {
        let result = self.submission.submit(session_id, answers).await?;
        self.end_attempt(session_id).await;
        Ok(result)
    }

    /// Handle a countdown expiry event: expire, auto-submit, clean up.
    ///
    /// # Errors
    ///
    /// Propagates submission failures.
    pub async fn handle_expiry(&self, session_id: &str) -> Result<QuizResult> {
        // Flush the freshest answers before grading them.
        self.checkpoint(session_id).await?;
        let result = self.submission.auto_submit(session_id).await?;
        self.end_attempt(session_id).await;
        Ok(result)
    }

    /// Reconcile state for a user after a reload or tab switch.
    ///
    /// On resume, the countdown restarts from the checkpoint's saved
    /// value as-is (no wall-clock correction).
    ///
    /// # Errors
    ///
    /// Propagates [`RecoveryReconciler::reconcile`] failures.
    pub async fn recover(&self, user_id: &str) -> Result<RecoveryOutcome> {
        let reconciler = RecoveryReconciler::new(
            self.sessions.clone(),
            self.snapshots.clone(),
            self.locks.clone(),
            Arc::clone(&self.events),
            Arc::clone(&self.catalog),
            self.submission.clone(),
            Duration::from_secs(self.config.recovery.poll_interval_seconds),
            Duration::from_secs(self.config.recovery.poll_cap_seconds),
        );

        let cancel = self.shutdown.child_token();
        let poll_id = self.poll_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut polls = self.recovery_polls.lock().await;
            // A newer recover supersedes any wait still parked for this
            // user; the superseded call resolves Fresh.
            if let Some((_, superseded)) =
                polls.insert(user_id.to_owned(), (poll_id, cancel.clone()))
            {
                superseded.cancel();
            }
        }

        let outcome = reconciler.reconcile(user_id, &cancel).await;
        {
            let mut polls = self.recovery_polls.lock().await;
            if polls.get(user_id).is_some_and(|(id, _)| *id == poll_id) {
                polls.remove(user_id);
            }
        }

        match outcome? {
            RecoveryOutcome::Resumed { session, snapshot } => {
                self.restart_attempt(&session, snapshot.clone()).await;
                Ok(RecoveryOutcome::Resumed { session, snapshot })
            }
            RecoveryOutcome::Attached { session } => {
                let snapshot = match self.snapshots.load(&session.user_id, &session.id).await? {
                    Some(existing) => existing,
                    None => ProgressSnapshot::fresh(
                        session.user_id.clone(),
                        session.id.clone(),
                        session.questions.len(),
                        session.duration_seconds,
                    ),
                };
                self.restart_attempt(&session, snapshot).await;
                Ok(RecoveryOutcome::Attached { session })
            }
            RecoveryOutcome::Finalized { result } => {
                self.end_attempt(&result.session_id).await;
                Ok(RecoveryOutcome::Finalized { result })
            }
            other => Ok(other),
        }
    }

    /// Explicit re-select: cancel any recovery poll, release the lock,
    /// drop checkpoints, and stop the user's attempt tasks, all before
    /// returning control to the caller.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn reset(&self, user_id: &str) -> Result<()> {
        let span = info_span!("reset", user_id);
        let _guard = span.enter();

        if let Some((_, poll)) = self.recovery_polls.lock().await.remove(user_id) {
            poll.cancel();
        }

        if let Some(session) = self.sessions.live_for_user(user_id).await? {
            self.end_attempt(&session.id).await;
        }

        self.locks.release(user_id).await?;
        self.snapshots.clear_for_user(user_id).await?;

        info!(user_id, "reset complete");
        Ok(())
    }

    /// Flush all live checkpoints and stop attempt tasks (graceful
    /// shutdown path).
    pub async fn shutdown_flush(&self) {
        let session_ids: Vec<String> = {
            let trackers = self.trackers.lock().await;
            trackers.keys().cloned().collect()
        };
        for session_id in session_ids {
            if let Err(err) = self.checkpoint(&session_id).await {
                warn!(session_id, %err, "checkpoint flush failed during shutdown");
            }
            self.end_attempt(&session_id).await;
        }
    }

    /// Generation failed: mark the session, release the lock within
    /// the same call cycle, publish the outcome, surface the error.
    async fn fail_generation(&self, session: &QuizSession, cause: AppError) -> Result<QuizSession> {
        let reason = cause.to_string();
        warn!(session_id = %session.id, reason, "generation failed");

        if let Err(err) = self
            .sessions
            .update_state(&session.id, SessionState::Failed)
            .await
        {
            error!(session_id = %session.id, %err, "failed to mark session failed");
        }
        self.locks.release(&session.user_id).await?;
        self.events
            .publish(&session.user_id, GenerationOutcome::Failed { reason })
            .await;

        Err(cause)
    }

    /// Start countdown and checkpoint tasks for a fresh activation.
    async fn begin_attempt(&self, session: &QuizSession, snapshot: ProgressSnapshot) {
        let timer = QuizTimer::new(
            session.id.clone(),
            snapshot.remaining_seconds,
            self.timer_tx.clone(),
            self.shutdown.child_token(),
        )
        .spawn();

        let tracker = ProgressTracker::spawn(
            snapshot,
            self.snapshots.clone(),
            Duration::from_millis(self.config.snapshot.debounce_ms),
            Duration::from_secs(self.config.snapshot.autosave_interval_seconds),
            self.shutdown.child_token(),
        );

        self.timers
            .lock()
            .await
            .insert(session.id.clone(), Arc::new(timer));
        self.trackers
            .lock()
            .await
            .insert(session.id.clone(), Arc::new(tracker));
    }

    /// Replace any existing attempt tasks, then start fresh ones from
    /// the given checkpoint (recovery path).
    async fn restart_attempt(&self, session: &QuizSession, snapshot: ProgressSnapshot) {
        self.end_attempt(&session.id).await;
        self.begin_attempt(session, snapshot).await;
    }

    /// Ensure attempt tasks exist for an active session (they are
    /// rebuilt lazily after a server restart).
    async fn ensure_attempt(&self, session: &QuizSession) -> Result<Arc<ProgressTrackerHandle>> {
        if let Some(handle) = self.trackers.lock().await.get(&session.id) {
            return Ok(Arc::clone(handle));
        }

        let snapshot = match self.snapshots.load(&session.user_id, &session.id).await? {
            Some(existing) => existing,
            None => ProgressSnapshot::fresh(
                session.user_id.clone(),
                session.id.clone(),
                session.questions.len(),
                session.duration_seconds,
            ),
        };
        self.begin_attempt(session, snapshot).await;

        let trackers = self.trackers.lock().await;
        trackers
            .get(&session.id)
            .map(Arc::clone)
            .ok_or_else(|| AppError::Db("attempt tracker vanished after spawn".into()))
    }

    /// Copy the live countdown into a snapshot about to be saved.
    async fn sync_remaining(&self, snapshot: &mut ProgressSnapshot) {
        if let Some(timer) = self.timers.lock().await.get(&snapshot.session_id) {
            snapshot.remaining_seconds = timer.remaining_seconds();
        }
    }

    /// Stop and forget the attempt tasks for a session.
    ///
    /// The tracker performs a final save on cancellation, so any
    /// snapshot already cleared by a successful submission is wiped
    /// again afterwards to keep terminal sessions checkpoint-free.
    async fn end_attempt(&self, session_id: &str) {
        let timer = self.timers.lock().await.remove(session_id);
        if let Some(timer) = timer {
            timer.shutdown().await;
        }

        let tracker = self.trackers.lock().await.remove(session_id);
        if let Some(tracker) = tracker {
            tracker.shutdown().await;
        }

        if let Ok(Some(session)) = self.sessions.get_by_id(session_id).await {
            if session.state.is_terminal() {
                if let Err(err) = self.snapshots.clear_for_session(session_id).await {
                    warn!(session_id, %err, "failed to clear snapshot after attempt end");
                }
            }
        }
    }
}

/// Spawn the consumer that turns timer expiry events into
/// auto-submissions.
#[must_use]
pub fn spawn_expiry_consumer(
    mut rx: mpsc::Receiver<TimerEvent>,
    coordinator: Arc<SessionCoordinator>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("expiry consumer shutting down");
                    break;
                }
                event = rx.recv() => {
                    match event {
                        Some(TimerEvent::Expired { session_id }) => {
                            match coordinator.handle_expiry(&session_id).await {
                                Ok(result) => info!(
                                    session_id,
                                    final_score = result.final_score,
                                    "auto-submitted on expiry"
                                ),
                                Err(err) => error!(session_id, %err, "auto-submission failed"),
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    })
}
