//! Debounced progress checkpointing for an active session.
//!
//! A [`ProgressTracker`] task owns the save cadence: every answer or
//! navigation change is coalesced through a short debounce window, a
//! fixed autosave interval persists the latest snapshot regardless, and
//! cancellation triggers one final best-effort save (the teardown
//! path). Individual saves are atomic at the repository level, so a
//! crash between saves loses at most the debounce window.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::models::progress::ProgressSnapshot;
use crate::persistence::snapshot_repo::SnapshotRepo;
use crate::Result;

/// Builder for a per-session progress tracker.
pub struct ProgressTracker;

impl ProgressTracker {
    /// Spawn the checkpoint task seeded with `initial` and return its
    /// handle.
    #[must_use]
    pub fn spawn(
        initial: ProgressSnapshot,
        repo: SnapshotRepo,
        debounce: Duration,
        autosave_interval: Duration,
        cancel: CancellationToken,
    ) -> ProgressTrackerHandle {
        let (tx, rx) = watch::channel(initial);
        let task_repo = repo.clone();
        let task_cancel = cancel.clone();

        let join = tokio::spawn(
            run(rx, task_repo, debounce, autosave_interval, task_cancel)
                .instrument(info_span!("progress_tracker")),
        );

        ProgressTrackerHandle {
            tx,
            repo,
            cancel,
            join_handle: Mutex::new(Some(join)),
        }
    }
}

/// Core save loop: debounced on-change saves plus interval autosaves.
async fn run(
    mut rx: watch::Receiver<ProgressSnapshot>,
    repo: SnapshotRepo,
    debounce: Duration,
    autosave_interval: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(autosave_interval);
    // Discard the immediate first tick; the fresh snapshot was already
    // persisted when the attempt began.
    interval.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                save_current(&rx, &repo, "teardown").await;
                return;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                // Coalesce further updates inside the debounce window.
                tokio::select! {
                    () = cancel.cancelled() => {
                        save_current(&rx, &repo, "teardown").await;
                        return;
                    }
                    () = tokio::time::sleep(debounce) => {}
                }
                rx.mark_unchanged();
                save_current(&rx, &repo, "change").await;
            }
            _ = interval.tick() => {
                save_current(&rx, &repo, "autosave").await;
            }
        }
    }
}

async fn save_current(rx: &watch::Receiver<ProgressSnapshot>, repo: &SnapshotRepo, cause: &str) {
    let snapshot = rx.borrow().clone();
    match repo.save(&snapshot).await {
        Ok(()) => debug!(
            session_id = %snapshot.session_id,
            cause,
            answered = snapshot.answered_count(),
            "progress checkpoint saved"
        ),
        Err(err) => warn!(
            session_id = %snapshot.session_id,
            cause,
            %err,
            "progress checkpoint save failed"
        ),
    }
}

/// Handle for feeding and flushing a [`ProgressTracker`] task.
pub struct ProgressTrackerHandle {
    tx: watch::Sender<ProgressSnapshot>,
    repo: SnapshotRepo,
    cancel: CancellationToken,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProgressTrackerHandle {
    /// Replace the tracked snapshot; the task persists it after the
    /// debounce window.
    pub fn update(&self, mut snapshot: ProgressSnapshot) {
        snapshot.saved_at = Utc::now();
        // Send only fails when the task is gone; flush still works then.
        let _ = self.tx.send(snapshot);
    }

    /// The latest tracked snapshot.
    #[must_use]
    pub fn current(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    /// Persist the latest snapshot immediately, bypassing the debounce.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the save fails.
    pub async fn flush(&self) -> Result<()> {
        self.repo.save(&self.current()).await
    }

    /// Stop the checkpoint task (final best-effort save included) and
    /// wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
