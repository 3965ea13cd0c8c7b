//! Per-session countdown timer driving auto-submission.
//!
//! Each active session gets a [`QuizTimer`] that decrements once per
//! second. Recovery restores a countdown by spawning a fresh timer with
//! the checkpointed value as its initial budget.
//!
//! Expiry is delivered via a `tokio::sync::mpsc` channel so the
//! coordinator can drive the normal submission path. The tick task
//! returns immediately after sending, so the event is emitted at most
//! once per timer.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Events emitted by the countdown timer.
#[derive(Debug, Clone)]
pub enum TimerEvent {
    /// The countdown reached zero; auto-submission should run once.
    Expired {
        /// Session whose countdown elapsed.
        session_id: String,
    },
}

/// Builder for a per-session countdown timer.
///
/// Call [`spawn`](Self::spawn) to start the background tick task.
pub struct QuizTimer {
    session_id: String,
    initial_seconds: i64,
    event_tx: mpsc::Sender<TimerEvent>,
    cancel: CancellationToken,
}

impl QuizTimer {
    /// Construct a new timer (does not start ticking yet).
    #[must_use]
    pub fn new(
        session_id: String,
        initial_seconds: i64,
        event_tx: mpsc::Sender<TimerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            initial_seconds,
            event_tx,
            cancel,
        }
    }

    /// Spawn the background tick task and return a handle for it.
    #[must_use]
    pub fn spawn(self) -> QuizTimerHandle {
        let remaining = Arc::new(AtomicI64::new(self.initial_seconds.max(0)));

        let cancel_for_handle = self.cancel.clone();

        let task_handle = tokio::spawn(
            Self::run(
                self.session_id,
                Arc::clone(&remaining),
                self.event_tx,
                self.cancel,
            )
            .instrument(info_span!("quiz_timer")),
        );

        QuizTimerHandle {
            remaining,
            join_handle: Mutex::new(Some(task_handle)),
            cancel: cancel_for_handle,
        }
    }

    /// Core tick loop: one decrement per second, one expiry at zero.
    async fn run(
        session_id: String,
        remaining: Arc<AtomicI64>,
        event_tx: mpsc::Sender<TimerEvent>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately; consume it so the
        // countdown starts a full second after spawn.
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(session_id, "quiz timer cancelled");
                    return;
                }
                _ = interval.tick() => {
                    let left = remaining.fetch_sub(1, Ordering::SeqCst) - 1;
                    if left > 0 {
                        continue;
                    }

                    remaining.store(0, Ordering::SeqCst);
                    info!(session_id, "countdown expired");
                    let _ = event_tx.send(TimerEvent::Expired { session_id }).await;
                    return;
                }
            }
        }
    }
}

/// Handle returned from [`QuizTimer::spawn`] for controlling the timer.
pub struct QuizTimerHandle {
    remaining: Arc<AtomicI64>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl QuizTimerHandle {
    /// Seconds left on the countdown.
    #[must_use]
    pub fn remaining_seconds(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Stop the timer task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
