//! Per-user generation outcome notifications.
//!
//! Publish/subscribe keyed by user id so recovery does not have to rely
//! on polling alone: the coordinator publishes once a generation
//! resolves, and any reconciler waiting for that user hears about it
//! immediately. Polling remains as the fallback for subscribers that
//! attach after the channel is gone.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};

const CHANNEL_CAPACITY: usize = 8;

/// Terminal outcome of one generation attempt.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// Generation succeeded; the session is now active.
    Ready {
        /// The activated session.
        session_id: String,
    },
    /// Generation failed or timed out.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// Registry of per-user broadcast channels.
#[derive(Default)]
pub struct GenerationEvents {
    channels: Mutex<HashMap<String, broadcast::Sender<GenerationOutcome>>>,
}

impl GenerationEvents {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the next outcome for a user.
    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<GenerationOutcome> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(user_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a terminal outcome and retire the user's channel.
    ///
    /// Existing receivers still drain the buffered value after the
    /// sender is dropped; later subscribers get a fresh channel.
    pub async fn publish(&self, user_id: &str, outcome: GenerationOutcome) {
        let mut channels = self.channels.lock().await;
        if let Some(sender) = channels.remove(user_id) {
            // No receivers is fine: recovery falls back to polling.
            let _ = sender.send(outcome);
        }
    }
}
