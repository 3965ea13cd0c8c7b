//! Per-user generation locking with TTL reclamation.
//!
//! Wraps [`LockRepo`] with clock-aware semantics: acquire-if-absent,
//! idempotent release, and a status query that reports an expired lock
//! as not-generating. The lock protects only the generation step, never
//! the whole attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span};

use crate::clock::Clock;
use crate::models::lock::GenerationLock;
use crate::models::material::MaterialRef;
use crate::persistence::lock_repo::LockRepo;
use crate::Result;

/// Result of an acquire attempt.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// The caller now holds the user's generation slot.
    Acquired(GenerationLock),
    /// Another generation is outstanding; carries the holder's metadata.
    Conflict(GenerationLock),
}

/// Answer to the generation-status query for one user.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationStatus {
    /// Whether a non-expired generation lock exists.
    pub is_generating: bool,
    /// Material the outstanding generation targets, when generating.
    pub material: Option<MaterialRef>,
    /// When the outstanding generation started, when generating.
    pub started_at: Option<DateTime<Utc>>,
}

impl GenerationStatus {
    fn idle() -> Self {
        Self {
            is_generating: false,
            material: None,
            started_at: None,
        }
    }
}

/// Clock-aware lock service, shared across the coordinator.
#[derive(Clone)]
pub struct GenerationLocks {
    repo: LockRepo,
    clock: Arc<dyn Clock>,
    ttl_seconds: u64,
}

impl GenerationLocks {
    /// Create a new lock service.
    #[must_use]
    pub fn new(repo: LockRepo, clock: Arc<dyn Clock>, ttl_seconds: u64) -> Self {
        Self {
            repo,
            clock,
            ttl_seconds,
        }
    }

    /// Try to take the user's generation slot.
    ///
    /// At most one non-expired lock exists per user at any time; a
    /// lapsed TTL makes the slot reclaimable even if the previous
    /// holder never reported back.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn acquire(&self, user_id: &str, material: MaterialRef) -> Result<AcquireOutcome> {
        let span = info_span!("lock_acquire", user_id);
        let _guard = span.enter();

        let lock = GenerationLock::new(
            user_id.to_owned(),
            material,
            self.clock.now(),
            self.ttl_seconds,
        );

        match self.repo.acquire_if_absent(&lock).await? {
            None => {
                info!(user_id, material = %lock.material, "generation lock acquired");
                Ok(AcquireOutcome::Acquired(lock))
            }
            Some(existing) => {
                info!(
                    user_id,
                    holder_material = %existing.material,
                    "generation lock conflict"
                );
                Ok(AcquireOutcome::Conflict(existing))
            }
        }
    }

    /// Release the user's lock. Releasing an absent lock is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn release(&self, user_id: &str) -> Result<()> {
        self.repo.release(user_id).await?;
        info!(user_id, "generation lock released");
        Ok(())
    }

    /// Report whether the user has a generation outstanding.
    ///
    /// An expired lock reports idle: the slot is reclaimable and no
    /// resolution will ever arrive for it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn status(&self, user_id: &str) -> Result<GenerationStatus> {
        let now = self.clock.now();
        match self.repo.get(user_id).await? {
            Some(lock) if !lock.is_expired(now) => Ok(GenerationStatus {
                is_generating: true,
                material: Some(lock.material),
                started_at: Some(lock.acquired_at),
            }),
            _ => Ok(GenerationStatus::idle()),
        }
    }

    /// Sweep every expired lock. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if persistence fails.
    pub async fn sweep_expired(&self) -> Result<u64> {
        self.repo.delete_expired(self.clock.now()).await
    }
}
