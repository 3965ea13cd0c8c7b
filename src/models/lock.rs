//! Generation lock model: per-user mutual exclusion with a TTL.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::material::MaterialRef;

/// Server-held record preventing a user from having two concurrent
/// content-generation requests outstanding.
///
/// The lock is scoped to the user, not the material, and protects only
/// the generation step. Invariant: at most one non-expired lock per
/// `user_id` at any time (enforced by the primary key on the
/// `generation_lock` table).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationLock {
    /// Owning user.
    pub user_id: String,
    /// Material the outstanding generation targets.
    pub material: MaterialRef,
    /// When the lock was granted.
    pub acquired_at: DateTime<Utc>,
    /// When the lock becomes reclaimable even if never released.
    pub expires_at: DateTime<Utc>,
}

impl GenerationLock {
    /// Construct a lock granted at `now` with the given TTL.
    #[must_use]
    pub fn new(
        user_id: String,
        material: MaterialRef,
        now: DateTime<Utc>,
        ttl_seconds: u64,
    ) -> Self {
        let ttl = Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
        Self {
            user_id,
            material,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    /// Whether the TTL has elapsed as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
