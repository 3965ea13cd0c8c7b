//! Time source abstraction.
//!
//! Lock TTL expiry is judged against an injected [`Clock`] rather than
//! `Utc::now()` directly so tests can advance a simulated clock and
//! observe expiry without sleeping. One-second resolution is sufficient
//! for every consumer.

use chrono::{DateTime, Utc};

/// A wall-clock time source with at least one-second resolution.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
