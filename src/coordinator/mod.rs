//! Session coordination: generation locking, the quiz-attempt state
//! machine, countdown timing, progress checkpointing, crash recovery,
//! and idempotent submission.

pub mod bank;
pub mod generation_lock;
pub mod generator;
pub mod notify;
pub mod progress;
pub mod recovery;
pub mod session;
pub mod submission;
pub mod timer;
