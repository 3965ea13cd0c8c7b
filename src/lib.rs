#![forbid(unsafe_code)]

//! `quizforge`: quiz session coordination service.
//!
//! Coordinates per-user quiz generation (one outstanding generation per
//! user, enforced by a TTL-guarded lock), timed quiz attempts with
//! debounced progress checkpointing, crash and reload recovery, and
//! idempotent deterministic submission, all persisted in `SQLite`.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod http;
pub mod models;
pub mod persistence;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
