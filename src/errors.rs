//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// Request payload failed validation before any lock was taken.
    Validation(String),
    /// Another generation is already outstanding for this user.
    LockConflict(String),
    /// The generator returned an error or produced unusable content.
    GenerationFailed(String),
    /// The material a session or lock references no longer exists.
    StaleContent(String),
    /// Finalizing a session failed; the progress snapshot is preserved.
    Submission(String),
    /// A bounded wait elapsed (generation timeout, recovery poll cap).
    Timeout(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::LockConflict(msg) => write!(f, "lock conflict: {msg}"),
            Self::GenerationFailed(msg) => write!(f, "generation failed: {msg}"),
            Self::StaleContent(msg) => write!(f, "stale content: {msg}"),
            Self::Submission(msg) => write!(f, "submission: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Db(format!("serialization: {err}"))
    }
}
