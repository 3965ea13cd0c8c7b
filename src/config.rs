//! Global configuration parsing, validation, and defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Hard upper bound on requested question counts, regardless of config.
pub const QUESTION_COUNT_CEILING: u32 = 50;

/// Content-generation settings: lock TTL and request timeout.
///
/// The lock TTL and the generation request timeout are independent
/// budgets: a hung generation stops blocking new attempts once the
/// TTL elapses, whether or not the original request ever returns.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GenerationConfig {
    /// Seconds before an unreleased generation lock becomes reclaimable.
    pub lock_ttl_seconds: u64,
    /// Network/request timeout for a single generator call.
    pub timeout_seconds: u64,
    /// Maximum questions a single request may ask for.
    pub max_question_count: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: 300,
            timeout_seconds: 120,
            max_question_count: QUESTION_COUNT_CEILING,
        }
    }
}

/// Quiz attempt settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct QuizConfig {
    /// Answering countdown for a fresh session, in seconds.
    pub duration_seconds: u32,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 600,
        }
    }
}

/// Progress checkpoint cadence.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SnapshotConfig {
    /// Debounce window applied to on-change saves, in milliseconds.
    pub debounce_ms: u64,
    /// Fixed autosave interval, in seconds.
    pub autosave_interval_seconds: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 750,
            autosave_interval_seconds: 30,
        }
    }
}

/// Recovery polling bounds for attaching to an in-flight generation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct RecoveryConfig {
    /// Fallback poll interval while waiting for generation to resolve.
    pub poll_interval_seconds: u64,
    /// Maximum total wait before the poll gives up with a timeout.
    pub poll_cap_seconds: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 2,
            poll_cap_seconds: 300,
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_db_path() -> PathBuf {
    PathBuf::from("quizforge.db")
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_retention_days() -> u32 {
    30
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// HTTP port for the API surface.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Directory holding the TOML question banks.
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    /// Content-generation lock and timeout settings.
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Quiz attempt settings.
    #[serde(default)]
    pub quiz: QuizConfig,
    /// Progress checkpoint cadence.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Recovery polling bounds.
    #[serde(default)]
    pub recovery: RecoveryConfig,
    /// Days after session completion before data is purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            http_port: default_http_port(),
            content_dir: default_content_dir(),
            generation: GenerationConfig::default(),
            quiz: QuizConfig::default(),
            snapshot: SnapshotConfig::default(),
            recovery: RecoveryConfig::default(),
            retention_days: default_retention_days(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.generation.lock_ttl_seconds == 0 {
            return Err(AppError::Config(
                "generation.lock_ttl_seconds must be greater than zero".into(),
            ));
        }
        if self.generation.timeout_seconds == 0 {
            return Err(AppError::Config(
                "generation.timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.generation.max_question_count == 0
            || self.generation.max_question_count > QUESTION_COUNT_CEILING
        {
            return Err(AppError::Config(format!(
                "generation.max_question_count must be in 1..={QUESTION_COUNT_CEILING}"
            )));
        }
        if self.quiz.duration_seconds == 0 {
            return Err(AppError::Config(
                "quiz.duration_seconds must be greater than zero".into(),
            ));
        }
        if self.recovery.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "recovery.poll_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.recovery.poll_cap_seconds < self.recovery.poll_interval_seconds {
            return Err(AppError::Config(
                "recovery.poll_cap_seconds must be at least the poll interval".into(),
            ));
        }
        Ok(())
    }
}
