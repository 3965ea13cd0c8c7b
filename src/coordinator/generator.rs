//! Collaborator seams: the content generator and the material catalog.
//!
//! The generation algorithm itself (prompt construction, model
//! invocation) lives behind [`QuizGenerator`]; the coordinator only
//! cares about its typed outcome. [`MaterialCatalog`] answers whether
//! a material still exists so recovery can distinguish stale content
//! from generic failure.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::QUESTION_COUNT_CEILING;
use crate::models::material::MaterialRef;
use crate::models::question::{Difficulty, Question};
use crate::{AppError, Result};

/// Parameters for one generation request.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Requesting user.
    pub user_id: String,
    /// Material to generate from.
    pub material: MaterialRef,
    /// Number of questions requested.
    pub count: u32,
    /// Requested difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Optional model override forwarded to the generator.
    #[serde(default)]
    pub model: Option<String>,
}

impl GenerateRequest {
    /// Validate the request before any lock is taken.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` naming the offending field.
    pub fn validate(&self, max_count: u32) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("user_id must not be empty".into()));
        }
        self.material.validate()?;
        let ceiling = max_count.min(QUESTION_COUNT_CEILING);
        if self.count == 0 || self.count > ceiling {
            return Err(AppError::Validation(format!(
                "question count must be in 1..={ceiling}, got {}",
                self.count
            )));
        }
        Ok(())
    }
}

/// Output of a successful generation.
#[derive(Debug, Clone)]
pub struct GeneratedQuiz {
    /// Questions in generation order.
    pub questions: Vec<Question>,
}

/// External content generator.
#[async_trait]
pub trait QuizGenerator: Send + Sync {
    /// Generate questions for the given request.
    ///
    /// # Errors
    ///
    /// Implementations surface their failures as `AppError`; the
    /// coordinator maps them to `AppError::GenerationFailed`.
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedQuiz>;
}

/// Lookup for material existence.
#[async_trait]
pub trait MaterialCatalog: Send + Sync {
    /// Whether the material still exists server-side.
    ///
    /// # Errors
    ///
    /// Returns `AppError` when the lookup itself fails.
    async fn exists(&self, material: &MaterialRef) -> Result<bool>;
}
