//! TOML question banks: the built-in generator and catalog.
//!
//! Local-only operation reads question banks from disk instead of
//! calling out to a model service. Each material maps to one bank file
//! under the content directory (`file-<id>.toml` or `tag-<id>.toml`),
//! which doubles as the existence check for stale-content detection.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::material::MaterialRef;
use crate::models::question::{Question, QuestionKind};
use crate::{AppError, Result};

use super::generator::{GenerateRequest, GeneratedQuiz, MaterialCatalog, QuizGenerator};

/// One entry in a bank file.
#[derive(Debug, Deserialize)]
struct BankQuestion {
    #[serde(default = "default_kind")]
    kind: QuestionKind,
    prompt: String,
    options: Vec<String>,
    answer_index: u32,
}

fn default_kind() -> QuestionKind {
    QuestionKind::MultipleChoice
}

#[derive(Debug, Deserialize)]
struct BankFile {
    #[serde(rename = "question")]
    questions: Vec<BankQuestion>,
}

fn bank_path(content_dir: &Path, material: &MaterialRef) -> PathBuf {
    content_dir.join(format!(
        "{}-{}.toml",
        material.type_str(),
        material.id_string()
    ))
}

/// Generator backed by on-disk TOML question banks.
pub struct BankGenerator {
    content_dir: PathBuf,
}

impl BankGenerator {
    /// Create a generator rooted at `content_dir`.
    #[must_use]
    pub fn new(content_dir: PathBuf) -> Self {
        Self { content_dir }
    }

    fn load_bank(&self, material: &MaterialRef) -> Result<BankFile> {
        let path = bank_path(&self.content_dir, material);
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            AppError::GenerationFailed(format!(
                "no question bank for {material} at {}: {err}",
                path.display()
            ))
        })?;
        let bank: BankFile = toml::from_str(&raw)
            .map_err(|err| AppError::GenerationFailed(format!("bank {}: {err}", path.display())))?;
        Ok(bank)
    }
}

#[async_trait]
impl QuizGenerator for BankGenerator {
    async fn generate(&self, request: &GenerateRequest) -> Result<GeneratedQuiz> {
        let bank = self.load_bank(&request.material)?;

        if bank.questions.len() < request.count as usize {
            return Err(AppError::GenerationFailed(format!(
                "bank for {} has {} questions, {} requested",
                request.material,
                bank.questions.len(),
                request.count
            )));
        }

        let questions: Vec<Question> = bank
            .questions
            .into_iter()
            .take(request.count as usize)
            .map(|entry| {
                if (entry.answer_index as usize) >= entry.options.len() {
                    return Err(AppError::GenerationFailed(format!(
                        "bank entry '{}' has answer_index {} outside its options",
                        entry.prompt, entry.answer_index
                    )));
                }
                Ok(Question {
                    id: Uuid::new_v4().to_string(),
                    kind: entry.kind,
                    prompt: entry.prompt,
                    options: entry.options,
                    answer_index: entry.answer_index,
                })
            })
            .collect::<Result<_>>()?;

        debug!(
            material = %request.material,
            count = questions.len(),
            "questions drawn from bank"
        );
        Ok(GeneratedQuiz { questions })
    }
}

/// Catalog that treats bank-file existence as material existence.
pub struct BankCatalog {
    content_dir: PathBuf,
}

impl BankCatalog {
    /// Create a catalog rooted at `content_dir`.
    #[must_use]
    pub fn new(content_dir: PathBuf) -> Self {
        Self { content_dir }
    }
}

#[async_trait]
impl MaterialCatalog for BankCatalog {
    async fn exists(&self, material: &MaterialRef) -> Result<bool> {
        Ok(bank_path(&self.content_dir, material).is_file())
    }
}
