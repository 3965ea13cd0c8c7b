//! Question model and the answer-withholding client view.

use serde::{Deserialize, Serialize};

/// Question format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Several options, exactly one correct.
    MultipleChoice,
    /// Two options: true / false.
    TrueFalse,
}

/// Requested quiz difficulty, forwarded verbatim to the generator.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Recall-level questions.
    Easy,
    /// Comprehension-level questions.
    #[default]
    Medium,
    /// Application-level questions.
    Hard,
}

/// A generated question, including the withheld answer key.
///
/// The `answer_index` never leaves the server before grading; clients
/// receive [`ClientQuestion`] instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    /// Generator-assigned question identifier.
    pub id: String,
    /// Question format.
    pub kind: QuestionKind,
    /// Prompt text.
    pub prompt: String,
    /// Candidate options in display order.
    pub options: Vec<String>,
    /// Index of the correct option within `options`.
    pub answer_index: u32,
}

/// Client-facing view of a question with the answer key stripped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientQuestion {
    /// Generator-assigned question identifier.
    pub id: String,
    /// Question format.
    pub kind: QuestionKind,
    /// Prompt text.
    pub prompt: String,
    /// Candidate options in display order.
    pub options: Vec<String>,
}

impl From<&Question> for ClientQuestion {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            kind: question.kind,
            prompt: question.prompt.clone(),
            options: question.options.clone(),
        }
    }
}
