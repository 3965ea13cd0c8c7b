//! Graded result model.

use serde::{Deserialize, Serialize};

/// Per-question grading outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerQuestionResult {
    /// Question position within the session.
    pub index: u32,
    /// Option the user selected, or the unanswered sentinel.
    pub selected: i32,
    /// Index of the correct option, revealed after grading.
    pub correct_index: u32,
    /// Whether the selection matched the answer key.
    pub is_correct: bool,
    /// Points awarded for this question.
    pub score: f64,
}

/// Final graded result for a session.
///
/// Cached on the session once computed: resubmission returns the stored
/// payload unchanged rather than regrading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizResult {
    /// Session the result belongs to.
    pub session_id: String,
    /// Sum of per-question scores, out of 100.
    pub final_score: f64,
    /// Fraction of questions answered correctly.
    pub accuracy: f64,
    /// Per-question breakdown in question order.
    pub per_question: Vec<PerQuestionResult>,
}
