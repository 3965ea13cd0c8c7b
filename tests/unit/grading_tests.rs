use quizforge::coordinator::submission::grade;
use quizforge::models::material::MaterialRef;
use quizforge::models::progress::UNANSWERED;
use quizforge::models::question::{Question, QuestionKind};
use quizforge::models::session::QuizSession;

fn session_with_questions(count: usize) -> QuizSession {
    let mut session = QuizSession::new("u1".into(), MaterialRef::Tag(1), 600);
    session.questions = (0..count)
        .map(|i| Question {
            id: format!("q{i}"),
            kind: QuestionKind::MultipleChoice,
            prompt: format!("prompt {i}"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            answer_index: 1,
        })
        .collect();
    session
}

#[test]
fn all_correct_scores_one_hundred() {
    let session = session_with_questions(4);
    let result = grade(&session, &[1, 1, 1, 1]);

    assert!((result.final_score - 100.0).abs() < 1e-9);
    assert!((result.accuracy - 1.0).abs() < 1e-9);
    assert!(result.per_question.iter().all(|q| q.is_correct));
}

#[test]
fn points_split_evenly_across_questions() {
    let session = session_with_questions(8);
    let result = grade(&session, &[1, 0, 0, 0, 0, 0, 0, 0]);

    assert!((result.final_score - 12.5).abs() < 1e-9);
    assert!((result.accuracy - 0.125).abs() < 1e-9);
    assert!((result.per_question[0].score - 12.5).abs() < 1e-9);
    assert!((result.per_question[1].score - 0.0).abs() < f64::EPSILON);
}

#[test]
fn short_answer_vector_scores_missing_as_incorrect() {
    let session = session_with_questions(4);
    let result = grade(&session, &[1, 1]);

    assert_eq!(result.per_question.len(), 4);
    assert_eq!(result.per_question[2].selected, UNANSWERED);
    assert_eq!(result.per_question[3].selected, UNANSWERED);
    assert!(!result.per_question[2].is_correct);
    assert!((result.final_score - 50.0).abs() < 1e-9);
    assert!((result.accuracy - 0.5).abs() < 1e-9);
}

#[test]
fn extra_answers_beyond_question_count_are_ignored() {
    let session = session_with_questions(2);
    let result = grade(&session, &[1, 1, 1, 1, 1]);

    assert_eq!(result.per_question.len(), 2);
    assert!((result.final_score - 100.0).abs() < 1e-9);
}

#[test]
fn sentinel_and_out_of_range_selections_score_zero() {
    let session = session_with_questions(3);
    let result = grade(&session, &[UNANSWERED, -7, 99]);

    assert!((result.final_score - 0.0).abs() < f64::EPSILON);
    assert!((result.accuracy - 0.0).abs() < f64::EPSILON);
    assert!(result.per_question.iter().all(|q| !q.is_correct));
}

#[test]
fn grading_is_deterministic() {
    let session = session_with_questions(5);
    let first = grade(&session, &[1, 0, 1, UNANSWERED, 2]);
    let second = grade(&session, &[1, 0, 1, UNANSWERED, 2]);

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn empty_session_grades_to_zero() {
    let session = session_with_questions(0);
    let result = grade(&session, &[]);

    assert!((result.final_score - 0.0).abs() < f64::EPSILON);
    assert!((result.accuracy - 0.0).abs() < f64::EPSILON);
    assert!(result.per_question.is_empty());
}
