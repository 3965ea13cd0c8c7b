use std::sync::Arc;

use quizforge::models::material::MaterialRef;
use quizforge::models::progress::UNANSWERED;
use quizforge::models::session::SessionState;
use quizforge::persistence::session_repo::SessionRepo;
use quizforge::AppError;

use super::test_helpers::{fast_config, request_for, FailingGenerator, Harness};

#[tokio::test]
async fn start_session_activates_and_releases_the_lock() {
    let harness = Harness::stub(fast_config()).await;

    let request = request_for("u1", MaterialRef::File("notes".into()), 5);
    let session = harness
        .coordinator
        .start_session(&request)
        .await
        .expect("start");

    assert_eq!(session.state, SessionState::Active);
    assert_eq!(session.questions.len(), 5);

    // The lock protects only the generation step.
    let status = harness.coordinator.status("u1").await.expect("status");
    assert!(!status.is_generating);

    // A fresh checkpoint exists: nothing answered, full countdown.
    let snapshot = harness
        .coordinator
        .progress(&session.id)
        .await
        .expect("progress")
        .expect("snapshot");
    assert_eq!(snapshot.answers, vec![UNANSWERED; 5]);
    assert_eq!(snapshot.current_index, 0);

    harness.teardown().await;
}

#[tokio::test]
async fn validation_failure_precedes_any_lock() {
    let harness = Harness::stub(fast_config()).await;

    let request = request_for("u1", MaterialRef::File("notes".into()), 0);
    let err = harness
        .coordinator
        .start_session(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let status = harness.coordinator.status("u1").await.expect("status");
    assert!(!status.is_generating, "no lock may be left behind");

    harness.teardown().await;
}

#[tokio::test]
async fn missing_material_is_stale_content_before_any_lock() {
    let harness = Harness::stub(fast_config()).await;
    harness.catalog.set_exists(false);

    let request = request_for("u1", MaterialRef::File("deleted".into()), 3);
    let err = harness
        .coordinator
        .start_session(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::StaleContent(_)));

    let status = harness.coordinator.status("u1").await.expect("status");
    assert!(!status.is_generating, "no lock may be left behind");

    // Once the material is back, the same request goes through.
    harness.catalog.set_exists(true);
    let session = harness
        .coordinator
        .start_session(&request)
        .await
        .expect("start after restore");
    assert_eq!(session.state, SessionState::Active);

    harness.teardown().await;
}

#[tokio::test]
async fn count_above_ceiling_is_rejected() {
    let harness = Harness::stub(fast_config()).await;

    let request = request_for("u1", MaterialRef::Tag(1), 51);
    let err = harness
        .coordinator
        .start_session(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    harness.teardown().await;
}

#[tokio::test]
async fn generator_failure_releases_lock_within_the_same_call() {
    let harness = Harness::with(fast_config(), Arc::new(FailingGenerator)).await;

    let request = request_for("u1", MaterialRef::File("notes".into()), 3);
    let err = harness
        .coordinator
        .start_session(&request)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::GenerationFailed(_)));

    // An immediate retry must reach the generator again, not a conflict.
    let retry_err = harness
        .coordinator
        .start_session(&request)
        .await
        .unwrap_err();
    assert!(
        matches!(retry_err, AppError::GenerationFailed(_)),
        "retry hit the lock instead: {retry_err}"
    );

    // The failed session is recorded as Failed.
    let sessions = SessionRepo::new(Arc::clone(&harness.db));
    let latest = sessions
        .latest_for_user("u1")
        .await
        .expect("query")
        .expect("session row");
    assert_eq!(latest.state, SessionState::Failed);
    assert!(latest.finished_at.is_some());

    harness.teardown().await;
}

#[tokio::test]
async fn answers_and_navigation_update_the_checkpoint() {
    let harness = Harness::stub(fast_config()).await;

    let request = request_for("u1", MaterialRef::Tag(2), 4);
    let session = harness
        .coordinator
        .start_session(&request)
        .await
        .expect("start");

    let snapshot = harness
        .coordinator
        .set_answer(&session.id, 0, 2)
        .await
        .expect("answer");
    assert_eq!(snapshot.answers[0], 2);
    assert_eq!(snapshot.answered_count(), 1);

    // Answers can be changed before submission.
    let snapshot = harness
        .coordinator
        .set_answer(&session.id, 0, 3)
        .await
        .expect("re-answer");
    assert_eq!(snapshot.answers[0], 3);
    assert_eq!(snapshot.answered_count(), 1);

    let snapshot = harness
        .coordinator
        .go_to_question(&session.id, 2)
        .await
        .expect("navigate");
    assert_eq!(snapshot.current_index, 2);

    harness.teardown().await;
}

#[tokio::test]
async fn out_of_bounds_answers_are_rejected() {
    let harness = Harness::stub(fast_config()).await;

    let request = request_for("u1", MaterialRef::Tag(2), 3);
    let session = harness
        .coordinator
        .start_session(&request)
        .await
        .expect("start");

    let err = harness
        .coordinator
        .set_answer(&session.id, 9, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = harness
        .coordinator
        .set_answer(&session.id, 0, 9)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = harness
        .coordinator
        .go_to_question(&session.id, 3)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    harness.teardown().await;
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let harness = Harness::stub(fast_config()).await;

    let err = harness.coordinator.session("nope").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    harness.teardown().await;
}
