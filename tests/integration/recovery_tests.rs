use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use quizforge::coordinator::generation_lock::GenerationLocks;
use quizforge::coordinator::notify::{GenerationEvents, GenerationOutcome};
use quizforge::coordinator::recovery::{RecoveryOutcome, RecoveryReconciler};
use quizforge::coordinator::submission::SubmissionService;
use quizforge::models::material::MaterialRef;
use quizforge::models::progress::{ProgressSnapshot, UNANSWERED};
use quizforge::models::session::{QuizSession, SessionState};
use quizforge::persistence::db::Database;
use quizforge::persistence::lock_repo::LockRepo;
use quizforge::persistence::result_repo::ResultRepo;
use quizforge::persistence::session_repo::SessionRepo;
use quizforge::persistence::snapshot_repo::SnapshotRepo;
use quizforge::AppError;

use super::test_helpers::{
    fast_config, memory_db, request_for, sample_questions, Harness, ManualClock, ToggleCatalog,
};

struct Fixture {
    sessions: SessionRepo,
    snapshots: SnapshotRepo,
    results: ResultRepo,
    locks: GenerationLocks,
    events: Arc<GenerationEvents>,
    catalog: Arc<ToggleCatalog>,
    reconciler: RecoveryReconciler,
}

async fn fixture() -> (Arc<Database>, Fixture) {
    let db = memory_db().await;
    let sessions = SessionRepo::new(Arc::clone(&db));
    let snapshots = SnapshotRepo::new(Arc::clone(&db));
    let results = ResultRepo::new(Arc::clone(&db));
    let locks = GenerationLocks::new(
        LockRepo::new(Arc::clone(&db)),
        Arc::new(ManualClock::new()),
        300,
    );
    let events = Arc::new(GenerationEvents::new());
    let catalog = Arc::new(ToggleCatalog::new(true));
    let submission = SubmissionService::new(sessions.clone(), snapshots.clone(), results.clone());

    let reconciler = RecoveryReconciler::new(
        sessions.clone(),
        snapshots.clone(),
        locks.clone(),
        Arc::clone(&events),
        Arc::clone(&catalog) as _,
        submission,
        Duration::from_secs(1),
        Duration::from_secs(3),
    );

    (
        db,
        Fixture {
            sessions,
            snapshots,
            results,
            locks,
            events,
            catalog,
            reconciler,
        },
    )
}

async fn active_session(fixture: &Fixture, user: &str, count: usize) -> QuizSession {
    let session = QuizSession::new(user.into(), MaterialRef::File("notes".into()), 600);
    fixture.sessions.create(&session).await.expect("create");
    fixture
        .sessions
        .activate_with_questions(&session.id, &sample_questions(count))
        .await
        .expect("activate")
}

#[tokio::test]
async fn nothing_outstanding_resolves_fresh() {
    let (_db, fixture) = fixture().await;
    let outcome = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .expect("reconcile");
    assert!(matches!(outcome, RecoveryOutcome::Fresh));
}

#[tokio::test]
async fn checkpoint_with_live_session_resumes_exactly() {
    let (_db, fixture) = fixture().await;
    let session = active_session(&fixture, "u1", 8).await;

    // Seven answered (indices 0-6), viewing question 6, full countdown.
    let mut snapshot = ProgressSnapshot::fresh("u1".into(), session.id.clone(), 8, 600);
    for i in 0..7 {
        snapshot.answers[i] = 1;
    }
    snapshot.current_index = 6;
    fixture.snapshots.save(&snapshot).await.expect("save");

    let outcome = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .expect("reconcile");

    match outcome {
        RecoveryOutcome::Resumed { session: restored, snapshot } => {
            assert_eq!(restored.id, session.id);
            assert_eq!(snapshot.answered_count(), 7);
            assert_eq!(snapshot.answers[7], UNANSWERED);
            assert_eq!(snapshot.current_index, 6);
            assert_eq!(snapshot.remaining_seconds, 600);
        }
        other => panic!("expected Resumed, got {other:?}"),
    }
}

#[tokio::test]
async fn checkpoint_for_dead_session_is_ignored_and_cleared() {
    let (_db, fixture) = fixture().await;
    let session = active_session(&fixture, "u1", 2).await;
    fixture
        .sessions
        .update_state(&session.id, SessionState::Expired)
        .await
        .expect("expire");
    fixture
        .sessions
        .update_state(&session.id, SessionState::Submitting)
        .await
        .expect("claim");
    fixture
        .sessions
        .update_state(&session.id, SessionState::Completed)
        .await
        .expect("complete");

    let snapshot = ProgressSnapshot::fresh("u1".into(), session.id.clone(), 2, 600);
    fixture.snapshots.save(&snapshot).await.expect("save");

    let outcome = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .expect("reconcile");
    assert!(matches!(outcome, RecoveryOutcome::Fresh));

    // Never merged, always discarded.
    assert!(fixture
        .snapshots
        .load("u1", &session.id)
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn expired_checkpoint_is_finalized_not_discarded() {
    let (_db, fixture) = fixture().await;
    let session = active_session(&fixture, "u1", 3).await;

    let mut snapshot = ProgressSnapshot::fresh("u1".into(), session.id.clone(), 3, 600);
    snapshot.answers = vec![1, 1, 1];
    fixture.snapshots.save(&snapshot).await.expect("save");

    // Countdown elapsed while nobody was connected; the session sits
    // in Expired with the answers only in the checkpoint.
    fixture
        .sessions
        .update_state(&session.id, SessionState::Expired)
        .await
        .expect("expire");

    let outcome = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .expect("reconcile");

    match outcome {
        RecoveryOutcome::Finalized { result } => {
            assert_eq!(result.session_id, session.id);
            assert!((result.final_score - 100.0).abs() < 1e-9);
        }
        other => panic!("expected Finalized, got {other:?}"),
    }

    let stored = fixture
        .sessions
        .get_by_id(&session.id)
        .await
        .expect("fetch")
        .expect("row");
    assert_eq!(stored.state, SessionState::Completed);
    assert!(fixture
        .results
        .get(&session.id)
        .await
        .expect("get")
        .is_some());

    // The checkpoint is gone because it was graded, not dropped.
    assert!(fixture
        .snapshots
        .load("u1", &session.id)
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn missing_material_reports_stale_content_and_clears_state() {
    let (_db, fixture) = fixture().await;
    let session = active_session(&fixture, "u1", 2).await;
    let snapshot = ProgressSnapshot::fresh("u1".into(), session.id.clone(), 2, 600);
    fixture.snapshots.save(&snapshot).await.expect("save");
    fixture
        .locks
        .acquire("u1", MaterialRef::File("notes".into()))
        .await
        .expect("acquire");

    fixture.catalog.set_exists(false);

    let outcome = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .expect("reconcile");
    assert!(matches!(outcome, RecoveryOutcome::StaleContent));

    let status = fixture.locks.status("u1").await.expect("status");
    assert!(!status.is_generating);
    assert!(fixture
        .snapshots
        .latest_for_user("u1")
        .await
        .expect("query")
        .is_none());
}

#[tokio::test]
async fn outstanding_generation_attaches_via_notification() {
    let (_db, fixture) = fixture().await;
    fixture
        .locks
        .acquire("u1", MaterialRef::File("notes".into()))
        .await
        .expect("acquire");

    let sessions = fixture.sessions.clone();
    let events = Arc::clone(&fixture.events);
    let publisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let session = QuizSession::new("u1".into(), MaterialRef::File("notes".into()), 600);
        sessions.create(&session).await.expect("create");
        let session = sessions
            .activate_with_questions(&session.id, &sample_questions(2))
            .await
            .expect("activate");
        events
            .publish(
                "u1",
                GenerationOutcome::Ready {
                    session_id: session.id.clone(),
                },
            )
            .await;
        session.id
    });

    let outcome = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .expect("reconcile");
    let expected_id = publisher.await.expect("publisher task");

    match outcome {
        RecoveryOutcome::Attached { session } => assert_eq!(session.id, expected_id),
        other => panic!("expected Attached, got {other:?}"),
    }
}

#[tokio::test]
async fn outstanding_generation_attaches_via_polling() {
    let (_db, fixture) = fixture().await;
    fixture
        .locks
        .acquire("u1", MaterialRef::File("notes".into()))
        .await
        .expect("acquire");

    // The session is already active but no notification will ever
    // arrive; the poll fallback must find it.
    let session = active_session(&fixture, "u1", 2).await;

    let outcome = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .expect("reconcile");

    match outcome {
        RecoveryOutcome::Attached { session: found } => assert_eq!(found.id, session.id),
        other => panic!("expected Attached, got {other:?}"),
    }
}

#[tokio::test]
async fn failure_notification_surfaces_generation_failed() {
    let (_db, fixture) = fixture().await;
    fixture
        .locks
        .acquire("u1", MaterialRef::File("notes".into()))
        .await
        .expect("acquire");

    let events = Arc::clone(&fixture.events);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        events
            .publish(
                "u1",
                GenerationOutcome::Failed {
                    reason: "model unavailable".into(),
                },
            )
            .await;
    });

    let err = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::GenerationFailed(_)));
}

#[tokio::test]
async fn wait_is_bounded_by_the_poll_cap() {
    let (_db, fixture) = fixture().await;
    fixture
        .locks
        .acquire("u1", MaterialRef::File("notes".into()))
        .await
        .expect("acquire");

    // Nothing ever resolves; the cap (3 s) must end the wait.
    let err = fixture
        .reconciler
        .reconcile("u1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Timeout(_)));
}

#[tokio::test]
async fn coordinator_recover_restores_a_live_attempt() {
    let harness = Harness::stub(fast_config()).await;

    let request = request_for("u1", MaterialRef::Tag(1), 4);
    let session = harness
        .coordinator
        .start_session(&request)
        .await
        .expect("start");
    harness
        .coordinator
        .set_answer(&session.id, 0, 1)
        .await
        .expect("answer");
    harness
        .coordinator
        .set_answer(&session.id, 1, 2)
        .await
        .expect("answer");
    harness
        .coordinator
        .checkpoint(&session.id)
        .await
        .expect("checkpoint");

    let outcome = harness.coordinator.recover("u1").await.expect("recover");
    match outcome {
        RecoveryOutcome::Resumed { session: restored, snapshot } => {
            assert_eq!(restored.id, session.id);
            assert_eq!(snapshot.answered_count(), 2);
            assert_eq!(snapshot.answers[0], 1);
            assert_eq!(snapshot.answers[1], 2);
        }
        other => panic!("expected Resumed, got {other:?}"),
    }

    // The restored attempt accepts further answers.
    let snapshot = harness
        .coordinator
        .set_answer(&session.id, 2, 0)
        .await
        .expect("answer after recover");
    assert_eq!(snapshot.answered_count(), 3);

    harness.teardown().await;
}

#[tokio::test]
async fn cancellation_resolves_the_wait_as_fresh() {
    let (_db, fixture) = fixture().await;
    fixture
        .locks
        .acquire("u1", MaterialRef::File("notes".into()))
        .await
        .expect("acquire");

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let outcome = fixture
        .reconciler
        .reconcile("u1", &cancel)
        .await
        .expect("reconcile");
    assert!(matches!(outcome, RecoveryOutcome::Fresh));
}
