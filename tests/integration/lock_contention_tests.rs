use std::sync::Arc;
use std::time::Duration;

use quizforge::coordinator::generation_lock::{AcquireOutcome, GenerationLocks};
use quizforge::models::material::MaterialRef;
use quizforge::persistence::lock_repo::LockRepo;
use quizforge::AppError;

use super::test_helpers::{
    fast_config, memory_db, request_for, BlockingGenerator, Harness, ManualClock,
};

async fn lock_service(clock: Arc<ManualClock>, ttl: u64) -> GenerationLocks {
    let db = memory_db().await;
    GenerationLocks::new(LockRepo::new(db), clock, ttl)
}

#[tokio::test]
async fn second_acquire_conflicts_with_owner_metadata() {
    let clock = Arc::new(ManualClock::new());
    let locks = lock_service(Arc::clone(&clock), 300).await;

    let outcome = locks
        .acquire("u1", MaterialRef::File("notes".into()))
        .await
        .expect("acquire");
    assert!(matches!(outcome, AcquireOutcome::Acquired(_)));

    let outcome = locks
        .acquire("u1", MaterialRef::Tag(4))
        .await
        .expect("acquire");
    match outcome {
        AcquireOutcome::Conflict(holder) => {
            assert_eq!(holder.material, MaterialRef::File("notes".into()));
        }
        AcquireOutcome::Acquired(_) => panic!("second acquire must conflict"),
    }
}

#[tokio::test]
async fn lapsed_ttl_reports_idle_and_is_reclaimable() {
    let clock = Arc::new(ManualClock::new());
    let locks = lock_service(Arc::clone(&clock), 300).await;

    locks
        .acquire("u1", MaterialRef::Tag(1))
        .await
        .expect("acquire");

    clock.advance_secs(299);
    let status = locks.status("u1").await.expect("status");
    assert!(status.is_generating, "TTL has not lapsed yet");

    clock.advance_secs(2);
    let status = locks.status("u1").await.expect("status");
    assert!(!status.is_generating, "expired lock must report idle");

    let outcome = locks
        .acquire("u1", MaterialRef::Tag(2))
        .await
        .expect("acquire");
    assert!(matches!(outcome, AcquireOutcome::Acquired(_)));

    let status = locks.status("u1").await.expect("status");
    assert_eq!(status.material, Some(MaterialRef::Tag(2)));
}

#[tokio::test]
async fn simultaneous_acquires_have_exactly_one_winner() {
    let clock = Arc::new(ManualClock::new());
    let locks = lock_service(clock, 300).await;

    let (a, b) = tokio::join!(
        locks.acquire("u1", MaterialRef::File("left".into())),
        locks.acquire("u1", MaterialRef::File("right".into())),
    );
    let a = a.expect("acquire");
    let b = b.expect("acquire");

    let (winner, loser) = match (&a, &b) {
        (AcquireOutcome::Acquired(w), AcquireOutcome::Conflict(l))
        | (AcquireOutcome::Conflict(l), AcquireOutcome::Acquired(w)) => (w, l),
        _ => panic!("exactly one of the two acquires must win: {a:?} / {b:?}"),
    };

    // The loser observes the winner's lock, not its own request.
    assert_eq!(loser.material, winner.material);
}

#[tokio::test]
async fn sweep_reports_expired_lock_count() {
    let clock = Arc::new(ManualClock::new());
    let locks = lock_service(Arc::clone(&clock), 60).await;

    locks
        .acquire("u1", MaterialRef::Tag(1))
        .await
        .expect("acquire");
    locks
        .acquire("u2", MaterialRef::Tag(2))
        .await
        .expect("acquire");

    clock.advance_secs(61);
    let swept = locks.sweep_expired().await.expect("sweep");
    assert_eq!(swept, 2);
}

#[tokio::test]
async fn concurrent_generation_yields_lock_conflict_for_the_second_caller() {
    let harness = Harness::with(fast_config(), Arc::new(BlockingGenerator)).await;

    let coordinator = Arc::clone(&harness.coordinator);
    let first = tokio::spawn(async move {
        let request = request_for("u1", MaterialRef::File("held".into()), 3);
        coordinator.start_session(&request).await
    });

    // Give the first call time to take the lock and park in the
    // generator.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let request = request_for("u1", MaterialRef::File("second".into()), 3);
    let err = harness
        .coordinator
        .start_session(&request)
        .await
        .unwrap_err();
    match err {
        AppError::LockConflict(message) => {
            assert!(message.contains("file:held"), "conflict names the holder: {message}");
        }
        other => panic!("expected LockConflict, got {other}"),
    }

    let status = harness.coordinator.status("u1").await.expect("status");
    assert!(status.is_generating);
    assert_eq!(status.material, Some(MaterialRef::File("held".into())));

    first.abort();
    harness.teardown().await;
}
