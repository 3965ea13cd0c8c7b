use std::sync::Arc;

use chrono::{Duration, Utc};
use quizforge::models::progress::{ProgressSnapshot, UNANSWERED};
use quizforge::persistence::{db, snapshot_repo::SnapshotRepo};

async fn repo() -> SnapshotRepo {
    SnapshotRepo::new(Arc::new(db::connect_memory().await.expect("db")))
}

#[tokio::test]
async fn save_and_load_roundtrips() {
    let repo = repo().await;
    let snapshot = ProgressSnapshot {
        user_id: "u1".into(),
        session_id: "s1".into(),
        current_index: 3,
        answers: vec![0, 2, UNANSWERED, 1],
        remaining_seconds: 480,
        saved_at: Utc::now(),
    };
    repo.save(&snapshot).await.expect("save");

    let loaded = repo
        .load("u1", "s1")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.current_index, 3);
    assert_eq!(loaded.answers, vec![0, 2, UNANSWERED, 1]);
    assert_eq!(loaded.remaining_seconds, 480);
    assert_eq!(loaded.answered_count(), 3);
}

#[tokio::test]
async fn save_replaces_the_previous_checkpoint() {
    let repo = repo().await;
    let mut snapshot = ProgressSnapshot::fresh("u1".into(), "s1".into(), 4, 600);
    repo.save(&snapshot).await.expect("save");

    snapshot.answers[0] = 2;
    snapshot.current_index = 1;
    snapshot.remaining_seconds = 590;
    repo.save(&snapshot).await.expect("resave");

    let loaded = repo
        .load("u1", "s1")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(loaded.answers[0], 2);
    assert_eq!(loaded.remaining_seconds, 590);
}

#[tokio::test]
async fn snapshot_for_another_session_is_absence() {
    let repo = repo().await;
    let snapshot = ProgressSnapshot::fresh("u1".into(), "old-session".into(), 4, 600);
    repo.save(&snapshot).await.expect("save");

    assert!(repo
        .load("u1", "new-session")
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn snapshots_are_scoped_per_user() {
    let repo = repo().await;
    let snapshot = ProgressSnapshot::fresh("u1".into(), "s1".into(), 4, 600);
    repo.save(&snapshot).await.expect("save");

    assert!(repo.load("u2", "s1").await.expect("load").is_none());
}

#[tokio::test]
async fn latest_for_user_picks_the_newest_save() {
    let repo = repo().await;

    let mut older = ProgressSnapshot::fresh("u1".into(), "s1".into(), 2, 600);
    older.saved_at = Utc::now() - Duration::seconds(60);
    repo.save(&older).await.expect("save");

    let newer = ProgressSnapshot::fresh("u1".into(), "s2".into(), 2, 600);
    repo.save(&newer).await.expect("save");

    let latest = repo
        .latest_for_user("u1")
        .await
        .expect("query")
        .expect("present");
    assert_eq!(latest.session_id, "s2");
}

#[tokio::test]
async fn clear_variants_are_idempotent() {
    let repo = repo().await;
    let snapshot = ProgressSnapshot::fresh("u1".into(), "s1".into(), 2, 600);
    repo.save(&snapshot).await.expect("save");

    repo.clear("u1", "s1").await.expect("clear");
    assert!(repo.load("u1", "s1").await.expect("load").is_none());
    repo.clear("u1", "s1").await.expect("clear twice");

    repo.save(&snapshot).await.expect("save");
    repo.clear_for_user("u1").await.expect("clear user");
    assert!(repo.latest_for_user("u1").await.expect("query").is_none());

    repo.save(&snapshot).await.expect("save");
    repo.clear_for_session("s1").await.expect("clear session");
    assert!(repo.load("u1", "s1").await.expect("load").is_none());
}
