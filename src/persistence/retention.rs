//! Retention service for time-based data purge.
//!
//! Runs as a background task deleting children first (snapshots,
//! results), then terminal sessions older than `retention_days`, and
//! finally any generation lock whose TTL has lapsed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::db::Database;
use super::to_ts;
use crate::Result;

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the retention purge background task.
///
/// The task runs hourly. On each tick it deletes all associated records
/// for sessions that have been terminal for longer than `retention_days`
/// and sweeps expired locks.
#[must_use]
pub fn spawn_retention_task(
    db: Arc<Database>,
    retention_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("retention task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = purge(&db, retention_days).await {
                        error!(?err, "retention purge failed");
                    }
                }
            }
        }
    })
}

async fn purge(db: &Database, retention_days: u32) -> Result<()> {
    let now = Utc::now();
    let cutoff = to_ts(now - chrono::Duration::days(i64::from(retention_days)));

    // Delete children first to maintain referential integrity.
    for table in ["progress_snapshot", "quiz_result"] {
        // `table` values are compile-time literals, not user input.
        let query = format!(
            "DELETE FROM {table} WHERE session_id IN
             (SELECT id FROM quiz_session
              WHERE state IN ('completed', 'failed') AND finished_at < ?1)"
        );
        sqlx::query(&query).bind(&cutoff).execute(db).await?;
    }

    sqlx::query(
        "DELETE FROM quiz_session WHERE state IN ('completed', 'failed') AND finished_at < ?1",
    )
    .bind(&cutoff)
    .execute(db)
    .await?;

    let swept = sqlx::query("DELETE FROM generation_lock WHERE expires_at <= ?1")
        .bind(to_ts(now))
        .execute(db)
        .await?
        .rows_affected();

    info!(retention_days, expired_locks = swept, "retention purge completed");
    Ok(())
}
