//! Generation lock repository for `SQLite` persistence.
//!
//! The `user_id` primary key makes the table a keyed mutex: concurrent
//! acquires for one user race on the insert and exactly one wins,
//! regardless of which process observes the database.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::lock::GenerationLock;
use crate::models::material::MaterialRef;
use crate::Result;

use super::db::Database;
use super::{parse_ts, to_ts};

/// Repository wrapper around `SQLite` for generation lock records.
#[derive(Clone)]
pub struct LockRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct LockRow {
    user_id: String,
    material_type: String,
    material_id: String,
    acquired_at: String,
    expires_at: String,
}

impl LockRow {
    /// Convert a database row into the domain model.
    fn into_lock(self) -> Result<GenerationLock> {
        Ok(GenerationLock {
            user_id: self.user_id,
            material: MaterialRef::from_columns(&self.material_type, &self.material_id)?,
            acquired_at: parse_ts(&self.acquired_at, "acquired_at")?,
            expires_at: parse_ts(&self.expires_at, "expires_at")?,
        })
    }
}

impl LockRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Atomically acquire the lock if the user holds no live one.
    ///
    /// One transaction: purge the user's expired row, then insert with
    /// `ON CONFLICT DO NOTHING`. Returns `Ok(None)` when the insert won,
    /// or `Ok(Some(existing))` with the live holder's metadata on
    /// conflict.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn acquire_if_absent(
        &self,
        lock: &GenerationLock,
    ) -> Result<Option<GenerationLock>> {
        let now = to_ts(lock.acquired_at);
        let mut tx = self.db.begin().await?;

        // A lapsed TTL makes the slot reclaimable even if the original
        // caller never reported completion.
        sqlx::query("DELETE FROM generation_lock WHERE user_id = ?1 AND expires_at <= ?2")
            .bind(&lock.user_id)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            "INSERT INTO generation_lock (user_id, material_type, material_id, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(&lock.user_id)
        .bind(lock.material.type_str())
        .bind(lock.material.id_string())
        .bind(&now)
        .bind(to_ts(lock.expires_at))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            tx.commit().await?;
            return Ok(None);
        }

        let row: Option<LockRow> =
            sqlx::query_as("SELECT * FROM generation_lock WHERE user_id = ?1")
                .bind(&lock.user_id)
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;

        row.map(LockRow::into_lock).transpose()
    }

    /// Retrieve a user's lock row, expired or not.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, user_id: &str) -> Result<Option<GenerationLock>> {
        let row: Option<LockRow> =
            sqlx::query_as("SELECT * FROM generation_lock WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(LockRow::into_lock).transpose()
    }

    /// Release a user's lock. Releasing an absent lock is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn release(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM generation_lock WHERE user_id = ?1")
            .bind(user_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Sweep all locks whose TTL has elapsed as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let swept = sqlx::query("DELETE FROM generation_lock WHERE expires_at <= ?1")
            .bind(to_ts(now))
            .execute(self.db.as_ref())
            .await?
            .rows_affected();
        Ok(swept)
    }
}
