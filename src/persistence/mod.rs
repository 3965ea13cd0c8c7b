//! `SQLite` persistence: pool bootstrap, schema, and one repository per
//! aggregate (locks, sessions, snapshots, results).

pub mod db;
pub mod lock_repo;
pub mod result_repo;
pub mod retention;
pub mod schema;
pub mod session_repo;
pub mod snapshot_repo;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{AppError, Result};

/// Render a timestamp for storage.
///
/// One-second resolution with a uniform `Z` suffix so stored values
/// compare correctly as strings in SQL (`expires_at <= ?now`).
pub(crate) fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp back into UTC.
pub(crate) fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("invalid {column}: {err}")))
}
