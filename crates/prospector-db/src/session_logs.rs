//! Narration log rows attached to a session.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

/// Rows returned by [`list_recent`] when the caller has no preference.
pub const DEFAULT_LOG_LIMIT: u32 = 300;

/// One stored log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLog {
    /// Row id, increasing in append order
    pub id: i64,
    /// Owning session
    pub session_id: String,
    /// RFC3339 time the line was produced
    pub timestamp: String,
    /// `Info`, `Success`, `Warning` or `Error`
    pub level: String,
    /// Log text
    pub message: String,
}

/// Append a log line.
pub async fn append_log(
    pool: &Pool<Sqlite>,
    session_id: &str,
    timestamp: &str,
    level: &str,
    message: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO session_logs (session_id, timestamp, level, message) VALUES (?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(timestamp)
    .bind(level)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// The most recent `limit` lines of a session, oldest first.
pub async fn list_recent(
    pool: &Pool<Sqlite>,
    session_id: &str,
    limit: u32,
) -> Result<Vec<SessionLog>> {
    let rows = sqlx::query(
        "SELECT id, session_id, timestamp, level, message FROM (
             SELECT id, session_id, timestamp, level, message FROM session_logs
             WHERE session_id = ? ORDER BY id DESC LIMIT ?
         ) ORDER BY id ASC",
    )
    .bind(session_id)
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    let mut logs = Vec::with_capacity(rows.len());
    for row in rows {
        logs.push(SessionLog {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            timestamp: row.try_get("timestamp")?,
            level: row.try_get("level")?,
            message: row.try_get("message")?,
        });
    }
    Ok(logs)
}
