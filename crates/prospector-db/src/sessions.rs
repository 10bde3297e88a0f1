//! Scraping session rows.
//!
//! One session per orchestrator run. The run's towns, industries and config
//! are stored as JSON; progress and status are updated as the run advances.

use crate::error::{DatabaseError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a stored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Run in progress
    Running,
    /// Run paused by the operator
    Paused,
    /// Run stopped before finishing
    Stopped,
    /// Run finished normally
    Completed,
    /// Run ended with a fatal error
    Failed,
}

impl SessionStatus {
    /// Database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Stopped => "Stopped",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Running" => Ok(Self::Running),
            "Paused" => Ok(Self::Paused),
            "Stopped" => Ok(Self::Stopped),
            "Completed" => Ok(Self::Completed),
            "Failed" => Ok(Self::Failed),
            other => Err(DatabaseError::Decode(format!(
                "invalid session status '{other}'"
            ))),
        }
    }
}

/// A stored scraping session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: String,
    /// Current lifecycle state
    pub status: SessionStatus,
    /// Towns requested for the run
    pub towns: Vec<String>,
    /// Industries requested for the run
    pub industries: Vec<String>,
    /// Run configuration as submitted
    pub config: serde_json::Value,
    /// Completion percentage, 0 to 100
    pub progress: f64,
    /// Businesses scraped so far
    pub businesses_count: i64,
    /// RFC3339 creation time
    pub created_at: String,
    /// RFC3339 time of the last update
    pub updated_at: String,
    /// RFC3339 time the session ended
    pub completed_at: Option<String>,
    /// Error that ended the session
    pub error_message: Option<String>,
}

const SESSION_COLUMNS: &str = "id, status, towns, industries, config, progress, businesses_count, created_at, updated_at, completed_at, error_message";

fn from_row(row: &SqliteRow) -> Result<Session> {
    let status: String = row.try_get("status")?;
    let towns: String = row.try_get("towns")?;
    let industries: String = row.try_get("industries")?;
    let config: String = row.try_get("config")?;

    Ok(Session {
        id: row.try_get("id")?,
        status: status.parse()?,
        towns: serde_json::from_str(&towns)?,
        industries: serde_json::from_str(&industries)?,
        config: serde_json::from_str(&config)?,
        progress: row.try_get("progress")?,
        businesses_count: row.try_get("businesses_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

/// Create a new session in the `Running` state.
pub async fn create_session<C: Serialize + ?Sized>(
    pool: &Pool<Sqlite>,
    towns: &[String],
    industries: &[String],
    config: &C,
) -> Result<Session> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let config = serde_json::to_value(config)?;

    sqlx::query(
        "INSERT INTO sessions (id, status, towns, industries, config, progress, businesses_count, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)",
    )
    .bind(&id)
    .bind(SessionStatus::Running.as_str())
    .bind(serde_json::to_string(towns)?)
    .bind(serde_json::to_string(industries)?)
    .bind(config.to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    tracing::debug!(session_id = %id, "session created");

    Ok(Session {
        id,
        status: SessionStatus::Running,
        towns: towns.to_vec(),
        industries: industries.to_vec(),
        config,
        progress: 0.0,
        businesses_count: 0,
        created_at: now.clone(),
        updated_at: now,
        completed_at: None,
        error_message: None,
    })
}

/// Get a session by ID.
pub async fn get_session(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(from_row).transpose()
}

/// Most recently created sessions, newest first.
pub async fn list_recent(pool: &Pool<Sqlite>, limit: u32) -> Result<Vec<Session>> {
    let rows = sqlx::query(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC LIMIT ?"
    ))
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    rows.iter().map(from_row).collect()
}

/// Record run progress.
pub async fn update_progress(
    pool: &Pool<Sqlite>,
    id: &str,
    progress: f64,
    businesses_count: i64,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE sessions SET progress = ?, businesses_count = ?, updated_at = ? WHERE id = ?",
    )
    .bind(progress.clamp(0.0, 100.0))
    .bind(businesses_count)
    .bind(Utc::now().to_rfc3339())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Session '{id}' not found"
        )));
    }
    Ok(())
}

/// Change the session status. Terminal states also stamp `completed_at`.
pub async fn update_status(
    pool: &Pool<Sqlite>,
    id: &str,
    status: SessionStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let completed_at = status.is_terminal().then(|| now.clone());

    let result = sqlx::query(
        "UPDATE sessions SET status = ?, updated_at = ?, completed_at = COALESCE(?, completed_at), error_message = COALESCE(?, error_message) WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(&now)
    .bind(completed_at)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Session '{id}' not found"
        )));
    }

    tracing::debug!(session_id = %id, status = %status, "session status updated");
    Ok(())
}
