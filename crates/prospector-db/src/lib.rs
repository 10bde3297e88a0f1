//! Prospector Session Store
//!
//! Persists scraping sessions, the business rows each session produced and
//! the narration log forwarded from the run, on `SQLite` through `SQLx`.
//!
//! # Example
//!
//! ```ignore
//! use prospector_db::{Database, sessions};
//!
//! let db = Database::new("sessions.db").await?;
//! db.run_migrations().await?;
//! let session = sessions::create_session(db.pool(), &towns, &industries, &config).await?;
//! ```
//!
//! Queries use runtime-checked `sqlx::query` with explicit binds; the
//! schema is embedded from `migrations/`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod businesses;
pub mod error;
pub mod migrations;
pub mod session_logs;
pub mod sessions;

pub use error::{DatabaseError, Result};
pub use sessions::{Session, SessionStatus};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

const MEMORY_PATH: &str = ":memory:";

/// High-level database interface.
#[derive(Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (creating if missing) the session database at `path`.
    ///
    /// `:memory:` opens a private in-memory database held by a single
    /// connection that is never recycled.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| {
            DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
        })?;

        let pool = if path_str == MEMORY_PATH {
            let options = SqliteConnectOptions::from_str(path_str)
                .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?;
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(|e| DatabaseError::Open(e.to_string()))?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
                .map_err(|e| DatabaseError::Open(e.to_string()))?
        };

        tracing::info!("Session database opened at {}", path_str);
        Ok(Self { pool })
    }

    /// Open the database and bring the schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
        tracing::info!("Session database closed");
    }
}
