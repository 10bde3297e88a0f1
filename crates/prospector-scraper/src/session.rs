//! Mirrors a run into the session store.
//!
//! Every write is best effort: a failure is recorded in the `ErrorLogger`
//! and the run carries on.

use crate::error_log::{ErrorContext, ErrorLogger};
use crate::logging::LogEntry;
use prospector_core::{BusinessRecord, ScrapingConfig};
use prospector_db::{businesses, session_logs, sessions, Database, DatabaseError, SessionStatus};
use std::sync::Arc;

#[derive(Debug)]
pub struct SessionRecorder {
    db: Arc<Database>,
    session_id: String,
    errors: Arc<ErrorLogger>,
}

impl SessionRecorder {
    /// Create the session row. `None` when the store refused it.
    pub async fn create(
        db: Arc<Database>,
        towns: &[String],
        industries: &[String],
        config: &ScrapingConfig,
        errors: Arc<ErrorLogger>,
    ) -> Option<Self> {
        match sessions::create_session(db.pool(), towns, industries, config).await {
            Ok(session) => {
                tracing::info!(session_id = %session.id, "session recording started");
                Some(Self {
                    db,
                    session_id: session.id,
                    errors,
                })
            }
            Err(e) => {
                errors.log_persistence_error(
                    "Could not create session",
                    &e,
                    ErrorContext::new().operation("create_session"),
                );
                None
            }
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn report(&self, operation: &str, result: Result<(), DatabaseError>) {
        if let Err(e) = result {
            self.errors.log_persistence_error(
                "Session store write failed",
                &e,
                ErrorContext::new()
                    .operation(operation)
                    .with("session_id", &self.session_id),
            );
        }
    }

    pub async fn store_businesses(&self, records: &[BusinessRecord]) {
        if records.is_empty() {
            return;
        }
        let result = businesses::insert_businesses(self.db.pool(), &self.session_id, records)
            .await
            .map(|_| ());
        self.report("insert_businesses", result);
    }

    pub async fn store_providers(&self, records: &[BusinessRecord]) {
        let result = businesses::update_providers(self.db.pool(), &self.session_id, records)
            .await
            .map(|_| ());
        self.report("update_providers", result);
    }

    #[allow(clippy::cast_possible_wrap)]
    pub async fn record_progress(&self, percentage: f64, businesses: usize) {
        let result = sessions::update_progress(
            self.db.pool(),
            &self.session_id,
            percentage,
            businesses as i64,
        )
        .await;
        self.report("update_progress", result);
    }

    pub async fn set_status(&self, status: SessionStatus, error_message: Option<&str>) {
        let result =
            sessions::update_status(self.db.pool(), &self.session_id, status, error_message).await;
        self.report("update_status", result);
    }

    pub async fn append_log(&self, entry: &LogEntry) {
        let result = session_logs::append_log(
            self.db.pool(),
            &self.session_id,
            &entry.timestamp.to_rfc3339(),
            entry.level.as_str(),
            &entry.message,
        )
        .await;
        self.report("append_log", result);
    }
}
