use prospector_browser::BrowserError;
use prospector_core::{ConfigError, ProspectorError};
use thiserror::Error;

/// Failure scraping one industry or lookup query.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("No results feed for \"{query}\"")]
    FeedNotFound { query: String },

    #[error("Invalid selector {selector}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("Invalid search URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Failure resolving a phone number to its provider.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The backend cannot serve lookups at all.
    #[error("Lookup backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but had no provider for the number.
    #[error("No provider found for {0}")]
    NotFound(String),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Failure starting or driving a run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("A scraping run is already active")]
    AlreadyRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker {worker_id} terminated unexpectedly: {reason}")]
    WorkerFailed { worker_id: usize, reason: String },

    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Run task failed: {0}")]
    Internal(String),
}

impl From<ConfigError> for OrchestratorError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<ScrapeError> for ProspectorError {
    fn from(err: ScrapeError) -> Self {
        Self::Scrape(err.to_string())
    }
}

impl From<LookupError> for ProspectorError {
    fn from(err: LookupError) -> Self {
        Self::Lookup(err.to_string())
    }
}

impl From<OrchestratorError> for ProspectorError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::InvalidConfig(reason) => Self::Validation(reason),
            other => Self::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
pub type LookupResult<T> = std::result::Result<T, LookupError>;
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
