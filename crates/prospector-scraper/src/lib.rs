//! Prospector Scraper - business listing extraction and run orchestration.
//!
//! This crate turns a list of towns and industries into business records.
//! A pool of browser workers scrapes each town's industries from a maps
//! listing site, the results are deduplicated and phone numbers are then
//! resolved to their network provider.
//!
//! # Features
//!
//! - Concurrent towns across a bounded worker pool, concurrent industries per town
//! - Retry with linear backoff for navigation and extraction failures
//! - Pause, resume and stop with a bounded wait for in-flight towns
//! - Per-town run ledger with live log subscribers
//! - Structured error log with phone numbers masked
//! - Optional session recording in `SQLite`
//!
//! # Example
//!
//! ```rust,ignore
//! use prospector_scraper::{ScrapingOrchestrator, TracingEventSink};
//! use std::sync::Arc;
//!
//! let orchestrator = ScrapingOrchestrator::new(
//!     Arc::new(chromium_driver),
//!     Arc::new(provider_lookup),
//!     Arc::new(TracingEventSink),
//! );
//!
//! let outcome = orchestrator
//!     .run(towns, industries, ScrapingConfig::default())
//!     .await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod classify;
pub mod control;
#[allow(missing_docs)]
pub mod error;
#[allow(missing_docs)]
pub mod error_log;
#[allow(missing_docs)]
pub mod events;
#[allow(missing_docs)]
pub mod logging;
#[allow(missing_docs)]
pub mod lookup;
#[allow(missing_docs)]
pub mod orchestrator;
#[allow(missing_docs)]
pub mod page_scraper;
#[allow(missing_docs)]
pub mod phone;
#[allow(missing_docs)]
pub mod progress;
pub mod retry;
#[allow(missing_docs)]
pub mod session;
#[allow(missing_docs)]
pub mod url_builder;
#[allow(missing_docs)]
pub mod worker;

// Re-export commonly used types
pub use control::{RunControl, RunStatus};
pub use error::{
    LookupError, LookupResult, OrchestratorError, OrchestratorResult, Result, ScrapeError,
};
pub use error_log::{ErrorCategory, ErrorContext, ErrorLogEntry, ErrorLogger, ErrorStats, Severity};
pub use events::{
    ChannelEventSink, CompleteEvent, ErrorEvent, EventSink, NullEventSink, ProgressEvent,
    ScrapeEvent, TracingEventSink,
};
pub use logging::{LogEntry, LogLevel, LoggingManager, SessionSummary, TownLog, TownStatus};
pub use lookup::{BrowserProviderLookup, ProviderLookup, ProviderLookupService};
pub use orchestrator::{RunHandle, RunOutcome, ScrapingOrchestrator};
pub use page_scraper::{PageScraper, ScrapeTarget};
pub use retry::RetryStrategy;
pub use worker::{BrowserWorker, TownScrape};
