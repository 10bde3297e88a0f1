//! Prospector Core - Foundation crate for the Prospector scraping engine.
//!
//! This crate provides shared types, error handling and configuration
//! management that all other Prospector crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared types (`BusinessRecord`, `RecordId`, `Timestamp`)
//!
//! # Example
//!
//! ```rust
//! use prospector_core::{AppConfig, BusinessRecord};
//!
//! let config = AppConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let record = BusinessRecord::new("Acme Bakery", "https://maps/p/1", "Benoni", "bakeries");
//! assert!(record.has_name());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, ClassifierConfig, LoggingConfig, LookupConfig, ScrapingConfig,
    SiteConfig, StorageConfig,
};
pub use error::{ConfigError, ConfigResult, ProspectorError, Result};
pub use types::{BusinessRecord, RecordId, Timestamp, UNKNOWN_PROVIDER};
