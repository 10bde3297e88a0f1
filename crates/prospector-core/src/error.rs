//! Core error types for the Prospector workspace.
//!
//! `ProspectorError` is the shared error type at crate boundaries; each
//! subsystem crate keeps its own richer enum and converts into this one.

use thiserror::Error;

/// Central error type for Prospector operations.
#[derive(Error, Debug)]
pub enum ProspectorError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session store errors
    #[error("database error: {0}")]
    Database(String),

    /// Browser automation errors (launch, navigation, DOM access)
    #[error("browser error: {0}")]
    Browser(String),

    /// Scraping errors (extraction, retries exhausted)
    #[error("scrape error: {0}")]
    Scrape(String),

    /// Provider lookup errors
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Validation errors (invalid input, constraints)
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Config file not found
    #[error("config file not found at {path}")]
    NotFound {
        /// Path where config was expected
        path: String,
    },

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `ProspectorError`.
pub type Result<T> = std::result::Result<T, ProspectorError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
