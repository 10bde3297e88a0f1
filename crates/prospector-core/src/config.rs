//! Configuration management for Prospector.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration.
///
/// This is loaded from `~/.config/prospector/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Run parameters for the scraping pipeline
    pub scraping: ScrapingConfig,
    /// Browser launch settings
    pub browser: BrowserConfig,
    /// Maps site URL and DOM selectors
    #[serde(alias = "selectors")]
    pub site: SiteConfig,
    /// Address/category heuristics
    pub classifier: ClassifierConfig,
    /// Provider lookup backend settings
    pub lookup: LookupConfig,
    /// Narration and error log retention
    pub logging: LoggingConfig,
    /// Session store settings
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file path.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }

        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `PROSPECTOR_HEADLESS`: Override browser headless mode (true/false)
    /// - `PROSPECTOR_SIMULTANEOUS_TOWNS`: Override the worker pool size
    /// - `PROSPECTOR_DB_PATH`: Override the session database path
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `PROSPECTOR_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PROSPECTOR_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.scraping.browser_headless = headless;
                tracing::debug!("Override scraping.browser_headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("PROSPECTOR_SIMULTANEOUS_TOWNS") {
            if let Ok(towns) = val.parse() {
                self.scraping.simultaneous_towns = towns;
                tracing::debug!("Override scraping.simultaneous_towns from env: {}", towns);
            }
        }

        if let Ok(val) = std::env::var("PROSPECTOR_DB_PATH") {
            tracing::debug!("Override storage.db_path from env: {}", val);
            self.storage.db_path = Some(PathBuf::from(val));
        }
    }

    /// Check every section for values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        self.scraping.validate()?;
        if self.logging.display_capacity == 0 {
            return Err(invalid("logging.display_capacity", "must be at least 1"));
        }
        if self.logging.max_error_entries == 0 {
            return Err(invalid("logging.max_error_entries", "must be at least 1"));
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| invalid("config_path", "no parent directory"))?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/prospector/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "prospector", "prospector")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/prospector`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "prospector", "prospector")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Resolve the session database path, defaulting into the data directory.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("sessions.db")),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Immutable run parameters for one scraping session.
///
/// The camelCase aliases accept the option names used by the dashboard
/// that drives the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Towns processed at once (worker pool size)
    #[serde(alias = "simultaneousTowns")]
    pub simultaneous_towns: usize,
    /// Industries scraped at once inside one town
    #[serde(alias = "simultaneousIndustries")]
    pub simultaneous_industries: usize,
    /// Provider lookup batches run at once
    #[serde(alias = "simultaneousLookups")]
    pub simultaneous_lookups: usize,
    /// Attempts per industry scrape (including the first)
    #[serde(alias = "retryAttempts")]
    pub retry_attempts: u32,
    /// Base delay between attempts in milliseconds
    #[serde(alias = "retryDelay")]
    pub retry_delay_ms: u64,
    /// Run browsers without a window
    #[serde(alias = "browserHeadless")]
    pub browser_headless: bool,
    /// Phone numbers per lookup batch
    #[serde(alias = "lookupBatchSize")]
    pub lookup_batch_size: usize,
    /// Page-load timeout in milliseconds
    pub navigation_timeout_ms: u64,
    /// Wait after each results-feed scroll in milliseconds
    pub scroll_wait_ms: u64,
    /// Upper bound on scrolls per results feed
    pub max_scrolls: u32,
    /// Results kept in single-business lookup mode
    pub max_lookup_results: usize,
    /// How long `stop()` waits for in-flight towns before abandoning them
    pub stop_timeout_secs: u64,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            simultaneous_towns: 2,
            simultaneous_industries: 3,
            simultaneous_lookups: 2,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            browser_headless: true,
            lookup_batch_size: 10,
            navigation_timeout_ms: 30_000,
            scroll_wait_ms: 1500,
            max_scrolls: 40,
            max_lookup_results: 3,
            stop_timeout_secs: 30,
        }
    }
}

impl ScrapingConfig {
    /// Reject values that would stall or skip the pipeline.
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("scraping.simultaneous_towns", self.simultaneous_towns),
            ("scraping.simultaneous_industries", self.simultaneous_industries),
            ("scraping.simultaneous_lookups", self.simultaneous_lookups),
            ("scraping.lookup_batch_size", self.lookup_batch_size),
            ("scraping.max_lookup_results", self.max_lookup_results),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be at least 1"));
            }
        }
        if self.retry_attempts == 0 {
            return Err(invalid("scraping.retry_attempts", "must be at least 1"));
        }
        if self.navigation_timeout_ms == 0 {
            return Err(invalid("scraping.navigation_timeout_ms", "must be non-zero"));
        }
        Ok(())
    }
}

/// Browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Explicit Chrome/Chromium executable, autodetected when unset
    pub executable: Option<PathBuf>,
    /// User agent override
    pub user_agent: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            window_width: 1366,
            window_height: 900,
            executable: None,
            user_agent: None,
        }
    }
}

/// Maps site entry point and the selectors used to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Search URL prefix; the encoded query is appended
    pub search_url: String,
    /// Scrollable results feed container
    pub results_feed: String,
    /// One result card inside the feed
    pub result_card: String,
    /// Link inside a card pointing at the listing
    pub card_link: String,
    /// Business name inside a card
    pub card_name: String,
    /// Free-text spans inside a card (rating, category, address, hours)
    pub card_detail_spans: String,
    /// Marker shown once the feed has no more results
    pub end_of_list: String,
    /// Single-business detail panel
    pub detail_panel: String,
    /// Business name inside the detail panel
    pub detail_name: String,
    /// Address inside the detail panel
    pub detail_address: String,
    /// Category inside the detail panel
    pub detail_category: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            search_url: "https://www.google.com/maps/search/?api=1".to_string(),
            results_feed: r#"div[role="feed"]"#.to_string(),
            result_card: r#"div[role="article"]"#.to_string(),
            card_link: "a[href]".to_string(),
            card_name: "[data-card-name], .card-name".to_string(),
            card_detail_spans: "span".to_string(),
            end_of_list: ".end-of-list, [data-end-of-list]".to_string(),
            detail_panel: r#"div[role="main"]"#.to_string(),
            detail_name: "h1".to_string(),
            detail_address: r#"button[data-item-id="address"]"#.to_string(),
            detail_category: r#"button[jsaction*="category"]"#.to_string(),
        }
    }
}

/// Thresholds for telling an address span from a category span.
///
/// Both values are empirical for one listing layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// A category label has at most this many words
    pub max_category_words: usize,
    /// A span longer than this many characters is taken as an address
    pub min_address_len: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_category_words: 3,
            min_address_len: 10,
        }
    }
}

/// Provider lookup backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Lookup page URL, `{phone}` is replaced by the digits-only number
    pub url_template: String,
    /// Element holding the provider name on the lookup page
    pub result_selector: String,
    /// Page-load timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            url_template: "https://www.porting.example/lookup?number={phone}".to_string(),
            result_selector: ".provider-name".to_string(),
            timeout_ms: 15_000,
        }
    }
}

/// Narration and error log retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Entries kept in the live display buffer
    pub display_capacity: usize,
    /// Structured error entries retained
    pub max_error_entries: usize,
    /// Log rows returned when reading a stored session
    pub session_log_limit: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            display_capacity: 300,
            max_error_entries: 1000,
            session_log_limit: 300,
        }
    }
}

/// Session store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file, defaults to `sessions.db` in the data directory
    pub db_path: Option<PathBuf>,
    /// Skip persistence entirely
    pub disabled: bool,
}
