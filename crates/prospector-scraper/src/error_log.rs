//! Structured error capture.
//!
//! Every catch site in the engine reports here with an [`ErrorContext`]
//! describing where it happened. Entries are kept in memory (oldest evicted
//! past the cap) and can be filtered or summarised after a run. Phone
//! numbers are masked before anything is stored.

use crate::error::{LookupError, OrchestratorError, ScrapeError};
use crate::phone::{MAX_PHONE_DIGITS, MIN_PHONE_DIGITS};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use prospector_browser::BrowserError;
use prospector_db::DatabaseError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{error, warn};
use uuid::Uuid;

/// Default number of retained entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[allow(clippy::expect_used)]
static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("valid phone regex"));

/// How bad an entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// Which part of the pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Browser,
    Extraction,
    Lookup,
    Persistence,
    Validation,
    General,
}

/// Where an error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub town: Option<String>,
    pub industry: Option<String>,
    pub worker_id: Option<usize>,
    pub operation: Option<String>,
    /// Anything else worth keeping
    pub extra: BTreeMap<String, String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn town(mut self, town: impl Into<String>) -> Self {
        self.town = Some(town.into());
        self
    }

    #[must_use]
    pub fn industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }

    #[must_use]
    pub fn worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    #[must_use]
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }

    /// Value of a named field, `extra` included.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "town" => self.town.clone(),
            "industry" => self.industry.clone(),
            "worker_id" => self.worker_id.map(|id| id.to_string()),
            "operation" => self.operation.clone(),
            other => self.extra.get(other).cloned(),
        }
    }

    fn masked(self) -> Self {
        Self {
            town: self.town,
            industry: self.industry,
            worker_id: self.worker_id,
            operation: self.operation,
            extra: self
                .extra
                .into_iter()
                .map(|(k, v)| (k, mask_phones(&v)))
                .collect(),
        }
    }
}

/// The error value attached to an entry: its message and source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedError {
    pub message: String,
    /// Messages of `source()` causes, outermost first
    pub chain: Vec<String>,
}

impl CapturedError {
    /// Capture an error and walk its sources.
    #[must_use]
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            chain,
        }
    }

    fn masked(self) -> Self {
        Self {
            message: mask_phones(&self.message),
            chain: self.chain.iter().map(|c| mask_phones(c)).collect(),
        }
    }
}

impl From<&str> for CapturedError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
            chain: Vec::new(),
        }
    }
}

impl From<String> for CapturedError {
    fn from(message: String) -> Self {
        Self {
            message,
            chain: Vec::new(),
        }
    }
}

impl From<serde_json::Value> for CapturedError {
    fn from(value: serde_json::Value) -> Self {
        let message = match &value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| value.to_string(), str::to_string),
            other => other.to_string(),
        };
        Self {
            message,
            chain: Vec::new(),
        }
    }
}

macro_rules! captured_from_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<&$ty> for CapturedError {
                fn from(err: &$ty) -> Self {
                    Self::from_error(err)
                }
            }
        )*
    };
}

captured_from_error!(
    ScrapeError,
    LookupError,
    OrchestratorError,
    BrowserError,
    DatabaseError,
    std::io::Error,
);

/// One captured error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub message: String,
    pub error: Option<CapturedError>,
    pub context: ErrorContext,
}

/// Counts over the retained entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    /// Keyed by context operation, `unknown` when unset
    pub by_operation: BTreeMap<String, usize>,
}

/// Shared, bounded store of structured errors.
#[derive(Debug)]
pub struct ErrorLogger {
    entries: Mutex<VecDeque<ErrorLogEntry>>,
    max_entries: usize,
}

impl ErrorLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }

    /// Logger keeping at most `max_entries` (at least one).
    #[must_use]
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn log_browser_error(
        &self,
        message: &str,
        error: impl Into<CapturedError>,
        context: ErrorContext,
    ) -> Uuid {
        self.record(Severity::Error, ErrorCategory::Browser, message, Some(error.into()), context)
    }

    pub fn log_extraction_error(
        &self,
        message: &str,
        error: impl Into<CapturedError>,
        context: ErrorContext,
    ) -> Uuid {
        self.record(Severity::Error, ErrorCategory::Extraction, message, Some(error.into()), context)
    }

    pub fn log_lookup_error(
        &self,
        message: &str,
        error: impl Into<CapturedError>,
        context: ErrorContext,
    ) -> Uuid {
        self.record(Severity::Error, ErrorCategory::Lookup, message, Some(error.into()), context)
    }

    pub fn log_persistence_error(
        &self,
        message: &str,
        error: impl Into<CapturedError>,
        context: ErrorContext,
    ) -> Uuid {
        self.record(Severity::Error, ErrorCategory::Persistence, message, Some(error.into()), context)
    }

    pub fn log_validation_error(
        &self,
        message: &str,
        error: impl Into<CapturedError>,
        context: ErrorContext,
    ) -> Uuid {
        self.record(Severity::Error, ErrorCategory::Validation, message, Some(error.into()), context)
    }

    pub fn log_warning(&self, category: ErrorCategory, message: &str, context: ErrorContext) -> Uuid {
        self.record(Severity::Warning, category, message, None, context)
    }

    pub fn log_critical(
        &self,
        message: &str,
        error: impl Into<CapturedError>,
        context: ErrorContext,
    ) -> Uuid {
        self.record(Severity::Critical, ErrorCategory::General, message, Some(error.into()), context)
    }

    fn record(
        &self,
        severity: Severity,
        category: ErrorCategory,
        message: &str,
        error: Option<CapturedError>,
        context: ErrorContext,
    ) -> Uuid {
        let entry = ErrorLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            category,
            message: mask_phones(message),
            error: error.map(CapturedError::masked),
            context: context.masked(),
        };

        let detail = entry.error.as_ref().map_or("", |e| e.message.as_str());
        match severity {
            Severity::Warning => warn!(
                ?category,
                town = entry.context.town.as_deref(),
                industry = entry.context.industry.as_deref(),
                "{} {}",
                entry.message,
                detail
            ),
            Severity::Error | Severity::Critical => error!(
                ?severity,
                ?category,
                town = entry.context.town.as_deref(),
                industry = entry.context.industry.as_deref(),
                "{} {}",
                entry.message,
                detail
            ),
        }

        let id = entry.id;
        let mut entries = self.guard();
        entries.push_back(entry);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        id
    }

    // A panic elsewhere while holding the lock leaves the entries intact
    fn guard(&self) -> MutexGuard<'_, VecDeque<ErrorLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn filtered(&self, keep: impl Fn(&ErrorLogEntry) -> bool) -> Vec<ErrorLogEntry> {
        self.guard().iter().filter(|e| keep(e)).cloned().collect()
    }

    /// All retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<ErrorLogEntry> {
        self.filtered(|_| true)
    }

    #[must_use]
    pub fn by_severity(&self, severity: Severity) -> Vec<ErrorLogEntry> {
        self.filtered(|e| e.severity == severity)
    }

    #[must_use]
    pub fn by_category(&self, category: ErrorCategory) -> Vec<ErrorLogEntry> {
        self.filtered(|e| e.category == category)
    }

    /// Entries whose context field `key` equals `value`.
    #[must_use]
    pub fn by_context(&self, key: &str, value: &str) -> Vec<ErrorLogEntry> {
        self.filtered(|e| e.context.get(key).as_deref() == Some(value))
    }

    /// The `n` newest entries, newest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ErrorLogEntry> {
        self.guard().iter().rev().take(n).cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> ErrorStats {
        let mut stats = ErrorStats::default();
        for entry in self.guard().iter() {
            stats.total += 1;
            *stats.by_severity.entry(entry.severity).or_default() += 1;
            *stats.by_category.entry(entry.category).or_default() += 1;
            let operation = entry
                .context
                .operation
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *stats.by_operation.entry(operation).or_default() += 1;
        }
        stats
    }

    /// Drop every entry.
    pub fn reset(&self) {
        self.guard().clear();
    }
}

impl Default for ErrorLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace every phone-like number with a mask keeping only its last 4 digits.
#[must_use]
pub fn mask_phones(text: &str) -> String {
    PHONE_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let candidate = &caps[0];
            let digits = candidate.chars().filter(char::is_ascii_digit).count();
            if (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits) {
                mask_phone(candidate)
            } else {
                candidate.to_string()
            }
        })
        .into_owned()
}

/// Mask one phone number, e.g. `011 555 0100` becomes `******0100`.
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    let visible: String = digits[digits.len() - 4..].iter().collect();
    format!("{}{visible}", "*".repeat(digits.len() - 4))
}
