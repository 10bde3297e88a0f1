//! Shared types used across the Prospector workspace.
//!
//! This module defines the business record produced by the scraper together
//! with the small newtypes that give it type safety.

use crate::error::ProspectorError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Provider value applied when a phone number could not be resolved.
pub const UNKNOWN_PROVIDER: &str = "Unknown";

/// Newtype for business record identifiers.
///
/// Record IDs are UUID v4 strings generated at extraction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Create a `RecordId` from an existing string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, ProspectorError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a new random `RecordId`.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), ProspectorError> {
        static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = UUID_REGEX.get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .expect("valid regex")
        });

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(ProspectorError::Validation(format!(
                "invalid record ID: must be a valid UUID v4, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A business extracted from a maps listing.
///
/// `name` is never empty on a record that left the extraction stage.
/// `phone` is the empty string when no number was found, and `provider`
/// stays `None` until the lookup stage has run for a non-empty phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRecord {
    /// Generated identifier
    pub id: RecordId,
    /// Listing URL on the maps site, used for de-duplication
    pub map_url: String,
    /// Business name
    pub name: String,
    /// Phone number as displayed, empty when absent
    pub phone: String,
    /// Telecom provider resolved from the phone number
    pub provider: Option<String>,
    /// Street address
    pub address: Option<String>,
    /// Business category label
    pub category: Option<String>,
    /// Town the business was found in
    pub town: String,
    /// Industry search that surfaced the business
    pub industry: String,
    /// Free-text notes
    #[serde(default)]
    pub notes: String,
}

impl BusinessRecord {
    /// Create a record with a fresh ID and no optional fields.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        map_url: impl Into<String>,
        town: impl Into<String>,
        industry: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            map_url: map_url.into(),
            name: name.into(),
            phone: String::new(),
            provider: None,
            address: None,
            category: None,
            town: town.into(),
            industry: industry.into(),
            notes: String::new(),
        }
    }

    /// Set the phone number.
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = phone.into();
        self
    }

    /// Set the street address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the category label.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Whether the record carries a phone number worth looking up.
    #[must_use]
    pub fn has_phone(&self) -> bool {
        !self.phone.trim().is_empty()
    }

    /// Whether the record satisfies the extraction invariant (non-blank name).
    #[must_use]
    pub fn has_name(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Parse a timestamp from an RFC3339 string.
    pub fn from_rfc3339(s: &str) -> Result<Self, ProspectorError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| ProspectorError::Validation(format!("invalid timestamp: {e}")))
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Milliseconds elapsed between `earlier` and `self`, clamped at zero.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn millis_since(&self, earlier: &Timestamp) -> u64 {
        (self.0 - earlier.0).num_milliseconds().max(0) as u64
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}
