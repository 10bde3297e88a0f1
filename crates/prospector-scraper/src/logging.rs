//! Run narration.
//!
//! `LoggingManager` keeps the human-readable story of a run: a bounded
//! display buffer for live views, the full history, and a per-town ledger
//! from which the session summary is derived. Every line is mirrored into
//! `tracing` and published to live subscribers.

use prospector_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Entries kept in the display buffer by default.
pub const DEFAULT_DISPLAY_CAPACITY: usize = 300;

const LIVE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Success => "Success",
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

/// One narration line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub message: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TownStatus {
    InProgress,
    Completed,
    Error,
    Interrupted,
}

/// Ledger entry for one town.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TownLog {
    pub town: String,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub business_count: usize,
    pub status: TownStatus,
    pub errors: Vec<String>,
    /// Industry name to its last reported status
    pub industries: BTreeMap<String, String>,
}

impl TownLog {
    fn new(town: &str) -> Self {
        Self {
            town: town.to_string(),
            start_time: Timestamp::now(),
            end_time: None,
            business_count: 0,
            status: TownStatus::InProgress,
            errors: Vec::new(),
            industries: BTreeMap::new(),
        }
    }

    /// Milliseconds between start and end, if the town has finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time.map(|end| end.millis_since(&self.start_time))
    }
}

/// Figures derived from the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_towns: usize,
    pub completed_towns: usize,
    pub total_businesses: usize,
    pub total_errors: usize,
    pub total_duration_ms: u64,
    pub average_town_duration_ms: u64,
}

#[derive(Debug)]
struct LogState {
    display: VecDeque<LogEntry>,
    history: Vec<LogEntry>,
    towns: Vec<TownLog>,
    /// Errors not tied to a known town
    general_errors: usize,
    session_start: Timestamp,
}

impl LogState {
    fn new() -> Self {
        Self {
            display: VecDeque::new(),
            history: Vec::new(),
            towns: Vec::new(),
            general_errors: 0,
            session_start: Timestamp::now(),
        }
    }

    fn town_mut(&mut self, town: &str) -> &mut TownLog {
        let idx = match self.towns.iter().position(|t| t.town == town) {
            Some(idx) => idx,
            None => {
                self.towns.push(TownLog::new(town));
                self.towns.len() - 1
            }
        };
        &mut self.towns[idx]
    }
}

/// Shared narration log for a run.
#[derive(Debug)]
pub struct LoggingManager {
    state: Mutex<LogState>,
    capacity: usize,
    live: broadcast::Sender<LogEntry>,
}

impl LoggingManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DISPLAY_CAPACITY)
    }

    /// Manager whose display buffer holds `capacity` entries (at least one).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(LogState::new()),
            capacity: capacity.max(1),
            live,
        }
    }

    /// Receive every entry logged from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.live.subscribe()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LogState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut state)
    }

    fn push(&self, state: &mut LogState, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => info!(target: "prospector::run", "{}", message),
            LogLevel::Warning => warn!(target: "prospector::run", "{}", message),
            LogLevel::Error => error!(target: "prospector::run", "{}", message),
        }

        let entry = LogEntry {
            timestamp: Timestamp::now(),
            message,
            level,
        };
        state.display.push_back(entry.clone());
        while state.display.len() > self.capacity {
            state.display.pop_front();
        }
        state.history.push(entry.clone());
        // No subscribers is fine
        let _ = self.live.send(entry);
    }

    fn log(&self, level: LogLevel, message: String) {
        self.with_state(|state| self.push(state, level, message));
    }

    pub fn log_town_start(&self, town: &str) {
        self.with_state(|state| {
            let log = state.town_mut(town);
            *log = TownLog::new(town);
            self.push(state, LogLevel::Info, format!("Starting {town}"));
        });
    }

    pub fn log_town_complete(&self, town: &str, business_count: usize, duration: Duration) {
        self.with_state(|state| {
            let log = state.town_mut(town);
            log.status = TownStatus::Completed;
            log.end_time = Some(Timestamp::now());
            log.business_count = business_count;
            self.push(
                state,
                LogLevel::Success,
                format!(
                    "Completed {town}: {business_count} businesses in {:.1}s",
                    duration.as_secs_f64()
                ),
            );
        });
    }

    pub fn log_town_failed(&self, town: &str, message: &str, duration: Duration) {
        self.with_state(|state| {
            let log = state.town_mut(town);
            log.status = TownStatus::Error;
            log.end_time = Some(Timestamp::now());
            log.errors.push(message.to_string());
            self.push(
                state,
                LogLevel::Error,
                format!(
                    "Failed {town} after {:.1}s: {message}",
                    duration.as_secs_f64()
                ),
            );
        });
    }

    pub fn log_town_interrupted(&self, town: &str) {
        self.with_state(|state| {
            let log = state.town_mut(town);
            log.status = TownStatus::Interrupted;
            log.end_time = Some(Timestamp::now());
            self.push(state, LogLevel::Warning, format!("Interrupted {town}"));
        });
    }

    pub fn log_industry_progress(&self, town: &str, industry: &str, status: &str) {
        self.with_state(|state| {
            state
                .town_mut(town)
                .industries
                .insert(industry.to_string(), status.to_string());
            self.push(state, LogLevel::Info, format!("{town} / {industry}: {status}"));
        });
    }

    /// Record an error against a town (and optionally one of its industries).
    pub fn log_error(&self, town: &str, industry: Option<&str>, message: &str) {
        self.with_state(|state| {
            let line = match industry {
                Some(industry) => format!("{town} / {industry}: {message}"),
                None => format!("{town}: {message}"),
            };
            match state.towns.iter_mut().find(|t| t.town == town) {
                Some(log) => log.errors.push(line.clone()),
                None => state.general_errors += 1,
            }
            self.push(state, LogLevel::Error, line);
        });
    }

    pub fn log_message(&self, message: &str) {
        self.log(LogLevel::Info, message.to_string());
    }

    pub fn log_success(&self, message: &str) {
        self.log(LogLevel::Success, message.to_string());
    }

    pub fn log_warning(&self, message: &str) {
        self.log(LogLevel::Warning, message.to_string());
    }

    /// Derive the summary from the current ledger.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn summary(&self) -> SessionSummary {
        self.with_state(|state| {
            let finished: Vec<u64> = state.towns.iter().filter_map(TownLog::duration_ms).collect();
            let average = if finished.is_empty() {
                0
            } else {
                finished.iter().sum::<u64>() / finished.len() as u64
            };

            SessionSummary {
                total_towns: state.towns.len(),
                completed_towns: state
                    .towns
                    .iter()
                    .filter(|t| t.status == TownStatus::Completed)
                    .count(),
                total_businesses: state.towns.iter().map(|t| t.business_count).sum(),
                total_errors: state.towns.iter().map(|t| t.errors.len()).sum::<usize>()
                    + state.general_errors,
                total_duration_ms: Timestamp::now().millis_since(&state.session_start),
                average_town_duration_ms: average,
            }
        })
    }

    /// Reset buffers, ledger and session start.
    pub fn clear(&self) {
        self.with_state(|state| *state = LogState::new());
    }

    /// The display buffer, oldest first.
    #[must_use]
    pub fn display(&self) -> Vec<LogEntry> {
        self.with_state(|state| state.display.iter().cloned().collect())
    }

    /// The last `n` entries of the history, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.with_state(|state| {
            let skip = state.history.len().saturating_sub(n);
            state.history[skip..].to_vec()
        })
    }

    /// Every entry since the last `clear`.
    #[must_use]
    pub fn history(&self) -> Vec<LogEntry> {
        self.with_state(|state| state.history.clone())
    }

    #[must_use]
    pub fn town_logs(&self) -> Vec<TownLog> {
        self.with_state(|state| state.towns.clone())
    }

    #[must_use]
    pub fn town_log(&self, town: &str) -> Option<TownLog> {
        self.with_state(|state| state.towns.iter().find(|t| t.town == town).cloned())
    }

    /// The full history as plain text, one line per entry.
    #[must_use]
    pub fn export_text(&self) -> String {
        let mut out = String::new();
        for entry in self.history() {
            let _ = writeln!(
                out,
                "[{}] {:<7} {}",
                entry.timestamp.to_rfc3339(),
                entry.level.as_str().to_uppercase(),
                entry.message
            );
        }
        out
    }
}

impl Default for LoggingManager {
    fn default() -> Self {
        Self::new()
    }
}
