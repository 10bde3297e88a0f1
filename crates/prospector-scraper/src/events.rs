//! Events reported by a run and the sinks that consume them.

use crate::control::RunStatus;
use crate::logging::{LogEntry, SessionSummary};
use prospector_core::BusinessRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Emitted after every town completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// 0 to 100, non-decreasing within a run
    pub percentage: f64,
    pub completed_towns: usize,
    pub total_towns: usize,
    pub towns_remaining: usize,
    pub records_scraped: usize,
    pub estimated_time_ms: u64,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteEvent {
    pub records: Vec<BusinessRecord>,
    pub summary: SessionSummary,
    /// The run ended through `stop()`
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// Any event, tagged for transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScrapeEvent {
    Progress(ProgressEvent),
    Log(LogEntry),
    Complete(CompleteEvent),
    Error(ErrorEvent),
}

/// Receiver of run events. Callbacks must not block.
pub trait EventSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
    fn on_log(&self, entry: &LogEntry);
    fn on_complete(&self, event: &CompleteEvent);
    fn on_error(&self, event: &ErrorEvent);
}

/// Forwards every event into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ScrapeEvent>,
}

impl ChannelEventSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScrapeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ScrapeEvent) {
        // Receiver gone means nobody is listening
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelEventSink {
    fn on_progress(&self, event: &ProgressEvent) {
        self.send(ScrapeEvent::Progress(event.clone()));
    }

    fn on_log(&self, entry: &LogEntry) {
        self.send(ScrapeEvent::Log(entry.clone()));
    }

    fn on_complete(&self, event: &CompleteEvent) {
        self.send(ScrapeEvent::Complete(event.clone()));
    }

    fn on_error(&self, event: &ErrorEvent) {
        self.send(ScrapeEvent::Error(event.clone()));
    }
}

/// Writes progress and outcome events to `tracing`.
///
/// Log entries are skipped since `LoggingManager` already mirrors them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn on_progress(&self, event: &ProgressEvent) {
        info!(
            percentage = format_args!("{:.1}", event.percentage),
            towns_remaining = event.towns_remaining,
            records = event.records_scraped,
            eta_ms = event.estimated_time_ms,
            "progress"
        );
    }

    fn on_log(&self, _entry: &LogEntry) {}

    fn on_complete(&self, event: &CompleteEvent) {
        info!(
            records = event.records.len(),
            completed_towns = event.summary.completed_towns,
            errors = event.summary.total_errors,
            stopped = event.stopped,
            "run complete"
        );
    }

    fn on_error(&self, event: &ErrorEvent) {
        error!(message = %event.message, "run failed");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn on_progress(&self, _event: &ProgressEvent) {}
    fn on_log(&self, _entry: &LogEntry) {}
    fn on_complete(&self, _event: &CompleteEvent) {}
    fn on_error(&self, _event: &ErrorEvent) {}
}
