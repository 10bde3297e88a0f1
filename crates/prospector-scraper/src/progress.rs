//! Run progress counters, percentage and ETA.

use crate::control::RunStatus;
use crate::events::ProgressEvent;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Town durations the ETA is averaged over.
const ETA_WINDOW: usize = 5;

/// Run-scoped counters, owned by the completion handler.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_towns: usize,
    pub completed_towns: usize,
    pub total_industries: usize,
    pub completed_industries: usize,
    pub records_scraped: usize,
    pub started_at: Instant,
    durations: VecDeque<Duration>,
    last_percentage: f64,
}

impl ProgressState {
    #[must_use]
    pub fn new(total_towns: usize, industries_per_town: usize) -> Self {
        Self {
            total_towns,
            completed_towns: 0,
            total_industries: total_towns * industries_per_town,
            completed_industries: 0,
            records_scraped: 0,
            started_at: Instant::now(),
            durations: VecDeque::with_capacity(ETA_WINDOW),
            last_percentage: 0.0,
        }
    }

    /// Account for one finished town, whatever its outcome.
    pub fn record_town(&mut self, duration: Duration, industries: usize, records_total: usize) {
        self.completed_towns = (self.completed_towns + 1).min(self.total_towns);
        self.completed_industries = (self.completed_industries + industries).min(self.total_industries);
        self.records_scraped = records_total;
        if self.durations.len() == ETA_WINDOW {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
    }

    #[must_use]
    pub fn towns_remaining(&self) -> usize {
        self.total_towns - self.completed_towns
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_towns == self.total_towns
    }

    /// Percentage of towns done; exactly 100 once every town is accounted for.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f64 {
        if self.total_towns == 0 || self.is_complete() {
            return 100.0;
        }
        (self.completed_towns as f64 / self.total_towns as f64) * 100.0
    }

    /// Moving average of recent town durations times the towns left.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn estimated_remaining(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let average = self.durations.iter().sum::<Duration>() / self.durations.len() as u32;
        average * self.towns_remaining() as u32
    }

    /// Build the event for the current state. The reported percentage never
    /// goes backwards.
    #[allow(clippy::cast_possible_truncation)]
    pub fn snapshot(&mut self, status: RunStatus) -> ProgressEvent {
        self.last_percentage = self.last_percentage.max(self.percentage());
        ProgressEvent {
            percentage: self.last_percentage,
            completed_towns: self.completed_towns,
            total_towns: self.total_towns,
            towns_remaining: self.towns_remaining(),
            records_scraped: self.records_scraped,
            estimated_time_ms: self.estimated_remaining().as_millis() as u64,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_reaches_exactly_100() {
        let mut progress = ProgressState::new(3, 2);
        let mut seen = Vec::new();
        for total in [5, 10, 15] {
            progress.record_town(Duration::from_secs(1), 2, total);
            seen.push(progress.snapshot(RunStatus::Running));
        }

        assert!(seen.windows(2).all(|w| w[0].percentage <= w[1].percentage));
        let last = seen.last().unwrap();
        assert!((last.percentage - 100.0).abs() < f64::EPSILON);
        assert_eq!(last.towns_remaining, 0);
        assert_eq!(last.records_scraped, 15);
        assert_eq!(progress.completed_industries, 6);
    }

    #[test]
    fn test_eta_uses_moving_average() {
        let mut progress = ProgressState::new(10, 1);
        progress.record_town(Duration::from_secs(2), 1, 0);
        progress.record_town(Duration::from_secs(4), 1, 0);

        // average 3s, 8 towns left
        assert_eq!(progress.estimated_remaining(), Duration::from_secs(24));

        for _ in 0..5 {
            progress.record_town(Duration::from_secs(1), 1, 0);
        }
        assert_eq!(progress.estimated_remaining(), Duration::from_secs(3));
    }

    #[test]
    fn test_no_towns_is_complete() {
        let mut progress = ProgressState::new(0, 4);
        let event = progress.snapshot(RunStatus::Running);
        assert!((event.percentage - 100.0).abs() < f64::EPSILON);
        assert_eq!(event.estimated_time_ms, 0);
    }

    #[test]
    fn test_extra_reports_are_clamped() {
        let mut progress = ProgressState::new(1, 1);
        progress.record_town(Duration::from_secs(1), 1, 3);
        progress.record_town(Duration::from_secs(1), 1, 3);
        assert_eq!(progress.completed_towns, 1);
        assert_eq!(progress.towns_remaining(), 0);
    }
}
