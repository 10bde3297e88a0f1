//! Run status shared between the orchestrator and its worker loops.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl RunStatus {
    /// A run is in flight (possibly paused).
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Owner side of the status channel.
///
/// Workers hold receivers: pausing is a gate they await, stopping is a
/// value they check between units of work.
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<RunStatus>>,
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RunStatus::Idle);
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.tx.subscribe()
    }

    fn transition(&self, from: &[RunStatus], to: RunStatus) -> bool {
        self.tx.send_if_modified(|status| {
            if from.contains(status) {
                *status = to;
                true
            } else {
                false
            }
        })
    }

    /// `Idle`/`Stopped` to `Running`. False when a run is already active.
    pub fn begin(&self) -> bool {
        self.transition(&[RunStatus::Idle, RunStatus::Stopped], RunStatus::Running)
    }

    pub fn pause(&self) -> bool {
        self.transition(&[RunStatus::Running], RunStatus::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition(&[RunStatus::Paused], RunStatus::Running)
    }

    pub fn stop(&self) -> bool {
        self.transition(&[RunStatus::Running, RunStatus::Paused], RunStatus::Stopped)
    }

    /// Return an active run to `Idle`. A stopped run stays `Stopped`.
    pub fn finish(&self) -> bool {
        self.transition(&[RunStatus::Running, RunStatus::Paused], RunStatus::Idle)
    }

    /// Force `Idle` after a run died.
    pub fn reset(&self) {
        self.tx.send_replace(RunStatus::Idle);
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait while the run is paused and return the status that released the gate.
///
/// A closed channel reads as `Stopped`.
pub async fn wait_while_paused(rx: &mut watch::Receiver<RunStatus>) -> RunStatus {
    match rx.wait_for(|status| *status != RunStatus::Paused).await {
        Ok(status) => *status,
        Err(_) => RunStatus::Stopped,
    }
}
