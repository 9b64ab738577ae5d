use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::observability::{MetricsSnapshot, PoolMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Running,
    Draining,
    Stopped,
}

/// Why the pool left `Running`; the first trigger wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    StreamClosed,
    StopRequested,
    ProcessingFailed,
    AckFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::StreamClosed => "delivery stream closed",
            StopReason::StopRequested => "stop requested",
            StopReason::ProcessingFailed => "message processing failed",
            StopReason::AckFailed => "acknowledgment failed",
        };
        f.write_str(text)
    }
}

/// Summary returned by [`WorkerPool::start`](super::WorkerPool::start)
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub pool_id: Uuid,
    pub reason: StopReason,
    pub dispatched: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub ack_failed: u64,
    pub peak_in_flight: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl PoolReport {
    /// True when the pool stopped without any message failing
    pub fn is_clean(&self) -> bool {
        matches!(
            self.reason,
            StopReason::StreamClosed | StopReason::StopRequested
        )
    }
}

/// State shared by the pool, its dispatched tasks and every [`PoolHandle`]
pub(crate) struct Shared {
    pub(crate) pool_id: Uuid,
    state: watch::Sender<PoolState>,
    reason: OnceLock<StopReason>,
    pub(crate) metrics: PoolMetrics,
}

impl Shared {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(PoolState::Running);
        Self {
            pool_id: Uuid::now_v7(),
            state,
            reason: OnceLock::new(),
            metrics: PoolMetrics::new(),
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PoolState> {
        self.state.subscribe()
    }

    pub(crate) fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Move `Running` → `Draining`; returns true only for the call that did it
    pub(crate) fn request_stop(&self, reason: StopReason) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state != PoolState::Running {
                return false;
            }
            *state = PoolState::Draining;
            // Recorded under the channel lock so observers of Draining see it
            let _ = self.reason.set(reason);
            true
        });

        if transitioned {
            info!(pool_id = %self.pool_id, %reason, "Worker pool draining");
        }
        transitioned
    }

    /// Move `Draining` → `Stopped`
    pub(crate) fn mark_stopped(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state != PoolState::Draining {
                return false;
            }
            *state = PoolState::Stopped;
            true
        })
    }
}

/// Cloneable handle for stopping and observing a pool from other tasks
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl PoolHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Request a stop; non-blocking and idempotent
    ///
    /// Returns true for the single call that moved the pool out of `Running`.
    pub fn stop(&self) -> bool {
        self.shared.request_stop(StopReason::StopRequested)
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    pub fn pool_id(&self) -> Uuid {
        self.shared.pool_id
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Resolve once the pool has fully drained
    pub async fn wait_stopped(&self) {
        let mut state = self.shared.subscribe();
        // The sender lives in `shared`, which this handle keeps alive
        let _ = state.wait_for(|s| *s == PoolState::Stopped).await;
    }
}
