//! Observability: pool counters and tracing subscriber setup

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, TelemetryConfig};

/// Counters shared between the dispatcher and its tasks
#[derive(Debug, Default)]
pub struct PoolMetrics {
    dispatched: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
    ack_failed: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        tracing::trace!(counter = "dispatched", in_flight = now, "Metric incremented");
    }

    pub fn task_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn message_acked(&self) {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(counter = "acknowledged", "Metric incremented");
    }

    pub fn processing_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(counter = "failed", "Metric incremented");
    }

    pub fn ack_failed(&self) {
        self.ack_failed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(counter = "ack_failed", "Metric incremented");
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::SeqCst),
            acknowledged: self.acknowledged.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            ack_failed: self.ack_failed.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub dispatched: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub ack_failed: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `telemetry.log_level` when set.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
