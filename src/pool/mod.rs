//! Bounded worker pool consuming a queue source
//!
//! The pool pulls deliveries from a [`QueueSource`](crate::queue::QueueSource),
//! runs at most `max_inflight_tasks` processing functions at once, acknowledges
//! each delivery after its processing function succeeds, and halts on the first
//! failure or stop request.
//!
//! ## Lifecycle
//!
//! ```text
//! Running ──(stream closed | stop() | processing failure)──▶ Draining ──(all tasks done)──▶ Stopped
//! ```
//!
//! [`WorkerPool::start`] resolves only once the pool is `Stopped`, so the
//! caller may close the queue source right after it returns.

mod consumer;
mod state;

pub use consumer::WorkerPool;
pub use state::{PoolHandle, PoolReport, PoolState, StopReason};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueError;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Concurrency ceiling must be between 1 and {max}, got {actual}")]
    InvalidConcurrency { actual: usize, max: usize },

    #[error("Worker pool was already started")]
    AlreadyStarted,

    #[error("Failed to open delivery stream for queue '{queue}': {source}")]
    Source {
        queue: String,
        #[source]
        source: QueueError,
    },
}

/// What to do when the queue source rejects an acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum AckFailurePolicy {
    /// Log the failure and keep consuming
    #[default]
    #[serde(rename = "log")]
    LogAndContinue,
    /// Treat the failure like a processing failure and halt the pool
    #[serde(rename = "stop")]
    Stop,
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_inflight_tasks: usize,
    pub ack_failure: AckFailurePolicy,
}

impl PoolConfig {
    pub fn with_concurrency(max_inflight_tasks: usize) -> Self {
        Self {
            max_inflight_tasks,
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_inflight_tasks: 10,
            ack_failure: AckFailurePolicy::LogAndContinue,
        }
    }
}
