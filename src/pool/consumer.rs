use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::state::{PoolHandle, PoolReport, PoolState, Shared, StopReason};
use super::{AckFailurePolicy, PoolConfig, PoolError};
use crate::observability::MetricsSnapshot;
use crate::processors::MessageProcessor;
use crate::queue::{Delivery, DeliveryStream, QueueSource};

/// Consumes a queue source with bounded parallelism
///
/// Architecture:
/// 1. A single dispatcher loop acquires an admission permit, then pulls the next delivery
/// 2. Each delivery runs in its own tokio task holding that permit
/// 3. Success acknowledges the delivery; failure stops the pool and leaves it unacknowledged
/// 4. Once the loop exits, the pool waits for every task before reporting `Stopped`
///
/// Permits are acquired *before* reading from the stream, so a saturated
/// pool leaves messages in the source instead of buffering them here.
pub struct WorkerPool {
    source: Arc<dyn QueueSource>,
    processor: Arc<dyn MessageProcessor>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    shared: Arc<Shared>,
    started: AtomicBool,
}

impl WorkerPool {
    /// Create a pool; rejects a concurrency ceiling of zero
    pub fn new(
        source: Arc<dyn QueueSource>,
        processor: Arc<dyn MessageProcessor>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let ceiling = config.max_inflight_tasks;
        if ceiling == 0 || ceiling > Semaphore::MAX_PERMITS {
            return Err(PoolError::InvalidConcurrency {
                actual: ceiling,
                max: Semaphore::MAX_PERMITS,
            });
        }

        Ok(Self {
            source,
            processor,
            semaphore: Arc::new(Semaphore::new(ceiling)),
            config,
            shared: Arc::new(Shared::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle::new(Arc::clone(&self.shared))
    }

    /// Request a stop; see [`PoolHandle::stop`]
    pub fn stop(&self) -> bool {
        self.handle().stop()
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Admission permits currently free; equals the ceiling when idle
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Consume until the pool fully stops
    ///
    /// Resolves after the stream closes, [`stop`](Self::stop) is called, or a
    /// processing function fails, and never while a dispatched task is still
    /// running. Dropping the returned future aborts in-flight tasks.
    pub async fn start(&self) -> Result<PoolReport, PoolError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PoolError::AlreadyStarted);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let queue = self.source.name().to_string();

        info!(
            pool_id = %self.shared.pool_id,
            queue = %queue,
            max_inflight_tasks = self.config.max_inflight_tasks,
            "Starting worker pool"
        );

        let mut tasks = JoinSet::new();

        if self.state() == PoolState::Running {
            let deliveries = match self.source.consume().await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    error!(pool_id = %self.shared.pool_id, queue = %queue, error = %e, "Failed to open delivery stream");
                    self.shared.request_stop(StopReason::StreamClosed);
                    self.shared.mark_stopped();
                    return Err(PoolError::Source { queue, source: e });
                }
            };
            self.dispatch(deliveries, &mut tasks).await;
        } else {
            debug!(pool_id = %self.shared.pool_id, "Stop requested before start, nothing to consume");
        }

        self.drain(&mut tasks).await;
        self.shared.mark_stopped();

        let metrics = self.shared.metrics.snapshot();
        let report = PoolReport {
            pool_id: self.shared.pool_id,
            reason: self.shared.reason().unwrap_or(StopReason::StreamClosed),
            dispatched: metrics.dispatched,
            acknowledged: metrics.acknowledged,
            failed: metrics.failed,
            ack_failed: metrics.ack_failed,
            peak_in_flight: metrics.peak_in_flight,
            started_at,
            elapsed: clock.elapsed(),
        };

        info!(
            pool_id = %report.pool_id,
            queue = %queue,
            reason = %report.reason,
            dispatched = report.dispatched,
            acknowledged = report.acknowledged,
            failed = report.failed,
            ack_failed = report.ack_failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Worker pool stopped"
        );

        Ok(report)
    }

    /// Receive loop; returns once the pool leaves `Running`
    async fn dispatch(&self, mut deliveries: DeliveryStream, tasks: &mut JoinSet<()>) {
        let mut state = self.shared.subscribe();

        loop {
            while let Some(result) = tasks.try_join_next() {
                self.reap(result);
            }

            let permit = tokio::select! {
                biased;
                _ = state.wait_for(|s| *s != PoolState::Running) => break,
                permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let delivery = tokio::select! {
                biased;
                _ = state.wait_for(|s| *s != PoolState::Running) => break,
                next = deliveries.recv() => match next {
                    Some(delivery) => delivery,
                    None => {
                        info!(pool_id = %self.shared.pool_id, "Delivery stream closed");
                        self.shared.request_stop(StopReason::StreamClosed);
                        break;
                    }
                },
            };

            // A failure may have landed while we were waiting on the stream
            if *state.borrow() != PoolState::Running {
                debug!(tag = %delivery.tag(), "Pool stopping, leaving delivery unacknowledged");
                break;
            }

            self.spawn_task(delivery, permit, tasks);
        }
    }

    fn spawn_task(&self, delivery: Delivery, permit: OwnedSemaphorePermit, tasks: &mut JoinSet<()>) {
        let guard = TaskGuard::new(permit, Arc::clone(&self.shared));
        let source = Arc::clone(&self.source);
        let processor = Arc::clone(&self.processor);
        let shared = Arc::clone(&self.shared);
        let ack_failure = self.config.ack_failure;

        if delivery.is_redelivered() {
            debug!(tag = %delivery.tag(), "Processing redelivered message");
        }

        tasks.spawn(async move {
            let _guard = guard;
            let (tag, payload) = delivery.into_parts();

            if let Err(e) = processor.process(payload).await {
                shared.metrics.processing_failed();
                error!(
                    pool_id = %shared.pool_id,
                    queue = source.name(),
                    %tag,
                    error = %e,
                    "Failed to process message, stopping worker pool"
                );
                shared.request_stop(StopReason::ProcessingFailed);
                return;
            }

            match source.ack(tag).await {
                Ok(()) => shared.metrics.message_acked(),
                Err(e) => {
                    shared.metrics.ack_failed();
                    match ack_failure {
                        AckFailurePolicy::LogAndContinue => {
                            warn!(queue = source.name(), %tag, error = %e, "Failed to acknowledge message");
                        }
                        AckFailurePolicy::Stop => {
                            error!(queue = source.name(), %tag, error = %e, "Failed to acknowledge message, stopping worker pool");
                            shared.request_stop(StopReason::AckFailed);
                        }
                    }
                }
            }
        });
    }

    /// Wait for every dispatched task to finish
    async fn drain(&self, tasks: &mut JoinSet<()>) {
        let in_flight = self.shared.metrics.in_flight();
        if in_flight > 0 {
            info!(pool_id = %self.shared.pool_id, in_flight, "Draining in-flight tasks");
        }

        while let Some(result) = tasks.join_next().await {
            self.reap(result);
        }
    }

    fn reap(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                error!(pool_id = %self.shared.pool_id, error = %e, "Processing task panicked");
            } else {
                warn!(pool_id = %self.shared.pool_id, error = %e, "Processing task cancelled");
            }
        }
    }
}

/// Holds one admission permit for the lifetime of a task
///
/// Dropping the guard releases the permit and the in-flight slot on every
/// path, including a panic inside the processing function, which also stops
/// the pool.
struct TaskGuard {
    _permit: OwnedSemaphorePermit,
    shared: Arc<Shared>,
}

impl TaskGuard {
    fn new(permit: OwnedSemaphorePermit, shared: Arc<Shared>) -> Self {
        shared.metrics.task_dispatched();
        Self {
            _permit: permit,
            shared,
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.shared.metrics.processing_failed();
            self.shared.request_stop(StopReason::ProcessingFailed);
        }
        self.shared.metrics.task_finished();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::AnyError;
    use crate::queue::MemoryQueue;
    use bytes::Bytes;

    fn noop_processor() -> Arc<dyn MessageProcessor> {
        Arc::new(|_payload: Bytes| async { Ok::<(), AnyError>(()) })
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let queue = Arc::new(MemoryQueue::new("test", 4));
        let result = WorkerPool::new(queue, noop_processor(), PoolConfig::with_concurrency(0));

        assert!(matches!(
            result,
            Err(PoolError::InvalidConcurrency { actual: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let queue = Arc::new(MemoryQueue::new("test", 4));
        queue.close().await.unwrap();

        let pool = WorkerPool::new(queue, noop_processor(), PoolConfig::with_concurrency(2)).unwrap();
        pool.start().await.unwrap();

        assert!(matches!(pool.start().await, Err(PoolError::AlreadyStarted)));
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_before_start_skips_consumption() {
        let queue = Arc::new(MemoryQueue::new("test", 4));
        queue.publish("never processed").await.unwrap();

        let pool = WorkerPool::new(queue.clone(), noop_processor(), PoolConfig::default()).unwrap();
        assert!(pool.stop());

        let report = pool.start().await.unwrap();
        assert_eq!(report.reason, StopReason::StopRequested);
        assert_eq!(report.dispatched, 0);
        assert_eq!(queue.unacked().await.len(), 1);
    }

    #[tokio::test]
    async fn test_source_failure_is_reported() {
        let queue = Arc::new(MemoryQueue::new("test", 4));
        // Steal the stream so the pool cannot open it
        let _stream = queue.consume().await.unwrap();

        let pool = WorkerPool::new(queue, noop_processor(), PoolConfig::default()).unwrap();
        let result = pool.start().await;

        assert!(matches!(result, Err(PoolError::Source { .. })));
        assert_eq!(pool.state(), PoolState::Stopped);
    }
}
