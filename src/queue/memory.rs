use super::source::{Delivery, DeliveryStream, DeliveryTag, QueueError, QueueSource, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// In-process queue source backed by a bounded tokio channel
///
/// Architecture:
/// 1. `publish` assigns the next delivery tag and records the payload as outstanding
/// 2. The delivery is pushed into a bounded mpsc channel (blocks when full = backpressure)
/// 3. `consume` hands the receiving half to exactly one consumer
/// 4. `ack` removes the payload from the outstanding set
/// 5. `close` drops the sending half, so the stream ends after buffered deliveries
///
/// Whatever is still outstanding after the consumer stops is what a broker
/// would redeliver; see [`MemoryQueue::unacked`].
pub struct MemoryQueue {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Delivery>>>,
    receiver: Mutex<Option<mpsc::Receiver<Delivery>>>,
    outstanding: Mutex<BTreeMap<DeliveryTag, Bytes>>,
    next_tag: AtomicU64,
    acked: AtomicUsize,
}

impl MemoryQueue {
    /// Create a queue whose channel buffers up to `capacity` deliveries
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        info!(queue = %name, capacity, "Created in-memory queue");

        Self {
            name,
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            outstanding: Mutex::new(BTreeMap::new()),
            next_tag: AtomicU64::new(1),
            acked: AtomicUsize::new(0),
        }
    }

    /// Publish a message and return its delivery tag
    ///
    /// Waits for channel capacity when the buffer is full.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> Result<DeliveryTag> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| QueueError::Closed(self.name.clone()))?;

        let tag = DeliveryTag(self.next_tag.fetch_add(1, Ordering::SeqCst));
        let payload = payload.into();
        self.outstanding.lock().await.insert(tag, payload.clone());

        if sender.send(Delivery::new(tag, payload)).await.is_err() {
            // Consumer went away, nothing will ever read this delivery
            self.outstanding.lock().await.remove(&tag);
            return Err(QueueError::Closed(self.name.clone()));
        }

        debug!(queue = %self.name, %tag, "Message published");
        Ok(tag)
    }

    /// Payloads published but never acknowledged, in publish order
    pub async fn unacked(&self) -> Vec<Bytes> {
        self.outstanding.lock().await.values().cloned().collect()
    }

    /// Number of successful acknowledgments so far
    pub fn ack_count(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueSource for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        self.receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| QueueError::AlreadyConsuming(self.name.clone()))
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        match self.outstanding.lock().await.remove(&tag) {
            Some(_) => {
                self.acked.fetch_add(1, Ordering::SeqCst);
                debug!(queue = %self.name, %tag, "Delivery acknowledged");
                Ok(())
            }
            None => Err(QueueError::UnknownDelivery(tag)),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.sender.lock().await.take().is_some() {
            info!(queue = %self.name, "In-memory queue closed");
        }
        Ok(())
    }
}
