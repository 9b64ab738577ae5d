use super::source::{Delivery, DeliveryStream, DeliveryTag, QueueError, QueueSource, Result};
use async_trait::async_trait;
use bytes::Bytes;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use std::fs::{self, File, TryLockError};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Maximum number of messages read from disk per feeder pass
const FEED_BATCH: usize = 256;

/// Lock file guarding the keyspace directory against a second process
const LOCK_FILE: &str = "debtwatch.lock";

/// FjallQueue is a durable queue source stored in a Fjall keyspace
///
/// Architecture:
/// - `messages` partition: u64 (big-endian) → raw payload bytes
/// - `metadata` partition: "next_seq" → u64 (atomic counter)
/// - `delivered` partition: u64 (big-endian) → empty, set once a message was handed to a consumer
///
/// Publishing persists the payload before returning. Consuming spawns a
/// feeder task that walks the `messages` partition in sequence order and
/// pushes deliveries into a bounded channel, then parks until something new
/// is published. Acknowledging deletes the message, so anything still on
/// disk when the queue is reopened is handed out again.
///
/// Only one process may open a queue directory at a time; a second
/// [`open`](Self::open) fails with [`QueueError::Locked`].
pub struct FjallQueue {
    name: String,
    keyspace: Keyspace,
    messages: PartitionHandle,
    metadata: PartitionHandle,
    delivered: PartitionHandle,
    /// Next sequence number; held across the whole publish so commits land in order
    next_seq: std::sync::Mutex<u64>,
    channel_capacity: usize,
    published: Arc<Notify>,
    closed: watch::Sender<bool>,
    feeder: Mutex<Option<JoinHandle<()>>>,
    /// Released when the queue is dropped
    _lock: File,
}

impl FjallQueue {
    /// Open or create a FjallQueue at the specified path
    pub fn open<P: AsRef<Path>>(
        path: P,
        name: impl Into<String>,
        channel_capacity: usize,
    ) -> Result<Self> {
        let name = name.into();
        let path = path.as_ref();
        info!(queue = %name, "Opening FjallQueue at: {}", path.display());

        let lock = lock_directory(path)?;
        let keyspace = Config::new(path).open()?;

        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;
        let delivered = keyspace.open_partition("delivered", PartitionCreateOptions::default())?;

        // Load the current sequence counter from metadata
        let current_seq = match metadata.get(b"next_seq")? {
            Some(bytes) => decode_seq(&bytes)?,
            None => 0,
        };

        info!(queue = %name, current_seq, "FjallQueue opened");

        let (closed, _) = watch::channel(false);

        Ok(Self {
            name,
            keyspace,
            messages,
            metadata,
            delivered,
            next_seq: std::sync::Mutex::new(current_seq),
            channel_capacity: channel_capacity.max(1),
            published: Arc::new(Notify::new()),
            closed,
            feeder: Mutex::new(None),
            _lock: lock,
        })
    }

    /// Persist a message and return its sequence number
    ///
    /// The payload and the advanced counter are committed in one batch
    /// while the counter is locked, so sequence numbers become visible to
    /// the feeder strictly in order.
    pub fn publish(&self, payload: impl AsRef<[u8]>) -> Result<u64> {
        let mut next_seq = self.next_seq.lock().unwrap_or_else(|e| e.into_inner());
        let seq = *next_seq;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.messages, seq.to_be_bytes(), payload.as_ref());
        batch.insert(&self.metadata, b"next_seq", (seq + 1).to_be_bytes());
        batch.commit()?;

        *next_seq = seq + 1;
        drop(next_seq);

        debug!(queue = %self.name, seq, "Message published");
        self.published.notify_one();

        Ok(seq)
    }

    /// Number of messages not yet acknowledged
    pub fn pending(&self) -> Result<usize> {
        Ok(self.messages.len()?)
    }

    /// Get current sequence counter value
    pub fn current_seq(&self) -> u64 {
        *self.next_seq.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Flush all writes to disk
    pub fn flush(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

/// Take an exclusive advisory lock on `<path>/debtwatch.lock`
fn lock_directory(path: &Path) -> Result<File> {
    fs::create_dir_all(path)?;
    let file = File::options()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path.join(LOCK_FILE))?;

    match file.try_lock() {
        Ok(()) => Ok(file),
        Err(TryLockError::WouldBlock) => Err(QueueError::Locked(path.to_path_buf())),
        Err(TryLockError::Error(e)) => Err(e.into()),
    }
}

#[async_trait]
impl QueueSource for FjallQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&self) -> Result<DeliveryStream> {
        if *self.closed.borrow() {
            return Err(QueueError::Closed(self.name.clone()));
        }

        let mut feeder = self.feeder.lock().await;
        if feeder.is_some() {
            return Err(QueueError::AlreadyConsuming(self.name.clone()));
        }

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let task = Feeder {
            queue: self.name.clone(),
            messages: self.messages.clone(),
            delivered: self.delivered.clone(),
            published: Arc::clone(&self.published),
            closed: self.closed.subscribe(),
            tx,
        };

        *feeder = Some(tokio::spawn(task.run()));
        info!(queue = %self.name, capacity = self.channel_capacity, "Delivery stream opened");

        Ok(rx)
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let key = tag.0.to_be_bytes();

        if self.messages.get(key)?.is_none() {
            return Err(QueueError::UnknownDelivery(tag));
        }

        let mut batch = self.keyspace.batch();
        batch.remove(&self.messages, key);
        batch.remove(&self.delivered, key);
        batch.commit()?;

        debug!(queue = %self.name, %tag, "Delivery acknowledged");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);

        if let Some(handle) = self.feeder.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(queue = %self.name, error = %e, "Feeder task ended abnormally");
            }
        }

        self.flush()?;
        info!(queue = %self.name, "FjallQueue closed");
        Ok(())
    }
}

/// Background task moving persisted messages into the delivery channel
struct Feeder {
    queue: String,
    messages: PartitionHandle,
    delivered: PartitionHandle,
    published: Arc<Notify>,
    closed: watch::Receiver<bool>,
    tx: mpsc::Sender<Delivery>,
}

impl Feeder {
    async fn run(mut self) {
        let mut cursor = 0u64;

        loop {
            let batch = match read_batch(&self.messages, cursor, FEED_BATCH) {
                Ok(batch) => batch,
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Failed to read messages, ending stream");
                    break;
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = self.closed.wait_for(|closed| *closed) => break,
                    _ = self.published.notified() => continue,
                }
            }

            for (seq, payload) in batch {
                cursor = seq + 1;
                let key = seq.to_be_bytes();

                let redelivered = match self.delivered.contains_key(key) {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(queue = %self.queue, seq, error = %e, "Failed to read delivery marker");
                        false
                    }
                };
                let delivery = Delivery::new(DeliveryTag(seq), payload).with_redelivered(redelivered);

                // Marked before the hand-off so an ack can never race ahead of it
                if !redelivered {
                    if let Err(e) = self.delivered.insert(key, [0u8; 0]) {
                        warn!(queue = %self.queue, seq, error = %e, "Failed to record delivery");
                    }
                }

                let handed_off = tokio::select! {
                    biased;
                    _ = self.closed.wait_for(|closed| *closed) => {
                        debug!(queue = %self.queue, "Feeder stopped by close");
                        false
                    }
                    sent = self.tx.send(delivery) => {
                        if sent.is_err() {
                            debug!(queue = %self.queue, "Consumer dropped the delivery stream");
                        }
                        sent.is_ok()
                    }
                };

                if !handed_off {
                    if !redelivered {
                        let _ = self.delivered.remove(key);
                    }
                    return;
                }
            }
        }

        debug!(queue = %self.queue, "Feeder stopped");
    }
}

fn read_batch(messages: &PartitionHandle, from: u64, limit: usize) -> Result<Vec<(u64, Bytes)>> {
    let mut batch = Vec::new();

    for item in messages.range(from.to_be_bytes()..).take(limit) {
        let (key, value) = item?;
        batch.push((decode_seq(&key)?, Bytes::copy_from_slice(&value)));
    }

    Ok(batch)
}

fn decode_seq(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| QueueError::InvalidSequence)?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_and_consume() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();

        let seq1 = queue.publish(b"{\"amount\":1}").unwrap();
        let seq2 = queue.publish(b"{\"amount\":2}").unwrap();
        assert_eq!(seq1, 0);
        assert_eq!(seq2, 1);

        let mut stream = queue.consume().await.unwrap();
        let first = stream.recv().await.unwrap();
        let second = stream.recv().await.unwrap();

        assert_eq!(first.tag(), DeliveryTag(0));
        assert_eq!(first.payload().as_ref(), b"{\"amount\":1}");
        assert_eq!(second.tag(), DeliveryTag(1));
        assert!(!first.is_redelivered());
    }

    #[tokio::test]
    async fn test_publish_while_consuming_wakes_feeder() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();

        let mut stream = queue.consume().await.unwrap();
        queue.publish(b"late").unwrap();

        let delivery = tokio::time::timeout(std::time::Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload().as_ref(), b"late");
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();

        queue.publish(b"a").unwrap();
        queue.publish(b"b").unwrap();
        assert_eq!(queue.pending().unwrap(), 2);

        queue.ack(DeliveryTag(0)).await.unwrap();
        assert_eq!(queue.pending().unwrap(), 1);

        assert!(matches!(
            queue.ack(DeliveryTag(0)).await,
            Err(QueueError::UnknownDelivery(DeliveryTag(0)))
        ));
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();

        queue.publish(b"only").unwrap();
        let mut stream = queue.consume().await.unwrap();
        let _ = stream.recv().await.unwrap();

        queue.close().await.unwrap();
        assert!(stream.recv().await.is_none());
        assert!(matches!(queue.consume().await, Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn test_consume_only_once() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();

        let _stream = queue.consume().await.unwrap();
        assert!(matches!(
            queue.consume().await,
            Err(QueueError::AlreadyConsuming(_))
        ));

        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unacked_messages_redelivered_after_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();
            queue.publish(b"acked").unwrap();
            queue.publish(b"unacked").unwrap();

            let mut stream = queue.consume().await.unwrap();
            let first = stream.recv().await.unwrap();
            let second = stream.recv().await.unwrap();
            assert!(!second.is_redelivered());

            queue.ack(first.tag()).await.unwrap();
            queue.close().await.unwrap();
        }

        // Reopen and check only the unacknowledged message comes back
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();
        assert_eq!(queue.current_seq(), 2);
        assert_eq!(queue.pending().unwrap(), 1);

        let fresh = queue.publish(b"fresh").unwrap();
        assert_eq!(fresh, 2);

        let mut stream = queue.consume().await.unwrap();
        let redelivered = stream.recv().await.unwrap();
        let new = stream.recv().await.unwrap();

        assert_eq!(redelivered.payload().as_ref(), b"unacked");
        assert!(redelivered.is_redelivered());
        assert_eq!(new.payload().as_ref(), b"fresh");
        assert!(!new.is_redelivered());

        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_undelivered_backlog_is_not_flagged_after_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();
            queue.publish(b"queued before the worker started").unwrap();
            queue.close().await.unwrap();
        }

        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();
        let mut stream = queue.consume().await.unwrap();
        let delivery = stream.recv().await.unwrap();

        assert_eq!(delivery.tag(), DeliveryTag(0));
        assert!(!delivery.is_redelivered());

        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_clears_delivery_marker() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();

        queue.publish(b"a").unwrap();
        let mut stream = queue.consume().await.unwrap();
        let delivery = stream.recv().await.unwrap();

        assert!(queue.delivered.contains_key(0u64.to_be_bytes()).unwrap());

        queue.ack(delivery.tag()).await.unwrap();
        assert!(!queue.delivered.contains_key(0u64.to_be_bytes()).unwrap());

        queue.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers_are_all_delivered_in_order() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 300;

        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(FjallQueue::open(temp_dir.path(), "debts", 64).unwrap());
        let mut stream = queue.consume().await.unwrap();

        let publishers: Vec<_> = (0..THREADS)
            .map(|thread| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        queue.publish(format!("{}-{}", thread, i)).unwrap();
                    }
                })
            })
            .collect();

        let total = THREADS * PER_THREAD;
        let mut tags = Vec::with_capacity(total);
        tokio::time::timeout(std::time::Duration::from_secs(30), async {
            while tags.len() < total {
                let delivery = stream.recv().await.unwrap();
                tags.push(delivery.tag().0);
            }
        })
        .await
        .unwrap();

        for publisher in publishers {
            publisher.join().unwrap();
        }

        let expected: Vec<u64> = (0..total as u64).collect();
        assert_eq!(tags, expected);
        assert_eq!(queue.current_seq(), total as u64);

        queue.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_open_of_same_directory_is_locked() {
        let temp_dir = TempDir::new().unwrap();
        let queue = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();

        assert!(matches!(
            FjallQueue::open(temp_dir.path(), "debts", 8),
            Err(QueueError::Locked(_))
        ));

        queue.close().await.unwrap();
        drop(queue);

        // The lock goes away with the queue
        let reopened = FjallQueue::open(temp_dir.path(), "debts", 8).unwrap();
        reopened.close().await.unwrap();
    }
}
