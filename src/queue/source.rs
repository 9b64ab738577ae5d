//! Queue source contract consumed by the worker pool

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue directory {} is locked by another process (is a worker running?)", .0.display())]
    Locked(PathBuf),

    #[error("Unknown delivery tag: {0}")]
    UnknownDelivery(DeliveryTag),

    #[error("Queue '{0}' is already being consumed")]
    AlreadyConsuming(String),

    #[error("Queue '{0}' is closed")]
    Closed(String),

    #[error("Acknowledgment rejected: {0}")]
    AckRejected(String),

    #[error("Invalid sequence number")]
    InvalidSequence,
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Acknowledgment handle bound to a single message instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One message instance handed out by a [`QueueSource`]
///
/// Deliveries are intentionally not `Clone`: exactly one task owns a
/// delivery and acknowledges it through its tag.
#[derive(Debug)]
pub struct Delivery {
    tag: DeliveryTag,
    payload: Bytes,
    redelivered: bool,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
            redelivered: false,
        }
    }

    /// Mark the delivery as a repeat of a message that was never acknowledged
    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub fn tag(&self) -> DeliveryTag {
        self.tag
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn into_parts(self) -> (DeliveryTag, Bytes) {
        (self.tag, self.payload)
    }
}

/// Stream of deliveries; yields `None` once the source disconnects or closes
pub type DeliveryStream = mpsc::Receiver<Delivery>;

/// A channel-like producer of inbound messages
///
/// The worker pool only ever calls [`consume`](QueueSource::consume) and
/// [`ack`](QueueSource::ack). [`close`](QueueSource::close) belongs to the
/// owner of the source, who calls it once the pool has fully stopped.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Queue name, used for logging
    fn name(&self) -> &str;

    /// Open the delivery stream
    async fn consume(&self) -> Result<DeliveryStream>;

    /// Acknowledge a successfully processed delivery
    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    /// Release the underlying connection; ends any open delivery stream
    async fn close(&self) -> Result<()>;
}
