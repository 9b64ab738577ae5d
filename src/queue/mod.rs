//! Queue sources feeding the worker pool
//!
//! - [`QueueSource`] - the three operations the pool consumes (stream, ack, close)
//! - [`MemoryQueue`] - in-process channel source, used for embedding and tests
//! - [`FjallQueue`] - durable source persisted in a Fjall keyspace

pub mod memory;
pub mod source;
pub mod store;

pub use memory::MemoryQueue;
pub use source::{Delivery, DeliveryStream, DeliveryTag, QueueError, QueueSource};
pub use store::FjallQueue;
