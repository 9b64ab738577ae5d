pub mod config;
pub mod observability;
pub mod pool;
pub mod processors;
pub mod queue;
pub mod server;

pub use pool::{PoolConfig, PoolHandle, PoolReport, PoolState, StopReason, WorkerPool};
pub use processors::{AnyError, MessageProcessor};
pub use queue::{Delivery, DeliveryTag, QueueSource};
