//! Processing functions run by the worker pool
//!
//! The pool only sees [`MessageProcessor`]: it hands over a payload and
//! learns whether processing succeeded. Any async closure
//! `Fn(Bytes) -> Future<Output = Result<(), AnyError>>` is a processor too.
//!
//! ## Example
//!
//! ```rust,ignore
//! use debtwatch::processors::{AnyError, MessageProcessor};
//!
//! let processor = |payload: Bytes| async move {
//!     tracing::info!(size = payload.len(), "Got message");
//!     Ok::<(), AnyError>(())
//! };
//! ```

mod http;
mod log;

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::{ProcessorConfig, ProcessorKind};

pub use self::http::{HttpConfig, HttpForwardProcessor};
pub use self::log::LogProcessor;

pub type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Downstream rejected message: HTTP {status}")]
    Rejected { status: u16 },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// A side-effecting operation applied to one message payload
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// `Ok(())` acknowledges the message, `Err` halts the pool
    async fn process(&self, payload: Bytes) -> Result<(), AnyError>;
}

#[async_trait]
impl<F, Fut> MessageProcessor for F
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AnyError>> + Send + 'static,
{
    async fn process(&self, payload: Bytes) -> Result<(), AnyError> {
        (self)(payload).await
    }
}

/// Build the processor selected by configuration
pub fn build_processor(
    config: &ProcessorConfig,
) -> Result<Arc<dyn MessageProcessor>, ProcessorError> {
    match config.kind {
        ProcessorKind::Log => Ok(Arc::new(LogProcessor::new())),
        ProcessorKind::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                ProcessorError::InvalidEndpoint("processor.endpoint is not set".to_string())
            })?;
            let http_config = HttpConfig {
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                request_timeout: Duration::from_millis(config.request_timeout_ms),
                ..HttpConfig::default()
            };
            let processor = HttpForwardProcessor::new(endpoint, http_config)?;
            info!(endpoint = processor.endpoint(), "Forwarding messages over HTTP");
            Ok(Arc::new(processor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_is_a_processor() {
        let processor: Arc<dyn MessageProcessor> = Arc::new(|payload: Bytes| async move {
            if payload.is_empty() {
                return Err(AnyError::from("empty payload"));
            }
            Ok(())
        });

        assert!(processor.process(Bytes::from("x")).await.is_ok());
        assert!(processor.process(Bytes::new()).await.is_err());
    }

    #[test]
    fn test_build_http_without_endpoint_fails() {
        let config = ProcessorConfig {
            kind: ProcessorKind::Http,
            endpoint: None,
            ..ProcessorConfig::default()
        };

        assert!(matches!(
            build_processor(&config),
            Err(ProcessorError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_build_http_processor_keeps_endpoint() {
        let processor = HttpForwardProcessor::new(
            "http://localhost:3000/api/v1/debts",
            HttpConfig::default(),
        )
        .unwrap();
        assert_eq!(processor.endpoint(), "http://localhost:3000/api/v1/debts");

        let config = ProcessorConfig {
            kind: ProcessorKind::Http,
            endpoint: Some("http://localhost:3000/api/v1/debts".to_string()),
            ..ProcessorConfig::default()
        };
        assert!(build_processor(&config).is_ok());
    }

    #[test]
    fn test_build_log_processor() {
        assert!(build_processor(&ProcessorConfig::default()).is_ok());
    }
}
