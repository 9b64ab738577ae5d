//! HTTP client forwarding payloads to a downstream endpoint

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AnyError, MessageProcessor, ProcessorError};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: "debtwatch/0.1.0".to_string(),
        }
    }
}

/// POSTs each payload as JSON to a fixed endpoint
///
/// One attempt per message: a transport error, timeout or non-2xx status
/// is reported as a processing failure and left to queue redelivery.
pub struct HttpForwardProcessor {
    client: Client,
    endpoint: String,
}

impl HttpForwardProcessor {
    /// Create a new forwarding processor
    pub fn new(endpoint: &str, config: HttpConfig) -> Result<Self, ProcessorError> {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ProcessorError::InvalidEndpoint(endpoint.to_string()));
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ProcessorError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn forward(&self, payload: Bytes) -> Result<(), ProcessorError> {
        let size = payload.len();
        debug!(endpoint = %self.endpoint, size, "Forwarding message");

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProcessorError::Timeout
                } else {
                    ProcessorError::RequestFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint = %self.endpoint, status = status.as_u16(), "Downstream rejected message");
            return Err(ProcessorError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(endpoint = %self.endpoint, size, status = status.as_u16(), "Message forwarded");
        Ok(())
    }
}

#[async_trait]
impl MessageProcessor for HttpForwardProcessor {
    async fn process(&self, payload: Bytes) -> Result<(), AnyError> {
        Ok(self.forward(payload).await?)
    }
}
