use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::info;

use super::{AnyError, MessageProcessor, ProcessorError};

/// Accepts any JSON payload and logs a short summary of it
///
/// Payloads that are not valid JSON count as processing failures.
#[derive(Debug, Clone, Default)]
pub struct LogProcessor;

impl LogProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageProcessor for LogProcessor {
    async fn process(&self, payload: Bytes) -> Result<(), AnyError> {
        let value: Value = serde_json::from_slice(&payload).map_err(ProcessorError::from)?;

        match &value {
            Value::Object(fields) => {
                let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
                info!(size = payload.len(), fields = ?keys, "Processed message");
            }
            Value::Array(items) => {
                info!(size = payload.len(), items = items.len(), "Processed message");
            }
            other => {
                info!(size = payload.len(), value = %other, "Processed message");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepts_json_object() {
        let processor = LogProcessor::new();
        let payload = Bytes::from(r#"{"description":"rent","amount":1200}"#);

        assert!(processor.process(payload).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_invalid_json() {
        let processor = LogProcessor::new();
        let err = processor
            .process(Bytes::from("not json"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not valid JSON"));
    }
}
