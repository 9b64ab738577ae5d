use super::models::{Config, ProcessorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("worker.concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("queue.name must not be empty")]
    EmptyQueueName,

    #[error("queue.channel_capacity must be at least 1")]
    ZeroChannelCapacity,

    #[error("processor.endpoint (or API_URL) is required when processor.kind = \"http\"")]
    MissingEndpoint,

    #[error("Invalid processor endpoint scheme '{scheme}', expected 'http://' or 'https://'")]
    InvalidEndpointScheme { scheme: String },

    #[error("Timeout must be positive: {field}")]
    ZeroTimeout { field: &'static str },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_worker(config)?;
    validate_queue(config)?;
    validate_processor(config)?;
    Ok(())
}

/// A zero ceiling is rejected here rather than normalized at runtime
fn validate_worker(config: &Config) -> Result<(), ValidationError> {
    if config.worker.concurrency == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    Ok(())
}

fn validate_queue(config: &Config) -> Result<(), ValidationError> {
    if config.queue.name.trim().is_empty() {
        return Err(ValidationError::EmptyQueueName);
    }
    if config.queue.channel_capacity == 0 {
        return Err(ValidationError::ZeroChannelCapacity);
    }
    Ok(())
}

fn validate_processor(config: &Config) -> Result<(), ValidationError> {
    let processor = &config.processor;

    if processor.connect_timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout {
            field: "processor.connect_timeout_ms",
        });
    }
    if processor.request_timeout_ms == 0 {
        return Err(ValidationError::ZeroTimeout {
            field: "processor.request_timeout_ms",
        });
    }

    if processor.kind == ProcessorKind::Http {
        let endpoint = processor
            .endpoint
            .as_deref()
            .ok_or(ValidationError::MissingEndpoint)?;

        let scheme = endpoint.split("://").next().unwrap_or_default();
        if !endpoint.contains("://") || !matches!(scheme, "http" | "https") {
            return Err(ValidationError::InvalidEndpointScheme {
                scheme: scheme.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.worker.concurrency = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroConcurrency)
        ));
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let mut config = Config::default();
        config.queue.channel_capacity = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroChannelCapacity)
        ));
    }

    #[test]
    fn test_blank_queue_name_rejected() {
        let mut config = Config::default();
        config.queue.name = "  ".to_string();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyQueueName)
        ));
    }

    #[test]
    fn test_http_processor_requires_endpoint() {
        let mut config = Config::default();
        config.processor.kind = ProcessorKind::Http;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::MissingEndpoint)
        ));
    }

    #[test]
    fn test_http_processor_rejects_bad_scheme() {
        let mut config = Config::default();
        config.processor.kind = ProcessorKind::Http;
        config.processor.endpoint = Some("amqp://rabbit:5672".to_string());

        match validate(&config) {
            Err(ValidationError::InvalidEndpointScheme { scheme }) => assert_eq!(scheme, "amqp"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_http_processor_accepts_https() {
        let mut config = Config::default();
        config.processor.kind = ProcessorKind::Http;
        config.processor.endpoint = Some("https://api.example.com/debts".to_string());

        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.processor.request_timeout_ms = 0;

        assert!(matches!(
            validate(&config),
            Err(ValidationError::ZeroTimeout { field: "processor.request_timeout_ms" })
        ));
    }
}
