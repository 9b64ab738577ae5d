use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::pool::{AckFailurePolicy, PoolConfig};

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Maximum number of messages processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub ack_failure: AckFailurePolicy,
}

impl WorkerConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_inflight_tasks: self.concurrency,
            ack_failure: self.ack_failure,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            ack_failure: AckFailurePolicy::default(),
        }
    }
}

fn default_concurrency() -> usize {
    10
}

/// Durable queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,
    /// Deliveries buffered between the queue feeder and the pool
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            path: default_queue_path(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_queue_name() -> String {
    "debts".to_string()
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_channel_capacity() -> usize {
    64
}

/// Built-in processing function selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    #[default]
    Log,
    Http,
}

/// Processor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub kind: ProcessorKind,
    /// Downstream URL for the `http` processor (falls back to `API_URL`)
    pub endpoint: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            kind: ProcessorKind::default(),
            endpoint: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Health endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: default_server_enabled(),
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_server_enabled() -> bool {
    true
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.worker.concurrency, 10);
        assert_eq!(config.worker.ack_failure, AckFailurePolicy::LogAndContinue);
        assert_eq!(config.queue.name, "debts");
        assert_eq!(config.processor.kind, ProcessorKind::Log);
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.telemetry.log_format, LogFormat::Text);
    }

    #[test]
    fn test_pool_config_from_worker_section() {
        let config: Config = toml::from_str(
            r#"
[worker]
concurrency = 3
ack_failure = "stop"
            "#,
        )
        .unwrap();

        let pool = config.worker.pool_config();
        assert_eq!(pool.max_inflight_tasks, 3);
        assert_eq!(pool.ack_failure, AckFailurePolicy::Stop);
    }
}
