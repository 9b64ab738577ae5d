//! Configuration management for debtwatch
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use debtwatch::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Consuming queue: {}", config.queue.name);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `DEBTWATCH__<section>__<key>`
//!
//! Examples:
//! - `DEBTWATCH__WORKER__CONCURRENCY=20`
//! - `DEBTWATCH__PROCESSOR__KIND=http`
//! - `DEBTWATCH__SERVER__BIND_ADDR=0.0.0.0:9000`
//!
//! `API_URL` is honoured as the HTTP processor endpoint when none is configured.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/debtwatch.toml`.
//! This can be overridden using the `DEBTWATCH_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    Config, LogFormat, ProcessorConfig, ProcessorKind, QueueConfig, ServerConfig,
    TelemetryConfig, WorkerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or
    /// validation fails (zero concurrency, missing HTTP endpoint, ...).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
