use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "DEBTWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/debtwatch.toml";
const ENV_PREFIX: &str = "DEBTWATCH";
const ENV_SEPARATOR: &str = "__";
const API_URL_ENV_VAR: &str = "API_URL";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    apply_endpoint_fallback(&mut config, env::var(API_URL_ENV_VAR).ok());

    Ok(config)
}

/// The downstream URL is commonly provided as plain `API_URL`; it only
/// fills the endpoint when nothing more specific was configured.
fn apply_endpoint_fallback(config: &mut Config, api_url: Option<String>) {
    if config.processor.endpoint.is_none() {
        config.processor.endpoint = api_url.filter(|url| !url.is_empty());
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // DEBTWATCH__WORKER__CONCURRENCY -> worker.concurrency
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
