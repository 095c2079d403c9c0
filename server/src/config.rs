use std::{env, path::Path, time::Duration};

use alloy::primitives::Address;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use validator_executors::TrackerConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub nonce_store: NonceStoreConfig,
    #[serde(default)]
    pub tracker: TrackerSettings,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NonceStoreBackendKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NonceStoreConfig {
    pub backend: NonceStoreBackendKind,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
    pub min_block_chain_depth: u64,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stuck_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub rpc_timeout: Duration,
}

/// One tracked wallet on one chain.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    pub wallet_address: Address,
    /// Overrides `tracker.min_block_chain_depth` for this chain
    #[serde(default)]
    pub min_block_chain_depth: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".into(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        let defaults = TrackerConfig::default();
        Self {
            check_interval: defaults.check_interval,
            min_block_chain_depth: defaults.min_block_chain_depth,
            stuck_interval: defaults.stuck_interval,
            rpc_timeout: defaults.rpc_timeout,
        }
    }
}

impl TrackerSettings {
    pub fn for_chain(&self, chain: &ChainConfig) -> TrackerConfig {
        TrackerConfig {
            check_interval: self.check_interval,
            min_block_chain_depth: chain
                .min_block_chain_depth
                .unwrap_or(self.min_block_chain_depth),
            stuck_interval: self.stuck_interval,
            rpc_timeout: self.rpc_timeout,
        }
    }
}

/// Loads `server_base.yaml`, then `server_{environment}.yaml` from
/// `configuration_directory`, then `APP__` prefixed environment variables.
pub fn load_config(
    configuration_directory: &Path,
    environment: &Environment,
) -> Result<ValidatorConfig, ConfigError> {
    let environment_filename = format!("server_{}.yaml", environment.as_str());

    Config::builder()
        .add_source(File::from(configuration_directory.join("server_base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)).required(false))
        .add_source(config::Environment::with_prefix("app").separator("__"))
        .build()?
        .try_deserialize::<ValidatorConfig>()
}

pub fn get_config() -> anyhow::Result<ValidatorConfig> {
    let base_path = env::current_dir()?;
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(anyhow::Error::msg)?;

    load_config(&configuration_directory, &environment).map_err(|e| {
        anyhow::anyhow!(
            "Configuration error: {e}. Make sure all required fields are set correctly in your configuration files or environment variables."
        )
    })
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local`, `development`, or `production`."
            )),
        }
    }
}
