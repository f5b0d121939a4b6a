//! Server configuration
//!
//! Loaded from a YAML file named by the `MINSTREL_CONFIG` environment
//! variable, falling back to `./minstrel.yaml`, falling back to built-in
//! defaults when neither exists. Every field carries a serde default so a
//! partial file only overrides what it names.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

const CONFIG_ENV_VAR: &str = "MINSTREL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "minstrel.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Socket address the HTTP server listens on
    pub bind_addr: String,
    /// Resolution cache bound
    pub cache_max_entries: usize,
    /// Resolution cache entry lifetime
    pub cache_ttl_secs: u64,
    /// Per-request timeout for provider calls
    pub resolve_timeout_secs: u64,
    /// Cobalt instance base URLs; empty means the built-in list
    pub cobalt_instances: Vec<String>,
    /// User-agent pool for the relay; empty means the built-in pool
    pub user_agents: Vec<String>,
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelaySettings {
    pub max_attempts: u32,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            cache_max_entries: 100,
            cache_ttl_secs: 1800,
            resolve_timeout_secs: 15,
            cobalt_instances: Vec::new(),
            user_agents: Vec::new(),
            relay: RelaySettings::default(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            connect_timeout_secs: 10,
            read_timeout_secs: 20,
        }
    }
}

impl Config {
    /// Load from `$MINSTREL_CONFIG`, `./minstrel.yaml`, or defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::from_file(&path),
            Err(_) => {
                if Path::new(DEFAULT_CONFIG_PATH).exists() {
                    Self::from_file(DEFAULT_CONFIG_PATH)
                } else {
                    tracing::info!("no config file found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        tracing::info!("loaded config from {}", path);
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn relay_config(&self) -> mstrelay::RelayConfig {
        mstrelay::RelayConfig {
            max_attempts: self.relay.max_attempts,
            connect_timeout: Duration::from_secs(self.relay.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.relay.read_timeout_secs),
            ..mstrelay::RelayConfig::default()
        }
    }
}
