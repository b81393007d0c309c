// Configuration management with layered configuration (defaults, file, env)
// Connection strings are not here: they come from DATABASE_URI_<NAME>, see resolver.rs

use crate::errors::ConfigError;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub lifecycle: LifecycleConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Pool defaults applied to every database unless overridden per database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Extra attempts when opening a connection at runtime (not at startup)
    pub connect_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub shutdown_grace_period_ms: u64,
}

impl LifecycleConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Built-in defaults so an empty config directory still loads
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port", "must be greater than 0"));
        }

        if self.pool.max_connections == 0 {
            return Err(invalid("pool.max_connections", "must be greater than 0"));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(invalid(
                "pool.min_connections",
                format!(
                    "{} exceeds max_connections {}",
                    self.pool.min_connections, self.pool.max_connections
                ),
            ));
        }
        if self.pool.acquire_timeout_ms == 0 {
            return Err(invalid("pool.acquire_timeout_ms", "must be greater than 0"));
        }
        if self.pool.connect_timeout_ms == 0 {
            return Err(invalid("pool.connect_timeout_ms", "must be greater than 0"));
        }

        if self.lifecycle.shutdown_grace_period_ms == 0 {
            return Err(invalid(
                "lifecycle.shutdown_grace_period_ms",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid(variable: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidFormat {
        variable: variable.to_string(),
        reason: reason.into(),
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            pool: PoolConfig {
                max_connections: 10,
                min_connections: 1,
                acquire_timeout_ms: 5_000,
                connect_timeout_ms: 10_000,
                connect_retries: 2,
                retry_base_delay_ms: 100,
            },
            lifecycle: LifecycleConfig {
                shutdown_grace_period_ms: 10_000,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: false,
                metrics_port: None,
            },
        }
    }
}
