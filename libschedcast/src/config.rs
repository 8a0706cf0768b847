//! Configuration management for Schedcast

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub retry: RetryConfig,
    pub publish: PublishConfig,
    pub notifications: NotificationConfig,
    pub api: ApiConfig,
    pub platforms: HashMap<Platform, PlatformEndpoint>,
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/schedcast/schedcast.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub tick_interval_secs: u64,
    /// Upper bound on posts claimed per tick
    pub batch_size: u32,
    /// Publishes in flight across all platforms
    pub max_concurrent: usize,
    /// Optional tighter limit per platform
    pub platform_concurrency: HashMap<Platform, usize>,
    pub shutdown_grace_secs: u64,
    /// A `publishing` claim older than this is considered abandoned
    pub stale_after_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            batch_size: 50,
            max_concurrent: 8,
            platform_concurrency: HashMap::new(),
            shutdown_grace_secs: 30,
            stale_after_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub platforms: HashMap<Platform, RetryOverride>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 30,
            max_delay_secs: 3600,
            platforms: HashMap::new(),
        }
    }
}

/// Per-platform retry settings; unset fields fall back to `[retry]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryOverride {
    pub max_attempts: Option<u32>,
    pub base_delay_secs: Option<u64>,
    pub max_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Hard timeout on a single adapter call
    pub timeout_secs: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Buffered events per subscriber before the oldest are dropped
    pub channel_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Where an adapter sends its requests. Mostly useful for pointing at a
/// sandbox or a self-hosted site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformEndpoint {
    pub base_url: Option<String>,
}

/// A platform connection known to this deployment. The credential itself is
/// referenced by the name of the environment variable holding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    pub owner_id: String,
    pub platform: Platform,
    pub account_name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub credential_env: String,
    /// Platform-side account/page id, where the API needs one in the path
    #[serde(default)]
    pub account_ref: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay_secs == 0 {
            return Err(invalid("retry.base_delay_secs", "must be at least 1"));
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            return Err(invalid(
                "retry.max_delay_secs",
                "must not be smaller than retry.base_delay_secs",
            ));
        }
        for (platform, over) in &self.retry.platforms {
            if over.max_attempts == Some(0) {
                return Err(invalid(
                    &format!("retry.platforms.{}.max_attempts", platform),
                    "must be at least 1",
                ));
            }
        }
        if self.dispatcher.batch_size == 0 {
            return Err(invalid("dispatcher.batch_size", "must be at least 1"));
        }
        if self.dispatcher.max_concurrent == 0 {
            return Err(invalid("dispatcher.max_concurrent", "must be at least 1"));
        }
        if self.dispatcher.tick_interval_secs == 0 {
            return Err(invalid("dispatcher.tick_interval_secs", "must be at least 1"));
        }
        if self.publish.timeout_secs == 0 {
            return Err(invalid("publish.timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    pub fn base_url(&self, platform: Platform) -> Option<&str> {
        self.platforms
            .get(&platform)
            .and_then(|endpoint| endpoint.base_url.as_deref())
    }
}

fn invalid(field: &str, reason: &str) -> crate::error::SchedcastError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Resolve the configuration file path following the XDG Base Directory layout
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SCHEDCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("schedcast").join("config.toml"))
}
