//! Engine configuration
//!
//! Loaded from YAML. Every section has defaults, so an empty file (or no file at the
//! default location) yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::sync::RetryPolicy;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV: &str = "OFFSYNC_CONFIG";

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub remote: RemoteConfig,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub background: BackgroundConfig,
    pub store: StoreConfig,
}

/// How a 401 that survives a token refresh is treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthExpiryPolicy {
    /// Count it as a retriable failure
    #[default]
    Retry,
    /// Move the action to FAILED immediately
    Fail,
}

/// Remote API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL that relative action endpoints are joined onto
    pub base_url: String,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Header carrying the action id; `None` disables idempotency tokens
    pub idempotency_header: Option<String>,

    /// Bearer token attached to every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    pub auth_expiry: AuthExpiryPolicy,

    /// Request rate per resource once the server has answered 429
    pub rate_limit_per_second: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 30,
            idempotency_header: Some("Idempotency-Key".to_string()),
            api_token: None,
            auth_expiry: AuthExpiryPolicy::default(),
            rate_limit_per_second: 6,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Pending action queue settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of unconfirmed actions held at once
    pub capacity: usize,

    /// Retry budget for actions enqueued without one
    pub default_max_retries: u32,

    /// How long SYNCED actions are kept for auditing
    pub synced_retention_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            default_max_retries: 5,
            synced_retention_secs: 24 * 60 * 60,
        }
    }
}

/// Backoff settings; combined with the queue retry budget into a `RetryPolicy`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 2_000,
            backoff_cap_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Interval of the expired-entry sweep
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Quiet period before a connectivity change is acted upon
    pub debounce_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { debounce_ms: 1_500 }
    }
}

impl NetworkConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Interval between background sync wakes
    pub interval_secs: u64,

    /// Execution budget granted to one background wake
    pub budget_secs: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15 * 60,
            budget_secs: 30,
        }
    }
}

impl BackgroundConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; defaults to the platform data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl EngineConfig {
    /// Get the default config file path (~/.config/offsync/config.yaml on Linux)
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join("offsync").join("config.yaml"))
    }

    /// Resolve the config path: explicit path, then `OFFSYNC_CONFIG`, then the default
    pub fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(p)),
            None => match std::env::var(CONFIG_ENV) {
                Ok(p) if !p.is_empty() => Ok(PathBuf::from(p)),
                _ => Self::default_path(),
            },
        }
    }

    /// Load configuration.
    ///
    /// An explicitly named file must exist; a missing file at the default location
    /// yields the default configuration.
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        let explicit = path.is_some() || std::env::var(CONFIG_ENV).is_ok_and(|p| !p.is_empty());
        let resolved = Self::resolve_path(path)?;

        if !resolved.exists() && !explicit {
            log::debug!("No config at {}, using defaults", resolved.display());
            return Ok(Self::default());
        }

        Self::load_from(&resolved)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: EngineConfig = if contents.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(contents).map_err(ConfigError::from)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self).map_err(ConfigError::from)?)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be at least 1".to_string()).into());
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::Invalid("remote.timeout_secs must be positive".to_string()).into());
        }
        if self.remote.rate_limit_per_second == 0 {
            return Err(ConfigError::Invalid(
                "remote.rate_limit_per_second must be positive".to_string(),
            )
            .into());
        }
        if self.retry.backoff_base_ms > self.retry.backoff_cap_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_base_ms ({}) exceeds retry.backoff_cap_ms ({})",
                self.retry.backoff_base_ms, self.retry.backoff_cap_ms
            ))
            .into());
        }
        if self.background.interval_secs == 0 || self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("intervals must be positive".to_string()).into());
        }
        if self.background.budget_secs == 0 {
            return Err(ConfigError::Invalid("background.budget_secs must be positive".to_string()).into());
        }
        Ok(())
    }

    /// The retry policy consumed by the sync coordinator
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.queue.default_max_retries,
            backoff_base: Duration::from_millis(self.retry.backoff_base_ms),
            backoff_cap: Duration::from_millis(self.retry.backoff_cap_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.queue.capacity, 200);
        assert_eq!(config.queue.default_max_retries, 5);
        assert_eq!(
            config.remote.idempotency_header.as_deref(),
            Some("Idempotency-Key")
        );
        assert_eq!(config.remote.auth_expiry, AuthExpiryPolicy::Retry);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = EngineConfig::from_yaml("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let config = EngineConfig::from_yaml(
            "queue:\n  capacity: 100\nremote:\n  base_url: https://api.example.com\n  auth_expiry: fail\n",
        )
        .unwrap();

        assert_eq!(config.queue.capacity, 100);
        assert_eq!(config.queue.default_max_retries, 5);
        assert_eq!(config.remote.base_url, "https://api.example.com");
        assert_eq!(config.remote.auth_expiry, AuthExpiryPolicy::Fail);
        assert_eq!(config.remote.timeout_secs, 30);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = EngineConfig::from_yaml("queue:\n  capacity: 0\n").unwrap_err();
        assert!(err.to_string().contains("queue.capacity"));
    }

    #[test]
    fn test_backoff_base_above_cap_rejected() {
        let err = EngineConfig::from_yaml("retry:\n  backoff_base_ms: 10\n  backoff_cap_ms: 5\n")
            .unwrap_err();
        assert!(err.to_string().contains("backoff_base_ms"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = EngineConfig::from_yaml(
            "queue:\n  default_max_retries: 3\nretry:\n  backoff_base_ms: 100\n  backoff_cap_ms: 1000\n",
        )
        .unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_base, Duration::from_millis(100));
        assert_eq!(policy.backoff_cap, Duration::from_millis(1000));
    }

    #[test]
    fn test_load_from_missing_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.yaml");
        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("nope.yaml"));
    }

    #[test]
    fn test_yaml_roundtrip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = EngineConfig::default();
        config.queue.capacity = 42;
        config.store.path = Some(dir.path().join("db.sqlite"));
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

        let loaded = EngineConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
