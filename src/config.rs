use crate::api::resilience::LogLevel;
use crate::api::{ResilienceConfig, RetryConfig};
use crate::sync::RetryQueueConfig;
use crate::sync::orchestrator::MIN_AUTO_SYNC_INTERVAL;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_API_KEY: &str = "SHOPSYNC_API_KEY";
pub const ENV_BASE_URL: &str = "SHOPSYNC_BASE_URL";
pub const ENV_DATABASE: &str = "SHOPSYNC_DATABASE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformSettings,
    #[serde(default)]
    pub resilience: ResilienceSettings,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Whether the platform accepts an `updated_since` filter on list calls
    pub supports_changed_since: bool,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub backoff_secs: Vec<u64>,
    pub jitter_ratio: f64,
    pub failure_rate_threshold: f64,
    pub window_secs: u64,
    pub open_duration_secs: u64,
    pub half_open_max_calls: u32,
    pub minimum_throughput: u32,
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
    pub rate_limit_enabled: bool,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub database_path: PathBuf,
    /// Periodic full sync for `run`; unset disables it
    pub auto_sync_interval_secs: Option<u64>,
    pub retry_worker_interval_secs: u64,
    pub retry_batch_size: u32,
    pub max_retries: u32,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            supports_changed_since: true,
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        let resilience = ResilienceConfig::default();
        Self {
            backoff_secs: resilience.retry.backoff_delays.iter().map(Duration::as_secs).collect(),
            jitter_ratio: resilience.retry.jitter_ratio,
            failure_rate_threshold: resilience.circuit_breaker.failure_rate_threshold,
            window_secs: resilience.circuit_breaker.sampling_window.as_secs(),
            open_duration_secs: resilience.circuit_breaker.open_duration.as_secs(),
            half_open_max_calls: resilience.circuit_breaker.half_open_max_calls,
            minimum_throughput: resilience.circuit_breaker.minimum_throughput,
            requests_per_minute: resilience.rate_limit.requests_per_minute,
            burst_capacity: resilience.rate_limit.burst_capacity,
            rate_limit_enabled: resilience.rate_limit.enabled,
            log_level: resilience.monitoring.log_level,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        let queue = RetryQueueConfig::default();
        Self {
            database_path: default_data_dir().join("shopsync.db"),
            auto_sync_interval_secs: None,
            retry_worker_interval_secs: queue.worker_interval.as_secs(),
            retry_batch_size: queue.batch_size,
            max_retries: queue.max_retries,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("shopsync"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("shopsync").join("config.toml"))
    }

    /// Load from `path` (or the default location), then apply `.env` and
    /// environment overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!("Loaded environment from {:?}", env_file);
        }

        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };
        let mut config = Self::load_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        debug!("Loading config from: {:?}", path);
        if !path.exists() {
            info!("Config file {:?} doesn't exist, using defaults", path);
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {:?}", path))?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Environment values win over the file
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(api_key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.platform.api_key = Some(api_key);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.platform.base_url = base_url;
        }
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            self.sync.database_path = PathBuf::from(database);
        }
    }

    pub fn resilience_config(&self) -> ResilienceConfig {
        let r = &self.resilience;
        ResilienceConfig::builder()
            .retry_config(RetryConfig {
                backoff_delays: r.backoff_secs.iter().copied().map(Duration::from_secs).collect(),
                jitter_ratio: r.jitter_ratio,
            })
            .failure_rate_threshold(r.failure_rate_threshold)
            .sampling_window(Duration::from_secs(r.window_secs))
            .open_duration(Duration::from_secs(r.open_duration_secs))
            .half_open_max_calls(r.half_open_max_calls)
            .minimum_throughput(r.minimum_throughput)
            .rate_limit_config(crate::api::resilience::RateLimitConfig {
                requests_per_minute: r.requests_per_minute,
                burst_capacity: r.burst_capacity,
                enabled: r.rate_limit_enabled,
            })
            .log_level(r.log_level)
            .build()
    }

    pub fn retry_queue_config(&self) -> RetryQueueConfig {
        RetryQueueConfig {
            max_retries: self.sync.max_retries,
            batch_size: self.sync.retry_batch_size,
            worker_interval: Duration::from_secs(self.sync.retry_worker_interval_secs),
            backoff: self.resilience_config().retry,
        }
    }

    /// Configured auto-sync interval, floored at the orchestrator minimum
    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.sync
            .auto_sync_interval_secs
            .map(|secs| Duration::from_secs(secs).max(MIN_AUTO_SYNC_INTERVAL))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.platform.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.platform.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [platform]
            base_url = "https://shop.example.com"

            [resilience]
            backoff_secs = [1, 3]
            jitter_ratio = 0.9

            [sync]
            auto_sync_interval_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.platform.base_url, "https://shop.example.com");
        assert!(config.platform.supports_changed_since);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.retry_batch_size, 100);
        assert_eq!(config.sync.retry_worker_interval_secs, 300);

        let resilience = config.resilience_config();
        assert_eq!(resilience.retry.max_attempts(), 3);
        assert_eq!(resilience.retry.effective_jitter_ratio(), 0.5);
        assert_eq!(config.auto_sync_interval(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_KEY, "secret"),
            (ENV_BASE_URL, "https://override.example.com"),
            (ENV_DATABASE, ""),
        ]);
        let before = config.sync.database_path.clone();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.platform.api_key.as_deref(), Some("secret"));
        assert_eq!(config.platform.base_url, "https://override.example.com");
        assert_eq!(config.sync.database_path, before);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.sync.max_retries = 7;
        config.resilience.log_level = LogLevel::Debug;

        config.save(&path).unwrap();
        let loaded = Config::load_file(&path).unwrap();
        assert_eq!(loaded.sync.max_retries, 7);
        assert_eq!(loaded.resilience.log_level, LogLevel::Debug);

        let missing = Config::load_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(missing.sync.max_retries, 5);
    }
}
