//! Resilience configuration with builder pattern
//!
//! Provides a unified configuration for retry policies, circuit breaking,
//! rate limiting and monitoring with sane defaults.

use super::circuit_breaker::CircuitBreakerConfig;
use super::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global resilience configuration for outbound platform calls
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_capacity: u32,
    pub enabled: bool,
}

/// Monitoring and logging configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub request_logging: bool,
    pub performance_metrics: bool,
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 120, // 2 req/s, the common leaky-bucket allowance
            burst_capacity: 40,
            enabled: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            request_logging: true,
            performance_metrics: true,
            log_level: LogLevel::Info,
        }
    }
}

impl ResilienceConfig {
    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Conservative config for production environments
    pub fn conservative() -> Self {
        Self {
            retry: RetryConfig::conservative(),
            circuit_breaker: CircuitBreakerConfig {
                failure_rate_threshold: 0.4,
                open_duration: Duration::from_secs(300),
                ..CircuitBreakerConfig::default()
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: 60,
                burst_capacity: 10,
                enabled: true,
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Warn,
                ..MonitoringConfig::default()
            },
        }
    }

    /// Aggressive config for development/testing
    pub fn development() -> Self {
        Self {
            retry: RetryConfig::aggressive(),
            circuit_breaker: CircuitBreakerConfig {
                open_duration: Duration::from_secs(15),
                ..CircuitBreakerConfig::default()
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: 600,
                burst_capacity: 100,
                enabled: false,
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Debug,
                ..MonitoringConfig::default()
            },
        }
    }

    /// Disable all resilience features (for testing)
    pub fn disabled() -> Self {
        Self {
            retry: RetryConfig::none(),
            circuit_breaker: CircuitBreakerConfig {
                enabled: false,
                ..CircuitBreakerConfig::default()
            },
            rate_limit: RateLimitConfig {
                requests_per_minute: u32::MAX,
                burst_capacity: u32::MAX,
                enabled: false,
            },
            monitoring: MonitoringConfig {
                request_logging: false,
                performance_metrics: false,
                log_level: LogLevel::Error,
            },
        }
    }
}

/// Builder for ResilienceConfig
#[derive(Debug, Default)]
pub struct ResilienceConfigBuilder {
    config: ResilienceConfig,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Replace the backoff schedule
    pub fn backoff(mut self, delays: Vec<Duration>) -> Self {
        self.config.retry.backoff_delays = delays;
        self
    }

    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.config.retry.jitter_ratio = ratio;
        self
    }

    pub fn circuit_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = breaker;
        self
    }

    pub fn failure_rate_threshold(mut self, threshold: f64) -> Self {
        self.config.circuit_breaker.failure_rate_threshold = threshold;
        self
    }

    pub fn sampling_window(mut self, window: Duration) -> Self {
        self.config.circuit_breaker.sampling_window = window;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.circuit_breaker.open_duration = duration;
        self
    }

    pub fn half_open_max_calls(mut self, calls: u32) -> Self {
        self.config.circuit_breaker.half_open_max_calls = calls;
        self
    }

    pub fn minimum_throughput(mut self, calls: u32) -> Self {
        self.config.circuit_breaker.minimum_throughput = calls;
        self
    }

    pub fn rate_limit_config(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.config.rate_limit.requests_per_minute = rpm;
        self
    }

    pub fn enable_rate_limiting(mut self, enabled: bool) -> Self {
        self.config.rate_limit.enabled = enabled;
        self
    }

    pub fn monitoring_config(mut self, monitoring: MonitoringConfig) -> Self {
        self.config.monitoring = monitoring;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.monitoring.log_level = level;
        self
    }

    pub fn build(self) -> ResilienceConfig {
        self.config
    }
}
