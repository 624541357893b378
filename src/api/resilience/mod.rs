//! Resilience layer for outbound platform calls
//!
//! Provides retry classification and backoff, circuit breaking, rate limiting
//! and the telemetry sinks the transport reports through.

pub mod circuit_breaker;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod telemetry;

pub use circuit_breaker::{BreakerOpen, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
pub use config::{LogLevel, MonitoringConfig, RateLimitConfig, ResilienceConfig, ResilienceConfigBuilder};
pub use logging::LoggingSink;
pub use metrics::{EndpointMetrics, GlobalMetrics, MetricsCollector, MetricsSnapshot};
pub use rate_limiter::{RateLimiter, RateLimiterStats};
pub use retry::{RetryConfig, RetryableError, is_retryable_status};
pub use telemetry::{
    ApiCallEvent, CircuitEventKind, CircuitState, CircuitStateChangeEvent, FanoutSink, NoopSink,
    RetryAttemptEvent, SyncLifecycleEvent, SyncLifecyclePhase, TelemetrySink,
};
