//! Structured logging of telemetry events
//!
//! Every event is rendered as a single-line JSON object carrying the
//! correlation id, so one sync pass can be followed across retries, breaker
//! transitions and API calls with a plain `grep`.

use super::config::{LogLevel, MonitoringConfig};
use super::telemetry::{
    ApiCallEvent, CircuitEventKind, CircuitState, CircuitStateChangeEvent, RetryAttemptEvent,
    SyncLifecycleEvent, SyncLifecyclePhase, TelemetrySink,
};
use log::{debug, error, info, warn};
use serde_json::json;
use std::collections::HashMap;

/// Telemetry sink writing JSON lines through the `log` facade
#[derive(Debug, Clone)]
pub struct LoggingSink {
    config: MonitoringConfig,
}

impl LoggingSink {
    pub fn new(config: MonitoringConfig) -> Self {
        Self { config }
    }

    /// Log an outgoing request with sensitive headers redacted
    pub fn log_request(&self, method: &str, url: &str, headers: &[(String, String)], correlation_id: &str) {
        if !self.config.request_logging || !self.should_log(LogLevel::Debug) {
            return;
        }

        let log_data = json!({
            "event": "http_request",
            "correlation_id": correlation_id,
            "method": method,
            "url": url,
            "headers": sanitize_headers(headers),
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        debug!("HTTP Request: {}", log_data);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level <= self.config.log_level
    }
}

impl TelemetrySink for LoggingSink {
    fn retry_attempt(&self, event: &RetryAttemptEvent) {
        if !self.should_log(LogLevel::Warn) {
            return;
        }

        let log_data = json!({
            "event": "retry_attempt",
            "correlation_id": event.correlation_id,
            "target": event.target,
            "method": event.method,
            "attempt": event.attempt,
            "next_delay_ms": event.next_delay.as_millis() as u64,
            "status_code": event.status_code,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });
        warn!("Retry Attempt: {}", log_data);
    }

    fn circuit_state_changed(&self, event: &CircuitStateChangeEvent) {
        let level = match (event.kind, event.current) {
            (CircuitEventKind::Rejected, _) => LogLevel::Debug,
            (CircuitEventKind::Transition, CircuitState::Open) => LogLevel::Error,
            (CircuitEventKind::Transition, _) => LogLevel::Info,
        };
        if !self.should_log(level) {
            return;
        }

        let log_data = json!({
            "event": match event.kind {
                CircuitEventKind::Transition => "circuit_state_change",
                CircuitEventKind::Rejected => "circuit_rejected",
            },
            "correlation_id": event.correlation_id,
            "previous": event.previous.to_string(),
            "current": event.current.to_string(),
            "failure_rate": event.failure_rate,
            "window_size": event.window_size,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        match level {
            LogLevel::Error => error!("Circuit Breaker: {}", log_data),
            LogLevel::Info => info!("Circuit Breaker: {}", log_data),
            _ => debug!("Circuit Breaker: {}", log_data),
        }
    }

    fn api_call(&self, event: &ApiCallEvent) {
        if !self.config.performance_metrics {
            return;
        }
        let level = if event.success { LogLevel::Info } else { LogLevel::Error };
        if !self.should_log(level) {
            return;
        }

        let log_data = json!({
            "event": "api_call",
            "correlation_id": event.correlation_id,
            "method": event.method,
            "endpoint": event.endpoint,
            "duration_ms": event.duration.as_millis() as u64,
            "success": event.success,
            "status_code": event.status_code,
            "error_category": event.error_category,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        if event.success {
            info!("API Call Completed: {}", log_data);
        } else {
            error!("API Call Failed: {}", log_data);
        }
    }

    fn sync_lifecycle(&self, event: &SyncLifecycleEvent) {
        let level = match event.phase {
            SyncLifecyclePhase::Failed => LogLevel::Error,
            _ => LogLevel::Info,
        };
        if !self.should_log(level) {
            return;
        }

        let log_data = json!({
            "event": "sync_lifecycle",
            "correlation_id": event.correlation_id,
            "flow": event.flow,
            "phase": format!("{:?}", event.phase),
            "processed": event.processed,
            "errors": event.errors,
            "message": event.message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        });

        match event.phase {
            SyncLifecyclePhase::Failed => error!("Sync: {}", log_data),
            _ => info!("Sync: {}", log_data),
        }
    }
}

/// Redact values of authorization/token/key headers
pub fn sanitize_headers(headers: &[(String, String)]) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| {
            let key_lower = key.to_lowercase();
            if key_lower.contains("authorization") || key_lower.contains("token") || key_lower.contains("key") {
                (key.clone(), "[REDACTED]".to_string())
            } else {
                (key.clone(), value.clone())
            }
        })
        .collect()
}
