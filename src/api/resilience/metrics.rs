//! Aggregated call metrics collected from telemetry events
//!
//! Tracks per-endpoint response times, success rates and status codes, plus
//! retry and breaker activity, for the `health` report and periodic dumps.

use super::telemetry::{
    ApiCallEvent, CircuitEventKind, CircuitStateChangeEvent, RetryAttemptEvent, SyncLifecycleEvent,
    SyncLifecyclePhase, TelemetrySink,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Telemetry sink aggregating call metrics in memory
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsCollectorInner>>,
}

#[derive(Debug)]
struct MetricsCollectorInner {
    endpoints: HashMap<String, EndpointMetrics>,
    global: GlobalMetrics,
    start_time: Instant,
}

/// Metrics for one `METHOD endpoint` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub endpoint: String,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub status_codes: HashMap<u16, u64>,
    pub error_categories: HashMap<String, u64>,
}

/// Metrics across all calls
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub retry_attempts: u64,
    pub total_retry_delay: Duration,
    pub circuit_transitions: u64,
    pub short_circuited_calls: u64,
    pub sync_passes: u64,
    pub failed_sync_passes: u64,
    pub uptime: Duration,
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub global: GlobalMetrics,
    pub endpoints: Vec<EndpointMetrics>,
    pub timestamp: String,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsCollectorInner {
                endpoints: HashMap::new(),
                global: GlobalMetrics::default(),
                start_time: Instant::now(),
            })),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap();
        let mut global = inner.global.clone();
        global.uptime = inner.start_time.elapsed();

        let mut endpoints: Vec<_> = inner.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));

        MetricsSnapshot {
            global,
            endpoints,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn endpoint(&self, key: &str) -> Option<EndpointMetrics> {
        self.inner.lock().unwrap().endpoints.get(key).cloned()
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.endpoints.clear();
        inner.global = GlobalMetrics::default();
        inner.start_time = Instant::now();
    }
}

impl TelemetrySink for MetricsCollector {
    fn retry_attempt(&self, event: &RetryAttemptEvent) {
        let mut inner = self.inner.lock().unwrap();
        inner.global.retry_attempts += 1;
        inner.global.total_retry_delay += event.next_delay;
    }

    fn circuit_state_changed(&self, event: &CircuitStateChangeEvent) {
        let mut inner = self.inner.lock().unwrap();
        match event.kind {
            CircuitEventKind::Transition => inner.global.circuit_transitions += 1,
            CircuitEventKind::Rejected => inner.global.short_circuited_calls += 1,
        }
    }

    fn api_call(&self, event: &ApiCallEvent) {
        let mut inner = self.inner.lock().unwrap();
        let key = format!("{} {}", event.method, event.endpoint);
        inner
            .endpoints
            .entry(key.clone())
            .or_insert_with(|| EndpointMetrics::new(&key))
            .record(event);

        inner.global.total_calls += 1;
        if event.success {
            inner.global.successful_calls += 1;
        } else {
            inner.global.failed_calls += 1;
        }
    }

    fn sync_lifecycle(&self, event: &SyncLifecycleEvent) {
        let mut inner = self.inner.lock().unwrap();
        match event.phase {
            SyncLifecyclePhase::Started => {}
            SyncLifecyclePhase::Completed => inner.global.sync_passes += 1,
            SyncLifecyclePhase::Failed => {
                inner.global.sync_passes += 1;
                inner.global.failed_sync_passes += 1;
            }
        }
    }
}

impl EndpointMetrics {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            status_codes: HashMap::new(),
            error_categories: HashMap::new(),
        }
    }

    fn record(&mut self, event: &ApiCallEvent) {
        self.total_calls += 1;
        if event.success {
            self.successful_calls += 1;
        } else {
            self.failed_calls += 1;
        }

        self.total_duration += event.duration;
        self.min_duration = self.min_duration.min(event.duration);
        self.max_duration = self.max_duration.max(event.duration);

        if let Some(status) = event.status_code {
            *self.status_codes.entry(status).or_insert(0) += 1;
        }
        if let Some(category) = &event.error_category {
            *self.error_categories.entry(category.clone()).or_insert(0) += 1;
        }
    }

    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            (self.successful_calls as f64 / self.total_calls as f64) * 100.0
        }
    }

    pub fn average_duration(&self) -> Duration {
        if self.total_calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.total_calls as u32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;

    fn call(endpoint: &str, success: bool, status: u16, millis: u64) -> ApiCallEvent {
        ApiCallEvent {
            method: "GET".to_string(),
            endpoint: endpoint.to_string(),
            duration: Duration::from_millis(millis),
            success,
            status_code: Some(status),
            error_category: (!success).then(|| "Protocol".to_string()),
            correlation_id: CorrelationId::new(),
        }
    }

    #[test]
    fn test_endpoint_aggregation() {
        let collector = MetricsCollector::new();
        collector.api_call(&call("/products", true, 200, 100));
        collector.api_call(&call("/products", true, 200, 300));
        collector.api_call(&call("/products", false, 404, 50));
        collector.api_call(&call("/orders", true, 200, 10));

        let products = collector.endpoint("GET /products").unwrap();
        assert_eq!(products.total_calls, 3);
        assert_eq!(products.failed_calls, 1);
        assert_eq!(products.min_duration, Duration::from_millis(50));
        assert_eq!(products.max_duration, Duration::from_millis(300));
        assert_eq!(products.average_duration(), Duration::from_millis(150));
        assert_eq!(products.status_codes.get(&200), Some(&2));
        assert_eq!(products.error_categories.get("Protocol"), Some(&1));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.global.total_calls, 4);
        assert_eq!(snapshot.endpoints.len(), 2);
        assert_eq!(snapshot.endpoints[0].endpoint, "GET /orders");
    }

    #[test]
    fn test_reset_clears_everything() {
        let collector = MetricsCollector::new();
        collector.api_call(&call("/products", true, 200, 1));
        collector.reset();
        assert_eq!(collector.snapshot().global.total_calls, 0);
        assert!(collector.endpoint("GET /products").is_none());
    }
}
