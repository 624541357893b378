//! Sync health tracking for observability

use crate::api::resilience::{CircuitBreaker, CircuitState};
use crate::sync::types::SyncType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Consecutive failed passes after which sync is reported unhealthy
pub const UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowHealth {
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub circuit_state: CircuitState,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub flows: HashMap<String, FlowHealth>,
}

#[derive(Debug, Default)]
struct HealthInner {
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    flows: HashMap<SyncType, FlowHealth>,
}

/// Tracks last success, last failure and consecutive failures per flow,
/// combined with the transport's breaker state
#[derive(Clone)]
pub struct SyncHealthProvider {
    inner: Arc<Mutex<HealthInner>>,
    breaker: Option<CircuitBreaker>,
}

impl SyncHealthProvider {
    pub fn new(breaker: Option<CircuitBreaker>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HealthInner::default())),
            breaker,
        }
    }

    pub fn record_success(&self, sync_type: Option<SyncType>) {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        inner.last_success = Some(now);
        inner.consecutive_failures = 0;
        if let Some(sync_type) = sync_type {
            let flow = inner.flows.entry(sync_type).or_insert_with(FlowHealth::empty);
            flow.last_success = Some(now);
            flow.consecutive_failures = 0;
        }
    }

    pub fn record_failure(&self, sync_type: Option<SyncType>, error: &str) {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure = Some(now);
        inner.consecutive_failures += 1;
        if let Some(sync_type) = sync_type {
            let flow = inner.flows.entry(sync_type).or_insert_with(FlowHealth::empty);
            flow.last_failure = Some(now);
            flow.last_error = Some(error.to_string());
            flow.consecutive_failures += 1;
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let circuit_state = self
            .breaker
            .as_ref()
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed);
        let inner = self.inner.lock().unwrap();

        let status = if circuit_state == CircuitState::Open || inner.consecutive_failures >= UNHEALTHY_AFTER {
            HealthStatus::Unhealthy
        } else if circuit_state == CircuitState::HalfOpen || inner.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            status,
            circuit_state,
            last_success: inner.last_success,
            last_failure: inner.last_failure,
            consecutive_failures: inner.consecutive_failures,
            flows: inner
                .flows
                .iter()
                .map(|(sync_type, flow)| (sync_type.as_str().to_string(), flow.clone()))
                .collect(),
        }
    }
}

impl FlowHealth {
    fn empty() -> Self {
        Self {
            last_success: None,
            last_failure: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}
