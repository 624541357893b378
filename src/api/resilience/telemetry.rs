//! Telemetry events emitted by the transport, the platform client and the sync layer
//!
//! Components hold an `Arc<dyn TelemetrySink>` that defaults to [`NoopSink`].

use crate::correlation::CorrelationId;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// One retry scheduled by the resilient transport
#[derive(Debug, Clone, Serialize)]
pub struct RetryAttemptEvent {
    pub target: String,
    pub method: String,
    /// 1-based number of the attempt that failed
    pub attempt: u32,
    pub next_delay: Duration,
    pub status_code: Option<u16>,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitEventKind {
    /// The breaker moved from `previous` to `current`
    Transition,
    /// A call was refused without being sent; `previous == current`
    Rejected,
}

/// Breaker state change or short-circuited call
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStateChangeEvent {
    pub kind: CircuitEventKind,
    pub previous: CircuitState,
    pub current: CircuitState,
    pub failure_rate: f64,
    pub window_size: u32,
    pub correlation_id: CorrelationId,
}

/// One semantic call made by the platform client
#[derive(Debug, Clone, Serialize)]
pub struct ApiCallEvent {
    pub method: String,
    pub endpoint: String,
    pub duration: Duration,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_category: Option<String>,
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncLifecyclePhase {
    Started,
    Completed,
    Failed,
}

/// Start/end of an orchestrated sync flow
#[derive(Debug, Clone, Serialize)]
pub struct SyncLifecycleEvent {
    pub flow: String,
    pub phase: SyncLifecyclePhase,
    pub processed: usize,
    pub errors: usize,
    pub message: Option<String>,
    pub correlation_id: CorrelationId,
}

/// Structured telemetry sink
pub trait TelemetrySink: Send + Sync {
    fn retry_attempt(&self, _event: &RetryAttemptEvent) {}

    fn circuit_state_changed(&self, _event: &CircuitStateChangeEvent) {}

    fn api_call(&self, _event: &ApiCallEvent) {}

    fn sync_lifecycle(&self, _event: &SyncLifecycleEvent) {}
}

/// Sink that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {}

/// Forwards every event to each inner sink in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TelemetrySink for FanoutSink {
    fn retry_attempt(&self, event: &RetryAttemptEvent) {
        self.sinks.iter().for_each(|sink| sink.retry_attempt(event));
    }

    fn circuit_state_changed(&self, event: &CircuitStateChangeEvent) {
        self.sinks.iter().for_each(|sink| sink.circuit_state_changed(event));
    }

    fn api_call(&self, event: &ApiCallEvent) {
        self.sinks.iter().for_each(|sink| sink.api_call(event));
    }

    fn sync_lifecycle(&self, event: &SyncLifecycleEvent) {
        self.sinks.iter().for_each(|sink| sink.sync_lifecycle(event));
    }
}

/// Default sink handle
pub fn noop() -> Arc<dyn TelemetrySink> {
    Arc::new(NoopSink)
}
