//! Failure-rate circuit breaker
//!
//! ```text
//! Closed   -> Open:     window total >= minimum throughput and failure rate >= threshold
//! Open     -> HalfOpen: first call after `open_until`
//! HalfOpen -> Closed:   `half_open_max_calls` trial successes in a row
//! HalfOpen -> Open:     first trial failure
//! ```
//!
//! All state lives behind one mutex; every read-modify-write of the window
//! counters and the state enum happens inside a single critical section.
//! While HalfOpen only one trial call is in flight at a time; callers arriving
//! during a trial are refused as if the breaker were Open.

use super::telemetry::{CircuitEventKind, CircuitState, CircuitStateChangeEvent, TelemetrySink};
use crate::correlation::CorrelationId;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure rate in `0.0..=1.0` at which the breaker opens
    pub failure_rate_threshold: f64,
    /// Length of the sliding window the rate is computed over
    pub sampling_window: Duration,
    /// How long the breaker stays Open before allowing a trial
    pub open_duration: Duration,
    /// Consecutive trial successes needed to close again
    pub half_open_max_calls: u32,
    /// Calls required in the window before the breaker may trip
    pub minimum_throughput: u32,
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            sampling_window: Duration::from_secs(60),
            open_duration: Duration::from_secs(120),
            half_open_max_calls: 5,
            minimum_throughput: 10,
            enabled: true,
        }
    }
}

/// Returned when a call is refused without being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpen {
    /// Time left until a trial call is allowed; zero while a trial is in flight
    pub retry_after: Duration,
}

/// Admission ticket handed back to [`CircuitBreaker::record`]
///
/// A HalfOpen trial permit dropped without being recorded releases the trial
/// slot, so an abandoned call never blocks the next one.
#[derive(Debug)]
#[must_use = "the outcome of an admitted call must be recorded"]
pub struct CallPermit {
    trial: Option<Arc<Mutex<BreakerInner>>>,
}

impl CallPermit {
    fn regular() -> Self {
        Self { trial: None }
    }

    fn trial(inner: &Arc<Mutex<BreakerInner>>) -> Self {
        Self {
            trial: Some(inner.clone()),
        }
    }

    /// Whether this permit admitted a HalfOpen trial; disarms the drop release
    fn take_trial(mut self) -> bool {
        self.trial.take().is_some()
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if let Some(inner) = self.trial.take() {
            if let Ok(mut inner) = inner.lock() {
                debug!("Circuit breaker trial abandoned without an outcome");
                inner.trial_in_flight = false;
            }
        }
    }
}

/// Point-in-time view of the breaker for health reporting
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub window_total: u32,
    pub window_failures: u32,
    pub failure_rate: f64,
    pub half_open_successes: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window_start: Instant,
    window_fail_count: u32,
    window_total_count: u32,
    open_until: Option<Instant>,
    half_open_attempt_count: u32,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn failure_rate(&self) -> f64 {
        if self.window_total_count == 0 {
            0.0
        } else {
            self.window_fail_count as f64 / self.window_total_count as f64
        }
    }

    fn roll_window(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.window_fail_count = 0;
            self.window_total_count = 0;
        }
    }
}

/// Failure-rate circuit breaker shared by every caller of one transport
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    config: CircuitBreakerConfig,
    telemetry: Arc<dyn TelemetrySink>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window_start: Instant::now(),
                window_fail_count: 0,
                window_total_count: 0,
                open_until: None,
                half_open_attempt_count: 0,
                trial_in_flight: false,
            })),
            config,
            telemetry,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask permission to send one attempt
    pub fn try_acquire(&self, correlation_id: &CorrelationId) -> Result<CallPermit, BreakerOpen> {
        if !self.config.enabled {
            return Ok(CallPermit::regular());
        }

        let now = Instant::now();
        let (decision, event) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Closed => {
                    inner.roll_window(now, self.config.sampling_window);
                    (Ok(CallPermit::regular()), None)
                }
                CircuitState::Open => {
                    let open_until = inner.open_until.unwrap_or(now);
                    if now >= open_until {
                        inner.state = CircuitState::HalfOpen;
                        inner.half_open_attempt_count = 0;
                        inner.trial_in_flight = true;
                        let event = self.event(&inner, CircuitEventKind::Transition, CircuitState::Open, correlation_id);
                        (Ok(CallPermit::trial(&self.inner)), Some(event))
                    } else {
                        let event = self.event(&inner, CircuitEventKind::Rejected, CircuitState::Open, correlation_id);
                        (Err(BreakerOpen { retry_after: open_until - now }), Some(event))
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        let event = self.event(&inner, CircuitEventKind::Rejected, CircuitState::HalfOpen, correlation_id);
                        (Err(BreakerOpen { retry_after: Duration::ZERO }), Some(event))
                    } else {
                        inner.trial_in_flight = true;
                        (Ok(CallPermit::trial(&self.inner)), None)
                    }
                }
            }
        };

        if let Some(event) = event {
            self.emit(&event);
        }
        decision
    }

    /// Feed the outcome of an admitted attempt back into the breaker
    pub fn record(&self, permit: CallPermit, success: bool, correlation_id: &CorrelationId) {
        let trial = permit.take_trial();
        if !self.config.enabled {
            return;
        }

        let now = Instant::now();
        let event = {
            let mut inner = self.inner.lock().unwrap();
            if trial {
                self.record_trial(&mut inner, now, success, correlation_id)
            } else {
                self.record_closed(&mut inner, now, success, correlation_id)
            }
        };

        if let Some(event) = event {
            self.emit(&event);
        }
    }

    fn record_trial(
        &self,
        inner: &mut BreakerInner,
        now: Instant,
        success: bool,
        correlation_id: &CorrelationId,
    ) -> Option<CircuitStateChangeEvent> {
        inner.trial_in_flight = false;
        if inner.state != CircuitState::HalfOpen {
            return None;
        }

        if success {
            inner.half_open_attempt_count += 1;
            debug!(
                "Circuit breaker trial succeeded ({}/{})",
                inner.half_open_attempt_count, self.config.half_open_max_calls
            );
            if inner.half_open_attempt_count >= self.config.half_open_max_calls {
                inner.state = CircuitState::Closed;
                inner.half_open_attempt_count = 0;
                inner.open_until = None;
                inner.window_start = now;
                inner.window_fail_count = 0;
                inner.window_total_count = 0;
                return Some(self.event(inner, CircuitEventKind::Transition, CircuitState::HalfOpen, correlation_id));
            }
            None
        } else {
            inner.state = CircuitState::Open;
            inner.half_open_attempt_count = 0;
            inner.open_until = Some(now + self.config.open_duration);
            Some(self.event(inner, CircuitEventKind::Transition, CircuitState::HalfOpen, correlation_id))
        }
    }

    fn record_closed(
        &self,
        inner: &mut BreakerInner,
        now: Instant,
        success: bool,
        correlation_id: &CorrelationId,
    ) -> Option<CircuitStateChangeEvent> {
        // Late outcome of a call admitted before the breaker opened
        if inner.state != CircuitState::Closed {
            return None;
        }

        inner.roll_window(now, self.config.sampling_window);
        inner.window_total_count += 1;
        if success {
            return None;
        }
        inner.window_fail_count += 1;

        if inner.window_total_count >= self.config.minimum_throughput
            && inner.failure_rate() >= self.config.failure_rate_threshold
        {
            inner.state = CircuitState::Open;
            inner.open_until = Some(now + self.config.open_duration);
            return Some(self.event(inner, CircuitEventKind::Transition, CircuitState::Closed, correlation_id));
        }
        None
    }

    fn event(
        &self,
        inner: &BreakerInner,
        kind: CircuitEventKind,
        previous: CircuitState,
        correlation_id: &CorrelationId,
    ) -> CircuitStateChangeEvent {
        CircuitStateChangeEvent {
            kind,
            previous,
            current: inner.state,
            failure_rate: inner.failure_rate(),
            window_size: inner.window_total_count,
            correlation_id: correlation_id.clone(),
        }
    }

    fn emit(&self, event: &CircuitStateChangeEvent) {
        match event.kind {
            CircuitEventKind::Transition if event.current == CircuitState::Open => warn!(
                "Circuit breaker {} -> {} (failure rate {:.2} over {} calls)",
                event.previous, event.current, event.failure_rate, event.window_size
            ),
            CircuitEventKind::Transition => {
                info!("Circuit breaker {} -> {}", event.previous, event.current)
            }
            CircuitEventKind::Rejected => debug!("Circuit breaker {}: call short-circuited", event.current),
        }
        self.telemetry.circuit_state_changed(event);
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().unwrap();
        CircuitSnapshot {
            state: inner.state,
            window_total: inner.window_total_count,
            window_failures: inner.window_fail_count,
            failure_rate: inner.failure_rate(),
            half_open_successes: inner.half_open_attempt_count,
        }
    }
}
