//! Retry classification and exponential backoff with jitter
//!
//! Decides which outcomes of an outbound call count as failures, which of those
//! may be retried, and how long to wait between attempts. The same backoff
//! schedule drives the persisted retry queue.

use crate::api::error::{TransportError, TransportErrorKind};
use rand::Rng;
use std::time::Duration;

/// Largest accepted jitter ratio
pub const MAX_JITTER_RATIO: f64 = 0.5;

/// Configuration for inline retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before each retry, in order. `backoff_delays.len()` retries are made at most.
    pub backoff_delays: Vec<Duration>,
    /// Extra random delay as a fraction of the base delay, clamped to `0.0..=0.5`
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_delays: [1, 2, 4, 8, 16].into_iter().map(Duration::from_secs).collect(),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryConfig {
    /// Conservative config for production
    pub fn conservative() -> Self {
        Self {
            backoff_delays: [2, 5, 10].into_iter().map(Duration::from_secs).collect(),
            jitter_ratio: 0.3,
        }
    }

    /// Aggressive config for development/testing
    pub fn aggressive() -> Self {
        Self {
            backoff_delays: [200, 400, 800, 1600, 3200, 6400]
                .into_iter()
                .map(Duration::from_millis)
                .collect(),
            jitter_ratio: 0.5,
        }
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            backoff_delays: Vec::new(),
            jitter_ratio: 0.0,
        }
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.backoff_delays.len() as u32 + 1
    }

    pub fn effective_jitter_ratio(&self) -> f64 {
        if self.jitter_ratio.is_nan() {
            return 0.0;
        }
        self.jitter_ratio.clamp(0.0, MAX_JITTER_RATIO)
    }

    /// Base delay for the retry at `index`; indices past the schedule reuse the last delay
    pub fn base_delay(&self, index: usize) -> Duration {
        match self.backoff_delays.get(index) {
            Some(delay) => *delay,
            None => self.backoff_delays.last().copied().unwrap_or(Duration::ZERO),
        }
    }

    /// Jittered delay for the retry at `index`, within `[base, base * (1 + jitter)]`
    pub fn delay_for(&self, index: usize) -> Duration {
        let base = self.base_delay(index);
        let ratio = self.effective_jitter_ratio();
        if base.is_zero() || ratio == 0.0 {
            return base;
        }

        let factor = rand::rng().random_range(0.0..=ratio);
        base + base.mul_f64(factor)
    }
}

/// Classification of a failed attempt and its retry behavior
#[derive(Debug, Clone, PartialEq)]
pub enum RetryableError {
    /// Connection, DNS or I/O failure before a response arrived
    Network,
    /// The attempt timed out client-side
    Timeout,
    /// The attempt was cancelled before completing
    Cancelled,
    /// HTTP 408 Request Timeout
    RequestTimeout,
    /// HTTP 429 Too Many Requests
    RateLimited,
    /// HTTP 5xx server errors
    ServerError(u16),
    /// Non-retryable client errors (4xx except 408, 429)
    ClientError(u16),
    /// Unknown/other errors
    Unknown,
}

impl RetryableError {
    /// Determine if this error type should be retried
    pub fn should_retry(&self) -> bool {
        match self {
            RetryableError::Network => true,
            RetryableError::Timeout => true,
            RetryableError::Cancelled => true,
            RetryableError::RequestTimeout => true,
            RetryableError::RateLimited => true,
            RetryableError::ServerError(status) => !matches!(status, 501 | 505),
            RetryableError::ClientError(_) => false,
            RetryableError::Unknown => false,
        }
    }

    /// Classify an HTTP status code; `None` for statuses below 400
    pub fn from_status_code(status: u16) -> Option<Self> {
        match status {
            408 => Some(RetryableError::RequestTimeout),
            429 => Some(RetryableError::RateLimited),
            400..=499 => Some(RetryableError::ClientError(status)),
            500..=599 => Some(RetryableError::ServerError(status)),
            0..=399 => None,
            _ => Some(RetryableError::Unknown),
        }
    }
}

impl From<TransportErrorKind> for RetryableError {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Connect => RetryableError::Network,
            TransportErrorKind::Timeout => RetryableError::Timeout,
            TransportErrorKind::Cancelled => RetryableError::Cancelled,
            TransportErrorKind::Other => RetryableError::Unknown,
        }
    }
}

impl From<&TransportError> for RetryableError {
    fn from(error: &TransportError) -> Self {
        error.kind.into()
    }
}

/// Whether a response with this status counts as a failed, retryable attempt
pub fn is_retryable_status(status: u16) -> bool {
    RetryableError::from_status_code(status).is_some_and(|kind| kind.should_retry())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_error_classification() {
        assert!(RetryableError::Network.should_retry());
        assert!(RetryableError::Timeout.should_retry());
        assert!(RetryableError::ServerError(500).should_retry());
        assert!(RetryableError::ServerError(503).should_retry());
        assert!(RetryableError::RateLimited.should_retry());
        assert!(RetryableError::RequestTimeout.should_retry());

        assert!(!RetryableError::ServerError(501).should_retry());
        assert!(!RetryableError::ServerError(505).should_retry());
        assert!(!RetryableError::ClientError(400).should_retry());
        assert!(!RetryableError::Unknown.should_retry());
    }

    #[test]
    fn test_transport_failure_classification() {
        let refused = TransportError::new(TransportErrorKind::Connect, "refused");
        assert_eq!(RetryableError::from(&refused), RetryableError::Network);
        assert!(RetryableError::from(&refused).should_retry());
        assert!(RetryableError::from(TransportErrorKind::Timeout).should_retry());
        assert!(RetryableError::from(TransportErrorKind::Cancelled).should_retry());

        let malformed = TransportError::new(TransportErrorKind::Other, "bad url");
        assert_eq!(RetryableError::from(&malformed), RetryableError::Unknown);
        assert!(!malformed.is_transient());
    }

    #[test]
    fn test_status_code_classification() {
        assert_eq!(RetryableError::from_status_code(200), None);
        assert_eq!(RetryableError::from_status_code(404), Some(RetryableError::ClientError(404)));
        assert_eq!(RetryableError::from_status_code(408), Some(RetryableError::RequestTimeout));
        assert_eq!(RetryableError::from_status_code(429), Some(RetryableError::RateLimited));
        assert_eq!(RetryableError::from_status_code(502), Some(RetryableError::ServerError(502)));

        assert!(is_retryable_status(503));
        assert!(is_retryable_status(429));
        assert!(!is_retryable_status(501));
        assert!(!is_retryable_status(422));
        assert!(!is_retryable_status(201));
    }

    #[test]
    fn test_default_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts(), 6);
        assert_eq!(config.base_delay(0), Duration::from_secs(1));
        assert_eq!(config.base_delay(4), Duration::from_secs(16));
        // past the end of the schedule the last delay repeats
        assert_eq!(config.base_delay(9), Duration::from_secs(16));
    }

    #[test]
    fn test_jittered_delay_bounds() {
        let config = RetryConfig {
            backoff_delays: vec![Duration::from_millis(100), Duration::from_millis(400)],
            jitter_ratio: 0.25,
        };

        for _ in 0..200 {
            for index in 0..2 {
                let base = config.base_delay(index);
                let delay = config.delay_for(index);
                assert!(delay >= base);
                assert!(delay <= base.mul_f64(1.25));
            }
        }
    }

    #[test]
    fn test_jitter_ratio_is_clamped() {
        let config = RetryConfig {
            backoff_delays: vec![Duration::from_secs(1)],
            jitter_ratio: 3.0,
        };
        assert_eq!(config.effective_jitter_ratio(), MAX_JITTER_RATIO);

        for _ in 0..100 {
            assert!(config.delay_for(0) <= Duration::from_millis(1500));
        }

        let negative = RetryConfig {
            backoff_delays: vec![Duration::from_secs(1)],
            jitter_ratio: -1.0,
        };
        assert_eq!(negative.delay_for(0), Duration::from_secs(1));
    }

    #[test]
    fn test_empty_schedule() {
        let config = RetryConfig::none();
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.delay_for(0), Duration::ZERO);
    }
}
