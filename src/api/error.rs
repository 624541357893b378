//! Error taxonomy for platform calls

use super::resilience::RetryableError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Coarse failure category persisted with retry items and reported in telemetry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    Network,
    Protocol,
    Deserialization,
    Validation,
    CircuitOpen,
    ExhaustedRetries,
    Storage,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Network",
            ErrorCategory::Protocol => "Protocol",
            ErrorCategory::Deserialization => "Deserialization",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::CircuitOpen => "CircuitOpen",
            ErrorCategory::ExhaustedRetries => "ExhaustedRetries",
            ErrorCategory::Storage => "Storage",
            ErrorCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = std::convert::Infallible;

    /// Unrecognised values map to `Unknown` so old rows stay readable
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Network" => ErrorCategory::Network,
            "Protocol" => ErrorCategory::Protocol,
            "Deserialization" => ErrorCategory::Deserialization,
            "Validation" => ErrorCategory::Validation,
            "CircuitOpen" => ErrorCategory::CircuitOpen,
            "ExhaustedRetries" => ErrorCategory::ExhaustedRetries,
            "Storage" => ErrorCategory::Storage,
            _ => ErrorCategory::Unknown,
        })
    }
}

/// How a send attempt failed before any response arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Cancelled,
    Other,
}

/// Failure of the raw send primitive
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Network, timeout and cancellation failures may be retried
    pub fn is_transient(&self) -> bool {
        RetryableError::from(self).should_retry()
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() || error.is_request() || error.is_body() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, error.to_string())
    }
}

/// Error returned by the resilient transport and the platform client
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error ({kind:?}): {message}")]
    Network { kind: TransportErrorKind, message: String },

    #[error("HTTP {status} from {endpoint}: {message}")]
    Protocol {
        status: u16,
        endpoint: String,
        message: String,
    },

    #[error("failed to decode response from {endpoint}: {source}")]
    Deserialization {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ApiError>,
    },

    #[error("request cancelled by shutdown")]
    Cancelled,
}

impl ApiError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Network { .. } | ApiError::Cancelled => ErrorCategory::Network,
            ApiError::Protocol { .. } => ErrorCategory::Protocol,
            ApiError::Deserialization { .. } => ErrorCategory::Deserialization,
            ApiError::Validation(_) => ErrorCategory::Validation,
            ApiError::CircuitOpen { .. } => ErrorCategory::CircuitOpen,
            ApiError::RetriesExhausted { .. } => ErrorCategory::ExhaustedRetries,
        }
    }

    /// Whether a later attempt may succeed without any change to the request
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network { kind, .. } => RetryableError::from(*kind).should_retry(),
            ApiError::Protocol { status, .. } => super::resilience::is_retryable_status(*status),
            ApiError::CircuitOpen { .. } | ApiError::RetriesExhausted { .. } | ApiError::Cancelled => true,
            ApiError::Deserialization { .. } | ApiError::Validation(_) => false,
        }
    }

    /// HTTP status of the failure, looking through exhausted retries
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Protocol { status, .. } => Some(*status),
            ApiError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        ApiError::Network {
            kind: error.kind,
            message: error.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let protocol = ApiError::Protocol {
            status: 422,
            endpoint: "/products".to_string(),
            message: "sku taken".to_string(),
        };
        assert_eq!(protocol.category(), ErrorCategory::Protocol);
        assert!(!protocol.is_retryable());

        let exhausted = ApiError::RetriesExhausted {
            attempts: 6,
            last: Box::new(ApiError::Protocol {
                status: 503,
                endpoint: "/products".to_string(),
                message: String::new(),
            }),
        };
        assert_eq!(exhausted.category(), ErrorCategory::ExhaustedRetries);
        assert_eq!(exhausted.status(), Some(503));

        let open = ApiError::CircuitOpen {
            retry_after: Duration::from_secs(5),
        };
        assert_eq!(open.category(), ErrorCategory::CircuitOpen);
    }

    #[test]
    fn test_transport_error_conversion() {
        let timeout: ApiError = TransportError::new(TransportErrorKind::Timeout, "timed out").into();
        assert!(timeout.is_retryable());
        assert_eq!(timeout.category(), ErrorCategory::Network);

        let other: ApiError = TransportError::new(TransportErrorKind::Other, "bad url").into();
        assert!(!other.is_retryable());
    }

    #[test]
    fn test_category_round_trip_through_storage_strings() {
        for category in [ErrorCategory::Network, ErrorCategory::ExhaustedRetries, ErrorCategory::Storage] {
            assert_eq!(category.as_str().parse::<ErrorCategory>().unwrap(), category);
        }
        assert_eq!("garbage".parse::<ErrorCategory>().unwrap(), ErrorCategory::Unknown);
    }
}
