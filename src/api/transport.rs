//! Outbound HTTP transport
//!
//! [`HttpTransport`] is the raw send primitive; [`ReqwestTransport`] implements
//! it over a pooled `reqwest::Client`. [`ResilientTransport`] wraps any
//! transport with correlation headers, rate limiting, bounded retries with
//! jittered backoff and a failure-rate circuit breaker.

use super::constants::headers;
use super::error::{ApiError, TransportError, TransportErrorKind};
use super::resilience::{
    CircuitBreaker, LoggingSink, RateLimiter, ResilienceConfig, RetryAttemptEvent, RetryConfig,
    RetryableError, TelemetrySink, is_retryable_status,
};
use crate::correlation::CorrelationId;
use async_trait::async_trait;
use log::debug;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A fully buffered request that can be replayed on retry
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Serialize `body` as the JSON payload
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::Validation(format!("failed to serialize request body: {}", e)))?;
        self.body = Some(bytes);
        self.set_header("Content-Type", headers::CONTENT_TYPE_JSON);
        Ok(self)
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Insert or replace a header (case-insensitive name match)
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.headers.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A fully buffered response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Attempts made to obtain this response
    pub attempts: u32,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            attempts: 1,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Generic send-request / get-response-or-error primitive
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `reqwest` implementation with connection pooling
pub struct ReqwestTransport {
    http_client: reqwest::Client,
    default_headers: Vec<(String, String)>,
}

impl ReqwestTransport {
    pub fn new(access_token: Option<&str>, timeout: Duration, connect_timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .user_agent(concat!("shopsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut default_headers = vec![("Accept".to_string(), headers::CONTENT_TYPE_JSON.to_string())];
        if let Some(token) = access_token {
            default_headers.push((headers::X_ACCESS_TOKEN.to_string(), token.to_string()));
        }

        Ok(Self {
            http_client,
            default_headers,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self.http_client.request(request.method, &request.url);
        for (name, value) in self.default_headers.iter().chain(request.headers.iter()) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| TransportError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(|e| TransportError::from_reqwest(&e))?;

        Ok(ApiResponse {
            status,
            headers,
            body: body.to_vec(),
            attempts: 1,
        })
    }
}

/// Wraps a transport with retries, circuit breaking and rate limiting
#[derive(Clone)]
pub struct ResilientTransport {
    inner: Arc<dyn HttpTransport>,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    rate_limiter: RateLimiter,
    request_logger: LoggingSink,
    telemetry: Arc<dyn TelemetrySink>,
    shutdown: CancellationToken,
}

impl ResilientTransport {
    pub fn new(inner: Arc<dyn HttpTransport>, config: ResilienceConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            inner,
            retry: config.retry,
            breaker: CircuitBreaker::new(config.circuit_breaker, telemetry.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit),
            request_logger: LoggingSink::new(config.monitoring),
            telemetry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort inter-attempt waits when `token` is cancelled
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn telemetry(&self) -> Arc<dyn TelemetrySink> {
        self.telemetry.clone()
    }

    /// Send `request`, retrying transient failures.
    ///
    /// Returns the final response even when its status is a failure; only
    /// transport-level errors, an open breaker or cancellation produce `Err`.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let correlation_id = CorrelationId::current_or_new();
        request.set_header(headers::X_CORRELATION_ID, correlation_id.as_str());

        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.rate_limiter.acquire().await;

            let permit = self
                .breaker
                .try_acquire(&correlation_id)
                .map_err(|open| ApiError::CircuitOpen {
                    retry_after: open.retry_after,
                })?;

            self.request_logger.log_request(
                request.method.as_str(),
                &request.url,
                &request.headers,
                correlation_id.as_str(),
            );

            // Cancellation is honoured between attempts only, never mid-flight
            let outcome = self.inner.send(request.clone()).await;
            let (success, retryable, status_code) = match &outcome {
                Ok(response) => {
                    let failed = is_retryable_status(response.status);
                    (!failed, failed, Some(response.status))
                }
                Err(error) => (false, RetryableError::from(error).should_retry(), None),
            };
            self.breaker.record(permit, success, &correlation_id);

            let exhausted = attempt >= max_attempts;
            match outcome {
                Ok(mut response) if !retryable || exhausted => {
                    response.attempts = attempt;
                    return Ok(response);
                }
                Err(error) if !retryable => return Err(error.into()),
                Err(error) if exhausted => {
                    return Err(ApiError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error.into()),
                    });
                }
                Ok(_) | Err(_) => {}
            }

            let delay = self.retry.delay_for((attempt - 1) as usize);
            self.telemetry.retry_attempt(&RetryAttemptEvent {
                target: request.url.clone(),
                method: request.method.to_string(),
                attempt,
                next_delay: delay,
                status_code,
                correlation_id: correlation_id.clone(),
            });
            debug!(
                "Attempt {}/{} for {} {} failed, retrying in {:?}",
                attempt, max_attempts, request.method, request.url, delay
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return Err(ApiError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of outcomes and records every request
    #[derive(Default)]
    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
        pub requests: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<ApiResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn statuses(statuses: &[u16]) -> Self {
            Self::new(statuses.iter().map(|s| Ok(ApiResponse::new(*s, "{}"))).collect())
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ApiResponse::new(200, "{}")))
        }
    }
}
