//! Token bucket rate limiter for outbound platform calls
//!
//! E-commerce platforms throttle API clients per store; the limiter keeps one
//! transport instance under the configured request rate so that throttling
//! (429) stays the exception rather than the steady state.

use super::config::RateLimitConfig;
use log::debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Token bucket shared by every caller of one transport
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Bucket>>,
    config: RateLimitConfig,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    granted: u64,
    delayed: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                tokens: config.burst_capacity as f64,
                last_refill: Instant::now(),
                granted: 0,
                delayed: 0,
            })),
            config,
        }
    }

    /// Wait until a token is available, then take it
    pub async fn acquire(&self) {
        if !self.config.enabled {
            return;
        }

        loop {
            let wait = {
                let mut bucket = self.inner.lock().unwrap();
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    bucket.granted += 1;
                    None
                } else {
                    bucket.delayed += 1;
                    Some(self.time_until_next_token(bucket.tokens))
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    debug!("Rate limiter: waiting {:?} for next token", delay);
                    sleep(delay).await;
                }
            }
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut bucket = self.inner.lock().unwrap();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.granted += 1;
            true
        } else {
            bucket.delayed += 1;
            false
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let bucket = self.inner.lock().unwrap();
        RateLimiterStats {
            tokens_available: bucket.tokens,
            granted: bucket.granted,
            delayed: bucket.delayed,
            enabled: self.config.enabled,
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let added = elapsed.as_secs_f64() * self.tokens_per_second();
        if added > 0.0 {
            bucket.tokens = (bucket.tokens + added).min(self.config.burst_capacity as f64);
            bucket.last_refill = now;
        }
    }

    fn tokens_per_second(&self) -> f64 {
        self.config.requests_per_minute.max(1) as f64 / 60.0
    }

    fn time_until_next_token(&self, tokens: f64) -> Duration {
        let missing = (1.0 - tokens).max(0.0);
        Duration::from_secs_f64(missing / self.tokens_per_second())
    }
}

/// Rate limiter statistics
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub tokens_available: f64,
    /// Tokens handed out
    pub granted: u64,
    /// Times a caller found the bucket empty
    pub delayed: u64,
    pub enabled: bool,
}
