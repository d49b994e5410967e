// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::api::RequestMeta;
use crate::config::{GuardConfig, RateLimitConfig};
use lru::LruCache;
use parking_lot::Mutex;
use regime_core::RegimeError;
use std::num::NonZeroUsize;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq)]
struct TokenBucket {
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<LruCache<String, TokenBucket>>,
}

impl RateLimiter {
    fn new(config: RateLimitConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_clients).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            buckets: Mutex::new(LruCache::new(cap)),
        }
    }

    fn allow(&self, key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        let burst = self.config.burst;
        let bucket = buckets.get_or_insert_mut(key.to_string(), || TokenBucket {
            tokens: burst,
            last: now,
        });
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + self.config.rps * elapsed).min(burst);
        bucket.last = now;
        if bucket.tokens < 1.0 {
            return false;
        }
        bucket.tokens -= 1.0;
        true
    }
}

/// Authentication and per-client rate limiting, evaluated before any
/// pipeline work.
#[derive(Debug)]
pub struct RequestGuard {
    expected_authorization: Option<String>,
    limiter: Option<RateLimiter>,
}

impl RequestGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            expected_authorization: config
                .token
                .as_deref()
                .map(|token| format!("Bearer {}", token.trim())),
            limiter: config.rate_limit.clone().map(RateLimiter::new),
        }
    }

    pub fn check(&self, meta: &RequestMeta) -> Result<(), RegimeError> {
        self.check_at(meta, Instant::now())
    }

    pub fn check_at(&self, meta: &RequestMeta, now: Instant) -> Result<(), RegimeError> {
        if let Some(expected) = &self.expected_authorization
            && meta.authorization.as_deref().map(str::trim) != Some(expected.as_str())
        {
            return Err(RegimeError::unauthorized("missing or invalid bearer token"));
        }
        if let Some(limiter) = &self.limiter
            && !limiter.allow(&meta.rate_key(), now)
        {
            return Err(RegimeError::rate_limited(format!(
                "rate limit exceeded for {}",
                meta.rate_key()
            )));
        }
        Ok(())
    }
}
