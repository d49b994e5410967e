// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use regime_core::RegimeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SERIES_ID: &str = "default";

/// How a truth without a prediction id is matched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthMatching {
    /// `prediction_id` or `(series_id, target_timestamp)` is required.
    #[default]
    Keyed,
    /// A truth carrying only `series_id` resolves that series' oldest forecast.
    FifoLegacy,
}

/// Per-client token bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Refill rate in tokens per second.
    pub rps: f64,
    /// Bucket size.
    pub burst: f64,
    /// Clients tracked before the least recently seen bucket is dropped.
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 25.0,
            burst: 50.0,
            max_clients: 10_000,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if !self.rps.is_finite() || self.rps < 0.0 {
            return Err(RegimeError::invalid_input(format!(
                "rate_limit.rps must be finite and >= 0; got {}",
                self.rps
            )));
        }
        if !self.burst.is_finite() || self.burst < 1.0 {
            return Err(RegimeError::invalid_input(format!(
                "rate_limit.burst must be finite and >= 1; got {}",
                self.burst
            )));
        }
        if self.max_clients == 0 {
            return Err(RegimeError::invalid_input(
                "rate_limit.max_clients must be >= 1",
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Required bearer token; `None` disables authentication.
    pub token: Option<String>,
    /// `None` disables rate limiting.
    pub rate_limit: Option<RateLimitConfig>,
}

/// Service-level limits and matching policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Pending predictions indexed across all series.
    pub pending_cap: usize,
    pub max_series: usize,
    /// Window in which a repeated truth is idempotent.
    pub truth_ttl_ms: u64,
    /// Extra window after the TTL in which a repeat is a conflict.
    pub truth_conflict_window_ms: u64,
    pub truth_max_ids: usize,
    pub truth_matching: TruthMatching,
    pub queue_early_truths: bool,
    pub default_series_id: String,
    pub guard: GuardConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pending_cap: 4_096,
            max_series: 1_024,
            truth_ttl_ms: 600_000,
            truth_conflict_window_ms: 600_000,
            truth_max_ids: 100_000,
            truth_matching: TruthMatching::Keyed,
            queue_early_truths: false,
            default_series_id: DEFAULT_SERIES_ID.to_string(),
            guard: GuardConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if self.pending_cap == 0 {
            return Err(RegimeError::invalid_input("pending_cap must be >= 1"));
        }
        if self.max_series == 0 {
            return Err(RegimeError::invalid_input("max_series must be >= 1"));
        }
        if self.truth_max_ids == 0 {
            return Err(RegimeError::invalid_input("truth_max_ids must be >= 1"));
        }
        if self.default_series_id.trim().is_empty() {
            return Err(RegimeError::invalid_input(
                "default_series_id must be non-empty",
            ));
        }
        if let Some(token) = &self.guard.token
            && token.trim().is_empty()
        {
            return Err(RegimeError::invalid_input(
                "guard.token must be non-empty when set",
            ));
        }
        if let Some(rate_limit) = &self.guard.rate_limit {
            rate_limit.validate()?;
        }
        Ok(())
    }

    pub fn truth_ttl(&self) -> Duration {
        Duration::from_millis(self.truth_ttl_ms)
    }

    pub fn truth_conflict_window(&self) -> Duration {
        Duration::from_millis(self.truth_conflict_window_ms)
    }
}
