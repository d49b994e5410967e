// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use regime_core::{MIN_SCALE, RegimeError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Covariate key that overrides the realized-variance estimate when present.
pub const RV_COVARIATE_KEY: &str = "rv";

/// Rolling-statistics configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// EWMA smoothing factor; derived from `window` as `2/(window+1)` when unset.
    pub ewm_alpha: Option<f64>,
    pub window: usize,
    /// Number of squared first differences averaged into realized variance.
    pub rv_window: usize,
    /// Updates required before `warmup` clears.
    pub min_warmup: usize,
    /// Covariates the models expect; absent keys mark the tick as degraded.
    pub expected_covariates: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            ewm_alpha: Some(0.1),
            window: 19,
            rv_window: 20,
            min_warmup: 20,
            expected_covariates: vec![],
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if let Some(alpha) = self.ewm_alpha
            && !(alpha.is_finite() && alpha > 0.0 && alpha <= 1.0)
        {
            return Err(RegimeError::invalid_input(format!(
                "features.ewm_alpha must be finite and in (0,1]; got {alpha}"
            )));
        }
        if self.window == 0 {
            return Err(RegimeError::invalid_input("features.window must be >= 1"));
        }
        if self.rv_window == 0 {
            return Err(RegimeError::invalid_input("features.rv_window must be >= 1"));
        }
        Ok(())
    }

    pub fn resolved_alpha(&self) -> f64 {
        self.ewm_alpha
            .unwrap_or_else(|| 2.0 / (self.window as f64 + 1.0))
            .clamp(1e-6, 1.0)
    }
}

/// Serializable per-series feature state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureState {
    pub count: u64,
    pub mean: f64,
    pub second_moment: f64,
    pub cross_moment: f64,
    pub prev_x: Option<f64>,
    pub sq_diffs: VecDeque<f64>,
    pub sq_diff_sum: f64,
}

impl FeatureState {
    pub fn variance(&self) -> f64 {
        (self.second_moment - self.mean * self.mean).max(0.0)
    }

    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.mean.is_finite()
            && self.second_moment.is_finite()
            && self.cross_moment.is_finite()
            && self.sq_diff_sum.is_finite()
            && self.prev_x.is_none_or(f64::is_finite)
    }
}

/// Features observed at one tick, computed from data up to and including it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub x: f64,
    pub mean: f64,
    pub variance: f64,
    pub std: f64,
    pub z: f64,
    pub ewm_vol: f64,
    pub rv: f64,
    pub ac1: f64,
    pub count: u64,
    pub warmup: bool,
    pub missing_covariates: bool,
    /// Values of `expected_covariates` in configured order, 0.0 when absent.
    pub covariates: Vec<f64>,
}

/// Constant-time EWMA feature extractor for one series.
#[derive(Clone, Debug)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    alpha: f64,
    state: FeatureState,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self, RegimeError> {
        config.validate()?;
        let alpha = config.resolved_alpha();
        Ok(Self {
            config,
            alpha,
            state: FeatureState::default(),
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn state(&self) -> &FeatureState {
        &self.state
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn update(&mut self, x: f64, covariates: &BTreeMap<String, f64>) -> FeatureSnapshot {
        let a = self.alpha;
        let state = &mut self.state;

        match state.prev_x {
            None => {
                state.mean = x;
                state.second_moment = x * x;
                state.cross_moment = x * x;
            }
            Some(prev) => {
                state.mean = a * x + (1.0 - a) * state.mean;
                state.second_moment = a * x * x + (1.0 - a) * state.second_moment;
                state.cross_moment = a * x * prev + (1.0 - a) * state.cross_moment;

                let diff = x - prev;
                state.sq_diffs.push_back(diff * diff);
                state.sq_diff_sum += diff * diff;
                if state.sq_diffs.len() > self.config.rv_window
                    && let Some(oldest) = state.sq_diffs.pop_front()
                {
                    state.sq_diff_sum -= oldest;
                }
            }
        }
        if !state.is_finite() {
            tracing::warn!(
                count = state.count,
                x,
                "feature moments overflowed; restarting feature state"
            );
            *state = FeatureState::default();
            if (x * x).is_finite() {
                state.mean = x;
                state.second_moment = x * x;
                state.cross_moment = x * x;
            }
        }
        state.prev_x = Some(x);
        state.count = state.count.saturating_add(1);

        let variance = state.variance();
        let std = variance.sqrt();
        let z = if std > MIN_SCALE {
            (x - state.mean) / std
        } else {
            0.0
        };
        let ac1 = if state.count >= 2 && variance > MIN_SCALE {
            ((state.cross_moment - state.mean * state.mean) / variance).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let rv = match covariates.get(RV_COVARIATE_KEY) {
            Some(value) if value.is_finite() => value.max(0.0),
            _ if state.sq_diffs.is_empty() => variance,
            _ => (state.sq_diff_sum / state.sq_diffs.len() as f64).max(0.0),
        };

        let mut missing_covariates = false;
        let values = self
            .config
            .expected_covariates
            .iter()
            .map(|key| match covariates.get(key) {
                Some(value) => *value,
                None => {
                    missing_covariates = true;
                    0.0
                }
            })
            .collect();

        FeatureSnapshot {
            x,
            mean: state.mean,
            variance,
            std,
            z,
            ewm_vol: std,
            rv,
            ac1,
            count: state.count,
            warmup: state.count < self.config.min_warmup as u64,
            missing_covariates,
            covariates: values,
        }
    }

    pub fn save_state(&self) -> FeatureState {
        self.state.clone()
    }

    pub fn load_state(&mut self, state: &FeatureState) -> Result<(), RegimeError> {
        if state.sq_diffs.len() > self.config.rv_window {
            return Err(RegimeError::invalid_input(format!(
                "feature state carries {} squared differences; rv_window is {}",
                state.sq_diffs.len(),
                self.config.rv_window
            )));
        }
        if !state.is_finite() {
            return Err(RegimeError::invalid_input(
                "feature state contains non-finite moments",
            ));
        }
        self.state = state.clone();
        Ok(())
    }
}
