// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use super::linalg::ridge_least_squares;
use super::{ForecastModel, ModelKind};
use crate::features::FeatureSnapshot;
use regime_core::{RegimeError, Tick};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoregressiveConfig {
    /// Number of lags `p`.
    pub order: usize,
    /// Observations kept for refitting.
    pub window: usize,
    /// Ticks between refits; coefficients are reused in between.
    pub refit_every: usize,
    pub ridge: f64,
}

impl Default for AutoregressiveConfig {
    fn default() -> Self {
        Self {
            order: 2,
            window: 500,
            refit_every: 50,
            ridge: 1e-6,
        }
    }
}

impl AutoregressiveConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if self.order == 0 {
            return Err(RegimeError::invalid_input(
                "models.autoregressive.order must be >= 1",
            ));
        }
        if self.window < self.min_observations() {
            return Err(RegimeError::invalid_input(format!(
                "models.autoregressive.window must be >= {}; got {}",
                self.min_observations(),
                self.window
            )));
        }
        if self.refit_every == 0 {
            return Err(RegimeError::invalid_input(
                "models.autoregressive.refit_every must be >= 1",
            ));
        }
        if !self.ridge.is_finite() || self.ridge < 0.0 {
            return Err(RegimeError::invalid_input(
                "models.autoregressive.ridge must be finite and >= 0",
            ));
        }
        Ok(())
    }

    fn min_observations(&self) -> usize {
        (self.order + 5).max(10)
    }
}

/// AR(p) with intercept, sparse ridge refits over a sliding window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoregressiveModel {
    config: AutoregressiveConfig,
    history: VecDeque<f64>,
    /// `[intercept, phi_1, ..., phi_p]` once fitted.
    coefficients: Option<Vec<f64>>,
    since_refit: usize,
}

impl AutoregressiveModel {
    pub fn new(config: AutoregressiveConfig) -> Self {
        let capacity = config.window;
        Self {
            config,
            history: VecDeque::with_capacity(capacity),
            coefficients: None,
            since_refit: 0,
        }
    }

    pub fn coefficients(&self) -> Option<&[f64]> {
        self.coefficients.as_deref()
    }

    fn refit(&mut self) {
        let p = self.config.order;
        let n = self.history.len();
        let mut rows = Vec::with_capacity(n - p);
        let mut targets = Vec::with_capacity(n - p);
        for i in p..n {
            let mut row = Vec::with_capacity(p + 1);
            row.push(1.0);
            row.extend((1..=p).map(|lag| self.history[i - lag]));
            rows.push(row);
            targets.push(self.history[i]);
        }

        match ridge_least_squares(&rows, &targets, self.config.ridge) {
            Some(coefficients) => {
                self.coefficients = Some(coefficients);
                self.since_refit = 0;
            }
            None => {
                tracing::debug!(n, order = p, "autoregressive refit singular; keeping previous fit");
            }
        }
    }
}

impl ForecastModel for AutoregressiveModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Autoregressive
    }

    fn predict_update(&mut self, tick: &Tick, _features: &FeatureSnapshot) -> f64 {
        self.history.push_back(tick.x);
        while self.history.len() > self.config.window {
            self.history.pop_front();
        }
        self.since_refit = self.since_refit.saturating_add(1);

        let ready = self.history.len() >= self.config.min_observations();
        if ready && (self.coefficients.is_none() || self.since_refit >= self.config.refit_every) {
            self.refit();
        }

        let Some(coefficients) = &self.coefficients else {
            return tick.x;
        };
        let n = self.history.len();
        let lags: f64 = (1..=self.config.order)
            .map(|lag| coefficients[lag] * self.history[n - lag])
            .sum();
        coefficients[0] + lags
    }
}
