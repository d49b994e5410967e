// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use super::{ForecastModel, ModelKind};
use crate::features::FeatureSnapshot;
use regime_core::{MIN_SCALE, RegimeError, Tick};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Built-in features ahead of configured covariates: x, z, ewm_vol, ac1, rv.
const BASE_FEATURES: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    /// Training pairs kept.
    pub window: usize,
    pub retrain_every: usize,
    /// Pairs required before the first fit; forecasts are naive until then.
    pub min_train: usize,
    /// Full-batch descent passes per retrain, warm-started from the last fit.
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            window: 500,
            retrain_every: 50,
            min_train: 50,
            epochs: 100,
            learning_rate: 0.1,
            l2: 1e-4,
        }
    }
}

impl GradientConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if self.window == 0 || self.min_train == 0 || self.min_train > self.window {
            return Err(RegimeError::invalid_input(format!(
                "models.gradient requires 1 <= min_train <= window; got min_train={}, window={}",
                self.min_train, self.window
            )));
        }
        if self.retrain_every == 0 || self.epochs == 0 {
            return Err(RegimeError::invalid_input(
                "models.gradient.retrain_every and epochs must be >= 1",
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RegimeError::invalid_input(
                "models.gradient.learning_rate must be finite and > 0",
            ));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return Err(RegimeError::invalid_input(
                "models.gradient.l2 must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

/// Standardization plus linear weights learned on the training window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct LinearFit {
    means: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
    bias: f64,
}

impl LinearFit {
    fn predict(&self, features: &[f64]) -> f64 {
        self.bias
            + features
                .iter()
                .zip(&self.means)
                .zip(&self.scales)
                .zip(&self.weights)
                .map(|(((value, mean), scale), weight)| weight * (value - mean) / scale)
                .sum::<f64>()
    }
}

/// Linear model on lagged features trained by gradient descent over a sliding window.
///
/// Pairs are `(features_{t-1}, x_t)`, so a forecast made at tick `t` never
/// sees `x_{t+1}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GradientModel {
    config: GradientConfig,
    dim: usize,
    inputs: VecDeque<Vec<f64>>,
    targets: VecDeque<f64>,
    last_features: Option<Vec<f64>>,
    fit: Option<LinearFit>,
    since_retrain: usize,
}

impl GradientModel {
    pub fn new(config: GradientConfig, covariate_count: usize) -> Self {
        Self {
            config,
            dim: BASE_FEATURES + covariate_count,
            inputs: VecDeque::new(),
            targets: VecDeque::new(),
            last_features: None,
            fit: None,
            since_retrain: 0,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.fit.is_some()
    }

    pub fn training_pairs(&self) -> usize {
        self.targets.len()
    }

    fn vectorize(&self, features: &FeatureSnapshot) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.dim);
        out.extend([
            features.x,
            features.z,
            features.ewm_vol,
            features.ac1,
            features.rv,
        ]);
        out.extend(features.covariates.iter().copied());
        out.resize(self.dim, 0.0);
        out
    }

    fn retrain(&mut self) {
        let n = self.targets.len();
        let n_f = n as f64;

        let mut means = vec![0.0; self.dim];
        for row in &self.inputs {
            for (mean, value) in means.iter_mut().zip(row) {
                *mean += value / n_f;
            }
        }
        let mut scales = vec![0.0; self.dim];
        for row in &self.inputs {
            for ((scale, value), mean) in scales.iter_mut().zip(row).zip(&means) {
                *scale += (value - mean).powi(2) / n_f;
            }
        }
        // Constant columns carry no signal; unit scale keeps the fit serializable.
        let constant: Vec<bool> = scales.iter().map(|var| *var <= MIN_SCALE).collect();
        for (scale, is_constant) in scales.iter_mut().zip(&constant) {
            *scale = if *is_constant { 1.0 } else { scale.sqrt() };
        }

        let standardized: Vec<Vec<f64>> = self
            .inputs
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&means)
                    .zip(&scales)
                    .map(|((value, mean), scale)| (value - mean) / scale)
                    .collect()
            })
            .collect();

        let (mut weights, mut bias) = match &self.fit {
            Some(fit) if fit.weights.len() == self.dim => (fit.weights.clone(), fit.bias),
            _ => (
                vec![0.0; self.dim],
                self.targets.iter().sum::<f64>() / n_f,
            ),
        };

        // Standardized inputs bound the Hessian spectrum by the feature count.
        let step = self.config.learning_rate.min(1.0 / (self.dim as f64 + 1.0));
        let l2 = self.config.l2;
        let mut grad = vec![0.0; self.dim];
        for _ in 0..self.config.epochs {
            grad.iter_mut().for_each(|g| *g = 0.0);
            let mut grad_bias = 0.0;
            for (row, target) in standardized.iter().zip(&self.targets) {
                let pred = bias + row.iter().zip(&weights).map(|(v, w)| v * w).sum::<f64>();
                let residual = pred - target;
                grad_bias += residual;
                for (g, v) in grad.iter_mut().zip(row) {
                    *g += residual * v;
                }
            }
            for (w, g) in weights.iter_mut().zip(&grad) {
                *w -= step * (2.0 * g / n_f + 2.0 * l2 * *w);
            }
            bias -= step * 2.0 * grad_bias / n_f;
        }
        for (w, is_constant) in weights.iter_mut().zip(&constant) {
            if *is_constant {
                *w = 0.0;
            }
        }

        if weights.iter().all(|w| w.is_finite()) && bias.is_finite() {
            self.fit = Some(LinearFit {
                means,
                scales,
                weights,
                bias,
            });
            self.since_retrain = 0;
        } else {
            tracing::debug!(pairs = n, "gradient retrain diverged; keeping previous fit");
        }
    }
}

impl ForecastModel for GradientModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Gradient
    }

    fn predict_update(&mut self, tick: &Tick, features: &FeatureSnapshot) -> f64 {
        let current = self.vectorize(features);

        if let Some(previous) = self.last_features.take() {
            self.inputs.push_back(previous);
            self.targets.push_back(tick.x);
            while self.targets.len() > self.config.window {
                self.inputs.pop_front();
                self.targets.pop_front();
            }
        }
        self.since_retrain = self.since_retrain.saturating_add(1);

        let ready = self.targets.len() >= self.config.min_train;
        if ready && (self.fit.is_none() || self.since_retrain >= self.config.retrain_every) {
            self.retrain();
        }

        let y_hat = match &self.fit {
            Some(fit) => fit.predict(&current),
            None => tick.x,
        };
        self.last_features = Some(current);
        y_hat
    }
}
