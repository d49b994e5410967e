// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use regime_core::{Regime, RegimeError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Online split-conformal calibration settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConformalConfig {
    /// Residuals retained per buffer.
    pub window: usize,
    /// Per-step weight decay in (0,1]; 1 disables down-weighting.
    pub decay: f64,
    /// Calibrate from the regime captured at prediction time.
    pub per_regime: bool,
    /// Samples the active buffer needs before it is trusted.
    pub min_samples: usize,
    /// Below this effective sample size weights are ignored.
    pub min_effective_n: f64,
    /// Multiplier on the global quantile while the active buffer is sparse.
    pub cold_scale: f64,
    /// Radius floor used before any residual has been observed.
    pub cold_radius: f64,
    pub primary_alpha: f64,
    pub aux_alphas: Vec<f64>,
}

impl Default for ConformalConfig {
    fn default() -> Self {
        Self {
            window: 500,
            decay: 1.0,
            per_regime: true,
            min_samples: 30,
            min_effective_n: 30.0,
            cold_scale: 1.5,
            cold_radius: 0.01,
            primary_alpha: 0.1,
            aux_alphas: vec![],
        }
    }
}

impl ConformalConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if self.window == 0 {
            return Err(RegimeError::invalid_input("conformal.window must be >= 1"));
        }
        if !(self.decay.is_finite() && self.decay > 0.0 && self.decay <= 1.0) {
            return Err(RegimeError::invalid_input(format!(
                "conformal.decay must be finite and in (0,1]; got {}",
                self.decay
            )));
        }
        if self.min_samples == 0 || self.min_samples > self.window {
            return Err(RegimeError::invalid_input(format!(
                "conformal.min_samples must be in [1, window]; got {}",
                self.min_samples
            )));
        }
        if !self.min_effective_n.is_finite() || self.min_effective_n < 0.0 {
            return Err(RegimeError::invalid_input(
                "conformal.min_effective_n must be finite and >= 0",
            ));
        }
        if !self.cold_scale.is_finite() || self.cold_scale <= 0.0 {
            return Err(RegimeError::invalid_input(
                "conformal.cold_scale must be finite and > 0",
            ));
        }
        if !self.cold_radius.is_finite() || self.cold_radius < 0.0 {
            return Err(RegimeError::invalid_input(
                "conformal.cold_radius must be finite and >= 0",
            ));
        }
        for alpha in self.alphas() {
            if !(alpha.is_finite() && alpha > 0.0 && alpha < 1.0) {
                return Err(RegimeError::invalid_input(format!(
                    "conformal alphas must be finite and in (0,1); got {alpha}"
                )));
            }
        }
        Ok(())
    }

    /// Primary alpha followed by distinct auxiliary alphas.
    pub fn alphas(&self) -> Vec<f64> {
        let mut out = vec![self.primary_alpha];
        for alpha in &self.aux_alphas {
            if !out.iter().any(|seen| (seen - alpha).abs() < 1e-12) {
                out.push(*alpha);
            }
        }
        out
    }
}

/// Canonical map key for an alpha level, e.g. `alpha=0.10`.
pub fn alpha_key(alpha: f64) -> String {
    format!("alpha={alpha:.2}")
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidualEntry {
    pub value: f64,
    pub seq: u64,
}

/// Bounded FIFO of absolute residuals tagged with insertion order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidualBuffer {
    capacity: usize,
    entries: VecDeque<ResidualEntry>,
    next_seq: u64,
}

impl ResidualBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(4_096)),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, value: f64) {
        self.entries.push_back(ResidualEntry {
            value,
            seq: self.next_seq,
        });
        self.next_seq = self.next_seq.saturating_add(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|entry| entry.value)
    }

    /// Weighted empirical quantiles at each of `levels`, one sort per call.
    pub fn quantiles(&self, levels: &[f64], decay: f64, min_effective_n: f64) -> Option<Vec<f64>> {
        let newest = self.entries.back()?.seq;
        let mut pairs: Vec<(f64, f64)> = self
            .entries
            .iter()
            .map(|entry| {
                let age = newest.saturating_sub(entry.seq) as f64;
                (entry.value, decay.powf(age))
            })
            .collect();

        let total: f64 = pairs.iter().map(|(_, w)| w).sum();
        let sum_sq: f64 = pairs.iter().map(|(_, w)| w * w).sum();
        let effective_n = if sum_sq > 0.0 { total * total / sum_sq } else { 0.0 };
        if effective_n < min_effective_n || total <= 0.0 {
            pairs.iter_mut().for_each(|(_, w)| *w = 1.0);
        }
        let total: f64 = pairs.iter().map(|(_, w)| w).sum();

        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let out = levels
            .iter()
            .map(|level| {
                let cutoff = level.clamp(0.0, 1.0) * total;
                // absorbs rounding in the running sum
                let slack = 1e-12 * total;
                let mut acc = 0.0;
                for (value, weight) in &pairs {
                    acc += weight;
                    if acc + slack >= cutoff {
                        return *value;
                    }
                }
                pairs.last().map_or(0.0, |(value, _)| *value)
            })
            .collect();
        Some(out)
    }
}

/// One calibrated band around a point forecast.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalBand {
    pub alpha: f64,
    pub radius: f64,
    pub low: f64,
    pub high: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalSet {
    /// Primary alpha first, then auxiliary alphas in configured order.
    pub bands: Vec<IntervalBand>,
    pub degraded: bool,
}

impl IntervalSet {
    pub fn primary(&self) -> Option<&IntervalBand> {
        self.bands.first()
    }

    pub fn by_key(&self) -> BTreeMap<String, [f64; 2]> {
        self.bands
            .iter()
            .map(|band| (alpha_key(band.alpha), [band.low, band.high]))
            .collect()
    }
}

/// Serializable calibration state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConformalState {
    pub global: ResidualBuffer,
    pub by_regime: BTreeMap<Regime, ResidualBuffer>,
}

/// Absolute-residual conformal calibrator with global and per-regime buffers.
#[derive(Clone, Debug)]
pub struct OnlineConformal {
    config: ConformalConfig,
    alphas: Vec<f64>,
    state: ConformalState,
}

impl OnlineConformal {
    pub fn new(config: ConformalConfig) -> Result<Self, RegimeError> {
        config.validate()?;
        let alphas = config.alphas();
        let state = ConformalState {
            global: ResidualBuffer::new(config.window),
            by_regime: Regime::ALL
                .iter()
                .map(|regime| (*regime, ResidualBuffer::new(config.window)))
                .collect(),
        };
        Ok(Self {
            config,
            alphas,
            state,
        })
    }

    pub fn config(&self) -> &ConformalConfig {
        &self.config
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn global(&self) -> &ResidualBuffer {
        &self.state.global
    }

    pub fn regime_buffer(&self, regime: Regime) -> Option<&ResidualBuffer> {
        self.state.by_regime.get(&regime)
    }

    /// Learns `|y_true - y_hat|` under the regime captured at prediction time.
    pub fn record(&mut self, y_hat: f64, y_true: f64, regime: Regime) {
        let residual = (y_true - y_hat).abs();
        if !residual.is_finite() {
            tracing::debug!(y_hat, y_true, "skipping non-finite conformal residual");
            return;
        }
        self.state.global.push(residual);
        self.state
            .by_regime
            .entry(regime)
            .or_insert_with(|| ResidualBuffer::new(self.config.window))
            .push(residual);
    }

    /// Calibrated radii for every configured alpha.
    ///
    /// `scale_hint` (typically the feature std) bounds the radius from below
    /// while no residual has been observed.
    pub fn radii(&self, regime: Regime, scale_hint: f64) -> (Vec<f64>, bool) {
        let levels: Vec<f64> = self.alphas.iter().map(|alpha| 1.0 - alpha).collect();
        let decay = self.config.decay;
        let min_eff = self.config.min_effective_n;
        let global = &self.state.global;

        let active = if self.config.per_regime {
            self.state.by_regime.get(&regime)
        } else {
            Some(global)
        };

        if let Some(active) = active
            && active.len() >= self.config.min_samples
            && let Some(local) = active.quantiles(&levels, decay, min_eff)
        {
            let global_q = global
                .quantiles(&levels, decay, min_eff)
                .unwrap_or_else(|| vec![0.0; levels.len()]);
            let radii = local
                .iter()
                .zip(&global_q)
                .map(|(local, global)| local.max(*global))
                .collect();
            return (radii, false);
        }

        let radii = match global.quantiles(&levels, decay, min_eff) {
            Some(global_q) => global_q
                .iter()
                .map(|q| q * self.config.cold_scale)
                .collect(),
            None => {
                let hint = if scale_hint.is_finite() { scale_hint.max(0.0) } else { 0.0 };
                vec![self.config.cold_radius.max(hint); levels.len()]
            }
        };
        (radii, true)
    }

    pub fn intervals(&self, y_hat: f64, regime: Regime, scale_hint: f64) -> IntervalSet {
        let (radii, degraded) = self.radii(regime, scale_hint);
        let bands = self
            .alphas
            .iter()
            .zip(radii)
            .map(|(alpha, radius)| IntervalBand {
                alpha: *alpha,
                radius,
                low: y_hat - radius,
                high: y_hat + radius,
            })
            .collect();
        IntervalSet { bands, degraded }
    }

    pub fn save_state(&self) -> ConformalState {
        self.state.clone()
    }

    pub fn load_state(&mut self, state: &ConformalState) -> Result<(), RegimeError> {
        let buffers = std::iter::once(&state.global).chain(state.by_regime.values());
        for buffer in buffers {
            if buffer.capacity != self.config.window || buffer.len() > buffer.capacity {
                return Err(RegimeError::invalid_input(format!(
                    "conformal buffer capacity {} (len {}) does not match window {}",
                    buffer.capacity,
                    buffer.len(),
                    self.config.window
                )));
            }
            if buffer.values().any(|value| !value.is_finite() || value < 0.0) {
                return Err(RegimeError::invalid_input(
                    "conformal buffer contains invalid residuals",
                ));
            }
        }
        self.state = state.clone();
        Ok(())
    }
}
