// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use regime_core::{
    OnlineDetector, OnlineStepResult, Regime, RegimeError, clamp_scale, log_add_exp, log_sum_exp,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Stable detector identifier used in checkpoint envelopes.
pub const BOCPD_DETECTOR_ID: &str = "bocpd";
/// BOCPD checkpoint state schema version.
pub const BOCPD_STATE_SCHEMA_VERSION: u32 = 1;

/// Hazard-function contract used by BOCPD run-length transitions.
pub trait HazardFunction: Send + Sync {
    fn log_hazard(&self, r: usize) -> f64;
    fn log_survival(&self, r: usize) -> f64;
}

/// Constant hazard: `h(r) = p_change`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantHazard {
    p_change: f64,
}

impl ConstantHazard {
    pub fn new(p_change: f64) -> Result<Self, RegimeError> {
        let hazard = Self { p_change };
        hazard.validate()?;
        Ok(hazard)
    }

    pub fn p_change(&self) -> f64 {
        self.p_change
    }

    fn validate(&self) -> Result<(), RegimeError> {
        if !(self.p_change.is_finite() && 0.0 < self.p_change && self.p_change < 1.0) {
            return Err(RegimeError::invalid_input(format!(
                "constant hazard p_change must be finite and in (0,1); got {}",
                self.p_change
            )));
        }
        Ok(())
    }
}

impl HazardFunction for ConstantHazard {
    fn log_hazard(&self, _r: usize) -> f64 {
        self.p_change.ln()
    }

    fn log_survival(&self, _r: usize) -> f64 {
        (-self.p_change).ln_1p()
    }
}

/// Geometric hazard parameterized by mean run length.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometricHazard {
    mean_run_length: f64,
}

impl GeometricHazard {
    pub fn new(mean_run_length: f64) -> Result<Self, RegimeError> {
        let hazard = Self { mean_run_length };
        hazard.validate()?;
        Ok(hazard)
    }

    pub fn mean_run_length(&self) -> f64 {
        self.mean_run_length
    }

    fn p_change(&self) -> f64 {
        1.0 / self.mean_run_length
    }

    fn validate(&self) -> Result<(), RegimeError> {
        if !self.mean_run_length.is_finite() || self.mean_run_length <= 1.0 {
            return Err(RegimeError::invalid_input(format!(
                "geometric hazard mean_run_length must be finite and > 1; got {}",
                self.mean_run_length
            )));
        }
        Ok(())
    }
}

impl HazardFunction for GeometricHazard {
    fn log_hazard(&self, _r: usize) -> f64 {
        self.p_change().ln()
    }

    fn log_survival(&self, _r: usize) -> f64 {
        (-self.p_change()).ln_1p()
    }
}

/// Built-in hazard variants for BOCPD.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HazardSpec {
    Constant(ConstantHazard),
    Geometric(GeometricHazard),
}

impl Default for HazardSpec {
    fn default() -> Self {
        Self::Constant(ConstantHazard {
            p_change: 1.0 / 200.0,
        })
    }
}

impl HazardSpec {
    fn validate(&self) -> Result<(), RegimeError> {
        match self {
            Self::Constant(h) => h.validate(),
            Self::Geometric(h) => h.validate(),
        }
    }
}

impl HazardFunction for HazardSpec {
    fn log_hazard(&self, r: usize) -> f64 {
        match self {
            Self::Constant(h) => h.log_hazard(r),
            Self::Geometric(h) => h.log_hazard(r),
        }
    }

    fn log_survival(&self, r: usize) -> f64 {
        match self {
            Self::Constant(h) => h.log_survival(r),
            Self::Geometric(h) => h.log_survival(r),
        }
    }
}

/// Normal-Inverse-Gamma prior for the Gaussian observation model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianNigPrior {
    pub mu0: f64,
    pub kappa0: f64,
    pub alpha0: f64,
    pub beta0: f64,
}

impl Default for GaussianNigPrior {
    fn default() -> Self {
        Self {
            mu0: 0.0,
            kappa0: 1.0,
            alpha0: 1.0,
            beta0: 1.0,
        }
    }
}

impl GaussianNigPrior {
    fn validate(&self) -> Result<(), RegimeError> {
        if !self.mu0.is_finite() {
            return Err(RegimeError::invalid_input("gaussian prior mu0 must be finite"));
        }
        if !self.kappa0.is_finite() || self.kappa0 <= 0.0 {
            return Err(RegimeError::invalid_input(
                "gaussian prior kappa0 must be finite and > 0",
            ));
        }
        if !self.alpha0.is_finite() || self.alpha0 <= 0.0 {
            return Err(RegimeError::invalid_input(
                "gaussian prior alpha0 must be finite and > 0",
            ));
        }
        if !self.beta0.is_finite() || self.beta0 <= 0.0 {
            return Err(RegimeError::invalid_input(
                "gaussian prior beta0 must be finite and > 0",
            ));
        }
        Ok(())
    }

    fn posterior(&self) -> NigPosterior {
        NigPosterior {
            mu: self.mu0,
            kappa: self.kappa0,
            alpha: self.alpha0,
            beta: self.beta0,
        }
    }
}

/// Conjugate posterior parameters attached to one run length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NigPosterior {
    pub mu: f64,
    pub kappa: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl NigPosterior {
    fn updated(&self, x: f64) -> Self {
        let kappa = self.kappa + 1.0;
        let delta = x - self.mu;
        Self {
            mu: (self.kappa * self.mu + x) / kappa,
            kappa,
            alpha: self.alpha + 0.5,
            beta: self.beta + self.kappa * delta * delta / (2.0 * kappa),
        }
    }

    /// Student-t predictive log-density of `x`; degenerate scales are clamped.
    fn log_predictive(&self, x: f64) -> f64 {
        let alpha = clamp_scale(self.alpha);
        let kappa = clamp_scale(self.kappa);
        let nu = 2.0 * alpha;
        let scale_sq = clamp_scale(clamp_scale(self.beta) * (kappa + 1.0) / (alpha * kappa));

        let z = (x - self.mu).powi(2) / (nu * scale_sq);
        let log_norm = ln_gamma(0.5 * (nu + 1.0))
            - ln_gamma(0.5 * nu)
            - 0.5 * (nu.ln() + PI.ln() + scale_sq.ln());
        let out = log_norm - 0.5 * (nu + 1.0) * z.ln_1p();
        if out.is_finite() { out } else { f64::MIN }
    }

    fn is_valid(&self) -> bool {
        self.mu.is_finite()
            && self.kappa.is_finite()
            && self.kappa > 0.0
            && self.alpha.is_finite()
            && self.alpha > 0.0
            && self.beta.is_finite()
            && self.beta > 0.0
    }
}

/// Alarm policy that turns the continuous score into a regime label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicy {
    /// Score at or above which a calm series flips to volatile.
    pub threshold: f64,
    /// Margin below `threshold` required to return to calm.
    pub hysteresis: f64,
    /// Ticks after an alarm during which the label is held and re-alarming suppressed.
    pub cooldown: usize,
    /// Observations required before any alarm can fire.
    pub min_run: usize,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            hysteresis: 0.1,
            cooldown: 10,
            min_run: 10,
        }
    }
}

impl AlertPolicy {
    fn validate(&self) -> Result<(), RegimeError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 1.0 {
            return Err(RegimeError::invalid_input(format!(
                "alert threshold must be finite and in (0,1]; got {}",
                self.threshold
            )));
        }
        if !self.hysteresis.is_finite()
            || self.hysteresis < 0.0
            || self.hysteresis >= self.threshold
        {
            return Err(RegimeError::invalid_input(format!(
                "alert hysteresis must be finite and in [0, threshold); got {}",
                self.hysteresis
            )));
        }
        Ok(())
    }
}

/// Regime labelling state carried between ticks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub regime: Regime,
    pub cooldown_remaining: usize,
    pub last_alert_t: Option<usize>,
    pub alerts: u64,
}

/// Serializable BOCPD state for checkpoint/restore.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BocpdState {
    pub t: usize,
    pub log_run_probs: Vec<f64>,
    pub run_stats: Vec<NigPosterior>,
    #[serde(default)]
    pub alert: AlertState,
}

impl BocpdState {
    fn new(prior: &GaussianNigPrior) -> Self {
        Self {
            t: 0,
            log_run_probs: vec![0.0],
            run_stats: vec![prior.posterior()],
            alert: AlertState::default(),
        }
    }

    pub(crate) fn validate(&self, max_run_length: usize) -> Result<(), RegimeError> {
        if self.log_run_probs.is_empty() {
            return Err(RegimeError::invalid_input(
                "bocpd state requires at least one run-length probability",
            ));
        }
        if self.log_run_probs.len() != self.run_stats.len() {
            return Err(RegimeError::invalid_input(format!(
                "bocpd state length mismatch: log_run_probs={}, run_stats={}",
                self.log_run_probs.len(),
                self.run_stats.len()
            )));
        }
        if self.log_run_probs.len() > max_run_length + 1 {
            return Err(RegimeError::invalid_input(format!(
                "bocpd state holds {} run lengths; max_run_length is {max_run_length}",
                self.log_run_probs.len()
            )));
        }
        if self.log_run_probs.iter().any(|value| value.is_nan()) {
            return Err(RegimeError::invalid_input(
                "bocpd state contains NaN run-length log probability",
            ));
        }
        if !self.run_stats.iter().all(NigPosterior::is_valid) {
            return Err(RegimeError::invalid_input(
                "bocpd state contains an invalid run posterior",
            ));
        }
        Ok(())
    }
}

/// BOCPD configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BocpdConfig {
    pub hazard: HazardSpec,
    pub prior: GaussianNigPrior,
    /// Run-length cap; tail mass beyond it folds into the boundary entry.
    pub max_run_length: usize,
    /// Run lengths below this count as "recent" for the score.
    pub recent_window: usize,
    pub alert: AlertPolicy,
}

impl Default for BocpdConfig {
    fn default() -> Self {
        Self {
            hazard: HazardSpec::default(),
            prior: GaussianNigPrior::default(),
            max_run_length: 500,
            recent_window: 5,
            alert: AlertPolicy::default(),
        }
    }
}

impl BocpdConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        self.hazard.validate()?;
        self.prior.validate()?;
        self.alert.validate()?;

        if self.max_run_length < 1 {
            return Err(RegimeError::invalid_input(
                "max_run_length must be >= 1 for bounded BOCPD state",
            ));
        }
        if self.recent_window < 1 || self.recent_window > self.max_run_length {
            return Err(RegimeError::invalid_input(format!(
                "recent_window must be in [1, max_run_length]; got {}",
                self.recent_window
            )));
        }
        Ok(())
    }
}

/// Bayesian Online Change Point Detection over a Gaussian stream.
#[derive(Clone, Debug)]
pub struct BocpdDetector {
    config: BocpdConfig,
    state: BocpdState,
}

impl BocpdDetector {
    pub fn new(config: BocpdConfig) -> Result<Self, RegimeError> {
        config.validate()?;
        let state = BocpdState::new(&config.prior);
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &BocpdConfig {
        &self.config
    }

    pub fn state(&self) -> &BocpdState {
        &self.state
    }

    /// Run-length posterior in linear space, indexed by run length.
    pub fn run_length_probs(&self) -> Vec<f64> {
        self.state
            .log_run_probs
            .iter()
            .map(|value| value.exp())
            .collect()
    }

    /// Applies one finite observation.
    ///
    /// Callers are expected to have validated `x`; non-finite values are
    /// rejected by [`OnlineDetector::update`].
    pub fn observe(&mut self, x: f64) -> OnlineStepResult {
        self.apply_observation(x);
        let t = self.state.t.saturating_sub(1);
        let score = recent_mass(&self.state.log_run_probs, self.config.recent_window);
        let (alert, alert_reason) = self.apply_alert_policy(score);

        OnlineStepResult {
            t,
            p_change: self
                .state
                .log_run_probs
                .first()
                .map_or(1.0, |value| value.exp().clamp(0.0, 1.0)),
            score,
            alert,
            alert_reason,
            regime: self.state.alert.regime,
            run_length_mode: argmax_index(&self.state.log_run_probs),
            run_length_mean: run_length_expectation(&self.state.log_run_probs),
        }
    }

    fn apply_observation(&mut self, x: f64) {
        let prior = self.config.prior.posterior();
        let hazard = &self.config.hazard;
        let prev_len = self.state.log_run_probs.len();
        let keep_len = prev_len
            .saturating_add(1)
            .min(self.config.max_run_length.saturating_add(1));

        let mut next_log_probs = Vec::with_capacity(keep_len);
        let mut next_stats = Vec::with_capacity(keep_len);
        next_log_probs.push(f64::NEG_INFINITY);
        next_stats.push(prior);

        let mut cp_mass = f64::NEG_INFINITY;
        for run_length in 0..prev_len {
            let stats = &self.state.run_stats[run_length];
            let joint = self.state.log_run_probs[run_length] + stats.log_predictive(x);
            cp_mass = log_add_exp(cp_mass, joint + hazard.log_hazard(run_length));

            let growth = joint + hazard.log_survival(run_length);
            let grown = stats.updated(x);
            if next_log_probs.len() < keep_len {
                next_log_probs.push(growth);
                next_stats.push(grown);
            } else {
                // Fold overflow into r = R_max, keeping the dominant contributor's posterior.
                let boundary = next_log_probs.len() - 1;
                if growth > next_log_probs[boundary] {
                    next_stats[boundary] = grown;
                }
                next_log_probs[boundary] = log_add_exp(next_log_probs[boundary], growth);
            }
        }
        next_log_probs[0] = cp_mass;

        let normalizer = log_sum_exp(&next_log_probs);
        if normalizer.is_finite() {
            for value in &mut next_log_probs {
                *value -= normalizer;
            }
        } else {
            tracing::warn!(
                t = self.state.t,
                "bocpd normalization degenerated; restarting run-length posterior"
            );
            next_log_probs = vec![0.0];
            next_stats = vec![prior];
        }

        self.state.t = self.state.t.saturating_add(1);
        self.state.log_run_probs = next_log_probs;
        self.state.run_stats = next_stats;
    }

    fn apply_alert_policy(&mut self, score: f64) -> (bool, Option<String>) {
        let policy = &self.config.alert;
        let t = self.state.t;
        let alert_state = &mut self.state.alert;

        if alert_state.cooldown_remaining > 0 {
            alert_state.cooldown_remaining -= 1;
            return (false, None);
        }
        if t < policy.min_run {
            return (false, None);
        }

        match alert_state.regime {
            Regime::Calm if score >= policy.threshold => {
                alert_state.regime = Regime::Volatile;
                alert_state.cooldown_remaining = policy.cooldown;
                alert_state.last_alert_t = Some(t.saturating_sub(1));
                alert_state.alerts = alert_state.alerts.saturating_add(1);
                (
                    true,
                    Some(format!(
                        "bocpd recent-change score {score:.6} >= threshold {:.6}",
                        policy.threshold
                    )),
                )
            }
            Regime::Volatile if score < policy.threshold - policy.hysteresis => {
                alert_state.regime = Regime::Calm;
                (false, None)
            }
            _ => (false, None),
        }
    }
}

impl OnlineDetector for BocpdDetector {
    type State = BocpdState;

    fn reset(&mut self) {
        self.state = BocpdState::new(&self.config.prior);
    }

    fn update(&mut self, x_t: f64) -> Result<OnlineStepResult, RegimeError> {
        if !x_t.is_finite() {
            return Err(RegimeError::invalid_input(
                "BOCPD observation must be finite for update",
            ));
        }
        Ok(self.observe(x_t))
    }

    fn save_state(&self) -> Self::State {
        self.state.clone()
    }

    fn load_state(&mut self, state: &Self::State) -> Result<(), RegimeError> {
        state.validate(self.config.max_run_length)?;
        self.state = state.clone();
        Ok(())
    }
}

fn recent_mass(log_probs: &[f64], recent_window: usize) -> f64 {
    log_probs
        .iter()
        .take(recent_window)
        .map(|value| value.exp())
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

fn argmax_index(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn run_length_expectation(log_probs: &[f64]) -> f64 {
    log_probs
        .iter()
        .enumerate()
        .map(|(idx, log_prob)| idx as f64 * log_prob.exp())
        .sum()
}

fn ln_gamma(z: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if z <= 0.0 || !z.is_finite() {
        return f64::NAN;
    }

    if z < 0.5 {
        let sin_term = (PI * z).sin();
        if sin_term == 0.0 {
            return f64::INFINITY;
        }
        return PI.ln() - sin_term.ln() - ln_gamma(1.0 - z);
    }

    let x = z - 1.0;
    let mut acc = COEFFS[0];
    for (idx, coeff) in COEFFS.iter().enumerate().skip(1) {
        acc += coeff / (x + idx as f64);
    }

    let t = x + 7.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}
