// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::models::ModelKind;
use regime_core::{MIN_SCALE, RegimeError};
use serde::{Deserialize, Serialize};

/// Model-routing policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub default_model: ModelKind,
    /// Minimum ticks between consecutive switches.
    pub dwell_min: usize,
    /// Relative loss improvement a candidate must exceed.
    pub switch_threshold: f64,
    /// Extra margin added to `switch_threshold` against flapping.
    pub switch_penalty: f64,
    pub freeze_on_recent_cp: bool,
    pub freeze_ticks: usize,
    /// EWMA smoothing of per-model absolute error.
    pub loss_alpha: f64,
    /// Losses a model must have accumulated before it can be compared.
    pub min_loss_samples: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_model: ModelKind::Baseline,
            dwell_min: 20,
            switch_threshold: 0.05,
            switch_penalty: 0.02,
            freeze_on_recent_cp: true,
            freeze_ticks: 10,
            loss_alpha: 0.05,
            min_loss_samples: 10,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if !self.switch_threshold.is_finite() || self.switch_threshold < 0.0 {
            return Err(RegimeError::invalid_input(format!(
                "router.switch_threshold must be finite and >= 0; got {}",
                self.switch_threshold
            )));
        }
        if !self.switch_penalty.is_finite() || self.switch_penalty < 0.0 {
            return Err(RegimeError::invalid_input(format!(
                "router.switch_penalty must be finite and >= 0; got {}",
                self.switch_penalty
            )));
        }
        if !(self.loss_alpha.is_finite() && self.loss_alpha > 0.0 && self.loss_alpha <= 1.0) {
            return Err(RegimeError::invalid_input(format!(
                "router.loss_alpha must be finite and in (0,1]; got {}",
                self.loss_alpha
            )));
        }
        Ok(())
    }
}

/// Smoothed absolute-error loss for one model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossTracker {
    pub ewma: f64,
    pub samples: u64,
}

impl LossTracker {
    fn observe(&mut self, loss: f64, alpha: f64) {
        self.ewma = if self.samples == 0 {
            loss
        } else {
            alpha * loss + (1.0 - alpha) * self.ewma
        };
        self.samples = self.samples.saturating_add(1);
    }
}

/// Serializable router state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouterState {
    pub active: usize,
    pub ticks_since_switch: u64,
    pub freeze_remaining: usize,
    pub losses: Vec<LossTracker>,
    pub switches: u64,
}

/// Outcome of one routing decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteDecision {
    pub active: usize,
    pub switched: bool,
    pub frozen: bool,
}

/// Hysteretic model selector over a fixed, resolved model list.
#[derive(Clone, Debug)]
pub struct Router {
    config: RouterConfig,
    kinds: Vec<ModelKind>,
    state: RouterState,
}

impl Router {
    /// `kinds` lists the resolved models in the order the pipeline evaluates them.
    pub fn new(config: RouterConfig, kinds: Vec<ModelKind>) -> Result<Self, RegimeError> {
        config.validate()?;
        if kinds.is_empty() {
            return Err(RegimeError::invalid_input(
                "router requires at least one resolved model",
            ));
        }
        let active = kinds
            .iter()
            .position(|kind| *kind == config.default_model)
            .unwrap_or(0);
        let state = RouterState {
            active,
            ticks_since_switch: 0,
            freeze_remaining: 0,
            losses: vec![LossTracker::default(); kinds.len()],
            switches: 0,
        };
        Ok(Self {
            config,
            kinds,
            state,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn state(&self) -> &RouterState {
        &self.state
    }

    pub fn active(&self) -> usize {
        self.state.active
    }

    pub fn active_kind(&self) -> ModelKind {
        self.kinds[self.state.active]
    }

    pub fn kinds(&self) -> &[ModelKind] {
        &self.kinds
    }

    /// Advances one tick and picks the model whose forecast is published.
    pub fn select(&mut self, change_spike: bool) -> RouteDecision {
        let state = &mut self.state;
        state.ticks_since_switch = state.ticks_since_switch.saturating_add(1);

        if change_spike && self.config.freeze_on_recent_cp {
            state.freeze_remaining = self.config.freeze_ticks;
        }
        if state.freeze_remaining > 0 {
            state.freeze_remaining -= 1;
            return RouteDecision {
                active: state.active,
                switched: false,
                frozen: true,
            };
        }

        let hold = RouteDecision {
            active: state.active,
            switched: false,
            frozen: false,
        };
        if state.ticks_since_switch < self.config.dwell_min as u64 {
            return hold;
        }

        let current = state.losses[state.active];
        if current.samples < self.config.min_loss_samples {
            return hold;
        }
        let best = state
            .losses
            .iter()
            .enumerate()
            .filter(|(idx, loss)| {
                *idx != state.active && loss.samples >= self.config.min_loss_samples
            })
            .min_by(|(_, a), (_, b)| a.ewma.total_cmp(&b.ewma));
        let Some((candidate, candidate_loss)) = best else {
            return hold;
        };

        let improvement = (current.ewma - candidate_loss.ewma) / current.ewma.max(MIN_SCALE);
        if improvement <= self.config.switch_threshold + self.config.switch_penalty {
            return hold;
        }

        tracing::debug!(
            from = self.kinds[state.active].as_str(),
            to = self.kinds[candidate].as_str(),
            improvement,
            "router switching active model"
        );
        state.active = candidate;
        state.ticks_since_switch = 0;
        state.switches = state.switches.saturating_add(1);
        RouteDecision {
            active: candidate,
            switched: true,
            frozen: false,
        }
    }

    /// Learns per-model losses from forecasts made for a now-observed truth.
    pub fn observe_truth(&mut self, forecasts: &[f64], y_true: f64) {
        let alpha = self.config.loss_alpha;
        for (tracker, y_hat) in self.state.losses.iter_mut().zip(forecasts) {
            let loss = (y_true - y_hat).abs();
            if loss.is_finite() {
                tracker.observe(loss, alpha);
            }
        }
    }

    pub fn save_state(&self) -> RouterState {
        self.state.clone()
    }

    pub fn load_state(&mut self, state: &RouterState) -> Result<(), RegimeError> {
        if state.losses.len() != self.kinds.len() || state.active >= self.kinds.len() {
            return Err(RegimeError::invalid_input(format!(
                "router state covers {} models (active={}); pipeline resolved {}",
                state.losses.len(),
                state.active,
                self.kinds.len()
            )));
        }
        self.state = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Router, RouterConfig};
    use crate::models::ModelKind;
    use proptest::prelude::*;

    fn kinds() -> Vec<ModelKind> {
        vec![
            ModelKind::Gradient,
            ModelKind::Autoregressive,
            ModelKind::Baseline,
        ]
    }

    fn router(config: RouterConfig) -> Router {
        Router::new(config, kinds()).expect("config should be valid")
    }

    #[test]
    fn starts_on_default_model_or_first_resolved() {
        let r = router(RouterConfig::default());
        assert_eq!(r.active_kind(), ModelKind::Baseline);

        let fallback = Router::new(
            RouterConfig {
                default_model: ModelKind::Gradient,
                ..RouterConfig::default()
            },
            vec![ModelKind::Autoregressive, ModelKind::Baseline],
        )
        .expect("valid");
        assert_eq!(fallback.active(), 0);
    }

    #[test]
    fn switches_to_clearly_better_model_after_dwell() {
        let mut r = router(RouterConfig {
            dwell_min: 5,
            min_loss_samples: 3,
            freeze_on_recent_cp: false,
            ..RouterConfig::default()
        });
        let mut switched_at = None;
        for tick in 0..20 {
            let decision = r.select(false);
            if decision.switched {
                switched_at = Some(tick);
                break;
            }
            // gradient is perfect, baseline is off by one
            r.observe_truth(&[1.0, 1.5, 2.0], 1.0);
        }
        let tick = switched_at.expect("router should switch");
        assert!(tick >= 4, "switched before dwell elapsed: {tick}");
        assert_eq!(r.active_kind(), ModelKind::Gradient);
        assert_eq!(r.state().switches, 1);
    }

    #[test]
    fn marginal_improvement_does_not_switch() {
        let mut r = router(RouterConfig {
            dwell_min: 1,
            min_loss_samples: 1,
            switch_threshold: 0.05,
            switch_penalty: 0.02,
            freeze_on_recent_cp: false,
            ..RouterConfig::default()
        });
        for _ in 0..50 {
            // 5% better is within threshold + penalty
            r.observe_truth(&[0.95, 0.97, 1.0], 0.0);
            assert!(!r.select(false).switched);
        }
        assert_eq!(r.active_kind(), ModelKind::Baseline);
    }

    #[test]
    fn change_spike_freezes_switching() {
        let mut r = router(RouterConfig {
            dwell_min: 1,
            min_loss_samples: 1,
            freeze_ticks: 6,
            ..RouterConfig::default()
        });
        r.observe_truth(&[0.0, 0.5, 1.0], 0.0);

        let first = r.select(true);
        assert!(first.frozen && !first.switched);
        for _ in 0..5 {
            let decision = r.select(false);
            assert!(decision.frozen, "router should stay frozen");
            assert_eq!(decision.active, 2);
        }
        let after = r.select(false);
        assert!(!after.frozen);
        assert!(after.switched);
        assert_eq!(r.active_kind(), ModelKind::Gradient);
    }

    #[test]
    fn requires_min_loss_samples_on_both_sides() {
        let mut r = router(RouterConfig {
            dwell_min: 1,
            min_loss_samples: 5,
            freeze_on_recent_cp: false,
            ..RouterConfig::default()
        });
        for _ in 0..4 {
            r.observe_truth(&[0.0, 0.0, 10.0], 0.0);
            assert!(!r.select(false).switched);
        }
        r.observe_truth(&[0.0, 0.0, 10.0], 0.0);
        assert!(r.select(false).switched);
    }

    #[test]
    fn state_roundtrip_and_shape_validation() {
        let mut r = router(RouterConfig::default());
        r.observe_truth(&[1.0, 2.0, 3.0], 2.0);
        let state = r.save_state();
        let mut other = router(RouterConfig::default());
        other.load_state(&state).expect("same shape loads");
        assert_eq!(other.state(), r.state());

        let mut narrow = Router::new(RouterConfig::default(), vec![ModelKind::Baseline])
            .expect("valid");
        assert!(narrow.load_state(&state).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn no_switch_within_dwell_min(
            dwell_min in 1usize..30,
            errors in prop::collection::vec(
                (0.0f64..5.0, 0.0f64..5.0, 0.0f64..5.0, any::<bool>()),
                1..300,
            ),
        ) {
            let mut r = Router::new(RouterConfig {
                dwell_min,
                min_loss_samples: 1,
                switch_threshold: 0.0,
                switch_penalty: 0.0,
                loss_alpha: 0.5,
                ..RouterConfig::default()
            }, kinds()).expect("valid config");

            let mut last_switch: Option<usize> = None;
            for (tick, (a, b, c, spike)) in errors.into_iter().enumerate() {
                let decision = r.select(spike && tick % 17 == 0);
                if decision.switched {
                    if let Some(prev) = last_switch {
                        prop_assert!(tick - prev >= dwell_min, "switch at {} after {}", tick, prev);
                    }
                    prop_assert!(tick + 1 >= dwell_min);
                    last_switch = Some(tick);
                }
                r.observe_truth(&[a, b, c], 0.0);
            }
        }
    }
}
