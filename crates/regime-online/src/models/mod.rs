// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

mod autoregressive;
mod ewma;
mod gradient;
mod linalg;

pub use autoregressive::{AutoregressiveConfig, AutoregressiveModel};
pub use ewma::{EwmaConfig, EwmaModel};
pub use gradient::{GradientConfig, GradientModel};

use crate::features::FeatureSnapshot;
use regime_core::{RegimeError, Tick};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Forecasting variants in fixed fallback precedence, richest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Gradient,
    Autoregressive,
    Baseline,
}

impl ModelKind {
    pub const PRECEDENCE: [ModelKind; 3] = [
        ModelKind::Gradient,
        ModelKind::Autoregressive,
        ModelKind::Baseline,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gradient => "gradient",
            Self::Autoregressive => "autoregressive",
            Self::Baseline => "baseline",
        }
    }

    /// Next variant to try when this one cannot be built.
    pub const fn fallback(self) -> Option<ModelKind> {
        match self {
            Self::Gradient => Some(Self::Autoregressive),
            Self::Autoregressive => Some(Self::Baseline),
            Self::Baseline => None,
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-step-ahead forecaster contract.
///
/// `predict_update` returns the forecast for the tick after `tick`, then folds
/// `tick` into the model using nothing newer than `tick` itself.
pub trait ForecastModel {
    fn kind(&self) -> ModelKind;
    fn predict_update(&mut self, tick: &Tick, features: &FeatureSnapshot) -> f64;
}

/// Closed set of resolved forecasting variants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    Gradient(GradientModel),
    Autoregressive(AutoregressiveModel),
    Baseline(EwmaModel),
}

impl ForecastModel for Model {
    fn kind(&self) -> ModelKind {
        match self {
            Self::Gradient(_) => ModelKind::Gradient,
            Self::Autoregressive(_) => ModelKind::Autoregressive,
            Self::Baseline(_) => ModelKind::Baseline,
        }
    }

    fn predict_update(&mut self, tick: &Tick, features: &FeatureSnapshot) -> f64 {
        let y_hat = match self {
            Self::Gradient(model) => model.predict_update(tick, features),
            Self::Autoregressive(model) => model.predict_update(tick, features),
            Self::Baseline(model) => model.predict_update(tick, features),
        };
        // a non-finite forecast degrades to the naive random walk
        if y_hat.is_finite() { y_hat } else { tick.x }
    }
}

/// Which optional variants this build can construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub autoregressive: bool,
    pub gradient: bool,
}

impl Capabilities {
    /// Capabilities compiled into this build.
    pub const fn detect() -> Self {
        Self {
            autoregressive: cfg!(feature = "autoregressive"),
            gradient: cfg!(feature = "gradient"),
        }
    }

    pub const fn baseline_only() -> Self {
        Self {
            autoregressive: false,
            gradient: false,
        }
    }

    fn supports(self, kind: ModelKind) -> bool {
        match kind {
            ModelKind::Gradient => self.gradient,
            ModelKind::Autoregressive => self.autoregressive,
            ModelKind::Baseline => true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// Model selection and per-variant parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Variants to run every tick; each falls back along the precedence chain.
    pub enabled: Vec<ModelKind>,
    pub baseline: EwmaConfig,
    pub autoregressive: AutoregressiveConfig,
    pub gradient: GradientConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: vec![
                ModelKind::Baseline,
                ModelKind::Autoregressive,
                ModelKind::Gradient,
            ],
            baseline: EwmaConfig::default(),
            autoregressive: AutoregressiveConfig::default(),
            gradient: GradientConfig::default(),
        }
    }
}

impl ModelConfig {
    fn check(&self, kind: ModelKind) -> Result<(), RegimeError> {
        match kind {
            ModelKind::Gradient => self.gradient.validate(),
            ModelKind::Autoregressive => self.autoregressive.validate(),
            ModelKind::Baseline => self.baseline.validate(),
        }
    }
}

/// Model set resolved once against build capabilities and config validity.
///
/// Building from a plan never fails, so the per-tick path has no fallback
/// branches.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelPlan {
    kinds: Vec<ModelKind>,
    config: ModelConfig,
}

impl ModelPlan {
    pub fn resolve(config: &ModelConfig, capabilities: Capabilities) -> Self {
        let mut config = config.clone();
        if let Err(err) = config.baseline.validate() {
            tracing::warn!(error = %err, "baseline config invalid; using defaults");
            config.baseline = EwmaConfig::default();
        }

        let requested = if config.enabled.is_empty() {
            vec![ModelKind::Baseline]
        } else {
            config.enabled.clone()
        };

        let mut kinds: Vec<ModelKind> = Vec::with_capacity(requested.len());
        for want in requested {
            let mut candidate = Some(want);
            while let Some(kind) = candidate {
                let unavailable = if !capabilities.supports(kind) {
                    Some("capability not compiled in".to_string())
                } else {
                    config.check(kind).err().map(|err| err.to_string())
                };
                match unavailable {
                    None => break,
                    Some(reason) => {
                        let next = kind.fallback();
                        tracing::warn!(
                            requested = want.as_str(),
                            unavailable = kind.as_str(),
                            fallback = next.map_or("none", ModelKind::as_str),
                            reason = %reason,
                            "forecast model unavailable; falling back"
                        );
                        candidate = next;
                    }
                }
            }
            let resolved = candidate.unwrap_or(ModelKind::Baseline);
            if !kinds.contains(&resolved) {
                kinds.push(resolved);
            }
        }

        Self { kinds, config }
    }

    pub fn kinds(&self) -> &[ModelKind] {
        &self.kinds
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Fresh model instances in plan order.
    pub fn build(&self, covariate_count: usize) -> Vec<Model> {
        self.kinds
            .iter()
            .map(|kind| match kind {
                ModelKind::Gradient => Model::Gradient(GradientModel::new(
                    self.config.gradient.clone(),
                    covariate_count,
                )),
                ModelKind::Autoregressive => Model::Autoregressive(AutoregressiveModel::new(
                    self.config.autoregressive.clone(),
                )),
                ModelKind::Baseline => Model::Baseline(EwmaModel::new(self.config.baseline.clone())),
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::features::FeatureSnapshot;
    use regime_core::{Tick, Timestamp};

    pub fn tick(t: i64, x: f64) -> Tick {
        Tick::new(Timestamp::from_unix_nanos(t), x)
    }

    pub fn snapshot(x: f64) -> FeatureSnapshot {
        FeatureSnapshot {
            x,
            mean: x,
            variance: 0.0,
            std: 0.0,
            z: 0.0,
            ewm_vol: 0.0,
            rv: 0.0,
            ac1: 0.0,
            count: 1,
            warmup: false,
            missing_covariates: false,
            covariates: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{snapshot, tick};
    use super::{
        AutoregressiveConfig, Capabilities, ForecastModel, GradientConfig, ModelConfig, ModelKind,
        ModelPlan,
    };

    #[test]
    fn full_capabilities_keep_requested_order() {
        let plan = ModelPlan::resolve(
            &ModelConfig::default(),
            Capabilities {
                autoregressive: true,
                gradient: true,
            },
        );
        assert_eq!(
            plan.kinds(),
            &[
                ModelKind::Baseline,
                ModelKind::Autoregressive,
                ModelKind::Gradient
            ]
        );
    }

    #[test]
    fn missing_capabilities_fall_back_and_dedupe() {
        let plan = ModelPlan::resolve(&ModelConfig::default(), Capabilities::baseline_only());
        assert_eq!(plan.kinds(), &[ModelKind::Baseline]);

        let plan = ModelPlan::resolve(
            &ModelConfig {
                enabled: vec![ModelKind::Gradient],
                ..ModelConfig::default()
            },
            Capabilities {
                autoregressive: true,
                gradient: false,
            },
        );
        assert_eq!(plan.kinds(), &[ModelKind::Autoregressive]);
    }

    #[test]
    fn invalid_variant_config_falls_back_down_the_chain() {
        let plan = ModelPlan::resolve(
            &ModelConfig {
                enabled: vec![ModelKind::Gradient],
                gradient: GradientConfig {
                    window: 0,
                    ..GradientConfig::default()
                },
                autoregressive: AutoregressiveConfig {
                    order: 0,
                    ..AutoregressiveConfig::default()
                },
                ..ModelConfig::default()
            },
            Capabilities::detect(),
        );
        assert_eq!(plan.kinds(), &[ModelKind::Baseline]);
    }

    #[test]
    fn empty_request_resolves_to_baseline() {
        let plan = ModelPlan::resolve(
            &ModelConfig {
                enabled: vec![],
                ..ModelConfig::default()
            },
            Capabilities::detect(),
        );
        assert_eq!(plan.kinds(), &[ModelKind::Baseline]);
    }

    #[test]
    fn built_models_match_plan_and_forecast_finite_values() {
        let plan = ModelPlan::resolve(
            &ModelConfig::default(),
            Capabilities {
                autoregressive: true,
                gradient: true,
            },
        );
        let mut models = plan.build(0);
        assert_eq!(models.len(), 3);
        for (model, kind) in models.iter().zip(plan.kinds()) {
            assert_eq!(model.kind(), *kind);
        }
        for i in 0..50 {
            let x = (i as f64 * 0.2).sin();
            for model in &mut models {
                assert!(model.predict_update(&tick(i, x), &snapshot(x)).is_finite());
            }
        }
    }
}
