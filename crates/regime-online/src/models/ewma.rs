// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use super::{ForecastModel, ModelKind};
use crate::features::FeatureSnapshot;
use regime_core::{RegimeError, Tick};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EwmaConfig {
    pub alpha: f64,
}

impl Default for EwmaConfig {
    fn default() -> Self {
        Self { alpha: 0.2 }
    }
}

impl EwmaConfig {
    pub fn validate(&self) -> Result<(), RegimeError> {
        if !(self.alpha.is_finite() && self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(RegimeError::invalid_input(format!(
                "models.baseline.alpha must be finite and in (0,1]; got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// Always-available baseline: forecasts the current EMA, then folds `x` in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EwmaModel {
    config: EwmaConfig,
    ema: Option<f64>,
}

impl EwmaModel {
    pub fn new(config: EwmaConfig) -> Self {
        Self { config, ema: None }
    }

    pub fn level(&self) -> Option<f64> {
        self.ema
    }
}

impl ForecastModel for EwmaModel {
    fn kind(&self) -> ModelKind {
        ModelKind::Baseline
    }

    fn predict_update(&mut self, tick: &Tick, _features: &FeatureSnapshot) -> f64 {
        let y_hat = self.ema.unwrap_or(0.0);
        let a = self.config.alpha;
        self.ema = Some(match self.ema {
            None => tick.x,
            Some(ema) => a * tick.x + (1.0 - a) * ema,
        });
        y_hat
    }
}

#[cfg(test)]
mod tests {
    use super::{EwmaConfig, EwmaModel};
    use crate::models::ForecastModel;
    use crate::models::test_support::{snapshot, tick};

    #[test]
    fn forecast_uses_level_before_current_tick() {
        let mut model = EwmaModel::new(EwmaConfig { alpha: 0.5 });
        assert_eq!(model.predict_update(&tick(0, 4.0), &snapshot(4.0)), 0.0);
        assert_eq!(model.level(), Some(4.0));
        assert_eq!(model.predict_update(&tick(1, 2.0), &snapshot(2.0)), 4.0);
        assert_eq!(model.level(), Some(3.0));
    }

    #[test]
    fn alpha_must_be_in_unit_interval() {
        assert!(EwmaConfig { alpha: 0.0 }.validate().is_err());
        assert!(EwmaConfig { alpha: 1.5 }.validate().is_err());
        assert!(EwmaConfig { alpha: 1.0 }.validate().is_ok());
    }
}
