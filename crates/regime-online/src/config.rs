// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::bocpd::BocpdConfig;
use crate::conformal::ConformalConfig;
use crate::features::FeatureConfig;
use crate::models::ModelConfig;
use crate::router::RouterConfig;
use regime_core::RegimeError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PENDING_CAP: usize = 4_096;

/// Aggregated per-series engine configuration.
///
/// Every section deserializes with defaults, so a partial document such as
/// `{"conformal": {"primary_alpha": 0.2}}` is a complete config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub features: FeatureConfig,
    pub detector: BocpdConfig,
    pub router: RouterConfig,
    pub models: ModelConfig,
    pub conformal: ConformalConfig,
    /// Upper bound on unresolved forecasts held by one pipeline.
    pub pending_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            detector: BocpdConfig::default(),
            router: RouterConfig::default(),
            models: ModelConfig::default(),
            conformal: ConformalConfig::default(),
            pending_cap: DEFAULT_PENDING_CAP,
        }
    }
}

impl EngineConfig {
    /// Validates every section. Model sections are not checked here: an invalid
    /// variant falls back when the model plan is resolved.
    pub fn validate(&self) -> Result<(), RegimeError> {
        self.features.validate()?;
        self.detector.validate()?;
        self.router.validate()?;
        self.conformal.validate()?;
        if self.pending_cap == 0 {
            return Err(RegimeError::invalid_input("pending_cap must be >= 1"));
        }
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RegimeError> {
        let config: Self = serde_json::from_str(raw).map_err(|err| {
            RegimeError::invalid_input(format!("engine config JSON parse failed: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{DEFAULT_PENDING_CAP, EngineConfig};

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default()
            .validate()
            .expect("default engine config should validate");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"conformal": {"primary_alpha": 0.2, "aux_alphas": [0.05]}, "router": {"dwell_min": 5}}"#,
        )
        .expect("partial config should parse");
        assert_eq!(config.conformal.primary_alpha, 0.2);
        assert_eq!(config.conformal.aux_alphas, vec![0.05]);
        assert_eq!(config.router.dwell_min, 5);
        assert_eq!(config.pending_cap, DEFAULT_PENDING_CAP);
        assert_eq!(config.features, EngineConfig::default().features);
    }

    #[test]
    fn invalid_sections_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{"pending_cap": 0}"#)
            .expect_err("zero pending cap must fail");
        assert!(err.to_string().contains("pending_cap"));

        assert!(EngineConfig::from_json_str(r#"{"conformal": {"window": 0}}"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
