// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::config::TruthMatching;
use regime_core::{Regime, RegimeError, Tick, Timestamp, check_observation};
use regime_online::ModelKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport-level caller identity consulted by the request guard.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Remote address or other client identifier.
    pub client: Option<String>,
}

impl RequestMeta {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {token}")),
            client: None,
        }
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Bucket key: the credential when present, else the client address.
    pub fn rate_key(&self) -> String {
        match (&self.authorization, &self.client) {
            (Some(token), _) => format!("tok:{token}"),
            (None, Some(client)) => format!("ip:{client}"),
            (None, None) => "ip:unknown".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub timestamp: String,
    pub x: f64,
    #[serde(default)]
    pub covariates: BTreeMap<String, f64>,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub target_timestamp: Option<String>,
}

impl PredictRequest {
    pub fn new(timestamp: impl Into<String>, x: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            x,
            covariates: BTreeMap::new(),
            series_id: None,
            target_timestamp: None,
        }
    }

    pub fn for_series(mut self, series_id: impl Into<String>) -> Self {
        self.series_id = Some(series_id.into());
        self
    }

    pub fn targeting(mut self, target_timestamp: impl Into<String>) -> Self {
        self.target_timestamp = Some(target_timestamp.into());
        self
    }

    pub fn with_covariate(mut self, key: impl Into<String>, value: f64) -> Self {
        self.covariates.insert(key.into(), value);
        self
    }
}

/// Validated form of a [`PredictRequest`].
#[derive(Clone, Debug, PartialEq)]
pub struct PredictCommand {
    pub series_id: String,
    pub tick: Tick,
    pub target_timestamp: Timestamp,
}

impl PredictCommand {
    pub fn from_request(request: &PredictRequest, default_series: &str) -> Result<Self, RegimeError> {
        let series_id = normalize_series(request.series_id.as_deref(), default_series);
        let timestamp = Timestamp::parse(&request.timestamp)?;
        let target_timestamp = match request.target_timestamp.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Timestamp::parse(raw)?,
            _ => timestamp,
        };
        let tick = Tick {
            timestamp,
            x: request.x,
            covariates: request.covariates.clone(),
        };
        tick.validate()?;
        Ok(Self {
            series_id,
            tick,
            target_timestamp,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction_id: String,
    pub series_id: String,
    pub target_timestamp: String,
    pub y_hat: f64,
    pub interval_low: f64,
    pub interval_high: f64,
    pub intervals: BTreeMap<String, [f64; 2]>,
    pub regime: Regime,
    pub score: f64,
    pub p_change: f64,
    pub model: ModelKind,
    pub warmup: bool,
    pub degraded: bool,
    /// Pipeline stage latencies plus `service_ms`.
    pub latency_ms: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TruthRequest {
    #[serde(default)]
    pub prediction_id: Option<String>,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub target_timestamp: Option<String>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub y_true: Option<f64>,
    #[serde(default)]
    pub value: Option<f64>,
}

impl TruthRequest {
    pub fn by_id(prediction_id: impl Into<String>, y: f64) -> Self {
        Self {
            prediction_id: Some(prediction_id.into()),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn by_target(series_id: impl Into<String>, target_timestamp: impl Into<String>, y: f64) -> Self {
        Self {
            series_id: Some(series_id.into()),
            target_timestamp: Some(target_timestamp.into()),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn for_series(series_id: impl Into<String>, y: f64) -> Self {
        Self {
            series_id: Some(series_id.into()),
            y: Some(y),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TruthKey {
    ById(String),
    BySeriesTarget { series_id: String, target: Timestamp },
    OldestForSeries(String),
}

/// A truth submission normalized once at the boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct TruthCommand {
    pub key: TruthKey,
    pub value: f64,
}

impl TruthCommand {
    /// The first present of `y`, `y_true`, `value` wins.
    pub fn from_request(
        request: &TruthRequest,
        matching: TruthMatching,
        default_series: &str,
    ) -> Result<Self, RegimeError> {
        let value = request
            .y
            .or(request.y_true)
            .or(request.value)
            .ok_or_else(|| RegimeError::invalid_input("missing y/y_true/value in truth request"))?;
        check_observation("truth value", value)?;

        let prediction_id = request
            .prediction_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let series_id = request
            .series_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let target = request
            .target_timestamp
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty());

        let key = match (prediction_id, series_id, target) {
            (Some(id), _, _) => TruthKey::ById(id.to_string()),
            (None, Some(series_id), Some(target)) => TruthKey::BySeriesTarget {
                series_id: series_id.to_string(),
                target: Timestamp::parse(target)?,
            },
            (None, series_id, None) if matching == TruthMatching::FifoLegacy => {
                TruthKey::OldestForSeries(series_id.unwrap_or(default_series).to_string())
            }
            _ => {
                return Err(RegimeError::invalid_input(
                    "provide prediction_id or (series_id and target_timestamp)",
                ));
            }
        };
        Ok(Self { key, value })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthStatus {
    Ok,
    Queued,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    PredictionId,
    SeriesTarget,
    Oldest,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruthResponse {
    pub status: TruthStatus,
    pub matched_by: MatchedBy,
    pub idempotent: bool,
    pub prediction_id: Option<String>,
}

pub(crate) fn normalize_series(raw: Option<&str>, default_series: &str) -> String {
    raw.map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(default_series)
        .to_string()
}
