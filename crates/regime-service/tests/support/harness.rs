// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]
#![allow(dead_code)]

use regime_core::{ExecutionContext, RegimeError};
use regime_online::EngineConfig;
use regime_service::{
    PredictRequest, PredictResponse, RequestMeta, ServiceConfig, ServiceState, TruthRequest,
    TruthResponse,
};

pub fn service(config: ServiceConfig) -> ServiceState {
    ServiceState::new(config, EngineConfig::default()).expect("service config should be valid")
}

/// Predicts at epoch second `t` for `series`.
pub fn predict_at(state: &ServiceState, series: &str, t: i64, x: f64) -> PredictResponse {
    try_predict(state, PredictRequest::new(t.to_string(), x).for_series(series))
        .expect("predict should succeed")
}

pub fn try_predict(
    state: &ServiceState,
    request: PredictRequest,
) -> Result<PredictResponse, RegimeError> {
    state.predict(&request, &RequestMeta::anonymous(), &ExecutionContext::new())
}

pub fn truth(state: &ServiceState, request: TruthRequest) -> Result<TruthResponse, RegimeError> {
    state.submit_truth(&request, &RequestMeta::anonymous(), &ExecutionContext::new())
}

/// Deterministic bounded wave.
pub fn wave(t: i64) -> f64 {
    (t as f64 * 0.37).sin() * 2.0 + (t % 7) as f64 * 0.1
}
