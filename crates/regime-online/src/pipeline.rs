// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::bocpd::{BocpdDetector, BocpdState};
use crate::conformal::{ConformalState, OnlineConformal};
use crate::config::EngineConfig;
use crate::features::{FeatureExtractor, FeatureState};
use crate::models::{Capabilities, ForecastModel, Model, ModelKind, ModelPlan};
use crate::router::{Router, RouterState};
use regime_core::{OnlineDetector, Regime, RegimeError, Tick, Timestamp, check_observation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

pub const PIPELINE_STATE_KIND: &str = "pipeline";
pub const PIPELINE_STATE_SCHEMA_VERSION: u32 = 1;

/// Wall-clock cost of each stage of one tick, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageLatencies {
    pub features: f64,
    pub detector: f64,
    pub router: f64,
    pub model: f64,
    pub conformal: f64,
    pub total: f64,
}

impl StageLatencies {
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        [
            ("features", self.features),
            ("detector", self.detector),
            ("router", self.router),
            ("model", self.model),
            ("conformal", self.conformal),
            ("total", self.total),
        ]
        .into_iter()
        .map(|(stage, ms)| (stage.to_string(), ms))
        .collect()
    }
}

/// Forecast for the tick after `timestamp`, with calibrated bands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub prediction_id: String,
    pub timestamp: Timestamp,
    pub target_timestamp: Timestamp,
    pub y_hat: f64,
    pub interval_low: f64,
    pub interval_high: f64,
    /// Keyed by `alpha=0.10` style labels.
    pub intervals: BTreeMap<String, [f64; 2]>,
    pub regime: Regime,
    pub score: f64,
    pub p_change: f64,
    pub run_length_mode: usize,
    pub model: ModelKind,
    pub switched: bool,
    pub warmup: bool,
    pub degraded: bool,
    pub latencies: StageLatencies,
}

/// Unresolved forecast awaiting its truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingForecast {
    pub prediction_id: String,
    pub target_timestamp: Timestamp,
    pub y_hat: f64,
    /// Regime at prediction time; the residual is learned under this label.
    pub regime: Regime,
    /// Every model's forecast, in router order.
    pub forecasts: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TruthApplied {
    pub prediction_id: String,
    pub target_timestamp: Timestamp,
    pub y_hat: f64,
    pub y_true: f64,
    pub regime: Regime,
}

impl TruthApplied {
    pub fn residual(&self) -> f64 {
        (self.y_true - self.y_hat).abs()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TruthOutcome {
    Applied(TruthApplied),
    /// Already resolved, evicted, or never issued.
    NotPending,
}

impl TruthOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// One line of the replay log, consumed by offline metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    pub timestamp: Timestamp,
    /// Realized next value; `None` for the final tick of a replay.
    pub y: Option<f64>,
    pub y_hat: f64,
    pub low: f64,
    pub high: f64,
    pub regime: Regime,
    pub score: f64,
    pub p_change: f64,
    pub model: ModelKind,
    pub latency_ms: f64,
}

/// Full serializable per-series state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub last_timestamp: Option<Timestamp>,
    pub next_seq: u64,
    pub last_step_id: Option<String>,
    pub features: FeatureState,
    pub detector: BocpdState,
    pub router: RouterState,
    pub models: Vec<Model>,
    pub conformal: ConformalState,
    /// Oldest first.
    pub pending: Vec<PendingForecast>,
}

#[derive(Clone, Debug, Default)]
struct PendingBook {
    entries: BTreeMap<u64, PendingForecast>,
    by_id: HashMap<String, u64>,
    next_seq: u64,
}

impl PendingBook {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, prediction_id: &str) -> bool {
        self.by_id.contains_key(prediction_id)
    }

    fn push(&mut self, pending: PendingForecast) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.by_id.insert(pending.prediction_id.clone(), seq);
        self.entries.insert(seq, pending);
    }

    fn remove(&mut self, prediction_id: &str) -> Option<PendingForecast> {
        let seq = self.by_id.remove(prediction_id)?;
        self.entries.remove(&seq)
    }

    fn pop_oldest(&mut self) -> Option<PendingForecast> {
        let (_, pending) = self.entries.pop_first()?;
        self.by_id.remove(&pending.prediction_id);
        Some(pending)
    }

    fn iter(&self) -> impl Iterator<Item = &PendingForecast> {
        self.entries.values()
    }

    fn from_ordered(pending: &[PendingForecast]) -> Self {
        let mut book = Self::default();
        for entry in pending {
            book.push(entry.clone());
        }
        book
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1e3
}

/// Leakage-safe per-series orchestration of features, detection, routing,
/// forecasting and conformal calibration.
#[derive(Clone, Debug)]
pub struct Pipeline {
    config: EngineConfig,
    features: FeatureExtractor,
    detector: BocpdDetector,
    router: Router,
    models: Vec<Model>,
    conformal: OnlineConformal,
    pending: PendingBook,
    last_timestamp: Option<Timestamp>,
    next_seq: u64,
    last_step_id: Option<String>,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Result<Self, RegimeError> {
        let plan = ModelPlan::resolve(&config.models, Capabilities::detect());
        Self::with_plan(config, &plan)
    }

    /// Builds from an already resolved model plan, so a service resolves
    /// capabilities once for all of its series.
    pub fn with_plan(config: EngineConfig, plan: &ModelPlan) -> Result<Self, RegimeError> {
        config.validate()?;
        let features = FeatureExtractor::new(config.features.clone())?;
        let detector = BocpdDetector::new(config.detector.clone())?;
        let router = Router::new(config.router.clone(), plan.kinds().to_vec())?;
        let models = plan.build(config.features.expected_covariates.len());
        let conformal = OnlineConformal::new(config.conformal.clone())?;
        Ok(Self {
            config,
            features,
            detector,
            router,
            models,
            conformal,
            pending: PendingBook::default(),
            last_timestamp: None,
            next_seq: 0,
            last_step_id: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model_kinds(&self) -> &[ModelKind] {
        self.router.kinds()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn detector(&self) -> &BocpdDetector {
        &self.detector
    }

    pub fn conformal(&self) -> &OnlineConformal {
        &self.conformal
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.last_timestamp
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, prediction_id: &str) -> bool {
        self.pending.contains(prediction_id)
    }

    /// Pending forecasts, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingForecast> {
        self.pending.iter()
    }

    /// Rejects ticks that would corrupt state, without mutating anything.
    pub fn validate_tick(&self, tick: &Tick) -> Result<(), RegimeError> {
        tick.validate()?;
        if let Some(last) = self.last_timestamp
            && tick.timestamp <= last
        {
            return Err(RegimeError::invalid_input(format!(
                "timestamp {} is not after the previous tick {}",
                tick.timestamp, last
            )));
        }
        Ok(())
    }

    /// Forecasts the value after `tick` and registers it as pending under
    /// `prediction_id`.
    ///
    /// Intervals come from residuals learned before this call, so a truth
    /// applied later cannot influence the returned bands.
    pub fn predict(
        &mut self,
        tick: &Tick,
        prediction_id: impl Into<String>,
        target_timestamp: Timestamp,
    ) -> Result<PipelineOutput, RegimeError> {
        let prediction_id = prediction_id.into();
        self.validate_tick(tick)?;
        if self.pending.contains(&prediction_id) {
            return Err(RegimeError::conflict(format!(
                "prediction_id '{prediction_id}' is already pending"
            )));
        }

        let started = Instant::now();
        let mut latencies = StageLatencies::default();

        let stage = Instant::now();
        let snapshot = self.features.update(tick.x, &tick.covariates);
        latencies.features = elapsed_ms(stage);

        let stage = Instant::now();
        let detection = self.detector.observe(tick.x);
        latencies.detector = elapsed_ms(stage);

        let stage = Instant::now();
        let decision = self.router.select(detection.alert);
        latencies.router = elapsed_ms(stage);

        let stage = Instant::now();
        let forecasts: Vec<f64> = self
            .models
            .iter_mut()
            .map(|model| model.predict_update(tick, &snapshot))
            .collect();
        let y_hat = forecasts.get(decision.active).copied().unwrap_or(tick.x);
        latencies.model = elapsed_ms(stage);

        let stage = Instant::now();
        let bands = self.conformal.intervals(y_hat, detection.regime, snapshot.std);
        latencies.conformal = elapsed_ms(stage);

        let (interval_low, interval_high) = bands
            .primary()
            .map_or((y_hat, y_hat), |band| (band.low, band.high));

        self.last_timestamp = Some(tick.timestamp);
        self.pending.push(PendingForecast {
            prediction_id: prediction_id.clone(),
            target_timestamp,
            y_hat,
            regime: detection.regime,
            forecasts,
        });
        while self.pending.len() > self.config.pending_cap {
            if let Some(evicted) = self.pending.pop_oldest() {
                tracing::debug!(
                    prediction_id = %evicted.prediction_id,
                    pending_cap = self.config.pending_cap,
                    "evicting oldest pending forecast"
                );
            }
        }
        latencies.total = elapsed_ms(started);

        Ok(PipelineOutput {
            prediction_id,
            timestamp: tick.timestamp,
            target_timestamp,
            y_hat,
            interval_low,
            interval_high,
            intervals: bands.by_key(),
            regime: detection.regime,
            score: detection.score,
            p_change: detection.p_change,
            run_length_mode: detection.run_length_mode,
            model: self.router.active_kind(),
            switched: decision.switched,
            warmup: snapshot.warmup,
            degraded: bands.degraded || snapshot.missing_covariates,
            latencies,
        })
    }

    /// Backtest step: resolves the previous step's forecast with `tick.x`,
    /// then forecasts from `tick`.
    pub fn step(&mut self, tick: &Tick) -> Result<PipelineOutput, RegimeError> {
        self.validate_tick(tick)?;
        if let Some(previous) = self.last_step_id.take() {
            self.apply_truth(&previous, tick.x)?;
        }
        let prediction_id = format!("step-{}", self.next_seq);
        self.next_seq = self.next_seq.saturating_add(1);
        let output = self.predict(tick, prediction_id.clone(), tick.timestamp)?;
        self.last_step_id = Some(prediction_id);
        Ok(output)
    }

    /// Resolves `prediction_id` with its realized value, feeding the residual
    /// to calibration and per-model losses to the router.
    pub fn apply_truth(
        &mut self,
        prediction_id: &str,
        y_true: f64,
    ) -> Result<TruthOutcome, RegimeError> {
        check_observation("truth value", y_true)?;
        Ok(match self.pending.remove(prediction_id) {
            Some(pending) => TruthOutcome::Applied(self.learn(pending, y_true)),
            None => TruthOutcome::NotPending,
        })
    }

    /// Resolves the oldest pending forecast (legacy FIFO matching).
    pub fn apply_truth_oldest(&mut self, y_true: f64) -> Result<TruthOutcome, RegimeError> {
        check_observation("truth value", y_true)?;
        Ok(match self.pending.pop_oldest() {
            Some(pending) => TruthOutcome::Applied(self.learn(pending, y_true)),
            None => TruthOutcome::NotPending,
        })
    }

    /// Drops a pending forecast without learning from it.
    pub fn evict_prediction(&mut self, prediction_id: &str) -> bool {
        self.pending.remove(prediction_id).is_some()
    }

    fn learn(&mut self, pending: PendingForecast, y_true: f64) -> TruthApplied {
        self.conformal.record(pending.y_hat, y_true, pending.regime);
        self.router.observe_truth(&pending.forecasts, y_true);
        TruthApplied {
            prediction_id: pending.prediction_id,
            target_timestamp: pending.target_timestamp,
            y_hat: pending.y_hat,
            y_true,
            regime: pending.regime,
        }
    }

    /// Drives [`Pipeline::step`] over `ticks`; the truth for tick `t` is `x_{t+1}`.
    ///
    /// Stops at the first invalid tick; ticks before it stay applied.
    pub fn replay(&mut self, ticks: &[Tick]) -> Result<Vec<TickRecord>, RegimeError> {
        let mut records: Vec<TickRecord> = Vec::with_capacity(ticks.len());
        for tick in ticks {
            let output = self.step(tick)?;
            if let Some(previous) = records.last_mut() {
                previous.y = Some(tick.x);
            }
            records.push(TickRecord {
                timestamp: output.timestamp,
                y: None,
                y_hat: output.y_hat,
                low: output.interval_low,
                high: output.interval_high,
                regime: output.regime,
                score: output.score,
                p_change: output.p_change,
                model: output.model,
                latency_ms: output.latencies.total,
            });
        }
        Ok(records)
    }

    pub fn save_state(&self) -> PipelineState {
        PipelineState {
            last_timestamp: self.last_timestamp,
            next_seq: self.next_seq,
            last_step_id: self.last_step_id.clone(),
            features: self.features.save_state(),
            detector: self.detector.save_state(),
            router: self.router.save_state(),
            models: self.models.clone(),
            conformal: self.conformal.save_state(),
            pending: self.pending.iter().cloned().collect(),
        }
    }

    /// Installs `state` only if every component accepts it.
    pub fn load_state(&mut self, state: &PipelineState) -> Result<(), RegimeError> {
        let model_kinds: Vec<ModelKind> = state.models.iter().map(ForecastModel::kind).collect();
        if model_kinds != self.router.kinds() {
            return Err(RegimeError::invalid_input(format!(
                "pipeline state models {:?} do not match resolved models {:?}",
                model_kinds,
                self.router.kinds()
            )));
        }
        if let Some(bad) = state
            .pending
            .iter()
            .find(|pending| pending.forecasts.len() != model_kinds.len())
        {
            return Err(RegimeError::invalid_input(format!(
                "pending forecast '{}' carries {} model forecasts; expected {}",
                bad.prediction_id,
                bad.forecasts.len(),
                model_kinds.len()
            )));
        }

        let mut features = self.features.clone();
        features.load_state(&state.features)?;
        let mut detector = self.detector.clone();
        detector.load_state(&state.detector)?;
        let mut router = self.router.clone();
        router.load_state(&state.router)?;
        let mut conformal = self.conformal.clone();
        conformal.load_state(&state.conformal)?;

        self.features = features;
        self.detector = detector;
        self.router = router;
        self.conformal = conformal;
        self.models = state.models.clone();
        self.pending = PendingBook::from_ordered(&state.pending);
        self.last_timestamp = state.last_timestamp;
        self.next_seq = state.next_seq;
        self.last_step_id = state.last_step_id.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, TruthOutcome};
    use crate::config::EngineConfig;
    use crate::conformal::ConformalConfig;
    use crate::models::{ModelConfig, ModelKind};
    use regime_core::{ErrorKind, Regime, Tick, Timestamp};

    fn ts(t: i64) -> Timestamp {
        Timestamp::from_unix_nanos(t * 1_000_000_000)
    }

    fn tick(t: i64, x: f64) -> Tick {
        Tick::new(ts(t), x)
    }

    fn pipeline(config: EngineConfig) -> Pipeline {
        Pipeline::new(config).expect("engine config should be valid")
    }

    #[test]
    fn constant_series_settles_calm_with_vanishing_std() {
        let mut p = pipeline(EngineConfig::default());
        p.step(&tick(0, 0.0)).expect("seed tick");
        let mut last = None;
        for t in 1..=60 {
            last = Some(p.step(&tick(t, 0.01)).expect("constant tick"));
        }
        let out = last.expect("at least one output");
        assert!(!out.warmup);
        assert_eq!(out.regime, Regime::Calm);
        let std = p.features.state().std();
        assert!(std < 1e-3, "std={std}");
    }

    #[test]
    fn non_finite_tick_is_rejected_without_pending_entry() {
        let mut p = pipeline(EngineConfig::default());
        let err = p
            .predict(&tick(1, f64::NAN), "nan", ts(2))
            .expect_err("NaN must be rejected");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(p.pending_len(), 0);
        assert!(p.last_timestamp().is_none());
        assert_eq!(p.save_state(), pipeline(EngineConfig::default()).save_state());
    }

    #[test]
    fn non_increasing_timestamp_is_rejected() {
        let mut p = pipeline(EngineConfig::default());
        p.predict(&tick(5, 1.0), "a", ts(6)).expect("first tick");
        let before = p.save_state();
        assert!(p.predict(&tick(5, 1.0), "b", ts(6)).is_err());
        assert!(p.predict(&tick(4, 1.0), "c", ts(5)).is_err());
        assert_eq!(p.save_state(), before);
    }

    #[test]
    fn duplicate_pending_id_is_a_conflict() {
        let mut p = pipeline(EngineConfig::default());
        p.predict(&tick(1, 1.0), "dup", ts(2)).expect("first");
        let err = p
            .predict(&tick(2, 1.0), "dup", ts(3))
            .expect_err("duplicate id must fail");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(p.pending_len(), 1);
    }

    #[test]
    fn truth_is_single_shot() {
        let mut p = pipeline(EngineConfig::default());
        let out = p.predict(&tick(1, 2.0), "p1", ts(2)).expect("predict");
        let applied = p.apply_truth("p1", 2.5).expect("finite truth");
        match applied {
            TruthOutcome::Applied(applied) => {
                assert_eq!(applied.y_hat, out.y_hat);
                assert_eq!(applied.residual(), (2.5 - out.y_hat).abs());
            }
            TruthOutcome::NotPending => panic!("first truth must apply"),
        }
        assert_eq!(p.conformal().global().len(), 1);

        assert_eq!(
            p.apply_truth("p1", 2.5).expect("finite truth"),
            TruthOutcome::NotPending
        );
        assert_eq!(p.conformal().global().len(), 1);
        assert!(p.apply_truth("p1", f64::INFINITY).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected_before_touching_state() {
        let mut p = pipeline(EngineConfig::default());
        p.predict(&tick(1, 1.0), "p1", ts(2)).expect("predict");
        let before = p.save_state();
        let err = p
            .predict(&tick(2, 1e200), "huge", ts(3))
            .expect_err("1e200 is out of range");
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = p.apply_truth("p1", -1e200).expect_err("1e200 truth is out of range");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(p.save_state(), before);
        assert!(p.is_pending("p1"));
    }

    #[test]
    fn pending_cap_evicts_oldest() {
        let mut p = pipeline(EngineConfig {
            pending_cap: 2,
            ..EngineConfig::default()
        });
        for (t, id) in ["a", "b", "c"].iter().enumerate() {
            p.predict(&tick(t as i64, 1.0), *id, ts(t as i64 + 1))
                .expect("predict");
        }
        assert_eq!(p.pending_len(), 2);
        assert!(!p.is_pending("a"));
        assert_eq!(
            p.apply_truth("a", 1.0).expect("finite"),
            TruthOutcome::NotPending
        );
        let ids: Vec<&str> = p.pending().map(|entry| entry.prediction_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn evicted_prediction_is_not_learned() {
        let mut p = pipeline(EngineConfig::default());
        p.predict(&tick(1, 1.0), "gone", ts(2)).expect("predict");
        assert!(p.evict_prediction("gone"));
        assert!(!p.evict_prediction("gone"));
        assert_eq!(
            p.apply_truth("gone", 1.0).expect("finite"),
            TruthOutcome::NotPending
        );
        assert!(p.conformal().global().is_empty());
    }

    #[test]
    fn oldest_truth_resolves_in_fifo_order() {
        let mut p = pipeline(EngineConfig::default());
        p.predict(&tick(1, 1.0), "first", ts(2)).expect("predict");
        p.predict(&tick(2, 1.0), "second", ts(3)).expect("predict");
        match p.apply_truth_oldest(1.0).expect("finite") {
            TruthOutcome::Applied(applied) => assert_eq!(applied.prediction_id, "first"),
            TruthOutcome::NotPending => panic!("oldest should resolve"),
        }
        assert!(p.is_pending("second"));
        p.apply_truth_oldest(1.0).expect("finite");
        assert_eq!(
            p.apply_truth_oldest(1.0).expect("finite"),
            TruthOutcome::NotPending
        );
    }

    #[test]
    fn intervals_do_not_depend_on_future_values() {
        let base: Vec<f64> = (0..200).map(|i| ((i as f64) * 0.2).sin()).collect();
        let mut diverged = base.clone();
        for value in diverged.iter_mut().skip(150) {
            *value += 50.0;
        }

        let mut lhs = pipeline(EngineConfig::default());
        let mut rhs = pipeline(EngineConfig::default());
        for (t, (a, b)) in base.iter().zip(&diverged).enumerate() {
            let left = lhs.step(&tick(t as i64, *a)).expect("lhs step");
            let right = rhs.step(&tick(t as i64, *b)).expect("rhs step");
            if t < 150 {
                assert_eq!(left.y_hat, right.y_hat, "t={t}");
                assert_eq!(left.intervals, right.intervals, "t={t}");
            }
        }
    }

    #[test]
    fn interval_is_computed_before_truth_is_learned() {
        let mut p = pipeline(EngineConfig {
            conformal: ConformalConfig {
                per_regime: false,
                min_samples: 1,
                ..ConformalConfig::default()
            },
            ..EngineConfig::default()
        });
        let first = p.predict(&tick(1, 0.0), "a", ts(2)).expect("predict");
        assert!(first.degraded);
        p.apply_truth("a", 100.0).expect("finite");
        assert_eq!(first.interval_high - first.y_hat, 0.01);

        let second = p.predict(&tick(2, 0.0), "b", ts(3)).expect("predict");
        assert!(!second.degraded);
        assert!(second.interval_high - second.y_hat > 90.0);
    }

    #[test]
    fn output_carries_all_alphas_and_stage_latencies() {
        let mut p = pipeline(EngineConfig {
            conformal: ConformalConfig {
                aux_alphas: vec![0.05, 0.2],
                ..ConformalConfig::default()
            },
            ..EngineConfig::default()
        });
        let out = p.step(&tick(1, 1.0)).expect("step");
        let keys: Vec<&str> = out.intervals.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["alpha=0.05", "alpha=0.10", "alpha=0.20"]);
        assert_eq!(out.intervals["alpha=0.10"], [out.interval_low, out.interval_high]);
        let stages = out.latencies.to_map();
        assert_eq!(stages.len(), 6);
        assert!(stages.values().all(|ms| *ms >= 0.0));
        assert!(out.latencies.total >= out.latencies.features);
    }

    #[test]
    fn missing_covariates_mark_output_degraded() {
        let mut config = EngineConfig::default();
        config.features.expected_covariates = vec!["volume".to_string()];
        config.conformal.per_regime = false;
        config.conformal.min_samples = 1;
        let mut p = pipeline(config);

        let cold = p
            .predict(&tick(1, 1.0).with_covariate("volume", 3.0), "a", ts(2))
            .expect("predict");
        assert!(cold.degraded);
        p.apply_truth("a", 1.5).expect("finite");

        let warm = p
            .predict(&tick(2, 1.0).with_covariate("volume", 3.0), "b", ts(3))
            .expect("predict");
        assert!(!warm.degraded);
        let missing = p.predict(&tick(3, 1.0), "c", ts(4)).expect("predict");
        assert!(missing.degraded);
    }

    #[test]
    fn baseline_only_plan_runs_single_model() {
        let mut p = pipeline(EngineConfig {
            models: ModelConfig {
                enabled: vec![ModelKind::Baseline],
                ..ModelConfig::default()
            },
            ..EngineConfig::default()
        });
        assert_eq!(p.model_kinds(), &[ModelKind::Baseline]);
        let first = p.step(&tick(1, 4.0)).expect("step");
        assert_eq!(first.model, ModelKind::Baseline);
        assert_eq!(first.y_hat, 0.0);
        let second = p.step(&tick(2, 2.0)).expect("step");
        assert_eq!(second.y_hat, 4.0);
    }

    #[test]
    fn replay_logs_next_value_as_truth() {
        let mut p = pipeline(EngineConfig::default());
        let ticks: Vec<Tick> = (0..5).map(|t| tick(t, t as f64)).collect();
        let records = p.replay(&ticks).expect("replay");
        assert_eq!(records.len(), 5);
        let truths: Vec<Option<f64>> = records.iter().map(|record| record.y).collect();
        assert_eq!(truths, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), None]);
        assert_eq!(p.pending_len(), 1);
        assert_eq!(p.conformal().global().len(), 4);
    }

    #[test]
    fn load_state_rejects_mismatched_models_without_mutation() {
        let mut full = pipeline(EngineConfig::default());
        for t in 0..10 {
            full.step(&tick(t, t as f64)).expect("step");
        }
        let state = full.save_state();

        let mut single = pipeline(EngineConfig {
            models: ModelConfig {
                enabled: vec![ModelKind::Baseline],
                ..ModelConfig::default()
            },
            ..EngineConfig::default()
        });
        let before = single.save_state();
        assert!(single.load_state(&state).is_err());
        assert_eq!(single.save_state(), before);

        let mut restored = pipeline(EngineConfig::default());
        restored.load_state(&state).expect("matching state loads");
        let lhs = full.step(&tick(10, 3.0)).expect("step");
        let rhs = restored.step(&tick(10, 3.0)).expect("step");
        assert_eq!(lhs.y_hat, rhs.y_hat);
        assert_eq!(lhs.intervals, rhs.intervals);
    }
}
