// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::api::{
    MatchedBy, PredictCommand, PredictRequest, PredictResponse, RequestMeta, TruthCommand,
    TruthKey, TruthRequest, TruthResponse, TruthStatus,
};
use crate::config::ServiceConfig;
use crate::guard::RequestGuard;
use crate::idempotency::{CacheVerdict, IdempotencyCache};
use crate::pending::{EvictedPending, PendingIndex, PendingKey, PendingRecord};
use crate::registry::SeriesRegistry;
use lru::LruCache;
use parking_lot::Mutex;
use regime_core::{ExecutionContext, RegimeError, Timestamp};
use regime_online::{
    Capabilities, CheckpointEnvelope, EngineConfig, ModelPlan, PayloadCodec, Pipeline,
    PipelineState, TruthOutcome, load_state_from_checkpoint_envelope,
    load_state_from_checkpoint_file, save_state_to_checkpoint_envelope,
    save_state_to_checkpoint_file,
};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

pub const SERVICE_SNAPSHOT_KIND: &str = "service";
pub const SERVICE_SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub series_id: String,
    pub state: PipelineState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EarlyTruth {
    pub series_id: String,
    pub target_timestamp: Timestamp,
    pub value: f64,
}

/// Best-effort capture of every series plus the pending index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Least recently used first.
    pub series: Vec<SeriesSnapshot>,
    /// Oldest first.
    pub pending: Vec<PendingRecord>,
    #[serde(default)]
    pub early_truths: Vec<EarlyTruth>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub series: usize,
    pub pending: usize,
    pub resolved: usize,
    pub early_truths: usize,
}

/// Shared state behind every request thread.
///
/// Lock order: series lock, then pending index, then idempotency cache. The
/// registry map lock is only taken for map operations.
#[derive(Debug)]
pub struct ServiceState {
    config: ServiceConfig,
    registry: SeriesRegistry,
    pending: Mutex<PendingIndex>,
    resolved: Mutex<IdempotencyCache>,
    early: Mutex<LruCache<PendingKey, f64>>,
    guard: RequestGuard,
}

impl ServiceState {
    pub fn new(config: ServiceConfig, engine: EngineConfig) -> Result<Self, RegimeError> {
        Self::with_capabilities(config, engine, Capabilities::detect())
    }

    /// Resolves the model plan once for every series this state will hold.
    pub fn with_capabilities(
        config: ServiceConfig,
        engine: EngineConfig,
        capabilities: Capabilities,
    ) -> Result<Self, RegimeError> {
        config.validate()?;
        let plan = ModelPlan::resolve(&engine.models, capabilities);
        let registry = SeriesRegistry::new(engine, plan, config.max_series)?;
        let pending = PendingIndex::new(config.pending_cap);
        let resolved = IdempotencyCache::new(
            config.truth_ttl(),
            config.truth_conflict_window(),
            config.truth_max_ids,
        );
        let early_cap = NonZeroUsize::new(config.pending_cap).unwrap_or(NonZeroUsize::MIN);
        let guard = RequestGuard::new(&config.guard);
        Ok(Self {
            config,
            registry,
            pending: Mutex::new(pending),
            resolved: Mutex::new(resolved),
            early: Mutex::new(LruCache::new(early_cap)),
            guard,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &SeriesRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            series: self.registry.len(),
            pending: self.pending.lock().len(),
            resolved: self.resolved.lock().len(),
            early_truths: self.early.lock().len(),
        }
    }

    pub fn is_pending(&self, prediction_id: &str) -> bool {
        self.pending.lock().contains(prediction_id)
    }

    pub fn predict(
        &self,
        request: &PredictRequest,
        meta: &RequestMeta,
        ctx: &ExecutionContext<'_>,
    ) -> Result<PredictResponse, RegimeError> {
        let started = Instant::now();
        self.guard.check(meta)?;
        let command = PredictCommand::from_request(request, &self.config.default_series_id)?;
        ctx.check_admission()?;

        let handle = self.registry.get_or_create(&command.series_id)?;
        let mut pipeline = handle.lock();
        let prediction_id = Uuid::new_v4().to_string();
        let output = pipeline.predict(
            &command.tick,
            prediction_id.clone(),
            command.target_timestamp,
        )?;

        let key = PendingKey {
            series_id: command.series_id.clone(),
            target_timestamp: command.target_timestamp,
        };
        let evicted = self.pending.lock().insert(&prediction_id, key.clone());
        if let Some(evicted) = evicted {
            self.evict_from_owner(&mut pipeline, &command.series_id, evicted);
        }

        if self.config.queue_early_truths {
            let early = self.early.lock().pop(&key);
            if let Some(value) = early {
                self.apply_locked(&mut pipeline, &prediction_id, key, value, Instant::now())?;
                tracing::debug!(prediction_id = %prediction_id, "applied queued early truth");
            }
        }
        drop(pipeline);

        let mut latency_ms = output.latencies.to_map();
        latency_ms.insert(
            "service_ms".to_string(),
            started.elapsed().as_secs_f64() * 1e3,
        );
        Ok(PredictResponse {
            prediction_id,
            series_id: command.series_id,
            target_timestamp: command.target_timestamp.to_rfc3339(),
            y_hat: output.y_hat,
            interval_low: output.interval_low,
            interval_high: output.interval_high,
            intervals: output.intervals,
            regime: output.regime,
            score: output.score,
            p_change: output.p_change,
            model: output.model,
            warmup: output.warmup,
            degraded: output.degraded,
            latency_ms,
        })
    }

    pub fn submit_truth(
        &self,
        request: &TruthRequest,
        meta: &RequestMeta,
        ctx: &ExecutionContext<'_>,
    ) -> Result<TruthResponse, RegimeError> {
        self.guard.check(meta)?;
        let command = TruthCommand::from_request(
            request,
            self.config.truth_matching,
            &self.config.default_series_id,
        )?;
        ctx.check_admission()?;
        self.apply_command(command, Instant::now())
    }

    pub fn apply_command(
        &self,
        command: TruthCommand,
        now: Instant,
    ) -> Result<TruthResponse, RegimeError> {
        let value = command.value;
        match command.key {
            TruthKey::ById(prediction_id) => {
                self.resolve_by_id(&prediction_id, value, MatchedBy::PredictionId, now)
            }
            TruthKey::BySeriesTarget { series_id, target } => {
                let key = PendingKey {
                    series_id,
                    target_timestamp: target,
                };
                let matched = {
                    let pending = self.pending.lock();
                    match pending.lookup(&key) {
                        Some(prediction_id) => Some(prediction_id.to_string()),
                        None => self.resolved.lock().resolved_for(&key).map(str::to_string),
                    }
                };
                match matched {
                    Some(prediction_id) => {
                        self.resolve_by_id(&prediction_id, value, MatchedBy::SeriesTarget, now)
                    }
                    None if self.config.queue_early_truths => {
                        self.early.lock().push(key, value);
                        Ok(TruthResponse {
                            status: TruthStatus::Queued,
                            matched_by: MatchedBy::SeriesTarget,
                            idempotent: false,
                            prediction_id: None,
                        })
                    }
                    None => Err(RegimeError::not_found(format!(
                        "no pending prediction for series '{}' at {}",
                        key.series_id, key.target_timestamp
                    ))),
                }
            }
            TruthKey::OldestForSeries(series_id) => self.resolve_oldest(&series_id, value, now),
        }
    }

    fn resolve_by_id(
        &self,
        prediction_id: &str,
        value: f64,
        matched_by: MatchedBy,
        now: Instant,
    ) -> Result<TruthResponse, RegimeError> {
        let applied = TruthResponse {
            status: TruthStatus::Ok,
            matched_by,
            idempotent: false,
            prediction_id: Some(prediction_id.to_string()),
        };
        if self.replayed(prediction_id, value, now)? {
            return Ok(TruthResponse {
                idempotent: true,
                ..applied
            });
        }

        let key = {
            let pending = self.pending.lock();
            match pending.get(prediction_id) {
                Some(key) => key.clone(),
                // resolvers retire the id and record it under this same lock
                None if self.replayed(prediction_id, value, now)? => {
                    return Ok(TruthResponse {
                        idempotent: true,
                        ..applied
                    });
                }
                None => {
                    return Err(RegimeError::not_found(format!(
                        "prediction '{prediction_id}' is not pending"
                    )));
                }
            }
        };
        let Some(handle) = self.registry.get(&key.series_id) else {
            self.pending.lock().remove(prediction_id);
            return Err(RegimeError::not_found(format!(
                "series '{}' owning prediction '{prediction_id}' was evicted",
                key.series_id
            )));
        };

        let mut pipeline = handle.lock();
        // another request may have resolved it while we waited
        if self.replayed(prediction_id, value, now)? {
            return Ok(TruthResponse {
                idempotent: true,
                ..applied
            });
        }
        self.apply_locked(&mut pipeline, prediction_id, key, value, now)?;
        Ok(applied)
    }

    fn resolve_oldest(
        &self,
        series_id: &str,
        value: f64,
        now: Instant,
    ) -> Result<TruthResponse, RegimeError> {
        let handle = self
            .registry
            .get(series_id)
            .ok_or_else(|| RegimeError::not_found(format!("unknown series '{series_id}'")))?;
        let mut pipeline = handle.lock();
        match pipeline.apply_truth_oldest(value)? {
            TruthOutcome::Applied(applied) => {
                let mut pending = self.pending.lock();
                let key = pending
                    .remove(&applied.prediction_id)
                    .unwrap_or_else(|| PendingKey {
                        series_id: series_id.to_string(),
                        target_timestamp: applied.target_timestamp,
                    });
                self.resolved
                    .lock()
                    .record(&applied.prediction_id, key, value, now);
                drop(pending);
                Ok(TruthResponse {
                    status: TruthStatus::Ok,
                    matched_by: MatchedBy::Oldest,
                    idempotent: false,
                    prediction_id: Some(applied.prediction_id),
                })
            }
            TruthOutcome::NotPending => Err(RegimeError::not_found(format!(
                "series '{series_id}' has no pending prediction"
            ))),
        }
    }

    /// `Ok(true)` when this exact truth was already applied.
    fn replayed(&self, prediction_id: &str, value: f64, now: Instant) -> Result<bool, RegimeError> {
        match self.resolved.lock().check(prediction_id, value, now) {
            CacheVerdict::Miss => Ok(false),
            CacheVerdict::Idempotent => Ok(true),
            CacheVerdict::Conflict(reason) => Err(RegimeError::conflict(reason)),
        }
    }

    /// Teaches the pipeline, then retires `prediction_id` from the index and
    /// records it in one step under the pending lock, so a reader never sees
    /// the id as neither pending nor resolved. Caller holds the series lock.
    fn apply_locked(
        &self,
        pipeline: &mut Pipeline,
        prediction_id: &str,
        key: PendingKey,
        value: f64,
        now: Instant,
    ) -> Result<(), RegimeError> {
        if !self.pending.lock().contains(prediction_id) {
            return Err(RegimeError::not_found(format!(
                "prediction '{prediction_id}' was evicted"
            )));
        }
        let outcome = pipeline.apply_truth(prediction_id, value)?;
        let mut pending = self.pending.lock();
        pending.remove(prediction_id);
        match outcome {
            TruthOutcome::Applied(_) => {
                self.resolved.lock().record(prediction_id, key, value, now);
                Ok(())
            }
            TruthOutcome::NotPending => Err(RegimeError::not_found(format!(
                "prediction '{prediction_id}' is no longer pending in its series"
            ))),
        }
    }

    fn evict_from_owner(&self, current: &mut Pipeline, current_series: &str, evicted: EvictedPending) {
        if evicted.key.series_id == current_series {
            current.evict_prediction(&evicted.prediction_id);
            return;
        }
        let Some(handle) = self.registry.peek(&evicted.key.series_id) else {
            return;
        };
        match handle.try_lock() {
            Some(mut owner) => {
                owner.evict_prediction(&evicted.prediction_id);
            }
            None => tracing::debug!(
                prediction_id = %evicted.prediction_id,
                series_id = %evicted.key.series_id,
                "owner series busy; leaving evicted forecast to its pipeline bound"
            ),
        }
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let series = self
            .registry
            .entries()
            .into_iter()
            .map(|(series_id, handle)| SeriesSnapshot {
                series_id,
                state: handle.lock().save_state(),
            })
            .collect();
        let pending = self.pending.lock().records();
        let early_truths = self
            .early
            .lock()
            .iter()
            .rev()
            .map(|(key, value)| EarlyTruth {
                series_id: key.series_id.clone(),
                target_timestamp: key.target_timestamp,
                value: *value,
            })
            .collect();
        ServiceSnapshot {
            series,
            pending,
            early_truths,
        }
    }

    /// Replaces all state with `snapshot`; nothing changes if any series
    /// fails to load. Resolution history is not part of a snapshot.
    pub fn restore(&self, snapshot: &ServiceSnapshot) -> Result<(), RegimeError> {
        let mut pipelines = Vec::with_capacity(snapshot.series.len());
        for series in &snapshot.series {
            let mut pipeline = self.registry.new_pipeline()?;
            pipeline.load_state(&series.state).map_err(|err| {
                RegimeError::invalid_input(format!(
                    "series '{}' failed to restore: {}",
                    series.series_id,
                    err.message()
                ))
            })?;
            pipelines.push((series.series_id.clone(), pipeline));
        }

        self.registry.replace_all(pipelines);
        *self.pending.lock() = PendingIndex::from_records(self.config.pending_cap, &snapshot.pending);
        self.resolved.lock().clear();
        let mut early = self.early.lock();
        early.clear();
        for truth in &snapshot.early_truths {
            early.push(
                PendingKey {
                    series_id: truth.series_id.clone(),
                    target_timestamp: truth.target_timestamp,
                },
                truth.value,
            );
        }
        tracing::info!(
            series = snapshot.series.len(),
            pending = snapshot.pending.len(),
            "service state restored from snapshot"
        );
        Ok(())
    }

    pub fn save_snapshot(&self, codec: PayloadCodec) -> Result<CheckpointEnvelope, RegimeError> {
        save_state_to_checkpoint_envelope(
            SERVICE_SNAPSHOT_KIND,
            SERVICE_SNAPSHOT_SCHEMA_VERSION,
            &self.snapshot(),
            codec,
        )
    }

    pub fn restore_envelope(&self, envelope: &CheckpointEnvelope) -> Result<(), RegimeError> {
        let snapshot: ServiceSnapshot =
            load_state_from_checkpoint_envelope(envelope, SERVICE_SNAPSHOT_KIND)?;
        self.restore(&snapshot)
    }

    /// Writes a snapshot atomically (temp file, fsync, rename).
    pub fn save_snapshot_file(
        &self,
        path: impl AsRef<Path>,
        codec: PayloadCodec,
    ) -> Result<CheckpointEnvelope, RegimeError> {
        let path = path.as_ref();
        let envelope = save_state_to_checkpoint_file(
            path,
            SERVICE_SNAPSHOT_KIND,
            SERVICE_SNAPSHOT_SCHEMA_VERSION,
            &self.snapshot(),
            codec,
        )?;
        tracing::info!(path = %path.display(), bytes = envelope.payload.len(), "service snapshot saved");
        Ok(envelope)
    }

    pub fn load_snapshot_file(&self, path: impl AsRef<Path>) -> Result<(), RegimeError> {
        let path = path.as_ref();
        let snapshot: ServiceSnapshot = load_state_from_checkpoint_file(path, SERVICE_SNAPSHOT_KIND)?;
        self.restore(&snapshot)?;
        tracing::info!(path = %path.display(), "service snapshot loaded");
        Ok(())
    }
}
