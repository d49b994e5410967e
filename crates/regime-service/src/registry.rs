// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use lru::LruCache;
use parking_lot::Mutex;
use regime_core::RegimeError;
use regime_online::{EngineConfig, ModelPlan, Pipeline};
use std::num::NonZeroUsize;
use std::sync::Arc;

pub type SeriesHandle = Arc<Mutex<Pipeline>>;

/// LRU-bounded map of series id to its pipeline.
///
/// The map lock is held only for map operations, never while waiting on a
/// series lock.
#[derive(Debug)]
pub struct SeriesRegistry {
    engine: EngineConfig,
    plan: ModelPlan,
    series: Mutex<LruCache<String, SeriesHandle>>,
}

impl SeriesRegistry {
    pub fn new(engine: EngineConfig, plan: ModelPlan, max_series: usize) -> Result<Self, RegimeError> {
        engine.validate()?;
        let cap = NonZeroUsize::new(max_series).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            engine,
            plan,
            series: Mutex::new(LruCache::new(cap)),
        })
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn plan(&self) -> &ModelPlan {
        &self.plan
    }

    pub fn len(&self) -> usize {
        self.series.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.series.lock().cap().get()
    }

    pub fn new_pipeline(&self) -> Result<Pipeline, RegimeError> {
        Pipeline::with_plan(self.engine.clone(), &self.plan)
    }

    /// Returns the series, creating it when absent; a creation may evict the
    /// least recently used series.
    pub fn get_or_create(&self, series_id: &str) -> Result<SeriesHandle, RegimeError> {
        let mut series = self.series.lock();
        if let Some(handle) = series.get(series_id) {
            return Ok(Arc::clone(handle));
        }
        let handle: SeriesHandle = Arc::new(Mutex::new(self.new_pipeline()?));
        if let Some((evicted, _)) = series.push(series_id.to_string(), Arc::clone(&handle)) {
            tracing::info!(
                series_id = %evicted,
                max_series = series.cap().get(),
                "series registry full; evicting least recently used series"
            );
        }
        Ok(handle)
    }

    /// Marks the series as recently used.
    pub fn get(&self, series_id: &str) -> Option<SeriesHandle> {
        self.series.lock().get(series_id).map(Arc::clone)
    }

    /// Looks up without touching recency.
    pub fn peek(&self, series_id: &str) -> Option<SeriesHandle> {
        self.series.lock().peek(series_id).map(Arc::clone)
    }

    pub fn contains(&self, series_id: &str) -> bool {
        self.series.lock().contains(series_id)
    }

    /// Series ids with handles, least recently used first.
    pub fn entries(&self) -> Vec<(String, SeriesHandle)> {
        self.series
            .lock()
            .iter()
            .rev()
            .map(|(series_id, handle)| (series_id.clone(), Arc::clone(handle)))
            .collect()
    }

    /// Swaps in a new set of series, given least recently used first.
    pub fn replace_all(&self, entries: Vec<(String, Pipeline)>) {
        let mut series = self.series.lock();
        series.clear();
        for (series_id, pipeline) in entries {
            series.push(series_id, Arc::new(Mutex::new(pipeline)));
        }
    }
}
