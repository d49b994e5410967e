// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use lru::LruCache;
use regime_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Where a pending prediction lives.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingKey {
    pub series_id: String,
    pub target_timestamp: Timestamp,
}

/// Serializable index row, oldest first in snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub prediction_id: String,
    pub series_id: String,
    pub target_timestamp: Timestamp,
}

/// Entry pushed out by the FIFO bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvictedPending {
    pub prediction_id: String,
    pub key: PendingKey,
}

/// Cross-series FIFO-bounded index of unresolved predictions.
///
/// Lookups use `peek`, so insertion order is never disturbed and the LRU
/// victim is always the oldest registration.
#[derive(Debug)]
pub struct PendingIndex {
    by_id: LruCache<String, PendingKey>,
    /// Ids sharing a key, oldest first.
    by_key: HashMap<PendingKey, Vec<String>>,
}

impl PendingIndex {
    pub fn new(cap: usize) -> Self {
        let cap = NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN);
        Self {
            by_id: LruCache::new(cap),
            by_key: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.by_id.cap().get()
    }

    /// Registers a prediction; returns the entry evicted to make room.
    pub fn insert(&mut self, prediction_id: &str, key: PendingKey) -> Option<EvictedPending> {
        let Some((old_id, old_key)) = self.by_id.push(prediction_id.to_string(), key.clone())
        else {
            self.link_key(prediction_id, key);
            return None;
        };
        self.unlink_key(&old_id, &old_key);
        self.link_key(prediction_id, key);
        if old_id == prediction_id {
            // replaced in place
            return None;
        }
        tracing::debug!(
            prediction_id = %old_id,
            series_id = %old_key.series_id,
            "pending index full; evicting oldest prediction"
        );
        Some(EvictedPending {
            prediction_id: old_id,
            key: old_key,
        })
    }

    pub fn get(&self, prediction_id: &str) -> Option<&PendingKey> {
        self.by_id.peek(prediction_id)
    }

    pub fn contains(&self, prediction_id: &str) -> bool {
        self.by_id.contains(prediction_id)
    }

    /// Most recent prediction registered for `key`.
    pub fn lookup(&self, key: &PendingKey) -> Option<&str> {
        self.by_key
            .get(key)
            .and_then(|ids| ids.last())
            .map(String::as_str)
    }

    pub fn remove(&mut self, prediction_id: &str) -> Option<PendingKey> {
        let key = self.by_id.pop(prediction_id)?;
        self.unlink_key(prediction_id, &key);
        Some(key)
    }

    /// Rows oldest first.
    pub fn records(&self) -> Vec<PendingRecord> {
        self.by_id
            .iter()
            .rev()
            .map(|(prediction_id, key)| PendingRecord {
                prediction_id: prediction_id.clone(),
                series_id: key.series_id.clone(),
                target_timestamp: key.target_timestamp,
            })
            .collect()
    }

    /// Rebuilds from rows in oldest-first order; overflow keeps the newest.
    pub fn from_records(cap: usize, records: &[PendingRecord]) -> Self {
        let mut index = Self::new(cap);
        for record in records {
            index.insert(
                &record.prediction_id,
                PendingKey {
                    series_id: record.series_id.clone(),
                    target_timestamp: record.target_timestamp,
                },
            );
        }
        index
    }

    fn link_key(&mut self, prediction_id: &str, key: PendingKey) {
        self.by_key
            .entry(key)
            .or_default()
            .push(prediction_id.to_string());
    }

    fn unlink_key(&mut self, prediction_id: &str, key: &PendingKey) {
        if let Some(ids) = self.by_key.get_mut(key) {
            ids.retain(|linked| linked != prediction_id);
            if ids.is_empty() {
                self.by_key.remove(key);
            }
        }
    }
}
