// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::pending::PendingKey;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
struct Resolution {
    key: PendingKey,
    value: f64,
    resolved_at: Instant,
}

/// Outcome of checking a truth against recently resolved ids.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheVerdict {
    /// Never resolved, or the record expired.
    Miss,
    /// Same value within the TTL.
    Idempotent,
    Conflict(String),
}

/// Recently resolved predictions, bounded in size and age.
#[derive(Debug)]
pub struct IdempotencyCache {
    ttl: Duration,
    conflict_window: Duration,
    max_ids: usize,
    by_id: HashMap<String, Resolution>,
    by_key: HashMap<PendingKey, String>,
    order: VecDeque<String>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration, conflict_window: Duration, max_ids: usize) -> Self {
        Self {
            ttl,
            conflict_window,
            max_ids: max_ids.max(1),
            by_id: HashMap::new(),
            by_key: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn check(&mut self, prediction_id: &str, value: f64, now: Instant) -> CacheVerdict {
        self.purge(now);
        let Some(resolution) = self.by_id.get(prediction_id) else {
            return CacheVerdict::Miss;
        };
        let age = now.saturating_duration_since(resolution.resolved_at);
        if age > self.ttl {
            return CacheVerdict::Conflict(format!(
                "prediction '{prediction_id}' was resolved {} ms ago, outside the idempotency window",
                age.as_millis()
            ));
        }
        if resolution.value == value {
            CacheVerdict::Idempotent
        } else {
            CacheVerdict::Conflict(format!(
                "prediction '{prediction_id}' was already resolved with a different value ({} != {value})",
                resolution.value
            ))
        }
    }

    /// Id recently resolved for `key`, if any.
    pub fn resolved_for(&self, key: &PendingKey) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    pub fn record(&mut self, prediction_id: &str, key: PendingKey, value: f64, now: Instant) {
        self.purge(now);
        if self.by_id.contains_key(prediction_id) {
            return;
        }
        self.by_key.insert(key.clone(), prediction_id.to_string());
        self.by_id.insert(
            prediction_id.to_string(),
            Resolution {
                key,
                value,
                resolved_at: now,
            },
        );
        self.order.push_back(prediction_id.to_string());
        while self.by_id.len() > self.max_ids {
            if !self.pop_oldest() {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_key.clear();
        self.order.clear();
    }

    /// Drops records older than `ttl + conflict_window`.
    pub fn purge(&mut self, now: Instant) {
        let horizon = self.ttl.saturating_add(self.conflict_window);
        while let Some(oldest) = self.order.front() {
            let expired = self
                .by_id
                .get(oldest)
                .is_none_or(|resolution| now.saturating_duration_since(resolution.resolved_at) > horizon);
            if !expired || !self.pop_oldest() {
                break;
            }
        }
    }

    fn pop_oldest(&mut self) -> bool {
        let Some(prediction_id) = self.order.pop_front() else {
            return false;
        };
        if let Some(resolution) = self.by_id.remove(&prediction_id)
            && self
                .by_key
                .get(&resolution.key)
                .is_some_and(|linked| *linked == prediction_id)
        {
            self.by_key.remove(&resolution.key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheVerdict, IdempotencyCache};
    use crate::pending::PendingKey;
    use regime_core::Timestamp;
    use std::time::{Duration, Instant};

    fn key(t: i64) -> PendingKey {
        PendingKey {
            series_id: "s".to_string(),
            target_timestamp: Timestamp::from_unix_nanos(t),
        }
    }

    fn cache() -> IdempotencyCache {
        IdempotencyCache::new(Duration::from_secs(10), Duration::from_secs(5), 100)
    }

    #[test]
    fn replay_within_ttl_is_idempotent_only_for_same_value() {
        let now = Instant::now();
        let mut cache = cache();
        assert_eq!(cache.check("a", 1.0, now), CacheVerdict::Miss);
        cache.record("a", key(1), 1.0, now);

        let later = now + Duration::from_secs(3);
        assert_eq!(cache.check("a", 1.0, later), CacheVerdict::Idempotent);
        assert!(matches!(cache.check("a", 2.0, later), CacheVerdict::Conflict(_)));
        assert_eq!(cache.resolved_for(&key(1)), Some("a"));
    }

    #[test]
    fn replay_after_ttl_conflicts_until_expiry() {
        let now = Instant::now();
        let mut cache = cache();
        cache.record("a", key(1), 1.0, now);

        let stale = now + Duration::from_secs(12);
        assert!(matches!(cache.check("a", 1.0, stale), CacheVerdict::Conflict(_)));

        let expired = now + Duration::from_secs(16);
        assert_eq!(cache.check("a", 1.0, expired), CacheVerdict::Miss);
        assert!(cache.is_empty());
        assert!(cache.resolved_for(&key(1)).is_none());
    }

    #[test]
    fn size_bound_drops_oldest_first() {
        let now = Instant::now();
        let mut cache = IdempotencyCache::new(Duration::from_secs(60), Duration::ZERO, 2);
        cache.record("a", key(1), 1.0, now);
        cache.record("b", key(2), 1.0, now);
        cache.record("c", key(3), 1.0, now);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.check("a", 1.0, now), CacheVerdict::Miss);
        assert_eq!(cache.check("c", 1.0, now), CacheVerdict::Idempotent);
        assert!(cache.resolved_for(&key(1)).is_none());
    }

    #[test]
    fn first_record_wins() {
        let now = Instant::now();
        let mut cache = cache();
        cache.record("a", key(1), 1.0, now);
        cache.record("a", key(1), 9.0, now);
        assert_eq!(cache.check("a", 1.0, now), CacheVerdict::Idempotent);
        assert_eq!(cache.len(), 1);
    }
}
