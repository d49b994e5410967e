// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use proptest::prelude::*;
use regime_core::Timestamp;
use regime_service::{CacheVerdict, IdempotencyCache, PendingIndex, PendingKey};
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
enum Op {
    Insert { series: u8, target: u8 },
    Remove(usize),
}

fn ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0u8..4, 0u8..6).prop_map(|(series, target)| Op::Insert { series, target }),
            1 => (0usize..64).prop_map(Op::Remove),
        ],
        1..120,
    )
}

fn key(series: u8, target: u8) -> PendingKey {
    PendingKey {
        series_id: format!("s{series}"),
        target_timestamp: Timestamp::from_unix_nanos(i64::from(target)),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pending_index_maps_stay_consistent(ops in ops(), cap in 1usize..12) {
        let mut index = PendingIndex::new(cap);
        let (mut inserted, mut evicted, mut removed) = (0usize, 0usize, 0usize);
        for op in ops {
            match op {
                Op::Insert { series, target } => {
                    let id = format!("p{inserted}");
                    inserted += 1;
                    if let Some(victim) = index.insert(&id, key(series, target)) {
                        evicted += 1;
                        prop_assert!(!index.contains(&victim.prediction_id));
                    }
                }
                Op::Remove(n) => {
                    let id = format!("p{n}");
                    if index.remove(&id).is_some() {
                        removed += 1;
                        prop_assert!(!index.contains(&id));
                    }
                }
            }
            prop_assert!(index.len() <= cap);
            prop_assert_eq!(inserted, index.len() + evicted + removed);

            for record in index.records() {
                let expected = PendingKey {
                    series_id: record.series_id.clone(),
                    target_timestamp: record.target_timestamp,
                };
                prop_assert_eq!(index.get(&record.prediction_id), Some(&expected));
                let linked = index.lookup(&expected).map(str::to_string);
                prop_assert!(linked.is_some_and(|id| index.contains(&id)));
            }
        }
    }

    #[test]
    fn same_value_replay_within_ttl_is_idempotent(
        value in -1e6f64..1e6,
        other in -1e6f64..1e6,
        delay_ms in 0u64..1_000,
    ) {
        let mut cache = IdempotencyCache::new(
            Duration::from_millis(1_000),
            Duration::from_millis(1_000),
            16,
        );
        let base = Instant::now();
        prop_assert_eq!(cache.check("p", value, base), CacheVerdict::Miss);
        cache.record("p", key(0, 0), value, base);

        let later = base + Duration::from_millis(delay_ms);
        prop_assert_eq!(cache.check("p", value, later), CacheVerdict::Idempotent);
        if other != value {
            let conflicted = matches!(cache.check("p", other, later), CacheVerdict::Conflict(_));
            prop_assert!(conflicted);
        }
    }
}
