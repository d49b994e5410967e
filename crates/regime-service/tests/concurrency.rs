// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

#[path = "support/harness.rs"]
mod harness;

use harness::{predict_at, service, truth, wave};
use regime_core::ErrorKind;
use parking_lot::Mutex;
use regime_service::{ServiceConfig, TruthRequest};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[test]
fn threads_on_distinct_series_do_not_interfere() {
    let state = Arc::new(service(ServiceConfig::default()));
    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let series = format!("series-{worker}");
                for t in 0..60 {
                    let out = predict_at(&state, &series, t, wave(t + worker));
                    assert!(out.y_hat.is_finite());
                    truth(&state, TruthRequest::by_id(&out.prediction_id, wave(t + worker + 1)))
                        .expect("own truth resolves");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let stats = state.stats();
    assert_eq!(stats.series, 8);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.resolved, 8 * 60);
}

#[test]
fn concurrent_duplicate_truths_apply_once() {
    let state = Arc::new(service(ServiceConfig::default()));
    let ids: Vec<String> = (0..40)
        .map(|t| predict_at(&state, "shared", t, wave(t)).prediction_id)
        .collect();
    let ids = Arc::new(ids);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let state = Arc::clone(&state);
            let ids = Arc::clone(&ids);
            thread::spawn(move || {
                let mut applied = 0usize;
                for id in ids.iter() {
                    let resp = truth(&state, TruthRequest::by_id(id, 1.0)).expect("same value");
                    applied += usize::from(!resp.idempotent);
                }
                applied
            })
        })
        .collect();
    let applied: usize = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker panicked"))
        .sum();

    assert_eq!(applied, ids.len());
    let handle = state.registry().peek("shared").expect("series");
    assert_eq!(handle.lock().conformal().global().len(), ids.len());
}

#[test]
fn duplicate_truths_racing_live_predictions_are_never_missed() {
    const TICKS: i64 = 1_500;
    let state = Arc::new(service(ServiceConfig::default()));
    let current: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let state = Arc::clone(&state);
        let current = Arc::clone(&current);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for t in 0..TICKS {
                let id = predict_at(&state, "s", t, wave(t)).prediction_id;
                *current.lock() = Some(id);
            }
            done.store(true, Ordering::Release);
        })
    };

    let resolvers: Vec<_> = (0..6)
        .map(|_| {
            let state = Arc::clone(&state);
            let current = Arc::clone(&current);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut applied = Vec::new();
                let mut not_found = 0usize;
                let mut other_errors = 0usize;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let id = current.lock().clone();
                    if let Some(id) = id {
                        match truth(&state, TruthRequest::by_id(&id, 2.0)) {
                            Ok(resp) if !resp.idempotent => applied.push(id),
                            Ok(_) => {}
                            Err(err) if err.kind() == ErrorKind::NotFound => not_found += 1,
                            Err(_) => other_errors += 1,
                        }
                    }
                    if finished {
                        break;
                    }
                }
                (applied, not_found, other_errors)
            })
        })
        .collect();

    producer.join().expect("producer panicked");
    let mut applied = Vec::new();
    for resolver in resolvers {
        let (ids, not_found, other_errors) = resolver.join().expect("resolver panicked");
        assert_eq!(not_found, 0, "a duplicate truth was answered as not found");
        assert_eq!(other_errors, 0);
        applied.extend(ids);
    }

    let distinct: HashSet<&String> = applied.iter().collect();
    assert_eq!(distinct.len(), applied.len(), "a truth was applied twice");
    assert!(!applied.is_empty());
    let stats = state.stats();
    assert_eq!(stats.resolved, applied.len());
    assert_eq!(stats.pending, TICKS as usize - applied.len());
    let handle = state.registry().peek("s").expect("series");
    assert_eq!(handle.lock().pending_len(), stats.pending);
}

#[test]
fn conflicting_truths_race_to_a_single_winner() {
    let state = Arc::new(service(ServiceConfig::default()));
    let id = predict_at(&state, "s", 0, 1.0).prediction_id;

    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let state = Arc::clone(&state);
            let id = id.clone();
            thread::spawn(move || truth(&state, TruthRequest::by_id(&id, worker as f64)))
        })
        .collect();
    let results: Vec<_> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker panicked"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|err| err.kind() == ErrorKind::Conflict));
}

#[test]
fn cross_series_eviction_under_contention_stays_bounded() {
    let state = Arc::new(service(ServiceConfig {
        pending_cap: 16,
        max_series: 4,
        ..ServiceConfig::default()
    }));
    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let series = format!("s{worker}");
                for t in 0..50 {
                    predict_at(&state, &series, t, wave(t));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    let stats = state.stats();
    assert!(stats.pending <= 16);
    assert!(stats.series <= 4);
}
