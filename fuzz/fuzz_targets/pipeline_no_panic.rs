// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]

#[path = "common.rs"]
mod common;

use libfuzzer_sys::fuzz_target;
use regime_core::{Tick, Timestamp};
use regime_online::{EngineConfig, ModelConfig, ModelKind, Pipeline};

fn build_models(seed: u8) -> ModelConfig {
    let enabled = match seed % 4 {
        0 => vec![ModelKind::Baseline],
        1 => vec![ModelKind::Baseline, ModelKind::Autoregressive],
        2 => vec![ModelKind::Gradient],
        _ => ModelConfig::default().enabled,
    };
    ModelConfig {
        enabled,
        ..ModelConfig::default()
    }
}

fn build_value(cursor: &mut common::ByteCursor<'_>) -> f64 {
    match cursor.next_u8() % 8 {
        0 => f64::NAN,
        1 => f64::INFINITY,
        2 => cursor.next_f64(),
        3 => f64::from(cursor.next_i16()) * 1e6,
        _ => f64::from(cursor.next_i16()) / 64.0,
    }
}

fuzz_target!(|data: &[u8]| {
    let mut cursor = common::ByteCursor::new(data);
    let mut config = EngineConfig {
        models: build_models(cursor.next_u8()),
        pending_cap: common::bounded(cursor.next_u8(), 1, 32),
        ..EngineConfig::default()
    };
    config.detector.max_run_length = common::bounded(cursor.next_u8(), 1, 128);
    config.conformal.window = common::bounded(cursor.next_u8(), 1, 64);
    config.conformal.min_samples = common::bounded(cursor.next_u8(), 1, config.conformal.window);

    let Ok(mut pipeline) = Pipeline::new(config) else {
        return;
    };

    let mut ts = i64::from(cursor.next_i16());
    let steps = common::bounded(cursor.next_u8(), 1, 128);
    for step in 0..steps {
        let op = cursor.next_u8();
        // mostly forward, sometimes stale
        ts = ts.saturating_add(i64::from(cursor.next_u8() % 4) - 1);
        let tick = Tick::new(Timestamp::from_unix_nanos(ts), build_value(&mut cursor));

        match op % 6 {
            0 => {
                let _ = pipeline.apply_truth_oldest(build_value(&mut cursor));
            }
            1 => {
                let id = format!("p{}", cursor.next_u8() % 8);
                let _ = pipeline.apply_truth(&id, build_value(&mut cursor));
            }
            2 => {
                let snapshot = pipeline.save_state();
                let _ = pipeline.load_state(&snapshot);
            }
            3 => {
                let id = format!("p{}", step % 8);
                let _ = pipeline.predict(&tick, id, tick.timestamp);
            }
            _ => {
                let _ = pipeline.step(&tick);
            }
        }
    }
});
