// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

#[path = "support/streams.rs"]
mod streams;

use regime_core::Regime;
use regime_online::{
    EngineConfig, ModelConfig, ModelKind, PayloadCodec, Pipeline, TruthOutcome,
    load_pipeline_checkpoint, save_pipeline_checkpoint,
};
use streams::{gaussian, regime_shifts, ticks, ts};

fn pipeline(config: EngineConfig) -> Pipeline {
    Pipeline::new(config).expect("engine config should be valid")
}

#[test]
fn coverage_converges_on_stationary_noise() {
    let values = gaussian(7, 4_000, 0.0, 1.0);
    let mut p = pipeline(EngineConfig::default());

    let (mut covered, mut total) = (0usize, 0usize);
    let mut previous: Option<(f64, f64)> = None;
    for (t, tick) in ticks(&values).iter().enumerate() {
        if let Some((low, high)) = previous.take()
            && t > 500
        {
            covered += usize::from(low <= tick.x && tick.x <= high);
            total += 1;
        }
        let out = p.step(tick).expect("step");
        previous = Some((out.interval_low, out.interval_high));
    }

    let coverage = covered as f64 / total as f64;
    assert!((coverage - 0.9).abs() < 0.05, "coverage={coverage}");
}

#[test]
fn level_shift_raises_volatile_regime_and_recovers() {
    let values = regime_shifts(11, &[(200, 0.0), (200, 8.0)], 0.5);
    let mut p = pipeline(EngineConfig::default());
    let records = p.replay(&ticks(&values)).expect("replay");

    assert!(records[..200].iter().all(|record| record.regime == Regime::Calm));
    let volatile_at = records
        .iter()
        .position(|record| record.regime == Regime::Volatile)
        .expect("shift should be flagged");
    assert!((200..210).contains(&volatile_at), "flagged at {volatile_at}");
    assert_eq!(records.last().map(|record| record.regime), Some(Regime::Calm));
}

#[test]
fn router_tracks_best_model_on_autoregressive_signal() {
    // x_t = 0.9 x_{t-1} + noise favours the autoregressive variant over EWMA.
    let noise = gaussian(3, 3_000, 0.0, 0.3);
    let mut values = Vec::with_capacity(noise.len());
    let mut x = 0.0;
    for shock in noise {
        x = 0.9 * x + shock;
        values.push(x);
    }

    let mut p = pipeline(EngineConfig {
        models: ModelConfig {
            enabled: vec![ModelKind::Baseline, ModelKind::Autoregressive],
            ..ModelConfig::default()
        },
        ..EngineConfig::default()
    });
    let records = p.replay(&ticks(&values)).expect("replay");
    assert_eq!(
        records.last().map(|record| record.model),
        Some(ModelKind::Autoregressive)
    );
    assert!(p.router().state().switches >= 1);
}

#[test]
fn keyed_truths_may_arrive_out_of_order() {
    let mut p = pipeline(EngineConfig::default());
    let values = [1.0, 2.0, 3.0, 4.0];
    for (t, tick) in ticks(&values).iter().enumerate() {
        p.predict(tick, format!("p{t}"), ts(t + 1)).expect("predict");
    }
    for id in ["p2", "p0", "p3", "p1"] {
        assert!(p.apply_truth(id, 2.0).expect("finite").is_applied());
    }
    assert_eq!(p.pending_len(), 0);
    assert_eq!(p.conformal().global().len(), 4);
    assert_eq!(
        p.apply_truth("p0", 2.0).expect("finite"),
        TruthOutcome::NotPending
    );
}

#[test]
fn checkpoint_restore_yields_identical_outputs() {
    let values = regime_shifts(5, &[(150, 0.0), (150, 3.0), (150, -1.0)], 0.4);
    let stream = ticks(&values);

    let mut uninterrupted = pipeline(EngineConfig::default());
    let mut resumed = pipeline(EngineConfig::default());
    for (t, tick) in stream.iter().enumerate() {
        if t % 90 == 89 {
            for codec in [PayloadCodec::Json, PayloadCodec::Bincode] {
                let envelope = save_pipeline_checkpoint(&resumed, codec).expect("save");
                let mut fresh = pipeline(EngineConfig::default());
                load_pipeline_checkpoint(&mut fresh, &envelope).expect("load");
                resumed = fresh;
            }
        }
        let lhs = uninterrupted.step(tick).expect("step");
        let rhs = resumed.step(tick).expect("step");
        assert_eq!(lhs.y_hat, rhs.y_hat, "t={t}");
        assert_eq!(lhs.intervals, rhs.intervals, "t={t}");
        assert_eq!(lhs.regime, rhs.regime, "t={t}");
        assert_eq!(lhs.model, rhs.model, "t={t}");
    }
    assert_eq!(uninterrupted.save_state(), resumed.save_state());
}
