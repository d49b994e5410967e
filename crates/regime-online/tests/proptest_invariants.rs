// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

#[path = "support/streams.rs"]
mod streams;

use proptest::prelude::*;
use regime_online::{
    BocpdConfig, BocpdDetector, EngineConfig, Pipeline, RouterConfig, TruthOutcome,
};
use streams::{ticks, ts};

fn bounded_series() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1_000.0f64..1_000.0, 1..160)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn outputs_are_finite_and_ordered(values in bounded_series()) {
        let mut p = Pipeline::new(EngineConfig::default()).expect("valid config");
        for tick in ticks(&values) {
            let out = p.step(&tick).expect("finite ticks are accepted");
            prop_assert!(out.y_hat.is_finite());
            prop_assert!(out.interval_low <= out.y_hat && out.y_hat <= out.interval_high);
            prop_assert!((0.0..=1.0).contains(&out.score));
            prop_assert!((0.0..=1.0).contains(&out.p_change));
            for [low, high] in out.intervals.values() {
                prop_assert!(low <= high);
            }
        }
    }

    #[test]
    fn run_length_posterior_stays_normalized(values in bounded_series()) {
        let mut detector = BocpdDetector::new(BocpdConfig {
            max_run_length: 32,
            ..BocpdConfig::default()
        })
        .expect("valid config");
        for x in values {
            detector.observe(x);
            let total: f64 = detector.run_length_probs().iter().sum();
            prop_assert!((total - 1.0).abs() < 1e-9, "total={}", total);
            prop_assert!(detector.run_length_probs().len() <= 33);
        }
    }

    #[test]
    fn router_never_switches_within_dwell(
        values in prop::collection::vec(-50.0f64..50.0, 50..300),
        dwell_min in 1usize..15,
    ) {
        let mut p = Pipeline::new(EngineConfig {
            router: RouterConfig {
                dwell_min,
                min_loss_samples: 1,
                switch_threshold: 0.0,
                switch_penalty: 0.0,
                freeze_on_recent_cp: false,
                ..RouterConfig::default()
            },
            ..EngineConfig::default()
        })
        .expect("valid config");
        let mut last_switch: Option<usize> = None;
        for (t, tick) in ticks(&values).iter().enumerate() {
            let out = p.step(tick).expect("step");
            if out.switched {
                if let Some(previous) = last_switch {
                    prop_assert!(t - previous >= dwell_min, "switch at {} after {}", t, previous);
                }
                last_switch = Some(t);
            }
        }
    }

    #[test]
    fn repeated_truth_never_touches_buffers(
        values in prop::collection::vec(-10.0f64..10.0, 2..40),
        truth in -10.0f64..10.0,
    ) {
        let mut p = Pipeline::new(EngineConfig::default()).expect("valid config");
        let stream = ticks(&values);
        for (t, tick) in stream.iter().enumerate() {
            p.predict(tick, format!("id-{t}"), ts(t + 1)).expect("predict");
        }
        prop_assert!(p.apply_truth("id-0", truth).expect("finite").is_applied());
        let state = p.save_state();
        prop_assert_eq!(p.apply_truth("id-0", truth).expect("finite"), TruthOutcome::NotPending);
        prop_assert_eq!(p.save_state(), state);
    }
}
