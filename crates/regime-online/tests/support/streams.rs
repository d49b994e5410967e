// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]
#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regime_core::{Tick, Timestamp};

pub const SECOND_NS: i64 = 1_000_000_000;

pub fn ts(t: usize) -> Timestamp {
    Timestamp::from_unix_nanos(t as i64 * SECOND_NS)
}

pub fn ticks(values: &[f64]) -> Vec<Tick> {
    values
        .iter()
        .enumerate()
        .map(|(t, x)| Tick::new(ts(t), *x))
        .collect()
}

pub fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// IID Gaussian noise around `mean`.
pub fn gaussian(seed: u64, n: usize, mean: f64, sd: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| mean + sd * standard_normal(&mut rng)).collect()
}

/// Piecewise-constant mean with Gaussian noise; `segments` are `(len, mean)`.
pub fn regime_shifts(seed: u64, segments: &[(usize, f64)], sd: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    segments
        .iter()
        .flat_map(|(len, mean)| std::iter::repeat_n(*mean, *len))
        .map(|mean| mean + sd * standard_normal(&mut rng))
        .collect()
}
