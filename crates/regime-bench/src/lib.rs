// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use regime_core::{Tick, Timestamp};

/// Deterministic stream for benchmarks; no RNG crate on the hot path.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1))
    }

    /// Uniform in [-1, 1).
    pub fn next_signed(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

/// Noisy piecewise-constant series with a level shift every `segment` ticks.
pub fn shifting_series(seed: u64, n: usize, segment: usize) -> Vec<f64> {
    let mut lcg = Lcg::new(seed);
    let segment = segment.max(1);
    (0..n)
        .map(|t| {
            let level = if (t / segment) % 2 == 0 { 0.0 } else { 5.0 };
            level + lcg.next_signed()
        })
        .collect()
}

pub fn ticks(values: &[f64]) -> Vec<Tick> {
    values
        .iter()
        .enumerate()
        .map(|(t, x)| Tick::new(Timestamp::from_unix_nanos(t as i64 * 1_000_000_000), *x))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Lcg, shifting_series, ticks};

    #[test]
    fn lcg_stays_in_range_and_is_deterministic() {
        let mut a = Lcg::new(5);
        let mut b = Lcg::new(5);
        for _ in 0..1_000 {
            let value = a.next_signed();
            assert!((-1.0..1.0).contains(&value));
            assert_eq!(value, b.next_signed());
        }
    }

    #[test]
    fn series_and_ticks_line_up() {
        let values = shifting_series(1, 50, 10);
        let stream = ticks(&values);
        assert_eq!(stream.len(), 50);
        assert!(stream.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(values[10..20].iter().all(|v| *v > 3.0));
    }
}
