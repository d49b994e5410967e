// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RegimeError;

/// Smallest positive scale accepted by downstream density and interval math.
pub const MIN_SCALE: f64 = 1e-12;

/// Largest accepted magnitude for observed values. Squares and windowed sums
/// of squares stay finite below it.
pub const MAX_ABS_OBSERVATION: f64 = 1e100;

/// Accepts finite values within [`MAX_ABS_OBSERVATION`].
pub fn check_observation(name: &str, value: f64) -> Result<(), RegimeError> {
    if !value.is_finite() {
        return Err(RegimeError::invalid_input(format!(
            "{name} must be a finite number; got {value}"
        )));
    }
    if value.abs() > MAX_ABS_OBSERVATION {
        return Err(RegimeError::invalid_input(format!(
            "{name} magnitude must not exceed {MAX_ABS_OBSERVATION:e}; got {value:e}"
        )));
    }
    Ok(())
}

/// Numerically stable `ln(exp(a) + exp(b))`.
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

/// Numerically stable `ln(sum(exp(values)))`.
///
/// Returns `-inf` for an empty slice or when every entry is `-inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max.is_nan() {
        return max;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let acc: f64 = values.iter().map(|value| (value - max).exp()).sum();
    max + acc.ln()
}

/// Clamps a scale-like quantity to at least [`MIN_SCALE`], mapping NaN to the floor.
pub fn clamp_scale(value: f64) -> f64 {
    if value.is_nan() || value < MIN_SCALE {
        MIN_SCALE
    } else {
        value
    }
}
