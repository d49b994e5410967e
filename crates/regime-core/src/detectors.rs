// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::{Regime, RegimeError};

/// Per-step output emitted by online change-point detectors.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct OnlineStepResult {
    pub t: usize,
    /// Posterior mass at run length zero.
    pub p_change: f64,
    /// Posterior mass at recent run lengths; drives the regime label.
    pub score: f64,
    /// True only on the tick where the label flips into an alarmed state.
    pub alert: bool,
    pub alert_reason: Option<String>,
    pub regime: Regime,
    pub run_length_mode: usize,
    pub run_length_mean: f64,
}

/// Streaming detector contract: one finite observation in, one step result out.
pub trait OnlineDetector {
    type State: Clone + std::fmt::Debug;

    fn reset(&mut self);
    fn update(&mut self, x_t: f64) -> Result<OnlineStepResult, RegimeError>;
    fn save_state(&self) -> Self::State;
    fn load_state(&mut self, state: &Self::State) -> Result<(), RegimeError>;

    /// Default batched path implemented on top of `update`.
    fn update_many(&mut self, xs: &[f64]) -> Result<Vec<OnlineStepResult>, RegimeError> {
        xs.iter().map(|&x| self.update(x)).collect()
    }
}
