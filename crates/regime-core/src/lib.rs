// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

pub mod control;
pub mod detectors;
pub mod error;
pub mod execution_context;
pub mod numeric;
pub mod time_series;

pub use control::CancelToken;
pub use detectors::{OnlineDetector, OnlineStepResult};
pub use error::{ErrorKind, RegimeError};
pub use execution_context::ExecutionContext;
pub use numeric::{
    MAX_ABS_OBSERVATION, MIN_SCALE, check_observation, clamp_scale, log_add_exp, log_sum_exp,
};
pub use time_series::{Regime, Tick, Timestamp};
