// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RegimeError;
use crate::numeric::check_observation;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// UTC instant with nanosecond resolution, stored as nanoseconds since the epoch.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_unix_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn from_unix_seconds(seconds: i64) -> Result<Self, RegimeError> {
        seconds
            .checked_mul(NANOS_PER_SECOND)
            .map(Self)
            .ok_or_else(|| {
                RegimeError::invalid_input(format!(
                    "epoch seconds {seconds} overflow nanosecond timestamp range"
                ))
            })
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    pub const fn as_unix_nanos(self) -> i64 {
        self.0
    }

    /// Parses RFC 3339 (with `Z` or an explicit offset) or an epoch-seconds string.
    pub fn parse(raw: &str) -> Result<Self, RegimeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RegimeError::invalid_input("timestamp must be non-empty"));
        }

        if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
            let utc = parsed.with_timezone(&Utc);
            return utc.timestamp_nanos_opt().map(Self).ok_or_else(|| {
                RegimeError::invalid_input(format!(
                    "timestamp '{trimmed}' is outside the representable nanosecond range"
                ))
            });
        }

        if let Ok(seconds) = trimmed.parse::<i64>() {
            return Self::from_unix_seconds(seconds);
        }

        let looks_numeric = trimmed
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '+' | 'e' | 'E'));
        if looks_numeric && let Ok(seconds) = trimmed.parse::<f64>() {
            let nanos = seconds * NANOS_PER_SECOND as f64;
            if nanos.is_finite() && nanos.abs() < i64::MAX as f64 {
                return Ok(Self(nanos.round() as i64));
            }
            return Err(RegimeError::invalid_input(format!(
                "epoch-seconds timestamp '{trimmed}' must be finite and in range"
            )));
        }

        Err(RegimeError::invalid_input(format!(
            "timestamp '{trimmed}' is neither RFC 3339 UTC nor epoch seconds"
        )))
    }

    pub fn to_rfc3339(self) -> String {
        let secs = self.0.div_euclid(NANOS_PER_SECOND);
        let nanos = self.0.rem_euclid(NANOS_PER_SECOND) as u32;
        match DateTime::<Utc>::from_timestamp(secs, nanos) {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            None => self.0.to_string(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

/// Discrete regime label summarizing detector state.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Regime {
    #[default]
    Calm,
    Volatile,
}

impl Regime {
    pub const ALL: [Regime; 2] = [Regime::Calm, Regime::Volatile];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calm => "calm",
            Self::Volatile => "volatile",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of the univariate target plus optional covariates.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Tick {
    pub timestamp: Timestamp,
    pub x: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub covariates: BTreeMap<String, f64>,
}

impl Tick {
    pub fn new(timestamp: Timestamp, x: f64) -> Self {
        Self {
            timestamp,
            x,
            covariates: BTreeMap::new(),
        }
    }

    pub fn with_covariate(mut self, key: impl Into<String>, value: f64) -> Self {
        self.covariates.insert(key.into(), value);
        self
    }

    /// Rejects non-finite or out-of-range target and covariate values.
    pub fn validate(&self) -> Result<(), RegimeError> {
        check_observation("x", self.x)?;
        for (key, value) in &self.covariates {
            check_observation(&format!("covariate '{key}'"), *value)?;
        }
        Ok(())
    }
}
