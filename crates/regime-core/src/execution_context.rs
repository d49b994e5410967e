// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use crate::RegimeError;
use crate::control::CancelToken;
use std::time::{Duration, Instant};

/// Request-scoped execution context.
///
/// Cancellation and deadlines are only consulted before a critical section is
/// entered; once a mutation starts it runs to completion.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutionContext<'a> {
    pub cancel: Option<&'a CancelToken>,
    pub started_at: Option<Instant>,
    pub time_budget: Option<Duration>,
}

impl<'a> ExecutionContext<'a> {
    /// Creates a context with no cancellation and no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the optional cancellation token.
    pub fn with_cancel(mut self, cancel: &'a CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets a deadline measured from `started_at`.
    pub fn with_deadline(mut self, started_at: Instant, time_budget: Duration) -> Self {
        self.started_at = Some(started_at);
        self.time_budget = Some(time_budget);
        self
    }

    /// Returns true when cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
    }

    /// Returns a cancelled error when cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<(), RegimeError> {
        if self.is_cancelled() {
            return Err(RegimeError::cancelled());
        }
        Ok(())
    }

    /// Returns a cancelled error once the configured deadline has passed.
    pub fn check_deadline(&self) -> Result<(), RegimeError> {
        let (Some(started_at), Some(budget)) = (self.started_at, self.time_budget) else {
            return Ok(());
        };
        let elapsed = started_at.elapsed();
        if elapsed <= budget {
            return Ok(());
        }
        let limit_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        Err(RegimeError::deadline_exceeded(elapsed.as_millis(), limit_ms))
    }

    /// Gate evaluated immediately before a state mutation begins.
    pub fn check_admission(&self) -> Result<(), RegimeError> {
        self.check_cancelled()?;
        self.check_deadline()
    }
}
