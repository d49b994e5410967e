// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use std::fmt;

/// Coarse classification used by transports to pick a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Unauthorized,
    NumericalIssue,
    ResourceLimit,
    Cancelled,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::NumericalIssue => "numerical_issue",
            Self::ResourceLimit => "resource_limit",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error taxonomy shared by every regime crate.
///
/// Only clearly invalid external input and service-boundary rejections are
/// surfaced here. Numeric edge cases inside the engine are corrected locally
/// and reported through the `degraded` output flag instead.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegimeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("numerical issue: {0}")]
    NumericalIssue(String),
    #[error("resource limit: {0}")]
    ResourceLimit(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl RegimeError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn numerical_issue(message: impl Into<String>) -> Self {
        Self::NumericalIssue(message.into())
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::ResourceLimit(message.into())
    }

    pub fn cancelled() -> Self {
        Self::Cancelled("operation cancelled before entering critical section".to_string())
    }

    pub fn deadline_exceeded(elapsed_ms: u128, limit_ms: u64) -> Self {
        Self::Cancelled(format!(
            "deadline exceeded before entering critical section: elapsed_ms={elapsed_ms}, limit_ms={limit_ms}"
        ))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NumericalIssue(_) => ErrorKind::NumericalIssue,
            Self::ResourceLimit(_) => ErrorKind::ResourceLimit,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// HTTP-style status code for transports that map errors onto responses.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 422,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::RateLimited => 429,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NumericalIssue => 500,
            ErrorKind::ResourceLimit => 503,
            ErrorKind::Cancelled => 499,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::RateLimited(msg)
            | Self::Unauthorized(msg)
            | Self::NumericalIssue(msg)
            | Self::ResourceLimit(msg)
            | Self::Cancelled(msg) => msg,
        }
    }
}
