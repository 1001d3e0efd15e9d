//! Fabric-wide error representation.
//!
//! Purpose: give every component (queue, pool, worker, cache, health
//! monitor) one error shape so callers can surface a machine-readable
//! `ErrorKind` and a human message regardless of which port raised the
//! original failure. Port adapters keep their own `thiserror` enums and
//! convert into this type at the fabric boundary.
//!
//! Public surface:
//! - [`ErrorKind`] — stable, machine-readable failure category (§7).
//! - [`Error`] — the fabric error payload.
//! - [`Result`] — convenience alias.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Stable, machine-readable error category from `spec.md` §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-fixable validation failure.
    Validation,
    /// Caller is not permitted to perform this action.
    Permission,
    /// Referenced resource does not exist.
    NotFound,
    /// A deadline was exceeded.
    Timeout,
    /// The operation was cancelled; terminal but not parked.
    Cancelled,
    /// A plan or system-wide resource limit was hit.
    ResourceExhausted,
    /// A collaborator (backing store, AI vision, conversion engine) is unreachable.
    UpstreamUnavailable,
    /// The conversion engine failed for a reason unrelated to the input.
    InternalConversion,
    /// The document itself cannot be processed; retrying will not help.
    PermanentConversion,
}

impl ErrorKind {
    /// Map onto the pure backoff crate's coarser classification category.
    #[must_use]
    pub fn to_category(self) -> docflow_backoff::ErrorCategory {
        use docflow_backoff::ErrorCategory as Cat;
        match self {
            Self::Validation => Cat::ValidationFailed,
            Self::Permission => Cat::PermissionDenied,
            Self::NotFound => Cat::FileNotFound,
            Self::Timeout => Cat::Timeout,
            Self::Cancelled => Cat::Other,
            Self::ResourceExhausted => Cat::Other,
            Self::UpstreamUnavailable => Cat::UpstreamUnavailable,
            Self::InternalConversion => Cat::InternalConversion,
            Self::PermanentConversion => Cat::UnsupportedFormat,
        }
    }

    /// True for kinds that route straight to the dead-letter queue.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Validation | Self::Permission | Self::NotFound | Self::PermanentConversion
        )
    }
}

/// Fabric error payload.
///
/// ## Invariants
/// - `message` is non-empty once trimmed.
///
/// # Examples
/// ```
/// use docflow::error::{Error, ErrorKind};
///
/// let err = Error::timeout("conversion exceeded deadline");
/// assert_eq!(err.kind(), ErrorKind::Timeout);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ThisError)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    /// Suggested retry-after, populated for `ResourceExhausted` under protection mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<Duration>,
}

impl Error {
    /// Build an error, falling back to a generic message if `message` is blank.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("{kind:?} error")
        } else {
            message
        };
        Self {
            kind,
            message,
            retry_after: None,
        }
    }

    /// Construct a `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Construct a `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Construct a `Timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Construct a `Cancelled` error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Construct a `ResourceExhausted` error carrying a suggested retry-after.
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(ErrorKind::ResourceExhausted, message)
        }
    }

    /// Construct an `UpstreamUnavailable` error.
    #[must_use]
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    /// Construct an `InternalConversion` error.
    #[must_use]
    pub fn internal_conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalConversion, message)
    }

    /// Construct a `PermanentConversion` error.
    #[must_use]
    pub fn permanent_conversion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermanentConversion, message)
    }

    /// Stable machine-readable kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Suggested retry-after duration, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::ResourceExhausted => "resource_exhausted",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::InternalConversion => "internal_conversion",
            Self::PermanentConversion => "permanent_conversion",
        };
        f.write_str(text)
    }
}

/// Convenience alias for fabric operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Validation, true)]
    #[case(ErrorKind::Permission, true)]
    #[case(ErrorKind::NotFound, true)]
    #[case(ErrorKind::PermanentConversion, true)]
    #[case(ErrorKind::Timeout, false)]
    #[case(ErrorKind::UpstreamUnavailable, false)]
    #[case(ErrorKind::InternalConversion, false)]
    #[case(ErrorKind::Cancelled, false)]
    #[case(ErrorKind::ResourceExhausted, false)]
    fn terminal_kinds_match_spec(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_terminal(), expected);
    }

    #[rstest]
    fn blank_message_falls_back_to_generic() {
        let err = Error::validation("   ");
        assert!(err.message().contains("error"));
    }

    #[rstest]
    fn resource_exhausted_carries_retry_after() {
        let err = Error::resource_exhausted("busy", Duration::from_secs(5));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }
}
