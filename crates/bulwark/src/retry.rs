// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::config::ConfigError;

/// Whether retrying can fix a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The failure may go away on its own (timeouts, throttling, dropped connections).
    /// Transient failures are retried.
    Transient,

    /// Retrying cannot help (malformed request, missing permissions, unknown resource).
    /// Permanent failures are never retried, but still count as circuit breaker failures.
    Permanent,
}

impl FailureKind {
    /// Returns the `snake_case` name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies an error as transient or permanent.
///
/// Implement this for the error type of the operation passed to
/// [`ResilientExecutor::execute`][crate::ResilientExecutor::execute].
///
/// # Examples
///
/// ```
/// use bulwark::{Classify, FailureKind};
///
/// #[derive(Debug)]
/// enum DatabaseError {
///     ConnectionTimeout,
///     InvalidCredentials,
/// }
///
/// impl Classify for DatabaseError {
///     fn failure_kind(&self) -> FailureKind {
///         match self {
///             Self::ConnectionTimeout => FailureKind::Transient,
///             Self::InvalidCredentials => FailureKind::Permanent,
///         }
///     }
/// }
///
/// assert_eq!(DatabaseError::ConnectionTimeout.failure_kind(), FailureKind::Transient);
/// ```
pub trait Classify {
    /// Returns the failure kind of this error.
    fn failure_kind(&self) -> FailureKind;
}

impl Classify for FailureKind {
    fn failure_kind(&self) -> FailureKind {
        *self
    }
}

impl Classify for std::io::Error {
    fn failure_kind(&self) -> FailureKind {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }
}

/// Decides whether a failed attempt is followed by another one.
///
/// The policy only decides. It never sleeps; the executor asks the [`Backoff`][crate::Backoff]
/// for the delay and the [`Sleeper`][crate::Sleeper] to wait between attempts.
///
/// # Examples
///
/// ```
/// use bulwark::{FailureKind, RetryPolicy};
///
/// let policy = RetryPolicy::new(3)?;
///
/// assert!(policy.should_retry(1, FailureKind::Transient));
/// assert!(policy.should_retry(2, FailureKind::Transient));
/// assert!(!policy.should_retry(3, FailureKind::Transient));
/// assert!(!policy.should_retry(1, FailureKind::Permanent));
/// # Ok::<(), bulwark::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts in total, the first one included.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroMaxAttempts`] if `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }

        Ok(Self { max_attempts })
    }

    /// Returns the total number of attempts allowed.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns `true` if attempt `attempt` (1-based) failed with `kind` and another attempt
    /// should follow.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, kind: FailureKind) -> bool {
        if kind == FailureKind::Permanent {
            return false;
        }

        attempt < self.max_attempts
    }
}
