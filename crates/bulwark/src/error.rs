// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// The circuit breaker refused to let the call through.
///
/// Produced by the executor only, never by the protected operation. When this error is
/// returned the operation was not invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit is open, call rejected without invoking the operation")]
pub struct CircuitOpenError {
    pub(crate) retry_after: Option<Duration>,
}

impl CircuitOpenError {
    /// Returns how long until the breaker admits a trial call.
    ///
    /// Returns `None` while another caller's trial is in flight, since the wait then depends
    /// on the outcome of that trial.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// A [`Sleeper`][crate::Sleeper] was interrupted by its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, thiserror::Error)]
#[error("sleep cancelled")]
pub struct Cancelled;

/// Failure returned by [`ResilientExecutor::execute`][crate::ResilientExecutor::execute].
///
/// The variants separate "the dependency call failed" from "we did not even try", so callers
/// can react to each differently.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError<E> {
    /// Admission was denied by the circuit breaker.
    #[error(transparent)]
    CircuitOpen(CircuitOpenError),

    /// The operation failed and was not retried, either because the error is permanent or
    /// because the attempts were exhausted. The error is the one returned by the last attempt.
    #[error("operation failed: {0}")]
    Operation(E),

    /// The cancellation token fired before the call completed.
    #[error("execution cancelled")]
    Cancelled {
        /// The error of the last completed attempt, if any attempt completed.
        last_error: Option<E>,
    },
}

impl<E> ExecuteError<E> {
    /// Returns `true` if the call was rejected by an open circuit.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// Returns `true` if the call was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns the operation error, if the operation ran at least once.
    #[must_use]
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Cancelled { last_error } => last_error.as_ref(),
            Self::CircuitOpen(_) => None,
        }
    }

    /// Consumes the error and returns the operation error, if any.
    #[must_use]
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::Cancelled { last_error } => last_error,
            Self::CircuitOpen(_) => None,
        }
    }
}
