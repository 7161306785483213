// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Source of the current time for the circuit breaker.
///
/// The breaker only measures elapsed time, so the clock returns a monotonic [`Instant`].
/// Implemented for [`tick::Clock`]; tests drive it with `tick::ClockControl` instead of
/// waiting for real time to pass.
pub trait Clock: Debug + Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Pauses the caller between retry attempts.
///
/// Implementations must return `Err(Cancelled)` promptly once `cancel` fires, including when
/// it was already cancelled before the call.
pub trait Sleeper: Debug + Send + Sync + 'static {
    /// Waits for `delay` unless `cancel` fires first.
    fn sleep(&self, delay: Duration, cancel: &CancellationToken) -> impl Future<Output = Result<(), Cancelled>> + Send;
}

impl Clock for tick::Clock {
    fn now(&self) -> Instant {
        self.instant()
    }
}

/// Waits on a [`tick::Delay`], so the pause follows whatever drives the clock: the tokio
/// runtime for `tick::Clock::new_tokio`, or `tick::ClockControl` in tests.
impl Sleeper for tick::Clock {
    fn sleep(&self, delay: Duration, cancel: &CancellationToken) -> impl Future<Output = Result<(), Cancelled>> + Send {
        let delay = self.delay(delay);
        let cancel = cancel.clone();

        async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(Cancelled),
                () = delay => Ok(()),
            }
        }
    }
}
