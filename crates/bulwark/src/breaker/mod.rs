// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Circuit breaker that stops calling a dependency after consecutive failures.
//!
//! # State Diagram
//!
//! ```text
//!                failure_count >= failure_threshold
//!   ┌────────┐ ───────────────────────────────────► ┌──────┐
//!   │ Closed │                                      │ Open │ ◄─┐ failure
//!   └────────┘ ◄─────────┐                          └──────┘ ──┘ (refreshes timer)
//!        ▲               │ trial succeeds              │
//!        │               │                             │ reset_timeout elapsed,
//!        │          ┌──────────┐                       │ next caller becomes the trial
//!        │          │ HalfOpen │ ◄─────────────────────┘
//!        │          └──────────┘
//!        │               │ trial fails
//!        │               └──────────────────────────► Open
//! ```
//!
//! All state lives behind a single mutex. Every admission or outcome is one lock
//! acquisition, and the `Open -> HalfOpen` transition claims the trial slot in that same
//! acquisition, so at most one trial is ever outstanding.

mod constants;
mod permit;
mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use constants::ERR_POISONED_LOCK;
pub(crate) use permit::Permit;
use state::{Origin, State};
pub(crate) use state::Transition;

use crate::clock::Clock;
use crate::config::ConfigError;
use crate::error::CircuitOpenError;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow normally; consecutive failures are counted.
    Closed,

    /// Calls are rejected until the reset timeout elapses.
    Open,

    /// A single trial call is in flight; everyone else is rejected.
    HalfOpen,
}

impl CircuitState {
    /// Returns the `snake_case` name used in telemetry.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consistent view of the mutable breaker fields, read under one lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct BreakerSnapshot {
    /// The current circuit state.
    pub state: CircuitState,

    /// Consecutive failures since the last success or the last trial admission.
    pub failure_count: u32,

    /// Instant of the most recent failure, if any.
    pub last_failure_time: Option<Instant>,
}

/// Closed / open / half-open circuit breaker.
///
/// A breaker is meant to be long-lived and shared: wrap it in an [`Arc`] and hand it to
/// every [`ResilientExecutor`][crate::ResilientExecutor] protecting the same dependency.
///
/// Besides the executor, the breaker can be driven directly with
/// [`allow_request`][Self::allow_request], [`register_success`][Self::register_success] and
/// [`register_failure`][Self::register_failure].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bulwark::{CircuitBreaker, CircuitState};
/// use tick::ClockControl;
///
/// let control = ClockControl::new();
/// let breaker = CircuitBreaker::new(2, Duration::from_secs(2), control.to_clock())?;
///
/// breaker.register_failure();
/// breaker.register_failure();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.allow_request());
///
/// control.advance(Duration::from_secs(2));
/// assert!(breaker.allow_request());
/// assert_eq!(breaker.state(), CircuitState::HalfOpen);
///
/// breaker.register_success();
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// # Ok::<(), bulwark::ConfigError>(())
/// ```
pub struct CircuitBreaker {
    state: Mutex<State>,
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("snapshot", &self.snapshot())
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("clock", &self.clock)
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker that reads time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `failure_threshold` or `reset_timeout` is zero.
    pub fn new(failure_threshold: u32, reset_timeout: Duration, clock: impl Clock) -> Result<Self, ConfigError> {
        Self::from_shared_clock(failure_threshold, reset_timeout, Arc::new(clock))
    }

    pub(crate) fn from_shared_clock(
        failure_threshold: u32,
        reset_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }

        if reset_timeout.is_zero() {
            return Err(ConfigError::ZeroResetTimeout);
        }

        Ok(Self {
            state: Mutex::new(State::new()),
            failure_threshold,
            reset_timeout,
            clock,
        })
    }

    /// Returns `true` if a call may proceed now.
    ///
    /// When the circuit is open and the reset timeout has elapsed, this call moves the
    /// breaker to [`CircuitState::HalfOpen`] and the caller becomes the trial. The caller
    /// is then expected to report the trial outcome with [`register_success`][Self::register_success]
    /// or [`register_failure`][Self::register_failure].
    #[must_use]
    pub fn allow_request(&self) -> bool {
        let now = self.clock.now();
        self.lock().admit(now, self.reset_timeout).is_ok()
    }

    /// Records a successful call.
    pub fn register_success(&self) {
        self.lock().on_success(Origin::Caller);
    }

    /// Records a failed call.
    pub fn register_failure(&self) {
        let now = self.clock.now();
        self.lock().on_failure(Origin::Caller, now, self.failure_threshold);
    }

    /// Returns the current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().circuit
    }

    /// Returns the number of consecutive failures recorded.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Returns the instant of the most recent failure.
    #[must_use]
    pub fn last_failure_time(&self) -> Option<Instant> {
        self.lock().last_failure_time
    }

    /// Returns the number of consecutive failures that opens the circuit.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns how long the circuit stays open before a trial is admitted.
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Returns the state, failure count and last failure time as one consistent view.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock();
        BreakerSnapshot {
            state: state.circuit,
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Admits a call on behalf of the executor.
    pub(crate) fn acquire(&self) -> Result<(Permit<'_>, Transition), CircuitOpenError> {
        let now = self.clock.now();
        let (admission, transition) = self.lock().admit(now, self.reset_timeout)?;
        Ok((Permit::new(self, admission), transition))
    }

    fn settle_success(&self, origin: Origin) -> Transition {
        self.lock().on_success(origin)
    }

    fn settle_failure(&self, origin: Origin) -> Transition {
        let now = self.clock.now();
        self.lock().on_failure(origin, now, self.failure_threshold)
    }

    fn abandon_trial(&self) {
        self.lock().abandon_trial();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect(ERR_POISONED_LOCK)
    }
}
