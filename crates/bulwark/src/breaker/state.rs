// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant};

use super::CircuitState;
use crate::error::CircuitOpenError;

/// How a call was let through the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Regular call on a closed circuit.
    Normal,

    /// The single trial call that decides whether a half-open circuit closes again.
    Trial,
}

/// Who reports an outcome to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A direct `register_success` / `register_failure` call.
    Caller,

    /// An executor permit obtained with the given admission.
    Permit(Admission),
}

/// State change caused by an admission or an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,

    /// Closed -> Open, failure threshold reached.
    Opened,

    /// Open -> HalfOpen, trial admitted.
    HalfOpened,

    /// HalfOpen -> Open, trial failed.
    Reopened,

    /// HalfOpen -> Closed, trial succeeded.
    Closed,
}

/// Mutable part of the breaker. Every method runs under the breaker lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct State {
    pub(crate) circuit: CircuitState,
    pub(crate) failure_count: u32,
    pub(crate) last_failure_time: Option<Instant>,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            circuit: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
        }
    }

    pub(crate) fn admit(&mut self, now: Instant, reset_timeout: Duration) -> Result<(Admission, Transition), CircuitOpenError> {
        match self.circuit {
            CircuitState::Closed => Ok((Admission::Normal, Transition::Unchanged)),
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_time
                    .map_or(Duration::MAX, |at| now.saturating_duration_since(at));

                if elapsed >= reset_timeout {
                    // Entering half-open claims the trial slot in the same step.
                    self.circuit = CircuitState::HalfOpen;
                    self.failure_count = 0;
                    Ok((Admission::Trial, Transition::HalfOpened))
                } else {
                    Err(CircuitOpenError {
                        retry_after: Some(reset_timeout.saturating_sub(elapsed)),
                    })
                }
            }
            CircuitState::HalfOpen => Err(CircuitOpenError { retry_after: None }),
        }
    }

    pub(crate) fn on_success(&mut self, origin: Origin) -> Transition {
        match self.circuit {
            CircuitState::Closed => {
                self.failure_count = 0;
                Transition::Unchanged
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => Transition::Unchanged,
            CircuitState::HalfOpen if is_stale(origin) => Transition::Unchanged,
            CircuitState::HalfOpen => {
                self.circuit = CircuitState::Closed;
                self.failure_count = 0;
                Transition::Closed
            }
        }
    }

    pub(crate) fn on_failure(&mut self, origin: Origin, now: Instant, failure_threshold: u32) -> Transition {
        match self.circuit {
            CircuitState::Closed => {
                self.record_failure(now);

                if self.failure_count >= failure_threshold {
                    self.circuit = CircuitState::Open;
                    Transition::Opened
                } else {
                    Transition::Unchanged
                }
            }
            // Still failing: stay open and restart the reset window.
            CircuitState::Open => {
                self.record_failure(now);
                Transition::Unchanged
            }
            CircuitState::HalfOpen if is_stale(origin) => Transition::Unchanged,
            CircuitState::HalfOpen => {
                self.record_failure(now);
                self.circuit = CircuitState::Open;
                Transition::Reopened
            }
        }
    }

    /// The trial ended without an outcome. Reopen with the previous failure time so that the
    /// next caller can claim a new trial right away.
    pub(crate) fn abandon_trial(&mut self) {
        if self.circuit == CircuitState::HalfOpen {
            self.circuit = CircuitState::Open;
        }
    }

    /// Clock reads happen before the lock, so a racing caller may arrive with an older `now`.
    /// The failure time never moves backwards.
    fn record_failure(&mut self, now: Instant) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_time = Some(self.last_failure_time.map_or(now, |previous| previous.max(now)));
    }
}

/// Outcomes of normal admissions that land while another caller's trial is in flight
/// say nothing about the trial and are dropped.
fn is_stale(origin: Origin) -> bool {
    origin == Origin::Permit(Admission::Normal)
}
