// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use super::CircuitBreaker;
use super::state::{Admission, Origin, Transition};

/// Admission handed out by [`CircuitBreaker::acquire`].
///
/// The executor settles every permit with [`success`][Self::success] or
/// [`failure`][Self::failure]. A trial permit that is dropped unsettled (the attempt was
/// cancelled or its future dropped) gives the trial slot back instead of counting as a failure.
#[derive(Debug)]
#[must_use]
pub(crate) struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl<'a> Permit<'a> {
    pub(super) fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker,
            admission,
            settled: false,
        }
    }

    pub(crate) fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    pub(crate) fn success(mut self) -> Transition {
        self.settled = true;
        self.breaker.settle_success(Origin::Permit(self.admission))
    }

    pub(crate) fn failure(mut self) -> Transition {
        self.settled = true;
        self.breaker.settle_failure(Origin::Permit(self.admission))
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Trial {
            self.breaker.abandon_trial();
        }
    }
}
