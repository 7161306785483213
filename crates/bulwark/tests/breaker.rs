// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the circuit breaker using only public API.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use bulwark::{CircuitBreaker, CircuitState, ConfigError};
use tick::{Clock, ClockControl};

const RESET_TIMEOUT: Duration = Duration::from_secs(2);

fn breaker(failure_threshold: u32) -> (CircuitBreaker, ClockControl) {
    let control = ClockControl::new();
    let breaker = CircuitBreaker::new(failure_threshold, RESET_TIMEOUT, control.to_clock()).unwrap();
    (breaker, control)
}

#[test]
fn invalid_settings_rejected() {
    assert_eq!(
        CircuitBreaker::new(0, RESET_TIMEOUT, Clock::new_frozen()).unwrap_err(),
        ConfigError::ZeroFailureThreshold
    );
    assert_eq!(
        CircuitBreaker::new(1, Duration::ZERO, Clock::new_frozen()).unwrap_err(),
        ConfigError::ZeroResetTimeout
    );
}

#[test]
fn threshold_minus_one_failures_keep_circuit_closed() {
    for threshold in 1..=5 {
        let (breaker, _) = breaker(threshold);

        for _ in 0..threshold - 1 {
            breaker.register_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed, "threshold {threshold}");

        breaker.register_failure();
        assert_eq!(breaker.state(), CircuitState::Open, "threshold {threshold}");
    }
}

#[test]
fn interleaved_success_prevents_opening() {
    let (breaker, _) = breaker(3);

    for _ in 0..10 {
        breaker.register_failure();
        breaker.register_failure();
        breaker.register_success();
    }

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[test]
fn open_rejects_for_full_reset_timeout() {
    let (breaker, control) = breaker(1);
    breaker.register_failure();

    for _ in 0..19 {
        control.advance(Duration::from_millis(100));
        assert!(!breaker.allow_request());
    }

    control.advance(Duration::from_millis(100));
    assert!(breaker.allow_request());
}

#[test]
fn full_recovery_cycle() {
    let (breaker, control) = breaker(2);

    breaker.register_failure();
    breaker.register_failure();
    assert_eq!(breaker.state(), CircuitState::Open);

    control.advance(RESET_TIMEOUT);
    assert!(breaker.allow_request());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.register_failure();
    assert_eq!(breaker.state(), CircuitState::Open);

    control.advance(RESET_TIMEOUT);
    assert!(breaker.allow_request());
    breaker.register_success();

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
    assert!(snapshot.last_failure_time.is_some());
}

#[test]
fn racing_callers_admit_one_trial() {
    const THREADS: usize = 32;

    let (breaker, control) = breaker(1);
    breaker.register_failure();
    control.advance(RESET_TIMEOUT);

    let breaker = Arc::new(breaker);
    let admitted = Arc::new(AtomicU32::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            let admitted = Arc::clone(&admitted);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                if breaker.allow_request() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 1);
}

/// Hands out instants in the given order, like callers whose clock reads race each other.
#[derive(Debug)]
struct OutOfOrderClock(Mutex<VecDeque<Instant>>);

impl bulwark::Clock for OutOfOrderClock {
    fn now(&self) -> Instant {
        self.0.lock().unwrap().pop_front().unwrap()
    }
}

#[test]
fn late_failure_never_shortens_reset_window() {
    let start = Instant::now();
    let later = start + Duration::from_secs(1);
    // the second failure read the clock first but reached the breaker last
    let clock = OutOfOrderClock(Mutex::new(VecDeque::from([later, start, later + Duration::from_millis(1500)])));
    let breaker = CircuitBreaker::new(1, RESET_TIMEOUT, clock).unwrap();

    breaker.register_failure();
    breaker.register_failure();

    assert_eq!(breaker.last_failure_time(), Some(later));
    assert_eq!(breaker.failure_count(), 2);
    assert!(!breaker.allow_request());
}
