// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::config::ConfigError;
use crate::rnd::Rnd;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Shape of the delay schedule produced by [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(any(feature = "serde", test), serde(rename_all = "snake_case"))]
pub enum BackoffKind {
    /// Same delay before every retry.
    ///
    /// **Example with `2s` base delay:** `2s, 2s, 2s, 2s, ...`
    Constant,

    /// Delay grows proportionally with the attempt number.
    ///
    /// **Example with `2s` base delay:** `2s, 4s, 6s, 8s, 10s, ...`
    Linear,

    /// Delay doubles with each attempt.
    ///
    /// **Example with `2s` base delay:** `2s, 4s, 8s, 16s, 32s, ...`
    #[default]
    Exponential,
}

/// Computes the pause before the next attempt.
///
/// For [`BackoffKind::Exponential`] (the default) the delay after attempt `n` is
/// `base_delay * 2^(n-1)`. Delays are not capped; only the number of attempts bounds a retry
/// sequence.
///
/// Jitter adds a uniformly distributed value in `[0, delay * jitter_ratio]` on top of the
/// computed delay. It never subtracts, so the result is always at least the un-jittered delay.
/// A ratio of `0` disables jitter.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bulwark::{Backoff, Rnd};
///
/// let backoff = Backoff::new(Duration::from_millis(100), 0.5)?.rnd(Rnd::fixed(1.0));
///
/// assert_eq!(backoff.delay(1), Duration::from_millis(150));
/// assert_eq!(backoff.delay(3), Duration::from_millis(600));
/// # Ok::<(), bulwark::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    kind: BackoffKind,
    base_delay: Duration,
    jitter_ratio: f64,
    rnd: Rnd,
}

impl Backoff {
    /// Creates an exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `base_delay` is zero or `jitter_ratio` is negative or not finite.
    pub fn new(base_delay: Duration, jitter_ratio: f64) -> Result<Self, ConfigError> {
        if base_delay.is_zero() {
            return Err(ConfigError::ZeroBaseDelay);
        }

        if !jitter_ratio.is_finite() || jitter_ratio < 0.0 {
            return Err(ConfigError::InvalidJitterRatio(jitter_ratio));
        }

        Ok(Self {
            kind: BackoffKind::default(),
            base_delay,
            jitter_ratio,
            rnd: Rnd::default(),
        })
    }

    /// Sets the shape of the delay schedule.
    #[must_use]
    pub fn kind(self, kind: BackoffKind) -> Self {
        Self { kind, ..self }
    }

    /// Sets the random source used for jitter.
    #[must_use]
    pub fn rnd(self, rnd: Rnd) -> Self {
        Self { rnd, ..self }
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Returns the jitter ratio.
    #[must_use]
    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Returns the shape of the delay schedule.
    #[must_use]
    pub fn get_kind(&self) -> BackoffKind {
        self.kind
    }

    /// Returns the delay to wait after the failed attempt `attempt` (1-based).
    ///
    /// Attempt `0` is treated as attempt `1`. Results saturate at [`Duration::MAX`].
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);

        let delay = match self.kind {
            BackoffKind::Constant => self.base_delay,
            BackoffKind::Linear => self.base_delay.saturating_mul(attempt),
            BackoffKind::Exponential => duration_mul_pow2(self.base_delay, attempt - 1),
        };

        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio == 0.0 {
            return delay;
        }

        let jitter = secs_to_duration_saturating(delay.as_secs_f64() * self.jitter_ratio * self.rnd.next_f64());
        delay.saturating_add(jitter)
    }
}

/// Exact `base * 2^exponent` in integer nanoseconds, saturating at [`Duration::MAX`].
fn duration_mul_pow2(base: Duration, exponent: u32) -> Duration {
    let nanos = base.as_nanos();
    if nanos == 0 {
        return Duration::ZERO;
    }

    if exponent > nanos.leading_zeros() {
        return Duration::MAX;
    }

    let scaled = nanos << exponent;
    u64::try_from(scaled / NANOS_PER_SEC).map_or(Duration::MAX, |secs| {
        #[expect(clippy::cast_possible_truncation, reason = "remainder is below one second")]
        let subsec_nanos = (scaled % NANOS_PER_SEC) as u32;
        Duration::new(secs, subsec_nanos)
    })
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 || secs.is_nan() {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
