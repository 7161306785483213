// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

/// Non-cryptographic random number source used for backoff jitter.
///
/// This RNG is **NOT cryptographically secure** and must only be used for
/// jitter and similar scheduling decisions.
///
/// The default source draws from the thread-local generator of `fastrand`.
/// Tests and simulations can substitute a seeded generator, a fixed value,
/// or an arbitrary function so that computed delays are reproducible.
///
/// # Examples
///
/// ```
/// use bulwark::Rnd;
///
/// let a = Rnd::seeded(42);
/// let b = Rnd::seeded(42);
/// assert_eq!(a.next_f64(), b.next_f64());
///
/// assert_eq!(Rnd::fixed(0.25).next_f64(), 0.25);
/// ```
#[derive(Clone, Default)]
pub enum Rnd {
    /// Thread-local `fastrand` generator.
    #[default]
    Real,

    /// Deterministic generator created from a seed, shared between clones.
    Seeded(Arc<Mutex<fastrand::Rng>>),

    /// Caller-provided generator.
    Function(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Rnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            Self::Seeded(_) => write!(f, "Seeded"),
            Self::Function(_) => write!(f, "Function"),
        }
    }
}

impl Rnd {
    /// Creates a deterministic source from `seed`.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::Seeded(Arc::new(Mutex::new(fastrand::Rng::with_seed(seed))))
    }

    /// Creates a source that always yields `value`, clamped to `[0, 1]`.
    #[must_use]
    pub fn fixed(value: f64) -> Self {
        let value = value.clamp(0.0, 1.0);
        Self::Function(Arc::new(move || value))
    }

    /// Creates a source backed by `f`. Values outside `[0, 1]` are clamped.
    #[must_use]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    /// Returns the next value in `[0, 1]`.
    #[must_use]
    pub fn next_f64(&self) -> f64 {
        let value = match self {
            Self::Real => fastrand::f64(),
            // A poisoned generator is still a valid generator.
            Self::Seeded(rng) => rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner).f64(),
            Self::Function(generator) => generator(),
        };

        if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
    }
}
