// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Configuration of a [`ResilientExecutor`][crate::ResilientExecutor].
///
/// All fields are required except `jitter_ratio`, which defaults to `0` (no jitter) when the
/// configuration is deserialized. There are no other hidden defaults; call
/// [`validate`][Self::validate] or let [`ExecutorBuilder::build`][crate::ExecutorBuilder::build]
/// do it for you.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bulwark::{ConfigError, ResilienceConfig};
///
/// let config = ResilienceConfig {
///     failure_threshold: 3,
///     reset_timeout: Duration::from_secs(2),
///     max_attempts: 4,
///     base_delay: Duration::from_millis(100),
///     jitter_ratio: 0.0,
/// };
/// assert!(config.validate().is_ok());
///
/// let broken = ResilienceConfig { max_attempts: 0, ..config };
/// assert_eq!(broken.validate(), Err(ConfigError::ZeroMaxAttempts));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(any(feature = "serde", test), derive(serde::Serialize, serde::Deserialize))]
pub struct ResilienceConfig {
    /// Consecutive failures that open the circuit. Must be greater than zero.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial call is admitted. Must be greater than zero.
    pub reset_timeout: Duration,

    /// Total attempts per [`execute`][crate::ResilientExecutor::execute] call, the first one
    /// included. Must be at least one.
    pub max_attempts: u32,

    /// Delay after the first failed attempt. Must be greater than zero.
    pub base_delay: Duration,

    /// Upper bound of the random jitter, relative to the computed delay. Must be finite and
    /// non-negative.
    #[cfg_attr(any(feature = "serde", test), serde(default))]
    pub jitter_ratio: f64,
}

impl ResilienceConfig {
    /// Checks every field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }

        if self.reset_timeout.is_zero() {
            return Err(ConfigError::ZeroResetTimeout);
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }

        if self.base_delay.is_zero() {
            return Err(ConfigError::ZeroBaseDelay);
        }

        if !self.jitter_ratio.is_finite() || self.jitter_ratio < 0.0 {
            return Err(ConfigError::InvalidJitterRatio(self.jitter_ratio));
        }

        Ok(())
    }
}

/// A configuration value is outside its allowed range.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// `failure_threshold` is zero.
    #[error("failure_threshold must be greater than zero")]
    ZeroFailureThreshold,

    /// `reset_timeout` is zero.
    #[error("reset_timeout must be greater than zero")]
    ZeroResetTimeout,

    /// `max_attempts` is zero.
    #[error("max_attempts must be at least one")]
    ZeroMaxAttempts,

    /// `base_delay` is zero.
    #[error("base_delay must be greater than zero")]
    ZeroBaseDelay,

    /// `jitter_ratio` is negative, infinite or NaN.
    #[error("jitter_ratio must be a finite, non-negative number, got {0}")]
    InvalidJitterRatio(f64),
}
