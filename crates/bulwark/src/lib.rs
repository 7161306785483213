// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Retry with exponential backoff and a circuit breaker for fallible async operations.
//!
//! This crate wraps calls to an unreliable dependency (a remote service, a database, a
//! file share, ...) with two cooperating resilience mechanisms:
//!
//! - A **retry engine** that repeats failed attempts with exponential backoff and optional
//!   jitter, up to a fixed number of attempts.
//! - A **circuit breaker** that stops calling a dependency after a run of consecutive failures
//!   and lets a single trial call through once a reset timeout has elapsed.
//!
//! The [`ResilientExecutor`] composes both: every attempt must first be admitted by the
//! [`CircuitBreaker`], and every outcome is reported back to it.
//!
//! # Core Types
//!
//! - [`ResilientExecutor`]: Runs an operation under breaker admission and retry control.
//! - [`CircuitBreaker`]: Closed / open / half-open state machine, shareable across executors.
//! - [`RetryPolicy`]: Decides whether a failed attempt is followed by another one.
//! - [`Backoff`]: Computes the pause before the next attempt.
//! - [`Classify`] and [`FailureKind`]: Classify errors as transient (retryable) or permanent.
//! - [`Clock`] and [`Sleeper`]: Injected time sources, both implemented for [`tick::Clock`].
//!
//! # Time
//!
//! Callers supply the clock. In production use `tick::Clock::new_tokio()`; in tests use
//! `tick::ClockControl` to move time forward without waiting.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark::{ExecuteError, FailureKind, Classify, ResilienceConfig, ResilientExecutor};
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Timeout,
//!     NotFound,
//! }
//!
//! impl Classify for FetchError {
//!     fn failure_kind(&self) -> FailureKind {
//!         match self {
//!             Self::Timeout => FailureKind::Transient,
//!             Self::NotFound => FailureKind::Permanent,
//!         }
//!     }
//! }
//!
//! # async fn fetch() -> Result<String, FetchError> { Ok("data".to_string()) }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ResilienceConfig {
//!     failure_threshold: 3,
//!     reset_timeout: Duration::from_secs(2),
//!     max_attempts: 4,
//!     base_delay: Duration::from_millis(100),
//!     jitter_ratio: 0.5,
//! };
//!
//! let clock = tick::Clock::new_tokio();
//! let executor = ResilientExecutor::builder(&config, &clock).name("fetch").build()?;
//!
//! match executor.execute(fetch).await {
//!     Ok(data) => println!("got {data}"),
//!     Err(ExecuteError::CircuitOpen(e)) => println!("not even tried: {e}"),
//!     Err(e) => println!("failed: {e:?}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Observability
//!
//! The executor does not log or report anything unless asked to. Enable the `logs` feature and
//! call [`ExecutorBuilder::enable_logs`] to emit `tracing` events, or enable the `metrics`
//! feature and call [`ExecutorBuilder::enable_metrics`] to report OpenTelemetry counters.
//!
//! ## Features
//!
//! - `logs`: Structured `tracing` events for retries and circuit transitions.
//! - `metrics`: OpenTelemetry `resilience.event` counter.
//! - `serde`: `Serialize`/`Deserialize` for [`ResilienceConfig`].

mod backoff;
mod breaker;
mod clock;
mod config;
mod error;
mod executor;
mod retry;
mod rnd;
mod telemetry;

pub use backoff::{Backoff, BackoffKind};
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use clock::{Clock, Sleeper};
pub use config::{ConfigError, ResilienceConfig};
pub use error::{Cancelled, CircuitOpenError, ExecuteError};
pub use executor::{ExecutorBuilder, ResilientExecutor};
pub use retry::{Classify, FailureKind, RetryPolicy};
pub use rnd::Rnd;
#[doc(no_inline)]
pub use tokio_util::sync::CancellationToken;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
pub(crate) mod testing;
