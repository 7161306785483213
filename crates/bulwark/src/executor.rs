// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffKind};
use crate::breaker::CircuitBreaker;
use crate::clock::{Clock, Sleeper};
use crate::config::{ConfigError, ResilienceConfig};
use crate::error::ExecuteError;
use crate::retry::{Classify, RetryPolicy};
use crate::rnd::Rnd;
use crate::telemetry::{DEFAULT_EXECUTOR_NAME, Telemetry};

/// Runs fallible async operations under circuit breaker admission and retry control.
///
/// Every attempt must first be admitted by the [`CircuitBreaker`]; a rejection ends the call
/// with [`ExecuteError::CircuitOpen`] without invoking the operation. Every completed attempt
/// is reported back to the breaker. Failed attempts are retried while the [`RetryPolicy`]
/// allows it, with a [`Backoff`] pause in between.
///
/// Executors are cheap to clone; clones share the same breaker, policy and sleeper.
///
/// The [`tick::Clock`] given at construction times the breaker's reset window and the backoff
/// pauses. Use `tick::Clock::new_tokio()` in production and `tick::ClockControl` in tests.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bulwark::{Clock, FailureKind, ResilienceConfig, ResilientExecutor};
/// use tick::ClockControl;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ResilienceConfig {
///     failure_threshold: 5,
///     reset_timeout: Duration::from_secs(2),
///     max_attempts: 3,
///     base_delay: Duration::from_millis(100),
///     jitter_ratio: 0.0,
/// };
///
/// // backoff pauses complete at once by moving the clock forward
/// let clock = ClockControl::new().auto_advance_timers(true).to_clock();
/// let start = clock.now();
/// let executor = ResilientExecutor::new(&config, &clock)?;
///
/// let mut calls = 0;
/// let value = executor
///     .execute(|| {
///         calls += 1;
///         let outcome = if calls < 3 { Err(FailureKind::Transient) } else { Ok(calls) };
///         async move { outcome }
///     })
///     .await?;
///
/// assert_eq!(value, 3);
/// assert_eq!(clock.now() - start, Duration::from_millis(300));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ResilientExecutor<S = tick::Clock> {
    inner: Arc<ExecutorInner<S>>,
}

#[derive(Debug)]
struct ExecutorInner<S> {
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    backoff: Backoff,
    sleeper: S,
    telemetry: Telemetry,
}

impl<S> Clone for ResilientExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ResilientExecutor<tick::Clock> {
    /// Creates an executor with its own breaker, timed by `clock`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(config: &ResilienceConfig, clock: impl AsRef<tick::Clock>) -> Result<Self, ConfigError> {
        Self::builder(config, clock).build()
    }

    /// Starts building an executor from `config`, timed by `clock`.
    #[must_use]
    pub fn builder(config: &ResilienceConfig, clock: impl AsRef<tick::Clock>) -> ExecutorBuilder<tick::Clock> {
        ExecutorBuilder::new(*config, clock.as_ref())
    }
}

impl<S: Sleeper> ResilientExecutor<S> {
    /// Runs `operation` until it succeeds, fails permanently, exhausts its attempts, or is
    /// rejected by the circuit breaker.
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::CircuitOpen`] if the breaker denies an attempt. Already completed
    ///   attempts are not reported in this case.
    /// - [`ExecuteError::Operation`] with the error of the last attempt once no further attempt
    ///   is allowed.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        self.execute_with_cancellation(operation, &CancellationToken::new()).await
    }

    /// Same as [`execute`][Self::execute], but stops once `cancel` fires.
    ///
    /// The token is checked before every attempt and interrupts the backoff pause. An attempt
    /// that is already running is not interrupted; pass the token to the operation itself if
    /// it supports cancellation.
    ///
    /// # Errors
    ///
    /// In addition to the errors of [`execute`][Self::execute], returns
    /// [`ExecuteError::Cancelled`] carrying the error of the last completed attempt, if any.
    pub async fn execute_with_cancellation<T, E, F, Fut>(
        &self,
        mut operation: F,
        cancel: &CancellationToken,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let inner = &*self.inner;
        let mut attempt: u32 = 1;
        let mut last_error = None;

        loop {
            if cancel.is_cancelled() {
                return Err(ExecuteError::Cancelled { last_error });
            }

            let permit = match inner.breaker.acquire() {
                Ok((permit, transition)) => {
                    inner.telemetry.transition(transition);
                    permit
                }
                Err(rejected) => {
                    inner.telemetry.rejected(rejected.retry_after());
                    return Err(ExecuteError::CircuitOpen(rejected));
                }
            };

            // Dropping this future while the operation runs drops the permit unsettled.
            let error = match operation().await {
                Ok(value) => {
                    inner.telemetry.transition(permit.success());
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = error.failure_kind();
            inner.telemetry.transition(permit.failure());

            if !inner.policy.should_retry(attempt, kind) {
                return Err(ExecuteError::Operation(error));
            }

            let delay = inner.backoff.delay(attempt);
            inner.telemetry.retry(attempt, delay);

            if inner.sleeper.sleep(delay, cancel).await.is_err() {
                return Err(ExecuteError::Cancelled { last_error: Some(error) });
            }

            last_error = Some(error);
            attempt = attempt.saturating_add(1);
        }
    }
}

impl<S> ResilientExecutor<S> {
    /// Returns the breaker guarding this executor.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.breaker
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.policy
    }

    /// Returns the backoff used between attempts.
    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.inner.backoff
    }

    /// Returns the name used in telemetry.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.telemetry.executor_name
    }
}

/// Builder for [`ResilientExecutor`], created with [`ResilientExecutor::builder`].
#[derive(Debug)]
#[must_use]
pub struct ExecutorBuilder<S = tick::Clock> {
    config: ResilienceConfig,
    clock: Arc<dyn Clock>,
    sleeper: S,
    rnd: Rnd,
    backoff_kind: BackoffKind,
    breaker: Option<Arc<CircuitBreaker>>,
    name: Cow<'static, str>,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<opentelemetry::metrics::Meter>,
    logs_enabled: bool,
}

impl ExecutorBuilder<tick::Clock> {
    fn new(config: ResilienceConfig, clock: &tick::Clock) -> Self {
        Self {
            config,
            clock: Arc::new(clock.clone()),
            sleeper: clock.clone(),
            rnd: Rnd::default(),
            backoff_kind: BackoffKind::default(),
            breaker: None,
            name: Cow::Borrowed(DEFAULT_EXECUTOR_NAME),
            #[cfg(any(feature = "metrics", test))]
            meter: None,
            logs_enabled: false,
        }
    }
}

impl<S> ExecutorBuilder<S> {
    /// Sets the clock of the breaker created by [`build`][Self::build]. Defaults to the
    /// clock passed to [`ResilientExecutor::builder`].
    ///
    /// Ignored when an existing breaker is supplied with [`breaker`][Self::breaker].
    pub fn clock(self, clock: impl Clock) -> Self {
        Self {
            clock: Arc::new(clock),
            ..self
        }
    }

    /// Sets what waits between attempts. Defaults to the clock passed to
    /// [`ResilientExecutor::builder`].
    pub fn sleeper<S2: Sleeper>(self, sleeper: S2) -> ExecutorBuilder<S2> {
        ExecutorBuilder {
            config: self.config,
            clock: self.clock,
            sleeper,
            rnd: self.rnd,
            backoff_kind: self.backoff_kind,
            breaker: self.breaker,
            name: self.name,
            #[cfg(any(feature = "metrics", test))]
            meter: self.meter,
            logs_enabled: self.logs_enabled,
        }
    }

    /// Sets the random source used for jitter.
    pub fn rnd(self, rnd: Rnd) -> Self {
        Self { rnd, ..self }
    }

    /// Sets how the pause grows between attempts. Defaults to [`BackoffKind::Exponential`].
    pub fn backoff_kind(self, backoff_kind: BackoffKind) -> Self {
        Self { backoff_kind, ..self }
    }

    /// Guards the executor with an existing breaker, typically one shared with other
    /// executors calling the same dependency.
    ///
    /// The breaker keeps its own threshold, timeout and clock; the corresponding
    /// configuration fields are then only validated.
    pub fn breaker(self, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker: Some(breaker),
            ..self
        }
    }

    /// Sets the executor name reported in telemetry. Prefer `snake_case`.
    pub fn name(self, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    /// Enables structured logging of retries and circuit transitions.
    #[cfg(any(feature = "logs", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "logs")))]
    pub fn enable_logs(self) -> Self {
        Self {
            logs_enabled: true,
            ..self
        }
    }

    /// Enables metrics reporting with the given OpenTelemetry meter provider.
    #[cfg(any(feature = "metrics", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
    pub fn enable_metrics(self, provider: &dyn opentelemetry::metrics::MeterProvider) -> Self {
        Self {
            meter: Some(crate::telemetry::create_meter(provider)),
            ..self
        }
    }

    /// Validates the configuration and creates the executor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid configuration field.
    pub fn build(self) -> Result<ResilientExecutor<S>, ConfigError> {
        self.config.validate()?;

        let breaker = match self.breaker {
            Some(breaker) => breaker,
            None => Arc::new(CircuitBreaker::from_shared_clock(
                self.config.failure_threshold,
                self.config.reset_timeout,
                self.clock,
            )?),
        };

        let backoff = Backoff::new(self.config.base_delay, self.config.jitter_ratio)?
            .kind(self.backoff_kind)
            .rnd(self.rnd);

        let telemetry = Telemetry::new(self.name, self.logs_enabled);
        #[cfg(any(feature = "metrics", test))]
        let telemetry = match &self.meter {
            Some(meter) => telemetry.with_metrics(meter),
            None => telemetry,
        };

        Ok(ResilientExecutor {
            inner: Arc::new(ExecutorInner {
                breaker,
                policy: RetryPolicy::new(self.config.max_attempts)?,
                backoff,
                sleeper: self.sleeper,
                telemetry,
            }),
        })
    }
}
