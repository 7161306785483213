// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![expect(clippy::unwrap_used, reason = "sample code")]

//! Calls a flaky service through a resilient executor.
//!
//! The service times out a few calls, goes down for a while, then recovers. The run shows:
//! - transient failures being retried with exponential backoff and jitter
//! - the circuit opening after consecutive failures and rejecting calls without touching the service
//! - a single trial call being let through once the reset timeout has elapsed
//! - a permanent error being returned immediately without retry

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use bulwark::{Classify, ExecuteError, FailureKind, ResilienceConfig, ResilientExecutor};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_stdout::MetricExporter;
use tick::Clock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let meter_provider = configure_telemetry();

    let config = ResilienceConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_secs(2),
        max_attempts: 4,
        base_delay: Duration::from_millis(100),
        jitter_ratio: 0.5,
    };

    let clock = Clock::new_tokio();
    let executor = ResilientExecutor::builder(&config, &clock)
        .name("flaky_service")
        .enable_logs()
        .enable_metrics(&meter_provider)
        .build()?;

    let service = FlakyService::default();

    // Recovers after two timeouts.
    service.fail_next(2);
    let reply = executor.execute(|| service.call()).await?;
    println!("first call: {reply}");

    // Goes down for good: the circuit opens before the attempts are exhausted.
    service.fail_next(u32::MAX);
    match executor.execute(|| service.call()).await {
        Err(ExecuteError::CircuitOpen(e)) => println!("second call: {e}, retry after {:?}", e.retry_after()),
        other => println!("second call: {other:?}"),
    }

    // Rejected right away while the circuit is open.
    let calls_before = service.calls();
    let rejected = executor.execute(|| service.call()).await;
    println!(
        "third call: rejected={}, service untouched={}",
        rejected.unwrap_err().is_circuit_open(),
        service.calls() == calls_before
    );

    // The service comes back. Wait out the reset timeout; the next call is the trial.
    service.fail_next(0);
    clock.delay(config.reset_timeout).await;
    let reply = executor.execute(|| service.call()).await?;
    println!("fourth call: {reply}, circuit is {}", executor.breaker().state());

    // Permanent errors are not retried.
    let calls_before = service.calls();
    let err = executor.execute(|| service.reject()).await.unwrap_err();
    println!("fifth call: {err} after {} attempt(s)", service.calls() - calls_before);

    meter_provider.force_flush()?;

    Ok(())
}

#[derive(Debug)]
enum ServiceError {
    Timeout,
    InvalidRequest,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("request timed out"),
            Self::InvalidRequest => f.write_str("invalid request"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl Classify for ServiceError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout => FailureKind::Transient,
            Self::InvalidRequest => FailureKind::Permanent,
        }
    }
}

/// Simulated dependency that times out a configurable number of times.
#[derive(Debug, Default)]
struct FlakyService {
    calls: AtomicU32,
    failures_left: AtomicU32,
}

impl FlakyService {
    fn fail_next(&self, failures: u32) {
        self.failures_left.store(failures, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn call(&self) -> impl Future<Output = Result<String, ServiceError>> + use<> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();

        async move {
            if failed {
                println!("service call #{call} timed out");
                Err(ServiceError::Timeout)
            } else {
                Ok(format!("response to call #{call}"))
            }
        }
    }

    fn reject(&self) -> impl Future<Output = Result<String, ServiceError>> + use<> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        async { Err(ServiceError::InvalidRequest) }
    }
}

fn configure_telemetry() -> SdkMeterProvider {
    tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()).init();

    SdkMeterProvider::builder()
        .with_periodic_exporter(MetricExporter::default())
        .build()
}
