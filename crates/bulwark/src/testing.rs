// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test utilities for telemetry validation, scripted operations and recorded backoff pauses.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{AggregatedMetrics, Metric, MetricData};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
use tick::ClockControl;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use crate::clock::Sleeper;
use crate::error::Cancelled;
use crate::retry::{Classify, FailureKind};

/// Test helper for collecting and asserting on `OTel` metrics.
#[derive(Debug)]
pub(crate) struct MetricTester {
    exporter: InMemoryMetricExporter,
    provider: SdkMeterProvider,
}

impl MetricTester {
    #[must_use]
    pub fn new() -> Self {
        let in_memory = InMemoryMetricExporter::default();

        Self {
            exporter: in_memory.clone(),
            provider: SdkMeterProvider::builder().with_periodic_exporter(in_memory).build(),
        }
    }

    #[must_use]
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.provider
    }

    /// Flushes and returns the `Debug` rendering of everything exported so far.
    #[must_use]
    pub fn debug_output(&self) -> String {
        self.provider.force_flush().unwrap();
        format!("{:?}", self.exporter.get_finished_metrics().unwrap())
    }

    #[must_use]
    pub fn collect_attributes(&self) -> Vec<KeyValue> {
        self.provider.force_flush().unwrap();
        self.exporter
            .get_finished_metrics()
            .unwrap()
            .iter()
            .flat_map(opentelemetry_sdk::metrics::data::ResourceMetrics::scope_metrics)
            .flat_map(opentelemetry_sdk::metrics::data::ScopeMetrics::metrics)
            .flat_map(counter_attributes)
            .collect()
    }

    pub fn assert_attributes_contain(&self, key_values: &[KeyValue]) {
        let attributes = self.collect_attributes();

        for attr in key_values {
            assert!(
                attributes.contains(attr),
                "attribute {attr:?} not found in collected attributes: {attributes:?}"
            );
        }
    }
}

// All instruments of this crate are u64 counters.
fn counter_attributes(metric: &Metric) -> Vec<KeyValue> {
    match metric.data() {
        AggregatedMetrics::U64(MetricData::Sum(data)) => data.data_points().flat_map(|v| v.attributes().cloned()).collect(),
        _ => Vec::new(),
    }
}

/// Captures formatted log output into a shared buffer.
#[derive(Debug, Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
    }

    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(
            output.contains(expected),
            "log output does not contain '{expected}', got:\n{output}"
        );
    }

    /// Creates a subscriber writing into this buffer. Use with `set_default()`.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber {
        use tracing_subscriber::layer::SubscriberExt;
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer().with_writer(self.clone()).with_ansi(false))
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Error returned by [`Script`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TestError(pub FailureKind);

impl Classify for TestError {
    fn failure_kind(&self) -> FailureKind {
        self.0
    }
}

/// Operation that replays a fixed sequence of outcomes and counts its invocations.
///
/// Once the script is exhausted every further call succeeds.
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    outcomes: Arc<Mutex<VecDeque<Result<u32, TestError>>>>,
    calls: Arc<Mutex<u32>>,
}

impl Script {
    pub fn new(outcomes: impl IntoIterator<Item = Result<u32, TestError>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    /// Fails `n` times with transient errors, then succeeds with `value`.
    pub fn transient_then_ok(n: usize, value: u32) -> Self {
        Self::new(
            std::iter::repeat_n(Err(TestError(FailureKind::Transient)), n).chain(std::iter::once(Ok(value))),
        )
    }

    /// Always fails with the given kind.
    pub fn always(kind: FailureKind) -> Self {
        Self::new(std::iter::repeat_n(Err(TestError(kind)), 1024))
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }

    pub fn call(&self) -> impl Future<Output = Result<u32, TestError>> + Send + 'static {
        *self.calls.lock().unwrap() += 1;
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(0));
        std::future::ready(outcome)
    }
}

/// Sleeper on a clock that jumps straight to every pending timer, recording completed pauses.
#[derive(Debug, Clone)]
pub(crate) struct RecordingSleeper {
    control: ClockControl,
    clock: tick::Clock,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        let control = ClockControl::new().auto_advance_timers(true);
        Self {
            clock: control.to_clock(),
            control,
            sleeps: Arc::default(),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.control.advance(duration);
    }

    /// The clock shared by this sleeper. Hand it to the breaker so that pauses count as elapsed time.
    pub fn clock(&self) -> &tick::Clock {
        &self.clock
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration, cancel: &CancellationToken) -> impl Future<Output = Result<(), Cancelled>> + Send {
        let sleep = self.clock.sleep(delay, cancel);
        let sleeps = Arc::clone(&self.sleeps);

        async move {
            sleep.await?;
            sleeps.lock().unwrap().push(delay);
            Ok(())
        }
    }
}
