// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry emitted by the executor.
//!
//! Attribute keys follow the [OpenTelemetry naming guidelines](https://opentelemetry.io/docs/specs/semconv/general/naming/#general-naming-considerations):
//! dot-separated keys with short `snake_case` values.

use std::borrow::Cow;
use std::time::Duration;

use crate::breaker::{CircuitState, Transition};

pub(crate) const DEFAULT_EXECUTOR_NAME: &str = "default";

#[cfg(any(feature = "metrics", test))]
pub(crate) const EXECUTOR_NAME: &str = "resilience.executor.name";
#[cfg(any(feature = "metrics", test))]
pub(crate) const EVENT_NAME: &str = "resilience.event.name";
#[cfg(any(feature = "metrics", test))]
pub(crate) const ATTEMPT_NUMBER: &str = "resilience.attempt.number";
#[cfg(any(feature = "metrics", test))]
pub(crate) const CIRCUIT_STATE: &str = "resilience.circuit.state";

#[cfg(any(feature = "logs", feature = "metrics", test))]
pub(crate) const RETRY_EVENT: &str = "retry";
#[cfg(any(feature = "logs", feature = "metrics", test))]
pub(crate) const CIRCUIT_REJECTED_EVENT: &str = "circuit_rejected";
pub(crate) const CIRCUIT_OPENED_EVENT: &str = "circuit_opened";
pub(crate) const CIRCUIT_HALF_OPEN_EVENT: &str = "circuit_half_open";
pub(crate) const CIRCUIT_CLOSED_EVENT: &str = "circuit_closed";

#[cfg(any(feature = "metrics", test))]
mod metrics {
    use opentelemetry::InstrumentationScope;
    use opentelemetry::metrics::{Counter, Meter, MeterProvider};

    const METER_NAME: &str = "bulwark";
    const VERSION: &str = "v0.1.0";
    const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";

    pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
        meter_provider.meter_with_scope(
            InstrumentationScope::builder(METER_NAME)
                .with_version(VERSION)
                .with_schema_url(SCHEMA_URL)
                .build(),
        )
    }

    pub(crate) fn create_resilience_event_counter(meter: &Meter) -> Counter<u64> {
        meter
            .u64_counter("resilience.event")
            .with_description("Emitted upon the occurrence of a resilience event.")
            .with_unit("u64")
            .build()
    }
}

#[cfg(any(feature = "metrics", test))]
pub(crate) use metrics::create_meter;

/// Per-executor telemetry sinks. Both are off unless enabled on the builder.
#[derive(Debug, Clone)]
pub(crate) struct Telemetry {
    pub(crate) executor_name: Cow<'static, str>,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) event_reporter: Option<opentelemetry::metrics::Counter<u64>>,
    #[cfg_attr(not(any(feature = "logs", test)), expect(dead_code, reason = "read only when logs are compiled in"))]
    pub(crate) logs_enabled: bool,
}

impl Telemetry {
    pub(crate) fn new(executor_name: Cow<'static, str>, logs_enabled: bool) -> Self {
        Self {
            executor_name,
            #[cfg(any(feature = "metrics", test))]
            event_reporter: None,
            logs_enabled,
        }
    }

    #[cfg(any(feature = "metrics", test))]
    pub(crate) fn with_metrics(self, meter: &opentelemetry::metrics::Meter) -> Self {
        Self {
            event_reporter: Some(metrics::create_resilience_event_counter(meter)),
            ..self
        }
    }

    #[cfg(test)]
    pub(crate) fn metrics_enabled(&self) -> bool {
        self.event_reporter.is_some()
    }

    /// A failed attempt is followed by another one after `delay`.
    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, reason = "only logs record every argument")
    )]
    #[cfg_attr(
        not(any(feature = "logs", feature = "metrics", test)),
        expect(clippy::unused_self, reason = "unused when logs nor metrics are used")
    )]
    pub(crate) fn retry(&self, attempt: u32, delay: Duration) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            tracing::event!(
                name: "bulwark.retry",
                tracing::Level::WARN,
                resilience.executor.name = %self.executor_name,
                resilience.event.name = RETRY_EVENT,
                resilience.attempt.number = attempt,
                resilience.retry.delay = delay.as_secs_f64(),
            );
        }

        #[cfg(any(feature = "metrics", test))]
        self.report(&[
            opentelemetry::KeyValue::new(EVENT_NAME, RETRY_EVENT),
            opentelemetry::KeyValue::new(ATTEMPT_NUMBER, i64::from(attempt)),
        ]);
    }

    /// The breaker refused admission.
    #[cfg_attr(
        not(any(feature = "logs", test)),
        expect(unused_variables, reason = "only logs record every argument")
    )]
    #[cfg_attr(
        not(any(feature = "logs", feature = "metrics", test)),
        expect(clippy::unused_self, reason = "unused when logs nor metrics are used")
    )]
    pub(crate) fn rejected(&self, retry_after: Option<Duration>) {
        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            let retry_after = retry_after.map_or(0.0, |d| d.as_secs_f64());
            tracing::event!(
                name: "bulwark.circuit.rejected",
                tracing::Level::WARN,
                resilience.executor.name = %self.executor_name,
                resilience.event.name = CIRCUIT_REJECTED_EVENT,
                resilience.circuit.retry_after = retry_after,
            );
        }

        #[cfg(any(feature = "metrics", test))]
        self.report(&[opentelemetry::KeyValue::new(EVENT_NAME, CIRCUIT_REJECTED_EVENT)]);
    }

    /// The breaker changed state as a consequence of one of our calls.
    #[cfg_attr(
        not(any(feature = "logs", feature = "metrics", test)),
        expect(clippy::unused_self, reason = "unused when logs nor metrics are used")
    )]
    pub(crate) fn transition(&self, transition: Transition) {
        let (event, state) = match transition {
            Transition::Unchanged => return,
            Transition::Opened | Transition::Reopened => (CIRCUIT_OPENED_EVENT, CircuitState::Open),
            Transition::HalfOpened => (CIRCUIT_HALF_OPEN_EVENT, CircuitState::HalfOpen),
            Transition::Closed => (CIRCUIT_CLOSED_EVENT, CircuitState::Closed),
        };

        #[cfg(any(feature = "logs", test))]
        if self.logs_enabled {
            match state {
                CircuitState::Open => tracing::event!(
                    name: "bulwark.circuit.opened",
                    tracing::Level::WARN,
                    resilience.executor.name = %self.executor_name,
                    resilience.event.name = event,
                    resilience.circuit.state = %state,
                    resilience.circuit.reopened = transition == Transition::Reopened,
                ),
                CircuitState::HalfOpen => tracing::event!(
                    name: "bulwark.circuit.half_open",
                    tracing::Level::INFO,
                    resilience.executor.name = %self.executor_name,
                    resilience.event.name = event,
                    resilience.circuit.state = %state,
                ),
                CircuitState::Closed => tracing::event!(
                    name: "bulwark.circuit.closed",
                    tracing::Level::INFO,
                    resilience.executor.name = %self.executor_name,
                    resilience.event.name = event,
                    resilience.circuit.state = %state,
                ),
            }
        }

        #[cfg(any(feature = "metrics", test))]
        self.report(&[
            opentelemetry::KeyValue::new(EVENT_NAME, event),
            opentelemetry::KeyValue::new(CIRCUIT_STATE, state.as_str()),
        ]);

        #[cfg(not(any(feature = "logs", feature = "metrics", test)))]
        let _ = (event, state);
    }

    #[cfg(any(feature = "metrics", test))]
    fn report(&self, attributes: &[opentelemetry::KeyValue]) {
        if let Some(reporter) = &self.event_reporter {
            let mut all = Vec::with_capacity(attributes.len() + 1);
            all.push(opentelemetry::KeyValue::new(EXECUTOR_NAME, self.executor_name.clone()));
            all.extend_from_slice(attributes);
            reporter.add(1, &all);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use opentelemetry::KeyValue;

    use super::*;
    use crate::testing::{LogCapture, MetricTester};

    fn telemetry(tester: Option<&MetricTester>, logs: bool) -> Telemetry {
        let telemetry = Telemetry::new(Cow::Borrowed("orders"), logs);
        match tester {
            Some(tester) => telemetry.with_metrics(&create_meter(tester.meter_provider())),
            None => telemetry,
        }
    }

    #[test]
    #[cfg(not(miri))]
    fn meter_definitions() {
        let tester = MetricTester::new();
        let meter = create_meter(tester.meter_provider());
        metrics::create_resilience_event_counter(&meter).add(1, &[]);

        let str = tester.debug_output();

        assert!(str.contains("resilience.event"));
        assert!(str.contains("bulwark"));
        assert!(str.contains("v0.1.0"));
        assert!(str.contains("https://opentelemetry.io/schemas/1.47"));
    }

    #[test]
    fn disabled_by_default() {
        let telemetry = telemetry(None, false);
        assert!(!telemetry.metrics_enabled());
        assert!(!telemetry.logs_enabled);

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        telemetry.retry(1, Duration::from_millis(100));
        telemetry.rejected(None);
        telemetry.transition(Transition::Opened);

        assert!(capture.output().is_empty());
    }

    #[test]
    #[cfg(not(miri))]
    fn retry_reports_attempt() {
        let tester = MetricTester::new();
        let telemetry = telemetry(Some(&tester), false);
        assert!(telemetry.metrics_enabled());

        telemetry.retry(2, Duration::from_millis(200));

        tester.assert_attributes_contain(&[
            KeyValue::new(EXECUTOR_NAME, "orders"),
            KeyValue::new(EVENT_NAME, RETRY_EVENT),
            KeyValue::new(ATTEMPT_NUMBER, 2_i64),
        ]);
    }

    #[test]
    #[cfg(not(miri))]
    fn transitions_report_state() {
        let tester = MetricTester::new();
        let telemetry = telemetry(Some(&tester), false);

        telemetry.transition(Transition::Reopened);
        telemetry.transition(Transition::HalfOpened);
        telemetry.transition(Transition::Closed);
        telemetry.transition(Transition::Unchanged);

        tester.assert_attributes_contain(&[
            KeyValue::new(EVENT_NAME, CIRCUIT_OPENED_EVENT),
            KeyValue::new(CIRCUIT_STATE, "open"),
            KeyValue::new(EVENT_NAME, CIRCUIT_HALF_OPEN_EVENT),
            KeyValue::new(CIRCUIT_STATE, "half_open"),
            KeyValue::new(EVENT_NAME, CIRCUIT_CLOSED_EVENT),
            KeyValue::new(CIRCUIT_STATE, "closed"),
        ]);
    }

    #[test]
    #[cfg(not(miri))]
    fn rejection_reported() {
        let tester = MetricTester::new();
        telemetry(Some(&tester), false).rejected(Some(Duration::from_secs(1)));

        tester.assert_attributes_contain(&[KeyValue::new(EVENT_NAME, CIRCUIT_REJECTED_EVENT)]);
    }

    #[test]
    fn logs_written_when_enabled() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let telemetry = telemetry(None, true);

        telemetry.retry(3, Duration::from_millis(400));
        telemetry.rejected(Some(Duration::from_millis(1500)));
        telemetry.transition(Transition::Opened);
        telemetry.transition(Transition::HalfOpened);
        telemetry.transition(Transition::Closed);

        capture.assert_contains("WARN");
        capture.assert_contains("resilience.executor.name=orders");
        capture.assert_contains(RETRY_EVENT);
        capture.assert_contains("resilience.attempt.number=3");
        capture.assert_contains("resilience.retry.delay=0.4");
        capture.assert_contains(CIRCUIT_REJECTED_EVENT);
        capture.assert_contains("resilience.circuit.retry_after=1.5");
        capture.assert_contains(CIRCUIT_OPENED_EVENT);
        capture.assert_contains("resilience.circuit.state=open");
        capture.assert_contains("resilience.circuit.reopened=false");
        capture.assert_contains(CIRCUIT_HALF_OPEN_EVENT);
        capture.assert_contains("resilience.circuit.state=half_open");
        capture.assert_contains("INFO");
        capture.assert_contains(CIRCUIT_CLOSED_EVENT);
    }
}
