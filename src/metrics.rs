//! Metrics sink interface
//!
//! The engine reports named counters and timers to an injected sink. A no-op
//! sink is a valid substitute; absence of a metrics backend never changes
//! call behavior.

use std::time::Duration;

/// Destination for counters and timers emitted by the execution engine
///
/// Emitted events: admission rejections, circuit trips, timeouts, and
/// completed executions. Implementations must be cheap and non-blocking;
/// they are called inline on the call path.
pub trait MetricsSink: Send + Sync {
    /// Increment a named counter
    fn increment(&self, counter: &str, labels: &[(&str, &str)]);

    /// Record a named timer observation
    fn observe(&self, timer: &str, elapsed: Duration, labels: &[(&str, &str)]);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: &str, _labels: &[(&str, &str)]) {}

    fn observe(&self, _timer: &str, _elapsed: Duration, _labels: &[(&str, &str)]) {}
}

/// Sink that forwards observations as `tracing` events
///
/// Useful as a default in binaries that already ship a tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, counter: &str, labels: &[(&str, &str)]) {
        tracing::debug!(target: "breakwater::metrics", counter, ?labels, "increment");
    }

    fn observe(&self, timer: &str, elapsed: Duration, labels: &[(&str, &str)]) {
        tracing::debug!(
            target: "breakwater::metrics",
            timer,
            elapsed_ms = elapsed.as_millis() as u64,
            ?labels,
            "observe"
        );
    }
}
