//! Execution engine: composes the guards around a unit of work
//!
//! Fixed composition order for every call:
//!
//! ```text
//! circuit check ──► admission ──► deadline-wrapped run ──► outcome recorded
//! ```
//!
//! Checking the circuit first avoids spending bulkhead capacity on calls that
//! are certain to be rejected; recording last means the breaker only ever
//! sees outcomes from calls that actually ran (or timed out), never from
//! rejections.
//!
//! The work itself always runs off the caller's wait (a spawned task or a
//! pool worker) holding the admission [`Ticket`]. When the deadline fires,
//! the caller is unblocked immediately with [`CallError::DeadlineExceeded`]
//! while the abandoned work keeps its ticket until it actually finishes, so
//! a concurrency slot is never reused while still physically occupied.
//!
//! # Example
//!
//! ```no_run
//! use breakwater::{CallConfig, ProtectedOperation};
//!
//! # async fn example() -> Result<(), breakwater::CallError> {
//! let op = ProtectedOperation::new("inventory-lookup", CallConfig::default());
//!
//! let value = op
//!     .execute(|| async { Ok::<_, breakwater::BoxError>(42) })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::bulkhead::{Bulkhead, Ticket};
use crate::config::{AdmissionStrategy, CallConfig};
use crate::error::{BoxError, CallError};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::worker_pool::WorkerPool;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

/// One named downstream operation protected by the three guards
///
/// Created once at setup time and shared (`Arc`) across callers; `execute`
/// and `submit` are safe to call concurrently from any number of tasks.
pub struct ProtectedOperation {
    name: String,
    config: CallConfig,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker,
    pool: Option<WorkerPool>,
    metrics: Arc<dyn MetricsSink>,
    closed: AtomicBool,
}

impl ProtectedOperation {
    /// Create a protected operation with a no-op metrics sink
    ///
    /// Must be called inside a tokio runtime when the config selects the
    /// worker-pool strategy, since pool workers are spawned eagerly.
    pub fn new(name: impl Into<String>, config: CallConfig) -> Arc<Self> {
        Self::with_metrics(name, config, Arc::new(NoopMetrics))
    }

    /// Create a protected operation reporting to the given metrics sink
    pub fn with_metrics(
        name: impl Into<String>,
        config: CallConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let config = config.normalized();
        let bulkhead = Bulkhead::new(
            config.max_concurrent,
            config.queue_capacity,
            config.queue_wait,
        );
        let breaker = CircuitBreaker::new(&config);
        let pool = match config.strategy {
            AdmissionStrategy::Queueing => None,
            AdmissionStrategy::WorkerPool => Some(WorkerPool::new(config.max_concurrent)),
        };
        Arc::new(Self {
            name: name.into(),
            config,
            bulkhead,
            breaker,
            pool,
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Run a unit of work under the full guard pipeline
    ///
    /// Resolves to exactly one outcome: the work's value, its error as
    /// [`CallError::Downstream`], a guard rejection, or
    /// [`CallError::DeadlineExceeded`]. No call is left pending indefinitely
    /// and no panic escapes unclassified.
    pub async fn execute<F, Fut, T>(&self, work: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        self.metrics
            .increment("calls_total", &[("operation", &self.name)]);

        if self.closed.load(Ordering::SeqCst) {
            self.count_rejection("shutdown");
            return Err(CallError::Overflow);
        }

        // 1. Circuit check: an open circuit never touches the bulkhead.
        let permit = match self.breaker.try_pass().await {
            Ok(permit) => permit,
            Err(error) => {
                self.count_rejection("circuit_open");
                return Err(error);
            }
        };

        // 2. Admission. A rejection here returns the half-open trial slot,
        //    and is never recorded into the outcome window.
        let ticket = match self.bulkhead.admit().await {
            Ok(ticket) => ticket,
            Err(error) => {
                self.breaker.cancel(permit).await;
                self.count_rejection("queue_full");
                return Err(error);
            }
        };

        // 3. Deadline-wrapped run, off the caller's wait.
        let started = Instant::now();
        let (sender, receiver) = oneshot::channel::<Result<T, CallError>>();
        match &self.pool {
            Some(pool) => {
                let job: crate::worker_pool::Job = Box::new(move || {
                    let unit: futures::future::BoxFuture<'static, ()> =
                        Box::pin(run_unit(work, ticket, sender));
                    unit
                });
                if pool.submit(job).await.is_err() {
                    self.breaker.cancel(permit).await;
                    self.count_rejection("shutdown");
                    return Err(CallError::Overflow);
                }
            }
            None => {
                tokio::spawn(run_unit(work, ticket, sender));
            }
        }

        let outcome = match timeout(self.config.call_timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::unknown(
                "result channel closed before the work completed",
                None,
            )),
            Err(_) => Err(CallError::DeadlineExceeded(self.config.call_timeout)),
        };

        // 4. Record the outcome into the circuit.
        match &outcome {
            Ok(_) => {
                self.breaker.record_success(permit).await;
                self.metrics.observe(
                    "call_duration",
                    started.elapsed(),
                    &[("operation", &self.name), ("outcome", "success")],
                );
            }
            Err(error) => {
                if matches!(error, CallError::DeadlineExceeded(_)) {
                    warn!(operation = %self.name, deadline = ?self.config.call_timeout, "call timed out");
                    self.metrics
                        .increment("calls_timed_out_total", &[("operation", &self.name)]);
                }
                let tripped = self.breaker.record_failure(permit).await;
                if tripped {
                    self.metrics
                        .increment("circuit_opened_total", &[("operation", &self.name)]);
                }
                self.metrics.observe(
                    "call_duration",
                    started.elapsed(),
                    &[("operation", &self.name), ("outcome", error.kind())],
                );
            }
        }

        outcome
    }

    /// Subscribe-style variant: start the call and return a one-shot handle
    ///
    /// The returned [`CallHandle`] resolves to the same outcome `execute`
    /// would have produced, delivering exactly one terminal value. The
    /// calling task is never blocked.
    pub fn submit<F, Fut, T>(self: Arc<Self>, work: F) -> CallHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        tokio::spawn(async move {
            let _ = sender.send(self.execute(work).await);
        });
        CallHandle { receiver }
    }

    fn count_rejection(&self, reason: &str) {
        self.metrics.increment(
            "calls_rejected_total",
            &[("operation", &self.name), ("reason", reason)],
        );
    }

    /// Operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective (normalized) configuration
    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    /// Current circuit state
    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    /// Units of work currently holding an admission ticket
    pub fn in_flight(&self) -> usize {
        self.bulkhead.in_flight()
    }

    /// Manual breaker override for tests and operator tooling
    pub async fn reset_circuit(&self) {
        self.breaker.reset().await;
    }

    /// Manual breaker override: force the circuit open for one period
    pub async fn trip_circuit(&self) {
        self.breaker.force_open().await;
    }

    /// Stop admitting work, drain in-flight calls, release worker resources
    ///
    /// New calls are rejected as soon as shutdown starts. Returns `true` if
    /// all in-flight work (including timed-out work still running in the
    /// background) finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.bulkhead.close();
        let drained = self.bulkhead.drain(grace).await;
        if let Some(pool) = &self.pool {
            pool.shutdown(grace).await;
        }
        debug!(operation = %self.name, drained, "operation shut down");
        drained
    }
}

impl std::fmt::Debug for ProtectedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedOperation")
            .field("name", &self.name)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// Runs the work holding its admission ticket, then delivers the outcome
///
/// The ticket is released when the work actually finishes, regardless of
/// whether the caller is still waiting; the send simply fails if the caller
/// already timed out. Panics are caught and classified.
fn run_unit<F, Fut, T>(
    work: F,
    mut ticket: Ticket,
    sender: oneshot::Sender<Result<T, CallError>>,
) -> impl Future<Output = ()> + Send + 'static
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    T: Send + 'static,
{
    async move {
        let result = match std::panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(fut) => futures::FutureExt::catch_unwind(AssertUnwindSafe(fut)).await,
            Err(payload) => Err(payload),
        };
        let outcome = match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(CallError::Downstream(error)),
            Err(payload) => Err(CallError::unknown(panic_detail(payload.as_ref()), None)),
        };
        ticket.release();
        let _ = sender.send(outcome);
    }
}

fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("work panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("work panicked: {message}")
    } else {
        "work panicked".to_string()
    }
}

/// Handle to a call started with [`ProtectedOperation::submit`]
///
/// Resolves to exactly one terminal outcome; dropping the handle abandons the
/// result but never the work's resources.
#[derive(Debug)]
pub struct CallHandle<T> {
    receiver: oneshot::Receiver<Result<T, CallError>>,
}

impl<T> Future for CallHandle<T> {
    type Output = Result<T, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(CallError::unknown(
                    "call task dropped before completing",
                    None,
                ))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::RecordingMetrics;
    use std::sync::atomic::AtomicUsize;

    fn config(max_concurrent: usize, call_timeout: Duration) -> CallConfig {
        CallConfig {
            max_concurrent,
            queue_capacity: 0,
            queue_wait: Duration::from_millis(50),
            call_timeout,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let op = ProtectedOperation::new("ok", config(2, Duration::from_secs(1)));
        let value = op.execute(|| async { Ok::<_, BoxError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(op.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_downstream_error_is_classified_and_cause_kept() {
        let op = ProtectedOperation::new("fails", config(2, Duration::from_secs(1)));
        let error = op
            .execute(|| async { Err::<(), BoxError>("connection refused".into()) })
            .await
            .unwrap_err();
        match &error {
            CallError::Downstream(cause) => {
                assert!(cause.to_string().contains("connection refused"));
            }
            other => panic!("expected Downstream, got {other:?}"),
        }
    }

    async fn always_panics() -> Result<(), BoxError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_panic_is_classified_unknown() {
        let op = ProtectedOperation::new("panics", config(1, Duration::from_secs(1)));
        let error = op.execute(always_panics).await.unwrap_err();
        match &error {
            CallError::Unknown { detail, .. } => assert!(detail.contains("boom")),
            other => panic!("expected Unknown, got {other:?}"),
        }
        // The panicking call must not leak its ticket
        assert_eq!(op.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_deadline_unblocks_caller_before_work_finishes() {
        let op = ProtectedOperation::new("slow", config(1, Duration::from_millis(40)));

        let started = Instant::now();
        let error = op
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, BoxError>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(error, CallError::DeadlineExceeded(_)));
        assert!(started.elapsed() < Duration::from_millis(150));

        // Ticket is still held by the abandoned work...
        assert_eq!(op.in_flight(), 1);

        // ...and released only when the work actually completes
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(op.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_submit_delivers_one_terminal_outcome() {
        let op = ProtectedOperation::new("handle", config(2, Duration::from_secs(1)));
        let handle = op.submit(|| async { Ok::<_, BoxError>("done") });
        assert_eq!(handle.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_rejections_counted_not_recorded() {
        let metrics = Arc::new(RecordingMetrics::default());
        let op = ProtectedOperation::with_metrics(
            "busy",
            config(1, Duration::from_secs(1)),
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        );

        let blocker = {
            let op = Arc::clone(&op);
            tokio::spawn(async move {
                op.execute(|| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, BoxError>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rejected = op.execute(|| async { Ok::<_, BoxError>(()) }).await;
        assert!(matches!(rejected, Err(CallError::Overflow)));

        let counters = metrics.counters.lock().unwrap().clone();
        assert!(counters
            .iter()
            .any(|entry| entry.contains("calls_rejected_total") && entry.contains("queue_full")));

        blocker.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let op = ProtectedOperation::new("closing", config(1, Duration::from_secs(1)));
        assert!(op.shutdown(Duration::from_millis(100)).await);

        let rejected = op.execute(|| async { Ok::<_, BoxError>(()) }).await;
        assert!(matches!(rejected, Err(CallError::Overflow)));
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_operation() {
        let op = ProtectedOperation::new("shared", config(4, Duration::from_secs(1)));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let op = Arc::clone(&op);
            let completed = Arc::clone(&completed);
            handles.push(tokio::spawn(async move {
                op.execute(move || async move {
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }
}
