//! Circuit breaker driven by a sliding window of call outcomes
//!
//! Three states:
//! - **Closed**: calls pass through; each settled outcome lands in a sliding
//!   window of the most recent results. Once the window holds at least
//!   `minimum_samples` entries and the failure ratio exceeds the threshold,
//!   the circuit trips to Open.
//! - **Open**: calls are rejected immediately without running the work. After
//!   `open_duration` the next arriving call moves the circuit to HalfOpen.
//! - **HalfOpen**: a bounded number of trial calls pass through. The first
//!   settled trial decides the transition; outcomes that settle after a
//!   transition are discarded for state purposes but still resolve normally
//!   for their caller.
//!
//! Bulkhead rejections are never recorded here: shedding load is not evidence
//! of downstream unhealthiness.
//!
//! All state lives under a single mutex, and a generation counter bumped on
//! every transition is the sole authority for discarding stale outcomes. Two
//! concurrent trials can therefore never flip the circuit in contradictory
//! directions.

use crate::config::CallConfig;
use crate::error::CallError;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// State of the circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Downstream considered unhealthy; calls rejected until `until`
    Open { until: Instant },
    /// Probing recovery with a bounded number of trial calls
    HalfOpen,
}

/// Pass token handed out by [`CircuitBreaker::try_pass`]
///
/// Carries the state generation it was issued under; recording an outcome
/// with a stale permit is a silent no-op.
#[derive(Debug, Clone, Copy)]
pub struct BreakerPermit {
    generation: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Sliding record of recent outcomes, `true` = failure
    window: VecDeque<bool>,
    /// Bumped on every state transition; stale outcomes are discarded
    generation: u64,
    /// Trial calls currently in flight while half-open
    trials_in_flight: usize,
}

/// Per-operation failure circuit
#[derive(Debug)]
pub struct CircuitBreaker {
    open_duration: Duration,
    failure_rate_threshold: f64,
    minimum_samples: usize,
    half_open_trials: usize,
    window_size: usize,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker from the operation's config
    pub fn new(config: &CallConfig) -> Self {
        Self {
            open_duration: config.open_duration,
            failure_rate_threshold: config.failure_rate_threshold,
            minimum_samples: config.minimum_samples,
            half_open_trials: config.half_open_trials,
            window_size: config.window_size,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                generation: 0,
                trials_in_flight: 0,
            }),
        }
    }

    /// Ask the circuit whether a call may proceed
    ///
    /// Closed always passes. Open rejects until the open duration elapses, at
    /// which point the arriving call transitions the circuit to HalfOpen and
    /// becomes its first trial. HalfOpen passes at most `half_open_trials`
    /// concurrent trials and rejects the rest.
    pub async fn try_pass(&self) -> Result<BreakerPermit, CallError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(BreakerPermit {
                generation: inner.generation,
            }),
            CircuitState::Open { until } => {
                if Instant::now() >= until {
                    inner.state = CircuitState::HalfOpen;
                    inner.generation += 1;
                    inner.trials_in_flight = 1;
                    debug!(generation = inner.generation, "circuit half-open, admitting trial");
                    Ok(BreakerPermit {
                        generation: inner.generation,
                    })
                } else {
                    Err(CallError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight >= self.half_open_trials {
                    Err(CallError::CircuitOpen)
                } else {
                    inner.trials_in_flight += 1;
                    Ok(BreakerPermit {
                        generation: inner.generation,
                    })
                }
            }
        }
    }

    /// Return a trial slot without recording an outcome
    ///
    /// Used when a call passed the circuit but was then rejected by the
    /// bulkhead: the rejection must not count as a trial result, and the slot
    /// must free up for the next probe.
    pub async fn cancel(&self, permit: BreakerPermit) {
        let mut inner = self.inner.lock().await;
        if permit.generation == inner.generation && inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }

    /// Record a successful call
    pub async fn record_success(&self, permit: BreakerPermit) {
        self.record(permit, false).await;
    }

    /// Record a failed or timed-out call
    ///
    /// Returns `true` if this outcome tripped the circuit to Open.
    pub async fn record_failure(&self, permit: BreakerPermit) -> bool {
        self.record(permit, true).await
    }

    async fn record(&self, permit: BreakerPermit, failed: bool) -> bool {
        let mut inner = self.inner.lock().await;
        if permit.generation != inner.generation {
            // Outcome settled after a transition; caller keeps its result,
            // the state machine ignores it.
            return false;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(failed);
                while inner.window.len() > self.window_size {
                    inner.window.pop_front();
                }
                if self.should_trip(&inner.window) {
                    inner.state = CircuitState::Open {
                        until: Instant::now() + self.open_duration,
                    };
                    inner.generation += 1;
                    inner.window.clear();
                    warn!(
                        open_for = ?self.open_duration,
                        "failure ratio exceeded threshold, circuit opened"
                    );
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                inner.trials_in_flight = 0;
                if failed {
                    inner.state = CircuitState::Open {
                        until: Instant::now() + self.open_duration,
                    };
                    inner.generation += 1;
                    warn!("trial call failed, circuit re-opened");
                    true
                } else {
                    inner.state = CircuitState::Closed;
                    inner.generation += 1;
                    inner.window.clear();
                    debug!("trial call succeeded, circuit closed");
                    false
                }
            }
            // Reachable only through a manual force_open between pass and
            // record; the generation check above already filtered that out.
            CircuitState::Open { .. } => false,
        }
    }

    fn should_trip(&self, window: &VecDeque<bool>) -> bool {
        if window.len() < self.minimum_samples {
            return false;
        }
        let failures = window.iter().filter(|failed| **failed).count();
        let ratio = failures as f64 / window.len() as f64;
        ratio > self.failure_rate_threshold
    }

    /// Current state of the circuit
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Number of outcomes currently in the sliding window
    pub async fn window_len(&self) -> usize {
        self.inner.lock().await.window.len()
    }

    /// Manual override: reset to Closed and clear the window
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.window.clear();
        inner.trials_in_flight = 0;
    }

    /// Manual override: force Open for one open-duration period
    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Open {
            until: Instant::now() + self.open_duration,
        };
        inner.generation += 1;
        inner.trials_in_flight = 0;
    }
}
