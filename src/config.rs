//! Configuration for protected operations
//!
//! One immutable [`CallConfig`] is attached to each named operation at setup
//! time. The embedding application owns configuration parsing; this crate only
//! consumes the resulting struct.

use std::time::Duration;

/// Where admitted work executes
///
/// Both strategies share the same admission semantics (admit, bounded wait,
/// reject); they differ only in where the unit of work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionStrategy {
    /// Admitted work runs on a task spawned per call
    Queueing,
    /// Admitted work runs on a dedicated worker pool sized to `max_concurrent`
    WorkerPool,
}

/// Configuration for one protected operation
///
/// # Examples
///
/// ```
/// use breakwater::CallConfig;
/// use std::time::Duration;
///
/// let config = CallConfig {
///     max_concurrent: 4,
///     call_timeout: Duration::from_millis(250),
///     ..Default::default()
/// };
/// assert_eq!(config.max_concurrent, 4);
/// ```
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Maximum units of work running concurrently
    pub max_concurrent: usize,
    /// Maximum callers waiting for admission; 0 means reject when saturated
    pub queue_capacity: usize,
    /// How long an admission may wait in the queue before rejection
    pub queue_wait: Duration,
    /// Caller-visible deadline for one execution
    pub call_timeout: Duration,
    /// How long the circuit stays open before probing recovery
    pub open_duration: Duration,
    /// Failure ratio above which the circuit trips (0.0..=1.0)
    pub failure_rate_threshold: f64,
    /// Minimum recorded outcomes before the circuit may trip
    pub minimum_samples: usize,
    /// Concurrent trial calls allowed in half-open
    pub half_open_trials: usize,
    /// Sliding window length for the outcome record
    pub window_size: usize,
    /// Execution-site strategy for admitted work
    pub strategy: AdmissionStrategy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            queue_capacity: 32,
            queue_wait: Duration::from_millis(500),
            call_timeout: Duration::from_secs(5),
            open_duration: Duration::from_secs(30),
            failure_rate_threshold: 0.5,
            minimum_samples: 10,
            half_open_trials: 1,
            window_size: 100,
            strategy: AdmissionStrategy::Queueing,
        }
    }
}

impl CallConfig {
    /// Fail-fast profile: no wait queue, short deadline
    ///
    /// Suited to interactive paths where shedding load immediately is better
    /// than queueing it. Saturated admissions reject without blocking.
    pub fn fail_fast_profile() -> Self {
        Self {
            max_concurrent: 8,
            queue_capacity: 0,
            queue_wait: Duration::ZERO,
            call_timeout: Duration::from_millis(250),
            open_duration: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Patient profile: deep queue and long deadline for batch-style callers
    ///
    /// Admissions are willing to wait; the breaker needs a larger sample
    /// before tripping so slow bursts do not open the circuit spuriously.
    pub fn patient_profile() -> Self {
        Self {
            max_concurrent: 4,
            queue_capacity: 256,
            queue_wait: Duration::from_secs(30),
            call_timeout: Duration::from_secs(120),
            minimum_samples: 20,
            window_size: 200,
            ..Default::default()
        }
    }

    /// Clamp nonsensical values into the supported range
    ///
    /// Applied once when the operation is created, so the guards can rely on
    /// the invariants (`max_concurrent >= 1`, threshold within 0..=1, window
    /// at least as large as the minimum sample count).
    pub fn normalized(mut self) -> Self {
        self.max_concurrent = self.max_concurrent.max(1);
        self.half_open_trials = self.half_open_trials.max(1);
        self.minimum_samples = self.minimum_samples.max(1);
        self.window_size = self.window_size.max(self.minimum_samples);
        self.failure_rate_threshold = self.failure_rate_threshold.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CallConfig::default();
        assert_eq!(config.max_concurrent, 16);
        assert_eq!(config.half_open_trials, 1);
        assert_eq!(config.strategy, AdmissionStrategy::Queueing);
    }

    #[test]
    fn test_normalized_clamps() {
        let config = CallConfig {
            max_concurrent: 0,
            half_open_trials: 0,
            minimum_samples: 0,
            window_size: 0,
            failure_rate_threshold: 3.0,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.half_open_trials, 1);
        assert_eq!(config.minimum_samples, 1);
        assert!(config.window_size >= config.minimum_samples);
        assert!((config.failure_rate_threshold - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_profiles() {
        let fast = CallConfig::fail_fast_profile();
        assert_eq!(fast.queue_capacity, 0);
        assert_eq!(fast.call_timeout, Duration::from_millis(250));

        let patient = CallConfig::patient_profile();
        assert_eq!(patient.queue_capacity, 256);
        assert!(patient.window_size >= patient.minimum_samples);
    }
}
