//! Error taxonomy for guarded call execution

use std::time::Duration;
use thiserror::Error;

/// Boxed error type produced by a unit of work
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The closed set of terminal outcomes a guarded call can fail with
///
/// Every call through the execution engine resolves to either `Ok(value)` or
/// exactly one of these variants. Callers never see guard internals.
#[derive(Debug, Error)]
pub enum CallError {
    /// The unit of work itself returned an error
    #[error("downstream operation failed")]
    Downstream(#[source] BoxError),

    /// Bulkhead at capacity and the wait queue is full (or the wait timed out)
    #[error("bulkhead at capacity, call rejected")]
    Overflow,

    /// Circuit is open, the call was rejected without running the work
    #[error("circuit is open, call rejected")]
    CircuitOpen,

    /// The caller-visible deadline elapsed before the work completed
    #[error("call exceeded deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// Anything not otherwise classifiable; the original cause is retained
    #[error("unclassified failure: {detail}")]
    Unknown {
        detail: String,
        #[source]
        cause: Option<BoxError>,
    },
}

impl CallError {
    /// Build an `Unknown` failure, keeping the cause for diagnostics
    pub fn unknown(detail: impl Into<String>, cause: Option<BoxError>) -> Self {
        CallError::Unknown {
            detail: detail.into(),
            cause,
        }
    }

    /// Check if this outcome is a guard-level rejection
    ///
    /// Rejections never reached the unit of work and must not be fed into the
    /// circuit's failure ratio. Tripping the breaker on self-inflicted
    /// overload would conflate load shedding with downstream unhealthiness.
    pub fn is_rejection(&self) -> bool {
        matches!(self, CallError::Overflow | CallError::CircuitOpen)
    }

    /// Check if this outcome should count toward the circuit's failure ratio
    pub fn counts_as_failure(&self) -> bool {
        !self.is_rejection()
    }

    /// Short stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            CallError::Downstream(_) => "downstream_failure",
            CallError::Overflow => "overflow",
            CallError::CircuitOpen => "circuit_open",
            CallError::DeadlineExceeded(_) => "deadline_exceeded",
            CallError::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let downstream = CallError::Downstream("io refused".into());
        assert!(downstream.counts_as_failure());
        assert!(!downstream.is_rejection());

        let timed_out = CallError::DeadlineExceeded(Duration::from_millis(100));
        assert!(timed_out.counts_as_failure());

        let overflow = CallError::Overflow;
        assert!(overflow.is_rejection());
        assert!(!overflow.counts_as_failure());

        let open = CallError::CircuitOpen;
        assert!(open.is_rejection());
        assert!(!open.counts_as_failure());
    }

    #[test]
    fn test_unknown_retains_cause() {
        let cause: BoxError = "worker vanished".into();
        let err = CallError::unknown("result channel closed", Some(cause));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.kind(), "unknown");
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(CallError::Overflow.kind(), "overflow");
        assert_eq!(CallError::CircuitOpen.kind(), "circuit_open");
        assert_eq!(
            CallError::DeadlineExceeded(Duration::from_secs(1)).kind(),
            "deadline_exceeded"
        );
    }
}
