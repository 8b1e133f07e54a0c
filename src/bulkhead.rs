//! Bulkhead: concurrency admission control for one protected operation
//!
//! Bounds how many units of work may run at once, with a bounded wait queue
//! for callers arriving while saturated. Excess callers are rejected
//! immediately once the queue is full, so admission never blocks unboundedly.
//!
//! Admission hands out a [`Ticket`]; capacity is returned when the ticket is
//! released (or dropped). Release is tied to actual work completion, not to
//! the logical result delivered to the caller — a timed-out call keeps its
//! slot occupied until the abandoned work really finishes.
//!
//! # Example
//!
//! ```
//! use breakwater::bulkhead::Bulkhead;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), breakwater::CallError> {
//! let bulkhead = Bulkhead::new(2, 0, Duration::from_millis(100));
//!
//! let ticket = bulkhead.admit().await?;
//! assert_eq!(bulkhead.in_flight(), 1);
//! drop(ticket);
//! assert_eq!(bulkhead.in_flight(), 0);
//! # Ok(())
//! # }
//! ```

use crate::error::CallError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout};

/// One unit of admitted concurrency capacity
///
/// Holds a semaphore permit for the lifetime of the work. Explicit
/// [`release`](Ticket::release) and drop both return the permit; releasing
/// twice is a no-op, so capacity can never exceed the configured bound.
#[derive(Debug)]
pub struct Ticket {
    permit: Option<OwnedSemaphorePermit>,
    in_flight: Arc<AtomicUsize>,
}

impl Ticket {
    /// Return the permit to the bulkhead
    ///
    /// Safe to call more than once; only the first call has any effect.
    pub fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            drop(permit);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.release();
    }
}

/// Concurrency admission guard for one operation
#[derive(Debug)]
pub struct Bulkhead {
    max_concurrent: usize,
    queue_capacity: usize,
    queue_wait: Duration,
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
}

impl Bulkhead {
    /// Create a bulkhead with `max_concurrent` permits and a bounded wait queue
    pub fn new(max_concurrent: usize, queue_capacity: usize, queue_wait: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            queue_capacity,
            queue_wait,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            waiting: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Try to admit one unit of work
    ///
    /// Returns a [`Ticket`] immediately if a permit is free. Otherwise the
    /// caller joins the wait queue, suspending until a permit frees or
    /// `queue_wait` elapses. If the queue is already full (or the wait times
    /// out, or the bulkhead has been closed for shutdown) the admission is
    /// rejected with [`CallError::Overflow`] without blocking further.
    pub async fn admit(&self) -> Result<Ticket, CallError> {
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            return Ok(self.ticket(permit));
        }

        if self.queue_capacity == 0 {
            return Err(CallError::Overflow);
        }

        let seat = self.waiting.fetch_add(1, Ordering::SeqCst);
        if seat >= self.queue_capacity {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(CallError::Overflow);
        }

        let acquired = timeout(self.queue_wait, Arc::clone(&self.permits).acquire_owned()).await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);

        match acquired {
            Ok(Ok(permit)) => Ok(self.ticket(permit)),
            // Semaphore closed during shutdown: no more admissions
            Ok(Err(_)) => Err(CallError::Overflow),
            // Queue wait elapsed without a free permit
            Err(_) => Err(CallError::Overflow),
        }
    }

    fn ticket(&self, permit: OwnedSemaphorePermit) -> Ticket {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ticket {
            permit: Some(permit),
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Number of units of work currently holding a ticket
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of callers currently waiting for admission
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Free permits currently available
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Configured concurrency bound
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Stop admitting new work; queued waiters are rejected
    pub fn close(&self) {
        self.permits.close();
    }

    /// Wait for in-flight work to finish, bounded by `grace`
    ///
    /// Returns `true` if all tickets were released within the grace period.
    pub async fn drain(&self, grace: Duration) -> bool {
        timeout(grace, async {
            while self.in_flight.load(Ordering::SeqCst) > 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admit_up_to_capacity() {
        let bulkhead = Bulkhead::new(2, 0, Duration::from_millis(50));

        let t1 = bulkhead.admit().await.unwrap();
        let t2 = bulkhead.admit().await.unwrap();
        assert_eq!(bulkhead.in_flight(), 2);

        // Queue capacity 0: third admission rejects immediately
        let rejected = bulkhead.admit().await;
        assert!(matches!(rejected, Err(CallError::Overflow)));

        drop(t1);
        drop(t2);
        assert_eq!(bulkhead.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_queued_admission_gets_freed_permit() {
        let bulkhead = Arc::new(Bulkhead::new(1, 1, Duration::from_millis(500)));

        let ticket = bulkhead.admit().await.unwrap();

        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move { bulkhead.admit().await })
        };

        // Give the waiter time to join the queue, then free the permit
        sleep(Duration::from_millis(20)).await;
        drop(ticket);

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(bulkhead.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_queue_wait_timeout_rejects() {
        let bulkhead = Bulkhead::new(1, 4, Duration::from_millis(30));

        let _held = bulkhead.admit().await.unwrap();
        let rejected = bulkhead.admit().await;
        assert!(matches!(rejected, Err(CallError::Overflow)));
        assert_eq!(bulkhead.waiting(), 0);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_without_waiting() {
        let bulkhead = Arc::new(Bulkhead::new(1, 1, Duration::from_millis(500)));

        let _held = bulkhead.admit().await.unwrap();

        // Occupy the single queue seat
        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move { bulkhead.admit().await })
        };
        sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.waiting(), 1);

        // Queue is full: rejection must be immediate, well under queue_wait
        let start = std::time::Instant::now();
        let rejected = bulkhead.admit().await;
        assert!(matches!(rejected, Err(CallError::Overflow)));
        assert!(start.elapsed() < Duration::from_millis(100));

        waiter.abort();
    }

    #[tokio::test]
    async fn test_double_release_does_not_inflate_capacity() {
        let bulkhead = Bulkhead::new(2, 0, Duration::from_millis(50));

        let mut ticket = bulkhead.admit().await.unwrap();
        ticket.release();
        ticket.release();
        drop(ticket);

        assert_eq!(bulkhead.available(), 2);
        assert_eq!(bulkhead.in_flight(), 0);

        // Capacity invariant holds for subsequent admits
        let _t1 = bulkhead.admit().await.unwrap();
        let _t2 = bulkhead.admit().await.unwrap();
        assert!(matches!(bulkhead.admit().await, Err(CallError::Overflow)));
    }

    #[tokio::test]
    async fn test_close_rejects_new_admissions() {
        let bulkhead = Bulkhead::new(1, 2, Duration::from_millis(200));

        let held = bulkhead.admit().await.unwrap();
        bulkhead.close();

        let rejected = bulkhead.admit().await;
        assert!(matches!(rejected, Err(CallError::Overflow)));

        drop(held);
        assert!(bulkhead.drain(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_drain_times_out_while_work_in_flight() {
        let bulkhead = Bulkhead::new(1, 0, Duration::from_millis(50));
        let _held = bulkhead.admit().await.unwrap();
        assert!(!bulkhead.drain(Duration::from_millis(30)).await);
    }
}
