//! Dedicated worker pool execution site
//!
//! Fixed set of worker tasks fed by a bounded channel. Used by the
//! worker-pool admission strategy: admission itself still goes through the
//! bulkhead, so the pool never sees more queued work than the bulkhead has
//! admitted; the pool only changes where admitted work runs.

use crate::error::CallError;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

/// Type-erased unit of work executed by a worker
pub(crate) type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

/// Fixed-size pool of worker tasks
///
/// Must be created inside a tokio runtime; workers are spawned eagerly.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    sender: std::sync::Mutex<Option<mpsc::Sender<Job>>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` worker tasks sharing one bounded queue
    pub(crate) fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(workers);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        match job {
                            Some(job) => job().await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self {
            sender: std::sync::Mutex::new(Some(sender)),
            handles: std::sync::Mutex::new(handles),
        }
    }

    /// Hand a job to the pool
    ///
    /// The bulkhead bounds in-flight work to the worker count, so the send
    /// completes promptly; a closed pool (shutdown already started) rejects.
    pub(crate) async fn submit(&self, job: Job) -> Result<(), CallError> {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(job).await.map_err(|_| CallError::Overflow),
            None => Err(CallError::Overflow),
        }
    }

    /// Close the queue and wait for workers to finish, bounded by `grace`
    pub(crate) async fn shutdown(&self, grace: Duration) -> bool {
        drop(self.sender.lock().unwrap().take());
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let drained = timeout(grace, join_all).await.is_ok();
        debug!(drained, "worker pool shut down");
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> Job {
        Box::new(move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn test_pool_runs_jobs() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            pool.submit(counting_job(Arc::clone(&counter))).await.unwrap();
        }
        assert!(pool.shutdown(Duration::from_millis(500)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_to_worker_count() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let job: Job = Box::new(move || {
                Box::pin(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            });
            pool.submit(job).await.unwrap();
        }

        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejects() {
        let pool = WorkerPool::new(1);
        assert!(pool.shutdown(Duration::from_millis(200)).await);

        let counter = Arc::new(AtomicUsize::new(0));
        let rejected = pool.submit(counting_job(counter)).await;
        assert!(matches!(rejected, Err(CallError::Overflow)));
    }
}
