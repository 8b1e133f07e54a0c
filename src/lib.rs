//! Breakwater: pure-logic guarded call execution
//!
//! # Overview
//!
//! This crate protects a caller from a failing or overloaded downstream
//! operation by composing three independent guards around an arbitrary async
//! unit of work:
//!
//! - **Bulkhead**: bounds how many units of work run at once per operation,
//!   with a bounded wait queue and immediate rejection beyond it
//! - **Deadline**: unblocks the caller when the work overruns its timeout,
//!   while the abandoned work keeps its concurrency slot until it really ends
//! - **Circuit Breaker**: trips per-operation on a sliding failure ratio and
//!   short-circuits calls while the downstream is considered unhealthy
//!
//! Every failure mode is normalized into the closed [`CallError`] taxonomy;
//! callers never see guard internals.
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - What the work actually does (HTTP, database, messaging)
//! - How configuration is loaded
//! - Which metrics backend is in use (an injected [`MetricsSink`] suffices)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ execute(name, work)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Check                     │  ← Open circuit? reject now,
//! │  (Closed / Open / HalfOpen)             │    never touch the bulkhead
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Bulkhead Admission                │  ← Permit free? bounded wait?
//! │  (permits + bounded wait queue)         │    otherwise Overflow
//! └─────────────┬───────────────────────────┘
//!               │ ticket
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Deadline-Wrapped Run              │  ← Work runs off the caller's
//! │  (spawned task or worker pool)          │    wait, holding the ticket
//! └─────────────┬───────────────────────────┘
//!               │ outcome
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Outcome Recording                 │  ← Success/Failure/Timeout feed
//! │  (sliding window, may trip circuit)     │    the breaker; rejections don't
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use breakwater::{BoxError, CallConfig, CallRegistry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), breakwater::CallError> {
//! let registry = CallRegistry::new();
//! registry.register(
//!     "payment-gateway",
//!     CallConfig {
//!         max_concurrent: 8,
//!         call_timeout: Duration::from_millis(500),
//!         ..Default::default()
//!     },
//! );
//!
//! let receipt = registry
//!     .execute("payment-gateway", || async {
//!         // Your potentially failing downstream call
//!         Ok::<_, BoxError>("receipt-41")
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod bulkhead;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod registry;

mod worker_pool;

// Re-export main types for convenience
pub use breaker::{BreakerPermit, CircuitBreaker, CircuitState};
pub use bulkhead::{Bulkhead, Ticket};
pub use config::{AdmissionStrategy, CallConfig};
pub use engine::{CallHandle, ProtectedOperation};
pub use error::{BoxError, CallError};
pub use metrics::{MetricsSink, NoopMetrics, TracingMetrics};
pub use registry::CallRegistry;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use breakwater::prelude::*;
/// ```
pub mod prelude {
    pub use super::config::{AdmissionStrategy, CallConfig};
    pub use super::engine::ProtectedOperation;
    pub use super::error::{BoxError, CallError};
    pub use super::metrics::{MetricsSink, NoopMetrics};
    pub use super::registry::CallRegistry;
}
