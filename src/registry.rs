//! Registry of named protected operations
//!
//! Maps operation ids to their [`ProtectedOperation`] instances so callers
//! can execute by name. Operations are created once at setup time and reused
//! for the lifetime of the process; a slow or tripped operation never affects
//! another operation's admission or circuit state.

use crate::config::CallConfig;
use crate::engine::ProtectedOperation;
use crate::error::{BoxError, CallError};
use crate::metrics::{MetricsSink, NoopMetrics};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Named collection of protected operations sharing one metrics sink
#[derive(Clone)]
pub struct CallRegistry {
    metrics: Arc<dyn MetricsSink>,
    operations: Arc<RwLock<HashMap<String, Arc<ProtectedOperation>>>>,
}

impl CallRegistry {
    /// Create an empty registry with a no-op metrics sink
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(NoopMetrics))
    }

    /// Create an empty registry reporting to the given sink
    pub fn with_metrics(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            metrics,
            operations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register an operation under a unique name
    ///
    /// Registering a name twice keeps the existing operation and returns it;
    /// guard state (permits, circuit window) is never silently discarded.
    pub fn register(&self, name: &str, config: CallConfig) -> Arc<ProtectedOperation> {
        let mut operations = self.operations.write().unwrap();
        if let Some(existing) = operations.get(name) {
            return Arc::clone(existing);
        }
        let operation =
            ProtectedOperation::with_metrics(name, config, Arc::clone(&self.metrics));
        operations.insert(name.to_string(), Arc::clone(&operation));
        operation
    }

    /// Look up an operation by name
    pub fn operation(&self, name: &str) -> Option<Arc<ProtectedOperation>> {
        self.operations.read().unwrap().get(name).cloned()
    }

    /// Execute a unit of work under the named operation's guards
    ///
    /// An unknown name resolves to [`CallError::Unknown`] with the name
    /// retained in the detail.
    pub async fn execute<F, Fut, T>(&self, name: &str, work: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
        T: Send + 'static,
    {
        let operation = self
            .operation(name)
            .ok_or_else(|| CallError::unknown(format!("no operation registered as '{name}'"), None))?;
        operation.execute(work).await
    }

    /// Names of all registered operations
    pub fn names(&self) -> Vec<String> {
        self.operations.read().unwrap().keys().cloned().collect()
    }

    /// Shut down every operation, each with the same grace period
    ///
    /// Returns `true` only if every operation drained within its grace.
    pub async fn shutdown_all(&self, grace: Duration) -> bool {
        let operations: Vec<_> = self.operations.read().unwrap().values().cloned().collect();
        let mut all_drained = true;
        for operation in operations {
            all_drained &= operation.shutdown(grace).await;
        }
        all_drained
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRegistry")
            .field("operations", &self.names())
            .finish()
    }
}
