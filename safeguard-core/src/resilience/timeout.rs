//! Timeout policy for worker-dispatched calls.
//!
//! The deadline is fixed when the call is submitted, so time spent waiting
//! for a worker counts against it. On expiry the caller gets
//! [`FaultToleranceError::Timeout`] and the worker task is aborted, which
//! releases its slot.

use crate::error::{FaultToleranceError, Result};
use crate::identity::OperationId;
use crate::worker::WorkerHandle;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Timeout applied to one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Create a timeout.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Get the timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Deadline for a call submitted now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.duration
    }

    fn expired(&self, operation: &OperationId) -> FaultToleranceError {
        warn!(operation = %operation, duration = ?self.duration, "Operation timed out");
        FaultToleranceError::Timeout {
            operation: operation.clone(),
            timeout: self.duration,
        }
    }

    /// Run `task` until `deadline`, on the worker side.
    ///
    /// A task that only got its worker after the deadline never starts.
    pub async fn guard<F, T>(&self, operation: &OperationId, deadline: Instant, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if Instant::now() >= deadline {
            return Err(self.expired(operation));
        }
        match tokio::time::timeout_at(deadline, task).await {
            Ok(result) => result,
            Err(_) => Err(self.expired(operation)),
        }
    }

    /// Wait for a worker task until `deadline`, aborting it on expiry.
    pub async fn race<T>(
        &self,
        operation: &OperationId,
        deadline: Instant,
        mut handle: WorkerHandle<Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined?,
            Err(_) => {
                handle.abort();
                Err(self.expired(operation))
            }
        }
    }
}
