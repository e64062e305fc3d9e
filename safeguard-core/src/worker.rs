//! Shared, bounded worker pool for asynchronous and timeout plans.
//!
//! Every plan that dispatches onto a worker goes through one pool injected
//! into the factory. At most `max_workers` tasks execute at once and at most
//! `queue_capacity` wait for a worker; anything beyond is rejected with
//! [`FaultToleranceError::WorkerPoolSaturated`].

use crate::config::WorkerPoolConfig;
use crate::error::{FaultToleranceError, Result};
use crate::identity::OperationId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bounded pool of worker slots running on a tokio runtime.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    permits: Arc<Semaphore>,
    active: AtomicUsize,
    queued: AtomicUsize,
    total_submitted: AtomicU64,
    total_rejected: AtomicU64,
    runtime: Handle,
}

impl WorkerPool {
    /// Create a pool on the current tokio runtime.
    pub fn new(config: WorkerPoolConfig) -> Result<Arc<Self>> {
        let runtime = Handle::try_current().map_err(|e| {
            FaultToleranceError::configuration("worker_pool", format!("no tokio runtime: {e}"))
        })?;
        Self::with_handle(config, runtime)
    }

    /// Create a pool spawning onto the given runtime.
    pub fn with_handle(config: WorkerPoolConfig, runtime: Handle) -> Result<Arc<Self>> {
        if config.max_workers == 0 {
            return Err(FaultToleranceError::configuration(
                "worker_pool",
                "max_workers must be greater than zero",
            ));
        }
        info!(
            max_workers = config.max_workers,
            queue_capacity = config.queue_capacity,
            "Worker pool initialized"
        );
        Ok(Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_workers)),
            config,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            total_submitted: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            runtime,
        }))
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Submit a task, failing fast when no worker and no queue slot is free.
    pub fn submit<F, T>(self: &Arc<Self>, operation: &OperationId, task: F) -> Result<WorkerHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
            self.total_submitted.fetch_add(1, Ordering::Relaxed);
            let active = ActiveGuard::new(Arc::clone(self));
            let join = self.runtime.spawn(async move {
                let _active = active;
                let _permit = permit;
                task.await
            });
            return Ok(WorkerHandle::new(operation.clone(), join));
        }

        let capacity = self.config.queue_capacity;
        let reserved = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |queued| {
                (queued < capacity).then_some(queued + 1)
            })
            .is_ok();

        if !reserved {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(operation = %operation, "Worker pool saturated, rejecting task");
            return Err(FaultToleranceError::WorkerPoolSaturated(operation.clone()));
        }

        self.total_submitted.fetch_add(1, Ordering::Relaxed);
        debug!(operation = %operation, "All workers busy, task queued");
        let slot = QueueSlot(Arc::clone(self));
        let pool = Arc::clone(self);
        let join = self.runtime.spawn(async move {
            let permit = Arc::clone(&pool.permits).acquire_owned().await;
            drop(slot);
            let _permit = permit;
            let _active = ActiveGuard::new(pool);
            task.await
        });
        Ok(WorkerHandle::new(operation.clone(), join))
    }

    /// Spawn a coordinating task outside the worker bound.
    ///
    /// Used for plan-level drivers that only await bounded work.
    pub fn spawn<F, T>(&self, operation: &OperationId, task: F) -> WorkerHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        WorkerHandle::new(operation.clone(), self.runtime.spawn(task))
    }

    /// Get pool statistics.
    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            max_workers: self.config.max_workers,
            queue_capacity: self.config.queue_capacity,
            active: self.active.load(Ordering::SeqCst),
            queued: self.queued.load(Ordering::SeqCst),
            available_workers: self.permits.available_permits(),
            total_submitted: self.total_submitted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish()
    }
}

struct ActiveGuard(Arc<WorkerPool>);

impl ActiveGuard {
    fn new(pool: Arc<WorkerPool>) -> Self {
        pool.active.fetch_add(1, Ordering::SeqCst);
        Self(pool)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct QueueSlot(Arc<WorkerPool>);

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.0.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a task running on the pool.
///
/// Resolves to the task's output, or to [`FaultToleranceError::Panicked`] /
/// [`FaultToleranceError::Cancelled`] when the task did not finish normally.
/// Dropping the handle detaches the task; [`abort`](Self::abort) stops it
/// and releases its worker slot.
pub struct WorkerHandle<T> {
    operation: OperationId,
    join: JoinHandle<T>,
}

impl<T> WorkerHandle<T> {
    fn new(operation: OperationId, join: JoinHandle<T>) -> Self {
        Self { operation, join }
    }

    /// Cancel the task.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl<T> Future for WorkerHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(value)) => Poll::Ready(Ok(value)),
            Poll::Ready(Err(e)) if e.is_panic() => {
                warn!(operation = %self.operation, "Worker task panicked");
                Poll::Ready(Err(FaultToleranceError::Panicked(self.operation.clone())))
            }
            Poll::Ready(Err(_)) => {
                Poll::Ready(Err(FaultToleranceError::Cancelled(self.operation.clone())))
            }
        }
    }
}

/// Worker pool statistics.
#[derive(Debug, Clone)]
pub struct WorkerPoolStats {
    /// Configured worker limit.
    pub max_workers: usize,
    /// Configured queue limit.
    pub queue_capacity: usize,
    /// Tasks currently executing.
    pub active: usize,
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Idle worker slots.
    pub available_workers: usize,
    /// Tasks accepted.
    pub total_submitted: u64,
    /// Tasks rejected.
    pub total_rejected: u64,
}
