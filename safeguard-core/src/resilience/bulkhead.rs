//! Bulkhead pattern for resource isolation.
//!
//! The bulkhead limits how many calls to one operation run at once. Callers
//! beyond `max_concurrent` wait in a bounded queue; once the queue is full,
//! further callers are rejected immediately.
//!
//! ## Example
//!
//! ```rust,ignore
//! let bulkhead = Bulkhead::new(BulkheadConfig::new("reports::render(u32)", 2).waiting_queue(4));
//!
//! match bulkhead.try_admit() {
//!     Some(admission) => {
//!         let _permit = admission.permit().await;
//!         render().await
//!     }
//!     None => Err(rejected()),
//! }
//! ```

use crate::identity::OperationId;
use crate::resilience::registry::PolicyRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

/// How the guarded call is dispatched once admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadMode {
    /// The call runs inside the caller's future.
    Synchronous,
    /// The call runs on the shared worker pool and the caller gets a handle.
    Asynchronous,
}

/// Bulkhead configuration.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Name of the bulkhead (the operation it guards).
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Callers allowed to wait for a slot.
    pub waiting_queue: u32,
    /// Dispatch mode.
    pub mode: BulkheadMode,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent: 10,
            waiting_queue: 10,
            mode: BulkheadMode::Synchronous,
        }
    }
}

impl BulkheadConfig {
    /// Create a new configuration.
    pub fn new(name: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            name: name.into(),
            max_concurrent,
            ..Default::default()
        }
    }

    /// Set the waiting queue length.
    pub fn waiting_queue(mut self, size: u32) -> Self {
        self.waiting_queue = size;
        self
    }

    /// Set the dispatch mode.
    pub fn mode(mut self, mode: BulkheadMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Bulkhead for limiting concurrent access.
pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    active_count: AtomicU32,
    waiting_count: AtomicU32,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
}

impl Bulkhead {
    /// Create a new bulkhead.
    pub fn new(config: BulkheadConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            max_concurrent = config.max_concurrent,
            waiting_queue = config.waiting_queue,
            mode = ?config.mode,
            "Bulkhead initialized"
        );

        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config,
            active_count: AtomicU32::new(0),
            waiting_count: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Get the bulkhead name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Get the dispatch mode.
    pub fn mode(&self) -> BulkheadMode {
        self.config.mode
    }

    /// Get current number of active executions.
    pub fn active_count(&self) -> u32 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Get current number of waiting callers.
    pub fn waiting_count(&self) -> u32 {
        self.waiting_count.load(Ordering::SeqCst)
    }

    /// Get available permits.
    pub fn available_permits(&self) -> u32 {
        self.semaphore.available_permits() as u32
    }

    /// Attempt admission without waiting.
    ///
    /// Returns a granted permit when a slot is free, a queue ticket when the
    /// waiting queue has room, and `None` when the call must be rejected.
    pub fn try_admit(self: &Arc<Self>) -> Option<Admission> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Some(Admission::Granted(BulkheadPermit::new(Arc::clone(self), permit)));
        }

        let queued = self
            .waiting_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| {
                (waiting < self.config.waiting_queue).then_some(waiting + 1)
            })
            .is_ok();

        if queued {
            debug!(name = %self.config.name, "Bulkhead full, caller queued");
            Some(Admission::Queued(BulkheadTicket {
                bulkhead: Arc::clone(self),
            }))
        } else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.config.name, "Bulkhead queue full, rejecting request");
            None
        }
    }

    /// Get bulkhead statistics.
    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            name: self.config.name.clone(),
            max_concurrent: self.config.max_concurrent,
            active_count: self.active_count(),
            waiting_count: self.waiting_count(),
            available_permits: self.available_permits(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Result of a successful admission attempt.
pub enum Admission {
    /// A slot was free.
    Granted(BulkheadPermit),
    /// The caller holds a place in the waiting queue.
    Queued(BulkheadTicket),
}

impl Admission {
    /// Wait for the execution slot.
    ///
    /// Returns `None` only if the bulkhead's semaphore was closed.
    pub async fn permit(self) -> Option<BulkheadPermit> {
        match self {
            Self::Granted(permit) => Some(permit),
            Self::Queued(ticket) => ticket.wait().await,
        }
    }
}

/// A place in the waiting queue, released on drop.
pub struct BulkheadTicket {
    bulkhead: Arc<Bulkhead>,
}

impl BulkheadTicket {
    async fn wait(self) -> Option<BulkheadPermit> {
        let permit = Arc::clone(&self.bulkhead.semaphore)
            .acquire_owned()
            .await
            .ok()?;
        Some(BulkheadPermit::new(Arc::clone(&self.bulkhead), permit))
    }
}

impl Drop for BulkheadTicket {
    fn drop(&mut self) {
        self.bulkhead.waiting_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An execution slot, released exactly once on drop.
pub struct BulkheadPermit {
    bulkhead: Arc<Bulkhead>,
    _permit: OwnedSemaphorePermit,
}

impl BulkheadPermit {
    fn new(bulkhead: Arc<Bulkhead>, permit: OwnedSemaphorePermit) -> Self {
        bulkhead.active_count.fetch_add(1, Ordering::SeqCst);
        Self {
            bulkhead,
            _permit: permit,
        }
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.bulkhead.active_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bulkhead statistics.
#[derive(Debug, Clone)]
pub struct BulkheadStats {
    /// Bulkhead name.
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Current active executions.
    pub active_count: u32,
    /// Current waiting callers.
    pub waiting_count: u32,
    /// Available permits.
    pub available_permits: u32,
    /// Total admission attempts.
    pub total_calls: u64,
    /// Total rejections.
    pub total_rejections: u64,
}

impl BulkheadStats {
    /// Calculate utilization (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 0.0;
        }
        self.active_count as f64 / self.max_concurrent as f64
    }
}

/// Registry of bulkheads, one per operation.
pub type BulkheadRegistry = PolicyRegistry<Bulkhead>;

impl PolicyRegistry<Bulkhead> {
    /// Start building a bulkhead that registers under `name`.
    pub fn new_builder(&self, name: OperationId) -> BulkheadBuilder<'_> {
        BulkheadBuilder {
            config: BulkheadConfig::new(name.as_str(), 10),
            registry: self,
            name,
        }
    }
}

/// Builder registering a bulkhead on [`build`](Self::build).
pub struct BulkheadBuilder<'a> {
    registry: &'a BulkheadRegistry,
    name: OperationId,
    config: BulkheadConfig,
}

impl BulkheadBuilder<'_> {
    /// Replace the whole configuration, keeping the registered name.
    pub fn config(mut self, config: BulkheadConfig) -> Self {
        self.config = BulkheadConfig {
            name: self.name.to_string(),
            ..config
        };
        self
    }

    /// Set the maximum concurrent executions.
    pub fn max_concurrent(mut self, max_concurrent: u32) -> Self {
        self.config.max_concurrent = max_concurrent;
        self
    }

    /// Set the waiting queue length.
    pub fn waiting_queue(mut self, size: u32) -> Self {
        self.config.waiting_queue = size;
        self
    }

    /// Set the dispatch mode.
    pub fn mode(mut self, mode: BulkheadMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Register the bulkhead, or return the one already registered.
    pub fn build(self) -> Arc<Bulkhead> {
        let config = self.config;
        self.registry.register(self.name, move || Bulkhead::new(config))
    }
}
