//! Engine configuration.
//!
//! Passed explicitly to the plan factory; nothing in the engine reads ambient
//! configuration on its own. `safeguard-config` builds this from files and
//! environment variables.

use crate::error::{FaultToleranceError, Result};
use serde::{Deserialize, Serialize};

/// Sizing of the shared worker pool used by async and timeout plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Maximum tasks executing at once.
    pub max_workers: usize,
    /// Maximum tasks waiting for a worker before submissions are rejected.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_workers: cpus * 4,
            queue_capacity: 256,
        }
    }
}

impl WorkerPoolConfig {
    /// Create a pool configuration.
    pub fn new(max_workers: usize, queue_capacity: usize) -> Self {
        Self {
            max_workers,
            queue_capacity,
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// When false only fallback policies are honored.
    pub non_fallback_enabled: bool,
    /// Shared worker pool sizing.
    pub worker_pool: WorkerPoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            non_fallback_enabled: true,
            worker_pool: WorkerPoolConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable non-fallback policies.
    pub fn non_fallback_enabled(mut self, enabled: bool) -> Self {
        self.non_fallback_enabled = enabled;
        self
    }

    /// Set worker pool sizing.
    pub fn worker_pool(mut self, worker_pool: WorkerPoolConfig) -> Self {
        self.worker_pool = worker_pool;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool.max_workers == 0 {
            return Err(FaultToleranceError::configuration(
                "worker_pool",
                "max_workers must be greater than zero",
            ));
        }
        Ok(())
    }
}
