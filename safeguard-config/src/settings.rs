// Engine settings as read from configuration sources

use crate::validation::{ConfigValidator, Validate};
use crate::Result;
use safeguard_core::{EngineConfig, WorkerPoolConfig};
use serde::{Deserialize, Serialize};

/// Upper bound accepted for `worker_pool_max_workers`.
pub const MAX_WORKERS: usize = 4096;
/// Upper bound accepted for `worker_pool_queue_capacity`.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

/// Flat engine settings, one field per configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub non_fallback_enabled: bool,
    pub worker_pool_max_workers: usize,
    pub worker_pool_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            non_fallback_enabled: engine.non_fallback_enabled,
            worker_pool_max_workers: engine.worker_pool.max_workers,
            worker_pool_queue_capacity: engine.worker_pool.queue_capacity,
        }
    }
}

impl EngineSettings {
    /// Convert into the engine's configuration.
    pub fn into_engine_config(self) -> EngineConfig {
        EngineConfig::new()
            .non_fallback_enabled(self.non_fallback_enabled)
            .worker_pool(WorkerPoolConfig::new(
                self.worker_pool_max_workers,
                self.worker_pool_queue_capacity,
            ))
    }
}

impl Validate for EngineSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::in_range(
            self.worker_pool_max_workers,
            1,
            MAX_WORKERS,
            "worker_pool_max_workers",
        )?;
        ConfigValidator::in_range(
            self.worker_pool_queue_capacity,
            0,
            MAX_QUEUE_CAPACITY,
            "worker_pool_queue_capacity",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine() {
        let settings = EngineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.clone().into_engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let settings = EngineSettings {
            worker_pool_max_workers: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_conversion_keeps_values() {
        let config = EngineSettings {
            non_fallback_enabled: false,
            worker_pool_max_workers: 3,
            worker_pool_queue_capacity: 7,
        }
        .into_engine_config();
        assert!(!config.non_fallback_enabled);
        assert_eq!(config.worker_pool, WorkerPoolConfig::new(3, 7));
    }
}
