// Configuration loading for the Safeguard fault-tolerance engine

pub mod document;
pub mod env;
pub mod error;
pub mod policy;
pub mod settings;
pub mod validation;

pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use document::{FileFormat, read_document};
pub use policy::{PolicyFile, load_policy_file};
pub use settings::EngineSettings;
pub use validation::{ConfigValidator, Validate};

use parking_lot::RwLock;
use safeguard_core::EngineConfig;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Key toggling every non-fallback policy.
pub const NON_FALLBACK_ENABLED: &str = "non_fallback_enabled";
/// Key sizing the shared worker pool.
pub const WORKER_POOL_MAX_WORKERS: &str = "worker_pool_max_workers";
/// Key bounding tasks queued for a worker.
pub const WORKER_POOL_QUEUE_CAPACITY: &str = "worker_pool_queue_capacity";

/// Main configuration manager
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<HashMap<String, Value>>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(HashMap::new())),
            env_prefix: None,
        }
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            config: Arc::new(RwLock::new(HashMap::new())),
            env_prefix: Some(prefix.into()),
        }
    }

    /// Manager populated from `SAFEGUARD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let manager = Self::with_prefix(DEFAULT_PREFIX);
        manager.load_env()?;
        Ok(manager)
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        let loader = EnvLoader::new(self.env_prefix.clone());
        let env_vars = loader.load()?;
        debug!(count = env_vars.len(), "Loaded configuration from environment");

        let mut config = self.config.write();
        for (key, value) in env_vars {
            config.insert(key, Value::String(value));
        }

        Ok(())
    }

    /// Load configuration from .env file
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        if let Some(path) = path {
            dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
        } else {
            dotenvy::dotenv().ok();
        }
        self.load_env()
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let data = read_document(path.as_ref(), Some(format))?;
        self.absorb(data)
    }

    /// Load configuration from file, picking the format from its extension
    pub fn load_file_auto(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = read_document(path.as_ref(), None)?;
        self.absorb(data)
    }

    fn absorb(&self, data: Value) -> Result<()> {
        let Value::Object(map) = data else {
            return Err(ConfigError::ParseError(
                "configuration root must be a table".to_string(),
            ));
        };
        let mut config = self.config.write();
        for (key, value) in map {
            config.insert(key.to_lowercase(), value);
        }
        Ok(())
    }

    /// Set a configuration value
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        self.config.write().insert(key.to_string(), json_value);
        Ok(())
    }

    /// Get a configuration value
    ///
    /// String values, as read from the environment, are also tried as JSON
    /// literals so `"false"` reads as a bool and `"8"` as a number.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .config
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Ok(parsed),
            Err(e) => match value {
                Value::String(raw) => serde_json::from_str(raw.trim())
                    .map_err(|_| ConfigError::DeserializationError(format!("{}: {}", key, e))),
                _ => Err(ConfigError::DeserializationError(format!("{}: {}", key, e))),
            },
        }
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get a string value
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    /// Get an integer value
    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    /// Get a boolean value
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        self.config.read().contains_key(key)
    }

    /// Get all configuration keys
    pub fn keys(&self) -> Vec<String> {
        self.config.read().keys().cloned().collect()
    }

    /// Merge configuration from another manager
    pub fn merge(&self, other: &ConfigManager) {
        let other_config = other.config.read().clone();
        self.config.write().extend(other_config);
    }

    /// Load and validate configuration
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let json_value = Value::Object(
            self.config
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );

        let validated: T = serde_json::from_value(json_value)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        validated.validate()?;

        Ok(validated)
    }

    /// Engine settings, with defaults for absent keys.
    pub fn engine_settings(&self) -> Result<EngineSettings> {
        let mut settings = EngineSettings::default();
        if self.has(NON_FALLBACK_ENABLED) {
            settings.non_fallback_enabled = self.get(NON_FALLBACK_ENABLED)?;
        }
        if self.has(WORKER_POOL_MAX_WORKERS) {
            settings.worker_pool_max_workers = self.get(WORKER_POOL_MAX_WORKERS)?;
        }
        if self.has(WORKER_POOL_QUEUE_CAPACITY) {
            settings.worker_pool_queue_capacity = self.get(WORKER_POOL_QUEUE_CAPACITY)?;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Engine configuration read once from the loaded sources.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let settings = self.engine_settings()?;
        debug!(?settings, "Engine settings resolved");
        Ok(settings.into_engine_config())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("keys", &self.config.read().len())
            .field("env_prefix", &self.env_prefix)
            .finish()
    }
}
