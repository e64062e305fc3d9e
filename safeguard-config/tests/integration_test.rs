//! Integration tests for safeguard-config

use safeguard_config::*;
use safeguard_core::{
    ExecutionPlanFactory, FaultToleranceError, InnerShape, OperationId, fallback_value,
};
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn temp_file(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_engine_config_from_environment() {
    let manager = ConfigManager::with_prefix("SGTEST_ENV");

    unsafe {
        env::set_var("SGTEST_ENV_NON_FALLBACK_ENABLED", "false");
        env::set_var("SGTEST_ENV_WORKER_POOL_MAX_WORKERS", "5");
    }

    manager.load_env().unwrap();
    let config = manager.engine_config().unwrap();
    assert!(!config.non_fallback_enabled);
    assert_eq!(config.worker_pool.max_workers, 5);

    unsafe {
        env::remove_var("SGTEST_ENV_NON_FALLBACK_ENABLED");
        env::remove_var("SGTEST_ENV_WORKER_POOL_MAX_WORKERS");
    }
}

#[test]
fn test_env_loader_with_prefix() {
    let loader = EnvLoader::new(Some("SGTEST_LOADER".to_string()));

    unsafe {
        env::set_var("SGTEST_LOADER_WORKER_POOL_QUEUE_CAPACITY", "32");
    }

    assert_eq!(loader.load_var("worker_pool_queue_capacity").unwrap(), "32");
    assert_eq!(
        loader.load().unwrap().get("worker_pool_queue_capacity"),
        Some(&"32".to_string())
    );

    unsafe {
        env::remove_var("SGTEST_LOADER_WORKER_POOL_QUEUE_CAPACITY");
    }
}

#[test]
fn test_dotenv_file() {
    let file = temp_file(".env", "SGTEST_DOTENV_WORKER_POOL_MAX_WORKERS=3\n");
    let manager = ConfigManager::with_prefix("SGTEST_DOTENV");

    manager.load_dotenv(Some(file.path())).unwrap();
    assert_eq!(manager.engine_settings().unwrap().worker_pool_max_workers, 3);

    unsafe {
        env::remove_var("SGTEST_DOTENV_WORKER_POOL_MAX_WORKERS");
    }
}

#[test]
fn test_settings_file_auto_format() {
    let file = temp_file(
        ".toml",
        "non_fallback_enabled = false\nworker_pool_queue_capacity = 12\n",
    );
    let manager = ConfigManager::new();
    manager.load_file_auto(file.path()).unwrap();

    let settings = manager.engine_settings().unwrap();
    assert!(!settings.non_fallback_enabled);
    assert_eq!(settings.worker_pool_queue_capacity, 12);

    let validated: EngineSettings = manager.load_validated().unwrap();
    assert_eq!(validated, settings);
}

#[test]
fn test_env_settings_file_auto_format() {
    let file = temp_file(
        ".env",
        "# worker sizing\nexport SAFEGUARD_WORKER_POOL_MAX_WORKERS=5\nNON_FALLBACK_ENABLED=\"false\"\n",
    );
    let manager = ConfigManager::new();
    manager.load_file_auto(file.path()).unwrap();

    let settings = manager.engine_settings().unwrap();
    assert_eq!(settings.worker_pool_max_workers, 5);
    assert!(!settings.non_fallback_enabled);
}

#[test]
fn test_missing_file_is_load_error() {
    let manager = ConfigManager::new();
    let result = manager.load_file("/nonexistent/safeguard.json", FileFormat::Json);
    assert!(matches!(result, Err(ConfigError::LoadError(_))));
}

#[test]
fn test_config_error_converts_to_engine_error() {
    let err: FaultToleranceError = ConfigError::ParseError("bad table".to_string()).into();
    assert!(matches!(err, FaultToleranceError::Configuration { .. }));
    assert!(err.to_string().contains("bad table"));
}

#[tokio::test]
async fn test_policy_file_drives_plan_resolution() {
    let file = temp_file(
        ".toml",
        r#"
        [operations."orders::place(u64)".retry]
        max_retries = 1
        jitter_ms = 0

        [operations."orders::place(u64)".fallback]
        handler = "queue-order"

        [operations."orders::status(u64)"]
        asynchronous = true

        [operations."orders::broken()".timeout]
        value = 5
        unit = "lightyears"
        "#,
    );
    let descriptors = load_policy_file(file.path()).unwrap();
    assert_eq!(descriptors.len(), 3);

    let fallbacks = Arc::new(safeguard_core::FallbackHandlers::new());
    fallbacks.register("queue-order", fallback_value(json!("queued")));
    let factory = ExecutionPlanFactory::builder()
        .config(ConfigManager::new().engine_config().unwrap())
        .descriptors(descriptors)
        .fallbacks(fallbacks)
        .build()
        .unwrap();

    let place = factory
        .resolve_plan(&OperationId::new("orders::place(u64)"))
        .unwrap();
    assert_eq!(place.shape().inner, InnerShape::SyncFailsafe);

    let status = factory
        .resolve_plan(&OperationId::new("orders::status(u64)"))
        .unwrap();
    assert_eq!(status.shape().inner, InnerShape::AsyncOnly);

    let broken = factory.resolve_plan(&OperationId::new("orders::broken()"));
    assert!(matches!(
        broken,
        Err(FaultToleranceError::Configuration { .. })
    ));
}

#[test]
fn test_policy_file_without_extension() {
    let file = temp_file("", "{}");
    assert!(matches!(
        load_policy_file(file.path()),
        Err(ConfigError::LoadError(_))
    ));
}
