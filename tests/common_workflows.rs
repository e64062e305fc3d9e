//! Integration tests for common Safeguard workflows.
//!
//! These tests go through the `safeguard` facade the way an application would.

use safeguard::prelude::*;
use safeguard::{CircuitState, InnerShape};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

// =============================================================================
// Declared policies in code
// =============================================================================

#[tokio::test]
async fn test_guarded_lookup_with_cached_fallback() {
    let lookup = OperationId::from_signature("accounts::lookup", &["u64"]);
    let fallbacks = Arc::new(FallbackHandlers::new());
    fallbacks.register(
        "account-cache",
        fallback_fn(|ctx: FallbackContext| async move {
            let id: u64 = ctx.arguments.get(0)?;
            Ok(json!({ "id": id, "stale": true }))
        }),
    );

    let factory = ExecutionPlanFactory::builder()
        .descriptors(
            StaticDescriptors::new().with(
                lookup.as_str(),
                PolicyDescriptors::none()
                    .with_retry(RetryDescriptor::new(2).jitter_ms(0))
                    .with_circuit_breaker(CircuitBreakerDescriptor::new(0.5, 10))
                    .with_fallback(FallbackDescriptor::new("account-cache")),
            ),
        )
        .fallbacks(fallbacks)
        .build()
        .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let call = call_fn(move |args: Arguments| {
        let counter = Arc::clone(&counter);
        async move {
            let id: u64 = args.get(0)?;
            if counter.fetch_add(1, Ordering::SeqCst) < 5 {
                Err(CallFailure::msg("db-unavailable", "primary down"))
            } else {
                Ok(json!({ "id": id, "stale": false }))
            }
        }
    });

    let first = factory
        .execute(&lookup, Arguments::new(vec![json!(42)]), Arc::clone(&call))
        .await
        .unwrap();
    assert_eq!(first, json!({ "id": 42, "stale": true }));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    // two more failures, then the primary recovers
    let second = factory
        .execute(&lookup, Arguments::new(vec![json!(7)]), Arc::clone(&call))
        .await
        .unwrap();
    assert_eq!(second, json!({ "id": 7, "stale": false }));

    let breaker = factory.circuit_breakers().get(lookup.as_str()).unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.stats().total_failures, 5);
    assert_eq!(factory.cached_plans(), 1);
}

#[tokio::test]
async fn test_undeclared_operation_passes_through() {
    let factory = ExecutionPlanFactory::builder().build().unwrap();
    let op = OperationId::new("plain::call()");

    let value = factory
        .execute(&op, Arguments::empty(), call_fn(|_| async { Ok(json!(1)) }))
        .await
        .unwrap();
    assert_eq!(value, json!(1));
    assert!(factory.resolve_plan(&op).unwrap().is_pass_through());

    let err = factory
        .execute(
            &op,
            Arguments::empty(),
            call_fn(|_| async { Err(CallFailure::msg("boom", "unguarded")) }),
        )
        .await
        .unwrap_err();
    assert!(err.is_business());
    assert_eq!(err.kind(), FailureKind::new("boom"));
}

// =============================================================================
// Configuration-driven setup
// =============================================================================

#[tokio::test]
async fn test_disabled_engine_from_config_keeps_fallback() {
    let mut policies = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        policies,
        r#"
        [operations."reports::render()".retry]
        max_retries = 5

        [operations."reports::render()".fallback]
        handler = "placeholder"
        "#
    )
    .unwrap();

    let manager = ConfigManager::new();
    manager.set("non_fallback_enabled", false).unwrap();

    let fallbacks = Arc::new(FallbackHandlers::new());
    fallbacks.register("placeholder", fallback_value(json!("report pending")));

    let factory = ExecutionPlanFactory::builder()
        .config(manager.engine_config().unwrap())
        .descriptors(load_policy_file(policies.path()).unwrap())
        .fallbacks(fallbacks)
        .build()
        .unwrap();
    let render = OperationId::new("reports::render()");

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let value = factory
        .execute(
            &render,
            Arguments::empty(),
            call_fn(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(CallFailure::msg("render", "template missing")) }
            }),
        )
        .await
        .unwrap();

    assert_eq!(value, json!("report pending"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(
        factory.resolve_plan(&render).unwrap().shape().inner,
        InnerShape::FallbackOnly
    );
    assert!(factory.retries().is_empty());
}

#[tokio::test]
async fn test_missing_fallback_handler_is_configuration_error() {
    let op = OperationId::new("orphan::call()");
    let factory = ExecutionPlanFactory::builder()
        .descriptors(StaticDescriptors::new().with(
            op.as_str(),
            PolicyDescriptors::none().with_fallback(FallbackDescriptor::new("nobody")),
        ))
        .build()
        .unwrap();

    let err = factory
        .execute(&op, Arguments::empty(), call_fn(|_| async { Ok(json!(null)) }))
        .await
        .unwrap_err();
    assert!(matches!(err, FaultToleranceError::Configuration { .. }));
    assert_eq!(factory.cached_plans(), 0);
}
