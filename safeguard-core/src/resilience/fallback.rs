//! Fallback handlers for graceful degradation.
//!
//! Handlers are registered by name (optionally per method) in
//! [`FallbackHandlers`]. A plan that declares a fallback resolves its handler
//! once, at plan construction, into a [`FallbackDispatcher`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let handlers = FallbackHandlers::new();
//! handlers.register("cached-quote", fallback_value(json!({ "price": 0 })));
//! handlers.register_method("quotes", "latest", fallback_fn(|ctx| async move {
//!     Ok(json!({ "stale": true, "args": ctx.arguments.as_slice() }))
//! }));
//! ```

use crate::descriptor::FallbackDescriptor;
use crate::error::{CallFailure, FaultToleranceError, Result};
use crate::identity::OperationId;
use crate::invocation::{Arguments, Invocation};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// What a fallback handler sees about the failed call.
#[derive(Debug, Clone)]
pub struct FallbackContext {
    /// Operation whose call failed.
    pub operation: OperationId,
    /// Method name declared alongside the handler, if any.
    pub method: Option<String>,
    /// Original arguments.
    pub arguments: Arguments,
    /// Final failure after all other policies gave up.
    pub failure: FaultToleranceError,
}

/// Alternate logic invoked when a guarded call ultimately fails.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Produce a replacement result. Errors propagate to the caller unchanged.
    async fn handle(&self, context: FallbackContext) -> std::result::Result<Value, CallFailure>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> FallbackHandler for FnHandler<F>
where
    F: Fn(FallbackContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, CallFailure>> + Send + 'static,
{
    async fn handle(&self, context: FallbackContext) -> std::result::Result<Value, CallFailure> {
        (self.0)(context).await
    }
}

/// Wrap an async closure as a fallback handler.
pub fn fallback_fn<F, Fut>(f: F) -> Arc<dyn FallbackHandler>
where
    F: Fn(FallbackContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, CallFailure>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Fallback handler that always returns the same value.
pub fn fallback_value(value: Value) -> Arc<dyn FallbackHandler> {
    fallback_fn(move |_| {
        let v = value.clone();
        async move { Ok(v) }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HandlerKey {
    name: String,
    method: Option<String>,
}

/// Named fallback handlers.
#[derive(Default)]
pub struct FallbackHandlers {
    handlers: DashMap<HandlerKey, Arc<dyn FallbackHandler>>,
}

impl FallbackHandlers {
    /// Create an empty set of handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler used for any method.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn FallbackHandler>) {
        self.handlers.insert(
            HandlerKey {
                name: name.into(),
                method: None,
            },
            handler,
        );
    }

    /// Register a handler for one method name.
    pub fn register_method(
        &self,
        name: impl Into<String>,
        method: impl Into<String>,
        handler: Arc<dyn FallbackHandler>,
    ) {
        self.handlers.insert(
            HandlerKey {
                name: name.into(),
                method: Some(method.into()),
            },
            handler,
        );
    }

    /// Look up a handler, preferring the method-specific one.
    pub fn get(&self, name: &str, method: Option<&str>) -> Option<Arc<dyn FallbackHandler>> {
        if let Some(method) = method {
            let key = HandlerKey {
                name: name.to_string(),
                method: Some(method.to_string()),
            };
            if let Some(handler) = self.handlers.get(&key) {
                return Some(Arc::clone(handler.value()));
            }
        }
        let key = HandlerKey {
            name: name.to_string(),
            method: None,
        };
        self.handlers.get(&key).map(|h| Arc::clone(h.value()))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolve a declared fallback into a dispatcher.
    pub fn dispatcher(
        &self,
        operation: &OperationId,
        descriptor: &FallbackDescriptor,
    ) -> Result<FallbackDispatcher> {
        if descriptor.handler.is_empty() {
            return Err(FaultToleranceError::configuration(
                operation,
                "fallback handler name must not be empty",
            ));
        }
        let handler = self
            .get(&descriptor.handler, descriptor.method.as_deref())
            .ok_or_else(|| {
                FaultToleranceError::configuration(
                    operation,
                    format!("fallback handler '{}' is not registered", descriptor.handler),
                )
            })?;
        Ok(FallbackDispatcher {
            handler_name: Arc::from(descriptor.handler.as_str()),
            method: descriptor.method.clone(),
            handler,
        })
    }
}

impl fmt::Debug for FallbackHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackHandlers")
            .field("len", &self.handlers.len())
            .finish()
    }
}

/// Resolved fallback for one operation.
#[derive(Clone)]
pub struct FallbackDispatcher {
    handler_name: Arc<str>,
    method: Option<String>,
    handler: Arc<dyn FallbackHandler>,
}

impl FallbackDispatcher {
    /// Name of the resolved handler.
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Run the handler for a failed invocation.
    pub async fn dispatch(
        &self,
        invocation: &Invocation,
        failure: FaultToleranceError,
    ) -> Result<Value> {
        debug!(
            operation = %invocation.operation(),
            handler = %self.handler_name,
            kind = %failure.kind(),
            "Primary operation failed, using fallback"
        );
        let context = FallbackContext {
            operation: invocation.operation().clone(),
            method: self.method.clone(),
            arguments: invocation.arguments().clone(),
            failure,
        };
        self.handler
            .handle(context)
            .await
            .map_err(FaultToleranceError::Failed)
    }
}

impl fmt::Debug for FallbackDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackDispatcher")
            .field("handler", &self.handler_name)
            .field("method", &self.method)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::invocation::call_fn;
    use serde_json::json;

    fn invocation() -> Invocation {
        Invocation::new(
            OperationId::new("svc::op(u32)"),
            Arguments::new(vec![json!(5)]),
            call_fn(|_| async { Err(CallFailure::msg("io", "down")) }),
        )
    }

    #[tokio::test]
    async fn test_dispatch_passes_context() {
        let handlers = FallbackHandlers::new();
        handlers.register(
            "echo",
            fallback_fn(|ctx: FallbackContext| async move {
                let n: u32 = ctx.arguments.get(0)?;
                Ok(json!({ "n": n, "kind": ctx.failure.kind().to_string() }))
            }),
        );
        let op = OperationId::new("svc::op(u32)");
        let dispatcher = handlers
            .dispatcher(&op, &FallbackDescriptor::new("echo"))
            .unwrap();

        let failure = FaultToleranceError::CircuitOpen(op);
        let value = dispatcher.dispatch(&invocation(), failure).await.unwrap();
        assert_eq!(value, json!({ "n": 5, "kind": "circuit-open" }));
    }

    #[tokio::test]
    async fn test_method_specific_handler_preferred() {
        let handlers = FallbackHandlers::new();
        handlers.register("quotes", fallback_value(json!("generic")));
        handlers.register_method("quotes", "latest", fallback_value(json!("latest")));

        let op = OperationId::new("svc::op(u32)");
        let failure = FaultToleranceError::Failed(CallFailure::msg("io", "down"));

        let specific = handlers
            .dispatcher(&op, &FallbackDescriptor::new("quotes").method("latest"))
            .unwrap();
        assert_eq!(
            specific.dispatch(&invocation(), failure.clone()).await.unwrap(),
            json!("latest")
        );

        let generic = handlers
            .dispatcher(&op, &FallbackDescriptor::new("quotes").method("other"))
            .unwrap();
        assert_eq!(
            generic.dispatch(&invocation(), failure).await.unwrap(),
            json!("generic")
        );
    }

    #[test]
    fn test_missing_handler_is_configuration_error() {
        let handlers = FallbackHandlers::new();
        let err = handlers
            .dispatcher(&OperationId::new("svc::op()"), &FallbackDescriptor::new("nope"))
            .unwrap_err();
        assert!(matches!(err, FaultToleranceError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_handler_failure_propagates() {
        let handlers = FallbackHandlers::new();
        handlers.register(
            "broken",
            fallback_fn(|_| async { Err(CallFailure::msg("fallback", "also down")) }),
        );
        let op = OperationId::new("svc::op(u32)");
        let dispatcher = handlers
            .dispatcher(&op, &FallbackDescriptor::new("broken"))
            .unwrap();
        let err = dispatcher
            .dispatch(&invocation(), FaultToleranceError::CircuitOpen(op))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::new("fallback"));
    }
}
