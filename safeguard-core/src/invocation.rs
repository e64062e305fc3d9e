//! Invocation model shared by every execution plan.
//!
//! Arguments and results travel as [`serde_json::Value`] so that one cached
//! plan can guard any call shape. A [`Call`] is re-invocable because retries
//! run it more than once, possibly on a worker.

use crate::error::CallFailure;
use crate::identity::OperationId;
use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future produced by one attempt of a wrapped call.
pub type CallFuture = BoxFuture<'static, std::result::Result<Value, CallFailure>>;

/// Type-erased, re-invocable call.
pub type Call = Arc<dyn Fn(Arguments) -> CallFuture + Send + Sync>;

/// Wrap an async closure as a [`Call`].
///
/// ```rust,ignore
/// let call = call_fn(|args| async move {
///     let id: u64 = args.get(0)?;
///     Ok(json!({ "id": id }))
/// });
/// ```
pub fn call_fn<F, Fut>(f: F) -> Call
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, CallFailure>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

/// Positional arguments of one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(Arc<Vec<Value>>);

impl Arguments {
    /// Create arguments from values.
    pub fn new(values: Vec<Value>) -> Self {
        Self(Arc::new(values))
    }

    /// No arguments.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw argument at `index`.
    pub fn raw(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Deserialize the argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> std::result::Result<T, CallFailure> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| CallFailure::msg("invalid-argument", format!("missing argument {index}")))?;
        serde_json::from_value(value.clone()).map_err(|e| CallFailure::new("invalid-argument", e))
    }

    /// All arguments.
    pub fn as_slice(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

/// One call to a guarded operation.
#[derive(Clone)]
pub struct Invocation {
    operation: OperationId,
    arguments: Arguments,
    call: Call,
}

impl Invocation {
    /// Create an invocation.
    pub fn new(operation: OperationId, arguments: Arguments, call: Call) -> Self {
        Self {
            operation,
            arguments,
            call,
        }
    }

    /// Operation being invoked.
    pub fn operation(&self) -> &OperationId {
        &self.operation
    }

    /// Original arguments.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Run one attempt of the wrapped call.
    pub fn invoke(&self) -> CallFuture {
        (self.call)(self.arguments.clone())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("operation", &self.operation)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}
