// Error types for the fault-tolerance engine

use crate::identity::OperationId;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Tag classifying a failure, matched against retry/abort filters.
///
/// Business failures carry whatever kind the wrapped call reports. The
/// engine's own failures use the reserved kinds below; the wildcard
/// [`FailureKind::ANY`] matches every business kind but never a reserved one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureKind(Cow<'static, str>);

impl FailureKind {
    /// Wildcard matching any business failure.
    pub const ANY: FailureKind = FailureKind(Cow::Borrowed("*"));
    /// Deadline elapsed before the call completed.
    pub const TIMEOUT: FailureKind = FailureKind(Cow::Borrowed("timeout"));
    /// Circuit breaker refused the attempt.
    pub const CIRCUIT_OPEN: FailureKind = FailureKind(Cow::Borrowed("circuit-open"));
    /// Bulkhead had no slot and no room in its queue.
    pub const BULKHEAD_REJECTED: FailureKind = FailureKind(Cow::Borrowed("bulkhead-rejected"));
    /// Shared worker pool refused the submission.
    pub const WORKER_POOL_SATURATED: FailureKind =
        FailureKind(Cow::Borrowed("worker-pool-saturated"));
    /// Worker task was cancelled before producing a result.
    pub const CANCELLED: FailureKind = FailureKind(Cow::Borrowed("cancelled"));
    /// Worker task panicked.
    pub const PANIC: FailureKind = FailureKind(Cow::Borrowed("panic"));
    /// Resolution-time configuration problem.
    pub const CONFIGURATION: FailureKind = FailureKind(Cow::Borrowed("configuration"));

    const RESERVED: [FailureKind; 7] = [
        Self::TIMEOUT,
        Self::CIRCUIT_OPEN,
        Self::BULKHEAD_REJECTED,
        Self::WORKER_POOL_SATURATED,
        Self::CANCELLED,
        Self::PANIC,
        Self::CONFIGURATION,
    ];

    /// Create a business failure kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self(Cow::Owned(kind.into()))
    }

    /// Get the kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this kind belongs to the engine rather than the wrapped call.
    pub fn is_reserved(&self) -> bool {
        Self::RESERVED.contains(self)
    }

    /// Check whether this filter entry matches a reported kind.
    pub fn matches(&self, reported: &FailureKind) -> bool {
        if self == reported {
            return true;
        }
        *self == Self::ANY && !reported.is_reserved()
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FailureKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for FailureKind {
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

/// Failure reported by a wrapped call.
#[derive(Debug, Clone, Error)]
#[error("{kind} failure: {source}")]
pub struct CallFailure {
    kind: FailureKind,
    #[source]
    source: Arc<dyn std::error::Error + Send + Sync>,
}

impl CallFailure {
    /// Wrap an error under the given kind.
    pub fn new(
        kind: impl Into<FailureKind>,
        error: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind: kind.into(),
            source: Arc::from(error.into()),
        }
    }

    /// Create a failure from a plain message.
    pub fn msg(kind: impl Into<FailureKind>, message: impl Into<String>) -> Self {
        Self::new(kind, message.into())
    }

    /// Kind used for retry/abort matching.
    pub fn kind(&self) -> &FailureKind {
        &self.kind
    }

    /// Underlying error.
    pub fn error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Errors produced while resolving or executing a plan.
#[derive(Error, Debug, Clone)]
pub enum FaultToleranceError {
    #[error("invalid configuration for {scope}: {message}")]
    Configuration { scope: String, message: String },

    #[error("circuit breaker for {0} is open")]
    CircuitOpen(OperationId),

    #[error("bulkhead for {0} rejected the call")]
    BulkheadRejected(OperationId),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: OperationId,
        timeout: Duration,
    },

    #[error("worker pool saturated, rejected {0}")]
    WorkerPoolSaturated(OperationId),

    #[error("{0} was cancelled before completing")]
    Cancelled(OperationId),

    #[error("{0} panicked on a worker")]
    Panicked(OperationId),

    #[error(transparent)]
    Failed(#[from] CallFailure),
}

impl FaultToleranceError {
    /// Build a configuration error for a scope (usually an operation id).
    pub fn configuration(scope: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::Configuration {
            scope: scope.to_string(),
            message: message.into(),
        }
    }

    /// Failure kind used by retry and abort filters.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Configuration { .. } => FailureKind::CONFIGURATION,
            Self::CircuitOpen(_) => FailureKind::CIRCUIT_OPEN,
            Self::BulkheadRejected(_) => FailureKind::BULKHEAD_REJECTED,
            Self::Timeout { .. } => FailureKind::TIMEOUT,
            Self::WorkerPoolSaturated(_) => FailureKind::WORKER_POOL_SATURATED,
            Self::Cancelled(_) => FailureKind::CANCELLED,
            Self::Panicked(_) => FailureKind::PANIC,
            Self::Failed(failure) => failure.kind().clone(),
        }
    }

    /// Whether the failure came from the wrapped call itself.
    pub fn is_business(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether the failure is a timeout or cancellation rather than a business error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, FaultToleranceError>;
