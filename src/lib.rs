// Safeguard - A fault-tolerance execution engine for Rust
//
// This library composes circuit breakers, retries, bulkheads, timeouts,
// fallbacks and asynchronous dispatch into one cached execution plan per
// operation.

// Re-export core functionality
pub use safeguard_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use safeguard_config;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Arguments,
        BulkheadDescriptor,
        Call,
        CallFailure,
        CircuitBreakerDescriptor,
        DescriptorProvider,
        EngineConfig,
        Execution,
        ExecutionPlanFactory,
        FailureKind,
        FallbackContext,
        FallbackDescriptor,
        FallbackHandler,
        FallbackHandlers,
        FaultToleranceError,
        OperationId,
        PolicyDescriptors,
        RetryDescriptor,
        StaticDescriptors,
        TimeoutDescriptor,
        WorkerPoolConfig,
        call_fn,
        fallback_fn,
        fallback_value,
    };

    #[cfg(feature = "config")]
    pub use safeguard_config::{ConfigManager, load_policy_file};
}
