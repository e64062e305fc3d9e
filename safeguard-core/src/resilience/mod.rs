//! # Resilience Primitives
//!
//! The per-operation policies that execution plans compose.
//!
//! ## Patterns Included
//!
//! - **Circuit Breaker**: fail fast once a rolling window shows too many failures
//! - **Retry**: bounded re-attempts with delay, jitter and failure-kind filters
//! - **Bulkhead**: cap concurrent calls with a bounded waiting queue
//! - **Timeout**: deadline race for worker-dispatched calls
//! - **Fallback**: named handlers producing a replacement result
//!
//! Circuit breakers, retry policies and bulkheads live in a
//! [`PolicyRegistry`], at most one per operation.

mod bulkhead;
mod circuit_breaker;
mod fallback;
mod registry;
mod retry;
mod timeout;

pub use bulkhead::*;
pub use circuit_breaker::*;
pub use fallback::*;
pub use registry::*;
pub use retry::*;
pub use timeout::*;
