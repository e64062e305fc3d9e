//! Composition matrix.
//!
//! Which plan an operation gets is a pure function of which policies are
//! present. Keeping it here, apart from plan assembly, makes every
//! combination enumerable in tests.

/// Policies resolved for one operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PolicyPresence {
    pub circuit_breaker: bool,
    pub retry: bool,
    pub bulkhead: bool,
    pub timeout: bool,
    /// Calls dispatch onto workers. Unset when a declared bulkhead has taken
    /// the asynchronous flag as its mode.
    pub asynchronous: bool,
    pub fallback: bool,
}

/// Plan nested inside the optional bulkhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InnerShape {
    /// Invoke and return or propagate unchanged.
    PassThrough,
    /// Invoke, replacing any failure with the fallback result.
    FallbackOnly,
    /// Dispatch onto a worker without a deadline.
    AsyncOnly,
    /// Dispatch onto a worker and race a deadline.
    AsyncTimeout,
    /// Retry around circuit breaker on the caller's task, then fallback.
    SyncFailsafe,
    /// Retry around circuit breaker with worker-dispatched attempts, then fallback.
    AsyncFailsafe,
}

/// Full plan shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanShape {
    /// Bulkhead gates admission around the inner plan.
    pub bulkhead: bool,
    pub inner: InnerShape,
}

impl PlanShape {
    /// Select the plan shape.
    ///
    /// With `non_fallback_enabled` false every policy but fallback is
    /// ignored.
    pub fn select(presence: PolicyPresence, non_fallback_enabled: bool) -> Self {
        if !non_fallback_enabled {
            let inner = if presence.fallback {
                InnerShape::FallbackOnly
            } else {
                InnerShape::PassThrough
            };
            return Self {
                bulkhead: false,
                inner,
            };
        }

        let failsafe = presence.circuit_breaker || presence.retry;

        let inner = match (failsafe, presence.asynchronous, presence.timeout, presence.fallback) {
            (false, true, false, _) => InnerShape::AsyncOnly,
            (false, _, true, _) => InnerShape::AsyncTimeout,
            (true, true, _, _) | (true, _, true, _) => InnerShape::AsyncFailsafe,
            (false, false, false, false) => InnerShape::PassThrough,
            (false, false, false, true) => InnerShape::FallbackOnly,
            (true, false, false, _) => InnerShape::SyncFailsafe,
        };

        Self {
            bulkhead: presence.bulkhead,
            inner,
        }
    }
}
