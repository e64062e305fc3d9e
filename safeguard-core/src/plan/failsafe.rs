//! Retry around circuit breaker, with fallback on final failure.

use crate::error::{FaultToleranceError, Result};
use crate::identity::OperationId;
use crate::invocation::Invocation;
use crate::resilience::{CircuitBreaker, FallbackDispatcher, RetryPolicy, Timeout};
use crate::worker::WorkerPool;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Where each attempt runs.
#[derive(Clone)]
pub(crate) enum AttemptMode {
    /// On the task driving the plan.
    Inline,
    /// On the shared worker pool, raced against the timeout if any.
    Worker {
        workers: Arc<WorkerPool>,
        timeout: Option<Timeout>,
    },
}

/// Retry loop consulting a circuit breaker before every attempt.
#[derive(Clone)]
pub struct Failsafe {
    operation: OperationId,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<Arc<RetryPolicy>>,
    fallback: Option<FallbackDispatcher>,
}

impl Failsafe {
    pub(crate) fn new(
        operation: OperationId,
        circuit_breaker: Option<Arc<CircuitBreaker>>,
        retry: Option<Arc<RetryPolicy>>,
        fallback: Option<FallbackDispatcher>,
    ) -> Self {
        Self {
            operation,
            circuit_breaker,
            retry,
            fallback,
        }
    }

    /// Circuit breaker consulted before each attempt.
    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    /// Retry policy bounding the attempts.
    pub fn retry(&self) -> Option<&Arc<RetryPolicy>> {
        self.retry.as_ref()
    }

    /// Fallback run after the last failure.
    pub fn fallback(&self) -> Option<&FallbackDispatcher> {
        self.fallback.as_ref()
    }

    pub(crate) async fn run(self, invocation: Invocation, mode: AttemptMode) -> Result<Value> {
        let started = Instant::now();
        let max_attempts = self.retry.as_ref().map_or(1, |retry| retry.max_attempts());
        let mut attempt = 0;

        let failure = loop {
            let error = match self.attempt(&invocation, &mode).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            // An open-circuit rejection never reached the call.
            let rejected = matches!(error, FaultToleranceError::CircuitOpen(_));
            if !rejected {
                attempt += 1;
            }

            let Some(retry) = &self.retry else {
                break error;
            };
            if attempt >= max_attempts {
                warn!(operation = %self.operation, attempts = attempt, "Retries exhausted");
                break error;
            }
            let kind = error.kind();
            if !retry.is_retryable(&kind) {
                debug!(operation = %self.operation, kind = %kind, "Failure not retryable");
                break error;
            }
            let mut delay = retry.next_delay();
            if rejected && let Some(breaker) = &self.circuit_breaker {
                delay = delay.max(breaker.open_remaining());
            }
            if let Some(max_duration) = retry.max_duration()
                && started.elapsed() + delay >= max_duration
            {
                debug!(operation = %self.operation, ?max_duration, "Retry duration exhausted");
                break error;
            }

            debug!(
                operation = %self.operation,
                attempt,
                max_attempts,
                ?delay,
                kind = %kind,
                "Retrying after failure"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            } else if rejected {
                tokio::task::yield_now().await;
            }
        };

        match &self.fallback {
            Some(fallback) => fallback.dispatch(&invocation, failure).await,
            None => Err(failure),
        }
    }

    async fn attempt(&self, invocation: &Invocation, mode: &AttemptMode) -> Result<Value> {
        let permit = match &self.circuit_breaker {
            Some(breaker) => match breaker.acquire() {
                Some(permit) => Some(permit),
                None => return Err(FaultToleranceError::CircuitOpen(self.operation.clone())),
            },
            None => None,
        };

        let result = self.call(invocation, mode).await;

        if let Some(permit) = permit {
            match &result {
                Ok(_) => permit.success(),
                Err(_) => permit.failure(),
            }
        }
        result
    }

    async fn call(&self, invocation: &Invocation, mode: &AttemptMode) -> Result<Value> {
        match mode {
            AttemptMode::Inline => Ok(invocation.invoke().await?),
            AttemptMode::Worker {
                workers,
                timeout: None,
            } => {
                let invocation = invocation.clone();
                let handle = workers.submit(&self.operation, async move {
                    invocation.invoke().await.map_err(FaultToleranceError::from)
                })?;
                handle.await?
            }
            AttemptMode::Worker {
                workers,
                timeout: Some(timeout),
            } => {
                let timeout = *timeout;
                let deadline = timeout.deadline();
                let invocation = invocation.clone();
                let operation = self.operation.clone();
                let handle = workers.submit(&self.operation, async move {
                    timeout
                        .guard(&operation, deadline, async {
                            invocation.invoke().await.map_err(FaultToleranceError::from)
                        })
                        .await
                })?;
                timeout.race(&self.operation, deadline, handle).await
            }
        }
    }
}

impl fmt::Debug for Failsafe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failsafe")
            .field("operation", &self.operation)
            .field("circuit_breaker", &self.circuit_breaker.is_some())
            .field("retry", &self.retry.is_some())
            .field("fallback", &self.fallback)
            .finish()
    }
}
