//! # Execution Plans
//!
//! An [`ExecutionPlan`] is the composed strategy cached for one operation:
//! an optional bulkhead at the root around exactly one inner plan chosen by
//! the composition matrix in [`shape`].
//!
//! Plans on the caller's side ([`ExecutionPlan::PassThrough`],
//! [`ExecutionPlan::FallbackOnly`], [`ExecutionPlan::SyncFailsafe`] and a
//! synchronous bulkhead) do nothing until the returned [`Execution`] is
//! polled. Worker-dispatched plans start as soon as `execute` returns.

mod factory;
mod failsafe;
pub mod shape;

pub use factory::*;
pub use failsafe::Failsafe;
pub use shape::{InnerShape, PlanShape, PolicyPresence};

use crate::error::{FaultToleranceError, Result};
use crate::invocation::Invocation;
use crate::resilience::{Bulkhead, BulkheadMode, FallbackDispatcher, Timeout};
use crate::worker::{WorkerHandle, WorkerPool};
use failsafe::AttemptMode;
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::debug;

/// Outcome of one plan execution, resolved by awaiting.
#[must_use = "synchronous plans do nothing unless the execution is awaited"]
pub struct Execution {
    inner: BoxFuture<'static, Result<Value>>,
}

impl Execution {
    fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    /// An execution that already finished.
    pub fn ready(result: Result<Value>) -> Self {
        Self::new(futures_util::future::ready(result))
    }

    fn from_handle(handle: WorkerHandle<Result<Value>>) -> Self {
        Self::new(async move { handle.await? })
    }
}

impl Future for Execution {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution").finish_non_exhaustive()
    }
}

/// Composed execution strategy for one operation.
#[derive(Clone)]
pub enum ExecutionPlan {
    /// No policy applies; invoke and return or propagate verbatim.
    PassThrough,
    /// Invoke, running the fallback on any failure.
    FallbackOnly(FallbackDispatcher),
    /// Run on a worker, no deadline.
    AsyncOnly { workers: Arc<WorkerPool> },
    /// Run on a worker raced against a deadline.
    AsyncTimeout {
        timeout: Timeout,
        workers: Arc<WorkerPool>,
    },
    /// Retry and circuit breaker on the caller's task.
    SyncFailsafe(Failsafe),
    /// Retry and circuit breaker with every attempt on a worker.
    ///
    /// When `asynchronous` is set the retry loop itself is spawned so the
    /// caller never drives it.
    AsyncFailsafe {
        failsafe: Failsafe,
        timeout: Option<Timeout>,
        asynchronous: bool,
        workers: Arc<WorkerPool>,
    },
    /// Bulkhead admission around a child plan.
    ///
    /// Admission and the child run on a coordinator task when the bulkhead
    /// is in asynchronous mode or `asynchronous` is set.
    Bulkhead {
        bulkhead: Arc<Bulkhead>,
        child: Arc<ExecutionPlan>,
        asynchronous: bool,
        workers: Arc<WorkerPool>,
    },
}

impl ExecutionPlan {
    /// Whether this is the no-policy marker.
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }

    /// Shape of this plan in the composition matrix.
    pub fn shape(&self) -> PlanShape {
        match self {
            Self::Bulkhead { child, .. } => PlanShape {
                bulkhead: true,
                inner: child.shape().inner,
            },
            other => PlanShape {
                bulkhead: false,
                inner: other.inner_shape(),
            },
        }
    }

    fn inner_shape(&self) -> InnerShape {
        match self {
            Self::PassThrough | Self::Bulkhead { .. } => InnerShape::PassThrough,
            Self::FallbackOnly(_) => InnerShape::FallbackOnly,
            Self::AsyncOnly { .. } => InnerShape::AsyncOnly,
            Self::AsyncTimeout { .. } => InnerShape::AsyncTimeout,
            Self::SyncFailsafe(_) => InnerShape::SyncFailsafe,
            Self::AsyncFailsafe { .. } => InnerShape::AsyncFailsafe,
        }
    }

    /// Execute one invocation through this plan.
    pub fn execute(&self, invocation: Invocation) -> Execution {
        match self {
            Self::PassThrough => {
                Execution::new(async move { Ok(invocation.invoke().await?) })
            }

            Self::FallbackOnly(fallback) => {
                let fallback = fallback.clone();
                Execution::new(async move {
                    match invocation.invoke().await {
                        Ok(value) => Ok(value),
                        Err(failure) => fallback.dispatch(&invocation, failure.into()).await,
                    }
                })
            }

            Self::AsyncOnly { workers } => {
                let operation = invocation.operation().clone();
                let submitted = workers.submit(&operation, async move {
                    invocation.invoke().await.map_err(FaultToleranceError::from)
                });
                match submitted {
                    Ok(handle) => Execution::from_handle(handle),
                    Err(e) => Execution::ready(Err(e)),
                }
            }

            Self::AsyncTimeout { timeout, workers } => {
                let timeout = *timeout;
                let deadline = timeout.deadline();
                let operation = invocation.operation().clone();
                let worker_operation = operation.clone();
                let submitted = workers.submit(&operation, async move {
                    timeout
                        .guard(&worker_operation, deadline, async {
                            invocation.invoke().await.map_err(FaultToleranceError::from)
                        })
                        .await
                });
                match submitted {
                    Ok(handle) => Execution::new(async move {
                        timeout.race(&operation, deadline, handle).await
                    }),
                    Err(e) => Execution::ready(Err(e)),
                }
            }

            Self::SyncFailsafe(failsafe) => {
                Execution::new(failsafe.clone().run(invocation, AttemptMode::Inline))
            }

            Self::AsyncFailsafe {
                failsafe,
                timeout,
                asynchronous,
                workers,
            } => {
                let mode = AttemptMode::Worker {
                    workers: Arc::clone(workers),
                    timeout: *timeout,
                };
                let operation = invocation.operation().clone();
                let run = failsafe.clone().run(invocation, mode);
                if *asynchronous {
                    Execution::from_handle(workers.spawn(&operation, run))
                } else {
                    Execution::new(run)
                }
            }

            Self::Bulkhead {
                bulkhead,
                child,
                asynchronous,
                workers,
            } => {
                let operation = invocation.operation().clone();
                let Some(admission) = bulkhead.try_admit() else {
                    debug!(operation = %operation, "Bulkhead rejected call");
                    return Execution::ready(Err(FaultToleranceError::BulkheadRejected(operation)));
                };
                let child = Arc::clone(child);
                let rejected = operation.clone();
                let admitted = async move {
                    let _permit = admission
                        .permit()
                        .await
                        .ok_or(FaultToleranceError::BulkheadRejected(rejected))?;
                    child.execute(invocation).await
                };
                match (bulkhead.mode(), *asynchronous) {
                    (BulkheadMode::Synchronous, false) => Execution::new(admitted),
                    _ => Execution::from_handle(workers.spawn(&operation, admitted)),
                }
            }
        }
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PassThrough => f.write_str("PassThrough"),
            Self::FallbackOnly(fallback) => f.debug_tuple("FallbackOnly").field(fallback).finish(),
            Self::AsyncOnly { .. } => f.write_str("AsyncOnly"),
            Self::AsyncTimeout { timeout, .. } => f
                .debug_struct("AsyncTimeout")
                .field("timeout", &timeout.duration())
                .finish_non_exhaustive(),
            Self::SyncFailsafe(failsafe) => f.debug_tuple("SyncFailsafe").field(failsafe).finish(),
            Self::AsyncFailsafe {
                failsafe,
                timeout,
                asynchronous,
                ..
            } => f
                .debug_struct("AsyncFailsafe")
                .field("failsafe", failsafe)
                .field("timeout", &timeout.map(|t| t.duration()))
                .field("asynchronous", asynchronous)
                .finish_non_exhaustive(),
            Self::Bulkhead {
                bulkhead,
                child,
                asynchronous,
                ..
            } => f
                .debug_struct("Bulkhead")
                .field("bulkhead", &bulkhead.name())
                .field("mode", &bulkhead.mode())
                .field("asynchronous", asynchronous)
                .field("child", child)
                .finish_non_exhaustive(),
        }
    }
}
