//! Plan resolution and caching.

use super::failsafe::Failsafe;
use super::shape::{InnerShape, PlanShape, PolicyPresence};
use super::{Execution, ExecutionPlan};
use crate::config::EngineConfig;
use crate::descriptor::{DescriptorProvider, PolicyDescriptors, StaticDescriptors};
use crate::error::Result;
use crate::identity::OperationId;
use crate::invocation::{Arguments, Call, Invocation};
use crate::resilience::{
    Bulkhead, BulkheadMode, BulkheadRegistry, CircuitBreaker, CircuitBreakerRegistry,
    FallbackDispatcher, FallbackHandlers, RetryPolicy, RetryRegistry, Timeout,
};
use crate::worker::{WorkerPool, WorkerPoolStats};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

type PlanCell = Arc<OnceCell<Arc<ExecutionPlan>>>;

/// Resolves, composes and caches one execution plan per operation.
///
/// Resolution for an operation runs at most once even under concurrent
/// first use; every caller gets the same `Arc<ExecutionPlan>`. A failed
/// resolution is not cached.
///
/// ```rust,ignore
/// let factory = ExecutionPlanFactory::builder()
///     .config(EngineConfig::default())
///     .descriptors(descriptors)
///     .fallbacks(handlers)
///     .build()?;
///
/// let value = factory
///     .execute(&OperationId::new("quotes::latest(String)"), args, call)
///     .await?;
/// ```
pub struct ExecutionPlanFactory {
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    retries: Arc<RetryRegistry>,
    bulkheads: Arc<BulkheadRegistry>,
    fallbacks: Arc<FallbackHandlers>,
    descriptors: Arc<dyn DescriptorProvider>,
    workers: Arc<WorkerPool>,
    non_fallback_enabled: bool,
    plans: DashMap<OperationId, PlanCell>,
}

impl ExecutionPlanFactory {
    /// Start building a factory.
    pub fn builder() -> ExecutionPlanFactoryBuilder {
        ExecutionPlanFactoryBuilder::default()
    }

    /// Resolve the plan for `operation` using the factory's descriptor provider.
    pub fn resolve_plan(&self, operation: &OperationId) -> Result<Arc<ExecutionPlan>> {
        self.resolve_plan_with(operation, self.descriptors.as_ref())
    }

    /// Resolve the plan for `operation`, reading declared policies from
    /// `descriptors` on first resolution.
    pub fn resolve_plan_with(
        &self,
        operation: &OperationId,
        descriptors: &dyn DescriptorProvider,
    ) -> Result<Arc<ExecutionPlan>> {
        let cell = self.cell(operation);
        cell.get_or_try_init(|| self.build_plan(operation, descriptors))
            .map(Arc::clone)
    }

    /// Plan built only from pre-registered circuit breaker and retry
    /// policies, without reading descriptors or fallbacks.
    ///
    /// Shares the plan cache with [`resolve_plan`](Self::resolve_plan).
    pub fn locate_registered_plan(&self, operation: &OperationId) -> Arc<ExecutionPlan> {
        let cell = self.cell(operation);
        Arc::clone(cell.get_or_init(|| {
            let circuit_breaker = self.circuit_breakers.get(operation.as_str());
            let retry = self.retries.get(operation.as_str());
            let plan = if circuit_breaker.is_none() && retry.is_none() {
                ExecutionPlan::PassThrough
            } else {
                ExecutionPlan::SyncFailsafe(Failsafe::new(
                    operation.clone(),
                    circuit_breaker,
                    retry,
                    None,
                ))
            };
            debug!(operation = %operation, shape = ?plan.shape(), "Registered plan located");
            Arc::new(plan)
        }))
    }

    /// Resolve the plan for `operation` and run one call through it.
    pub fn execute(&self, operation: &OperationId, arguments: Arguments, call: Call) -> Execution {
        match self.resolve_plan(operation) {
            Ok(plan) => plan.execute(Invocation::new(operation.clone(), arguments, call)),
            Err(e) => Execution::ready(Err(e)),
        }
    }

    /// Drop the cached plan for `operation` so the next call resolves again.
    pub fn evict_plan(&self, operation: &OperationId) -> bool {
        self.plans.remove(operation).is_some()
    }

    /// Number of operations with a cached plan.
    pub fn cached_plans(&self) -> usize {
        self.plans.iter().filter(|entry| entry.value().get().is_some()).count()
    }

    /// Whether non-fallback policies are honored.
    pub fn non_fallback_enabled(&self) -> bool {
        self.non_fallback_enabled
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuit_breakers
    }

    pub fn retries(&self) -> &Arc<RetryRegistry> {
        &self.retries
    }

    pub fn bulkheads(&self) -> &Arc<BulkheadRegistry> {
        &self.bulkheads
    }

    pub fn fallbacks(&self) -> &Arc<FallbackHandlers> {
        &self.fallbacks
    }

    pub fn workers(&self) -> &Arc<WorkerPool> {
        &self.workers
    }

    /// Shared worker pool statistics.
    pub fn worker_stats(&self) -> WorkerPoolStats {
        self.workers.stats()
    }

    fn cell(&self, operation: &OperationId) -> PlanCell {
        // Clone the cell out so no map shard lock is held during resolution.
        if let Some(cell) = self.plans.get(operation) {
            return Arc::clone(cell.value());
        }
        Arc::clone(self.plans.entry(operation.clone()).or_default().value())
    }

    fn build_plan(
        &self,
        operation: &OperationId,
        descriptors: &dyn DescriptorProvider,
    ) -> Result<Arc<ExecutionPlan>> {
        let declared = descriptors.describe(operation);

        let fallback = declared
            .fallback
            .as_ref()
            .map(|descriptor| self.fallbacks.dispatcher(operation, descriptor))
            .transpose()?;

        if !self.non_fallback_enabled {
            let plan = match fallback {
                Some(fallback) => ExecutionPlan::FallbackOnly(fallback),
                None => ExecutionPlan::PassThrough,
            };
            info!(
                operation = %operation,
                shape = ?plan.shape(),
                "Execution plan resolved with non-fallback policies disabled"
            );
            return Ok(Arc::new(plan));
        }

        let policies = self.resolve_policies(operation, &declared)?;
        let presence = PolicyPresence {
            circuit_breaker: policies.circuit_breaker.is_some(),
            retry: policies.retry.is_some(),
            bulkhead: policies.bulkhead.is_some(),
            timeout: policies.timeout.is_some(),
            // A declared bulkhead takes the asynchronous flag as its mode.
            asynchronous: declared.asynchronous && declared.bulkhead.is_none(),
            fallback: fallback.is_some(),
        };
        let shape = PlanShape::select(presence, true);
        let plan = self.assemble(operation, shape, presence.asynchronous, policies, fallback);

        info!(operation = %operation, shape = ?plan.shape(), "Execution plan resolved");
        Ok(Arc::new(plan))
    }

    /// Look up or create every declared policy. All descriptors are
    /// validated before anything is registered.
    fn resolve_policies(
        &self,
        operation: &OperationId,
        declared: &PolicyDescriptors,
    ) -> Result<ResolvedPolicies> {
        let key = operation.as_str();
        let existing_breaker = self.circuit_breakers.get(key);
        let existing_retry = self.retries.get(key);
        let existing_bulkhead = self.bulkheads.get(key);

        let breaker_config = match (&existing_breaker, &declared.circuit_breaker) {
            (None, Some(descriptor)) => Some(descriptor.to_config(operation)?),
            _ => None,
        };
        let retry_config = match (&existing_retry, &declared.retry) {
            (None, Some(descriptor)) => Some(descriptor.to_config(operation)?),
            _ => None,
        };
        let mode = if declared.asynchronous {
            BulkheadMode::Asynchronous
        } else {
            BulkheadMode::Synchronous
        };
        let bulkhead_config = match (&existing_bulkhead, &declared.bulkhead) {
            (None, Some(descriptor)) => Some(descriptor.to_config(operation, mode)?),
            _ => None,
        };
        let timeout = declared
            .timeout
            .as_ref()
            .map(|descriptor| descriptor.to_timeout(operation))
            .transpose()?;

        let circuit_breaker = existing_breaker.or_else(|| {
            breaker_config.map(|config| {
                self.circuit_breakers
                    .new_builder(operation.clone())
                    .config(config)
                    .build()
            })
        });
        let retry = existing_retry.or_else(|| {
            retry_config.map(|config| self.retries.new_builder(operation.clone()).config(config).build())
        });
        let bulkhead = existing_bulkhead.or_else(|| {
            bulkhead_config
                .map(|config| self.bulkheads.new_builder(operation.clone()).config(config).build())
        });

        Ok(ResolvedPolicies {
            circuit_breaker,
            retry,
            bulkhead,
            timeout,
        })
    }

    fn assemble(
        &self,
        operation: &OperationId,
        shape: PlanShape,
        asynchronous: bool,
        policies: ResolvedPolicies,
        fallback: Option<FallbackDispatcher>,
    ) -> ExecutionPlan {
        let ResolvedPolicies {
            circuit_breaker,
            retry,
            bulkhead,
            timeout,
        } = policies;
        let workers = Arc::clone(&self.workers);

        let inner = match (shape.inner, timeout) {
            (InnerShape::PassThrough, _) => ExecutionPlan::PassThrough,
            (InnerShape::FallbackOnly, _) => match fallback {
                Some(fallback) => ExecutionPlan::FallbackOnly(fallback),
                None => ExecutionPlan::PassThrough,
            },
            (InnerShape::AsyncOnly, _) | (InnerShape::AsyncTimeout, None) => {
                ExecutionPlan::AsyncOnly {
                    workers: Arc::clone(&workers),
                }
            }
            (InnerShape::AsyncTimeout, Some(timeout)) => ExecutionPlan::AsyncTimeout {
                timeout,
                workers: Arc::clone(&workers),
            },
            (InnerShape::SyncFailsafe, _) => ExecutionPlan::SyncFailsafe(Failsafe::new(
                operation.clone(),
                circuit_breaker,
                retry,
                fallback,
            )),
            (InnerShape::AsyncFailsafe, timeout) => ExecutionPlan::AsyncFailsafe {
                failsafe: Failsafe::new(operation.clone(), circuit_breaker, retry, fallback),
                timeout,
                // the bulkhead coordinator already runs the loop off the caller
                asynchronous: asynchronous && !shape.bulkhead,
                workers: Arc::clone(&workers),
            },
        };

        match (shape.bulkhead, bulkhead) {
            (true, Some(bulkhead)) => ExecutionPlan::Bulkhead {
                bulkhead,
                child: Arc::new(inner),
                asynchronous,
                workers,
            },
            _ => inner,
        }
    }
}

struct ResolvedPolicies {
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    retry: Option<Arc<RetryPolicy>>,
    bulkhead: Option<Arc<Bulkhead>>,
    timeout: Option<Timeout>,
}

impl fmt::Debug for ExecutionPlanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlanFactory")
            .field("non_fallback_enabled", &self.non_fallback_enabled)
            .field("cached_plans", &self.plans.len())
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ExecutionPlanFactory`].
#[derive(Default)]
pub struct ExecutionPlanFactoryBuilder {
    config: EngineConfig,
    descriptors: Option<Arc<dyn DescriptorProvider>>,
    fallbacks: Option<Arc<FallbackHandlers>>,
    circuit_breakers: Option<Arc<CircuitBreakerRegistry>>,
    retries: Option<Arc<RetryRegistry>>,
    bulkheads: Option<Arc<BulkheadRegistry>>,
    workers: Option<Arc<WorkerPool>>,
}

impl ExecutionPlanFactoryBuilder {
    /// Engine configuration (feature flag and worker pool sizing).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of declared policies.
    pub fn descriptors(mut self, descriptors: impl DescriptorProvider + 'static) -> Self {
        self.descriptors = Some(Arc::new(descriptors));
        self
    }

    /// Shared source of declared policies.
    pub fn descriptors_arc(mut self, descriptors: Arc<dyn DescriptorProvider>) -> Self {
        self.descriptors = Some(descriptors);
        self
    }

    pub fn fallbacks(mut self, fallbacks: Arc<FallbackHandlers>) -> Self {
        self.fallbacks = Some(fallbacks);
        self
    }

    pub fn circuit_breakers(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.circuit_breakers = Some(registry);
        self
    }

    pub fn retries(mut self, registry: Arc<RetryRegistry>) -> Self {
        self.retries = Some(registry);
        self
    }

    pub fn bulkheads(mut self, registry: Arc<BulkheadRegistry>) -> Self {
        self.bulkheads = Some(registry);
        self
    }

    /// Use an existing pool instead of creating one from the config.
    pub fn worker_pool(mut self, workers: Arc<WorkerPool>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Validate the configuration and build the factory.
    ///
    /// Creating the worker pool needs a running tokio runtime unless one was
    /// supplied with [`worker_pool`](Self::worker_pool).
    pub fn build(self) -> Result<ExecutionPlanFactory> {
        self.config.validate()?;
        let workers = match self.workers {
            Some(workers) => workers,
            None => WorkerPool::new(self.config.worker_pool.clone())?,
        };
        info!(
            non_fallback_enabled = self.config.non_fallback_enabled,
            "Execution plan factory initialized"
        );
        Ok(ExecutionPlanFactory {
            circuit_breakers: self.circuit_breakers.unwrap_or_default(),
            retries: self.retries.unwrap_or_default(),
            bulkheads: self.bulkheads.unwrap_or_default(),
            fallbacks: self.fallbacks.unwrap_or_default(),
            descriptors: self
                .descriptors
                .unwrap_or_else(|| Arc::new(StaticDescriptors::new())),
            workers,
            non_fallback_enabled: self.config.non_fallback_enabled,
            plans: DashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{
        BulkheadDescriptor, CircuitBreakerDescriptor, FallbackDescriptor, RetryDescriptor,
        TimeoutDescriptor,
    };
    use crate::error::FaultToleranceError;
    use crate::resilience::fallback_value;
    use serde_json::json;

    fn op() -> OperationId {
        OperationId::new("svc::op()")
    }

    #[tokio::test]
    async fn test_undeclared_operation_is_pass_through() {
        let factory = ExecutionPlanFactory::builder().build().unwrap();
        let plan = factory.resolve_plan(&op()).unwrap();
        assert!(plan.is_pass_through());
        assert!(Arc::ptr_eq(&plan, &factory.resolve_plan(&op()).unwrap()));
        assert_eq!(factory.cached_plans(), 1);
    }

    #[tokio::test]
    async fn test_declared_policies_are_registered() {
        let descriptors = StaticDescriptors::new().with(
            "svc::op()",
            PolicyDescriptors::none()
                .with_retry(RetryDescriptor::new(2))
                .with_circuit_breaker(CircuitBreakerDescriptor::new(0.5, 4))
                .with_bulkhead(BulkheadDescriptor::new(3, 1)),
        );
        let factory = ExecutionPlanFactory::builder()
            .descriptors(descriptors)
            .build()
            .unwrap();

        let plan = factory.resolve_plan(&op()).unwrap();
        assert_eq!(
            plan.shape(),
            PlanShape {
                bulkhead: true,
                inner: InnerShape::SyncFailsafe
            }
        );
        assert_eq!(factory.circuit_breakers().len(), 1);
        assert_eq!(factory.retries().len(), 1);
        assert_eq!(
            factory.bulkheads().get("svc::op()").unwrap().config().max_concurrent,
            3
        );
    }

    #[tokio::test]
    async fn test_pre_registered_policy_wins() {
        let factory = ExecutionPlanFactory::builder()
            .descriptors(StaticDescriptors::new().with(
                "svc::op()",
                PolicyDescriptors::none().with_retry(RetryDescriptor::new(9)),
            ))
            .build()
            .unwrap();
        factory.retries().new_builder(op()).max_retries(1).build();

        factory.resolve_plan(&op()).unwrap();
        assert_eq!(factory.retries().get("svc::op()").unwrap().config().max_retries, 1);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_registers_nothing() {
        let factory = ExecutionPlanFactory::builder()
            .descriptors(StaticDescriptors::new().with(
                "svc::op()",
                PolicyDescriptors::none()
                    .with_retry(RetryDescriptor::new(2))
                    .with_timeout(TimeoutDescriptor::new(5, "eons")),
            ))
            .build()
            .unwrap();

        let err = factory.resolve_plan(&op()).unwrap_err();
        assert!(matches!(err, FaultToleranceError::Configuration { .. }));
        assert!(factory.retries().is_empty());
        assert_eq!(factory.cached_plans(), 0);
    }

    #[tokio::test]
    async fn test_missing_fallback_handler_fails_resolution() {
        let factory = ExecutionPlanFactory::builder()
            .descriptors(StaticDescriptors::new().with(
                "svc::op()",
                PolicyDescriptors::none().with_fallback(FallbackDescriptor::new("cache")),
            ))
            .build()
            .unwrap();
        assert!(factory.resolve_plan(&op()).is_err());

        factory.fallbacks().register("cache", fallback_value(json!("cached")));
        let plan = factory.resolve_plan(&op()).unwrap();
        assert_eq!(plan.shape().inner, InnerShape::FallbackOnly);
    }

    #[tokio::test]
    async fn test_locate_registered_plan() {
        let factory = ExecutionPlanFactory::builder().build().unwrap();
        assert!(factory.locate_registered_plan(&op()).is_pass_through());

        let other = OperationId::new("svc::other()");
        factory.circuit_breakers().new_builder(other.clone()).build();
        let plan = factory.locate_registered_plan(&other);
        assert_eq!(plan.shape().inner, InnerShape::SyncFailsafe);
        assert!(Arc::ptr_eq(&plan, &factory.resolve_plan(&other).unwrap()));
    }

    #[tokio::test]
    async fn test_evict_forces_new_resolution() {
        let factory = ExecutionPlanFactory::builder().build().unwrap();
        let first = factory.resolve_plan(&op()).unwrap();
        assert!(factory.evict_plan(&op()));
        let second = factory.resolve_plan(&op()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_zero_workers_rejected_at_build() {
        let config = EngineConfig::new().worker_pool(crate::config::WorkerPoolConfig::new(0, 0));
        assert!(ExecutionPlanFactory::builder().config(config).build().is_err());
    }
}
