//! Declared policy metadata.
//!
//! A [`DescriptorProvider`] tells the factory which policies an operation
//! declares. Descriptors are plain serde data, so they can come from code,
//! a policy file, or any other source; numeric fields are signed so that
//! malformed values survive deserialization and are reported as
//! [`FaultToleranceError::Configuration`] at plan resolution.

use crate::error::{FailureKind, FaultToleranceError, Result};
use crate::identity::OperationId;
use crate::resilience::{BulkheadConfig, BulkheadMode, CircuitBreakerConfig, RetryConfig, Timeout};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Declared retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryDescriptor {
    pub max_retries: i64,
    pub delay_ms: i64,
    pub jitter_ms: i64,
    pub max_duration_ms: Option<i64>,
    pub retry_on: Vec<FailureKind>,
    pub abort_on: Vec<FailureKind>,
}

impl Default for RetryDescriptor {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 0,
            jitter_ms: 200,
            max_duration_ms: Some(180_000),
            retry_on: vec![FailureKind::ANY],
            abort_on: Vec::new(),
        }
    }
}

impl RetryDescriptor {
    pub fn new(max_retries: i64) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn jitter_ms(mut self, jitter_ms: i64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn max_duration_ms(mut self, max_duration_ms: Option<i64>) -> Self {
        self.max_duration_ms = max_duration_ms;
        self
    }

    pub fn retry_on<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FailureKind>,
    {
        self.retry_on = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn abort_on<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FailureKind>,
    {
        self.abort_on = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Validate and convert into a retry configuration.
    pub fn to_config(&self, operation: &OperationId) -> Result<RetryConfig> {
        let max_retries = u32::try_from(self.max_retries).map_err(|_| {
            invalid(operation, format!("retry max_retries must be >= 0, got {}", self.max_retries))
        })?;
        let delay = millis(operation, "retry delay_ms", self.delay_ms)?;
        let jitter = millis(operation, "retry jitter_ms", self.jitter_ms)?;
        let max_duration = match self.max_duration_ms {
            Some(ms) => {
                let max_duration = millis(operation, "retry max_duration_ms", ms)?;
                if max_duration <= delay {
                    return Err(invalid(
                        operation,
                        "retry max_duration_ms must be greater than delay_ms",
                    ));
                }
                Some(max_duration)
            }
            None => None,
        };
        Ok(RetryConfig {
            name: operation.to_string(),
            max_retries,
            delay,
            jitter,
            max_duration,
            retry_on: self.retry_on.clone(),
            abort_on: self.abort_on.clone(),
        })
    }
}

/// Declared circuit breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerDescriptor {
    pub failure_threshold: f64,
    pub request_volume_threshold: i64,
    pub delay_ms: i64,
    pub success_threshold: i64,
}

impl Default for CircuitBreakerDescriptor {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            request_volume_threshold: 20,
            delay_ms: 5_000,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerDescriptor {
    pub fn new(failure_threshold: f64, request_volume_threshold: i64) -> Self {
        Self {
            failure_threshold,
            request_volume_threshold,
            ..Default::default()
        }
    }

    pub fn delay_ms(mut self, delay_ms: i64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn success_threshold(mut self, success_threshold: i64) -> Self {
        self.success_threshold = success_threshold;
        self
    }

    /// Validate and convert into a circuit breaker configuration.
    pub fn to_config(&self, operation: &OperationId) -> Result<CircuitBreakerConfig> {
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(invalid(
                operation,
                format!(
                    "circuit breaker failure_threshold must be within [0, 1], got {}",
                    self.failure_threshold
                ),
            ));
        }
        let request_volume_threshold = positive(
            operation,
            "circuit breaker request_volume_threshold",
            self.request_volume_threshold,
        )?;
        let success_threshold = positive(
            operation,
            "circuit breaker success_threshold",
            self.success_threshold,
        )?;
        let delay = millis(operation, "circuit breaker delay_ms", self.delay_ms)?;
        Ok(CircuitBreakerConfig {
            name: operation.to_string(),
            failure_threshold: self.failure_threshold,
            request_volume_threshold,
            delay,
            success_threshold,
        })
    }
}

/// Declared bulkhead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadDescriptor {
    pub max_concurrent: i64,
    pub waiting_queue: i64,
}

impl Default for BulkheadDescriptor {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            waiting_queue: 10,
        }
    }
}

impl BulkheadDescriptor {
    pub fn new(max_concurrent: i64, waiting_queue: i64) -> Self {
        Self {
            max_concurrent,
            waiting_queue,
        }
    }

    /// Validate and convert into a bulkhead configuration.
    pub fn to_config(&self, operation: &OperationId, mode: BulkheadMode) -> Result<BulkheadConfig> {
        let max_concurrent = positive(operation, "bulkhead max_concurrent", self.max_concurrent)?;
        let waiting_queue = u32::try_from(self.waiting_queue).map_err(|_| {
            invalid(
                operation,
                format!("bulkhead waiting_queue must be >= 0, got {}", self.waiting_queue),
            )
        })?;
        Ok(BulkheadConfig {
            name: operation.to_string(),
            max_concurrent,
            waiting_queue,
            mode,
        })
    }
}

/// Declared timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutDescriptor {
    pub value: i64,
    pub unit: String,
}

impl Default for TimeoutDescriptor {
    fn default() -> Self {
        Self {
            value: 1_000,
            unit: "millis".to_string(),
        }
    }
}

impl TimeoutDescriptor {
    pub fn new(value: i64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    pub fn millis(value: i64) -> Self {
        Self::new(value, "millis")
    }

    /// Validate and convert into a timeout.
    pub fn to_timeout(&self, operation: &OperationId) -> Result<Timeout> {
        let unit: TimeUnit = self
            .unit
            .parse()
            .map_err(|e: UnknownTimeUnit| invalid(operation, e.to_string()))?;
        if self.value <= 0 {
            return Err(invalid(
                operation,
                format!("timeout value must be positive, got {}", self.value),
            ));
        }
        let duration = unit
            .duration(self.value as u64)
            .ok_or_else(|| invalid(operation, "timeout value overflows"))?;
        Ok(Timeout::new(duration))
    }
}

/// Declared fallback.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackDescriptor {
    /// Name the handler was registered under.
    pub handler: String,
    /// Optional method name selecting a method-specific handler.
    pub method: Option<String>,
}

impl FallbackDescriptor {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            method: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

/// Everything an operation declares.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDescriptors {
    pub retry: Option<RetryDescriptor>,
    pub circuit_breaker: Option<CircuitBreakerDescriptor>,
    pub bulkhead: Option<BulkheadDescriptor>,
    pub timeout: Option<TimeoutDescriptor>,
    pub fallback: Option<FallbackDescriptor>,
    pub asynchronous: bool,
}

impl PolicyDescriptors {
    /// No policies.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryDescriptor) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerDescriptor) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn with_bulkhead(mut self, bulkhead: BulkheadDescriptor) -> Self {
        self.bulkhead = Some(bulkhead);
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutDescriptor) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackDescriptor) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }
}

/// Source of declared policies for operations.
pub trait DescriptorProvider: Send + Sync {
    /// Policies declared for `operation`. Undeclared operations yield
    /// [`PolicyDescriptors::none`].
    fn describe(&self, operation: &OperationId) -> PolicyDescriptors;
}

impl<F> DescriptorProvider for F
where
    F: Fn(&OperationId) -> PolicyDescriptors + Send + Sync,
{
    fn describe(&self, operation: &OperationId) -> PolicyDescriptors {
        self(operation)
    }
}

/// Descriptors held in memory, keyed by operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticDescriptors {
    operations: HashMap<String, PolicyDescriptors>,
}

impl StaticDescriptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare policies for an operation, replacing earlier ones.
    pub fn insert(&mut self, operation: impl Into<String>, descriptors: PolicyDescriptors) {
        self.operations.insert(operation.into(), descriptors);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, operation: impl Into<String>, descriptors: PolicyDescriptors) -> Self {
        self.insert(operation, descriptors);
        self
    }

    pub fn get(&self, operation: &str) -> Option<&PolicyDescriptors> {
        self.operations.get(operation)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Merge another set, the other side winning on conflicts.
    pub fn extend(&mut self, other: StaticDescriptors) {
        self.operations.extend(other.operations);
    }
}

impl From<HashMap<String, PolicyDescriptors>> for StaticDescriptors {
    fn from(operations: HashMap<String, PolicyDescriptors>) -> Self {
        Self { operations }
    }
}

impl DescriptorProvider for StaticDescriptors {
    fn describe(&self, operation: &OperationId) -> PolicyDescriptors {
        self.operations
            .get(operation.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

/// Unit of a declared timeout value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanos,
    Micros,
    Millis,
    Seconds,
    Minutes,
    Hours,
    HalfDays,
    Days,
}

impl TimeUnit {
    /// Convert `value` of this unit into a duration.
    pub fn duration(self, value: u64) -> Option<Duration> {
        let secs = |factor: u64| value.checked_mul(factor).map(Duration::from_secs);
        match self {
            Self::Nanos => Some(Duration::from_nanos(value)),
            Self::Micros => Some(Duration::from_micros(value)),
            Self::Millis => Some(Duration::from_millis(value)),
            Self::Seconds => secs(1),
            Self::Minutes => secs(60),
            Self::Hours => secs(3_600),
            Self::HalfDays => secs(43_200),
            Self::Days => secs(86_400),
        }
    }
}

/// Error for an unrecognized time unit name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTimeUnit(String);

impl fmt::Display for UnknownTimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown time unit '{}'", self.0)
    }
}

impl std::error::Error for UnknownTimeUnit {}

impl FromStr for TimeUnit {
    type Err = UnknownTimeUnit;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nanos" | "nanoseconds" | "ns" => Ok(Self::Nanos),
            "micros" | "microseconds" | "us" => Ok(Self::Micros),
            "millis" | "milliseconds" | "ms" => Ok(Self::Millis),
            "seconds" | "secs" | "s" => Ok(Self::Seconds),
            "minutes" | "mins" | "m" => Ok(Self::Minutes),
            "hours" | "h" => Ok(Self::Hours),
            "half_days" | "halfdays" => Ok(Self::HalfDays),
            "days" | "d" => Ok(Self::Days),
            _ => Err(UnknownTimeUnit(s.to_string())),
        }
    }
}

fn invalid(operation: &OperationId, message: impl Into<String>) -> FaultToleranceError {
    FaultToleranceError::configuration(operation, message)
}

fn millis(operation: &OperationId, field: &str, value: i64) -> Result<Duration> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| invalid(operation, format!("{field} must be >= 0, got {value}")))
}

fn positive(operation: &OperationId, field: &str, value: i64) -> Result<u32> {
    match u32::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(invalid(operation, format!("{field} must be > 0, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> OperationId {
        OperationId::new("svc::op()")
    }

    #[test]
    fn test_time_unit_parsing() {
        assert_eq!("MILLIS".parse::<TimeUnit>().unwrap(), TimeUnit::Millis);
        assert_eq!("s".parse::<TimeUnit>().unwrap(), TimeUnit::Seconds);
        assert_eq!(" half_days ".parse::<TimeUnit>().unwrap(), TimeUnit::HalfDays);
        assert!("fortnights".parse::<TimeUnit>().is_err());
    }

    #[test]
    fn test_timeout_conversion() {
        let timeout = TimeoutDescriptor::new(2, "seconds").to_timeout(&op()).unwrap();
        assert_eq!(timeout.duration(), Duration::from_secs(2));

        assert!(TimeoutDescriptor::new(5, "lightyears").to_timeout(&op()).is_err());
        assert!(TimeoutDescriptor::millis(0).to_timeout(&op()).is_err());
        assert!(TimeoutDescriptor::millis(-10).to_timeout(&op()).is_err());
        assert!(TimeoutDescriptor::new(i64::MAX, "days").to_timeout(&op()).is_err());
    }

    #[test]
    fn test_bulkhead_limits() {
        let config = BulkheadDescriptor::new(2, 0)
            .to_config(&op(), BulkheadMode::Synchronous)
            .unwrap();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.name, "svc::op()");

        assert!(BulkheadDescriptor::new(0, 1).to_config(&op(), BulkheadMode::Synchronous).is_err());
        assert!(BulkheadDescriptor::new(1, -1).to_config(&op(), BulkheadMode::Synchronous).is_err());
    }

    #[test]
    fn test_circuit_breaker_ranges() {
        assert!(CircuitBreakerDescriptor::new(0.5, 4).to_config(&op()).is_ok());
        assert!(CircuitBreakerDescriptor::new(1.5, 4).to_config(&op()).is_err());
        assert!(CircuitBreakerDescriptor::new(0.5, 0).to_config(&op()).is_err());
        assert!(
            CircuitBreakerDescriptor::new(0.5, 4)
                .success_threshold(0)
                .to_config(&op())
                .is_err()
        );
    }

    #[test]
    fn test_retry_ranges() {
        let config = RetryDescriptor::new(3).delay_ms(10).to_config(&op()).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.delay, Duration::from_millis(10));

        assert!(RetryDescriptor::new(-1).to_config(&op()).is_err());
        assert!(RetryDescriptor::new(1).jitter_ms(-5).to_config(&op()).is_err());
        assert!(
            RetryDescriptor::new(1)
                .delay_ms(500)
                .max_duration_ms(Some(100))
                .to_config(&op())
                .is_err()
        );
    }

    #[test]
    fn test_static_descriptors_default_to_none() {
        let descriptors = StaticDescriptors::new().with(
            "svc::op()",
            PolicyDescriptors::none().with_retry(RetryDescriptor::new(2)),
        );
        assert!(descriptors.describe(&op()).retry.is_some());
        assert_eq!(
            descriptors.describe(&OperationId::new("svc::other()")),
            PolicyDescriptors::none()
        );
    }

    #[test]
    fn test_descriptors_deserialize_with_defaults() {
        let descriptors: PolicyDescriptors = serde_json::from_str(
            r#"{ "retry": { "max_retries": 5, "retry_on": ["io"] }, "timeout": { "value": 3 } }"#,
        )
        .unwrap();
        let retry = descriptors.retry.unwrap();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.jitter_ms, 200);
        assert_eq!(retry.retry_on, vec![FailureKind::new("io")]);
        assert_eq!(descriptors.timeout.unwrap().unit, "millis");
        assert!(!descriptors.asynchronous);
    }
}
