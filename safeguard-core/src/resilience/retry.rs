//! Retry policy with delay, jitter and failure-kind filters.
//!
//! A policy is immutable once created. The plan's retry loop asks it whether
//! a failure is retryable, how long to wait, and when to stop.
//!
//! ## Example
//!
//! ```rust,ignore
//! let retry = RetryPolicy::new(
//!     RetryConfig::new("orders::submit(u64)", 3)
//!         .delay(Duration::from_millis(100))
//!         .jitter(Duration::from_millis(20))
//!         .retry_on(["io"])
//!         .abort_on(["validation"]),
//! );
//!
//! assert_eq!(retry.max_attempts(), 4);
//! ```

use crate::error::FailureKind;
use crate::identity::OperationId;
use crate::resilience::registry::PolicyRegistry;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Name of the policy (the operation it guards).
    pub name: String,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    /// Maximum random deviation applied to each delay.
    pub jitter: Duration,
    /// Upper bound on the whole retry loop.
    pub max_duration: Option<Duration>,
    /// Failure kinds that trigger a retry.
    pub retry_on: Vec<FailureKind>,
    /// Failure kinds that stop retrying immediately. Wins over `retry_on`.
    pub abort_on: Vec<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_retries: 3,
            delay: Duration::ZERO,
            jitter: Duration::from_millis(200),
            max_duration: Some(Duration::from_secs(180)),
            retry_on: vec![FailureKind::ANY],
            abort_on: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Create new retry configuration.
    pub fn new(name: impl Into<String>, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            max_retries,
            ..Default::default()
        }
    }

    /// Set the base delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the jitter.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set or clear the total duration bound.
    pub fn max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Replace the retry-on set.
    pub fn retry_on<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FailureKind>,
    {
        self.retry_on = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the abort-on set.
    pub fn abort_on<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FailureKind>,
    {
        self.abort_on = kinds.into_iter().map(Into::into).collect();
        self
    }
}

/// Retry policy guarding one operation.
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(config: RetryConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            max_retries = config.max_retries,
            delay = ?config.delay,
            jitter = ?config.jitter,
            "Retry policy initialized"
        );
        Arc::new(Self { config })
    }

    /// Get the policy name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Total duration bound, if any.
    pub fn max_duration(&self) -> Option<Duration> {
        self.config.max_duration
    }

    /// Whether a failure of this kind may be retried.
    pub fn is_retryable(&self, kind: &FailureKind) -> bool {
        if self.config.abort_on.iter().any(|k| k.matches(kind)) {
            return false;
        }
        self.config.retry_on.iter().any(|k| k.matches(kind))
    }

    /// Delay before the next attempt, jittered by up to `jitter` either way.
    pub fn next_delay(&self) -> Duration {
        let base = self.config.delay;
        let jitter = self.config.jitter.as_millis() as i64;
        if jitter == 0 {
            return base;
        }
        let offset = rand::rng().random_range(-jitter..=jitter);
        let millis = (base.as_millis() as i64).saturating_add(offset).max(0);
        Duration::from_millis(millis as u64)
    }
}

/// Registry of retry policies, one per operation.
pub type RetryRegistry = PolicyRegistry<RetryPolicy>;

impl PolicyRegistry<RetryPolicy> {
    /// Start building a retry policy that registers under `name`.
    pub fn new_builder(&self, name: OperationId) -> RetryBuilder<'_> {
        RetryBuilder {
            config: RetryConfig::new(name.as_str(), 3),
            registry: self,
            name,
        }
    }
}

/// Builder registering a retry policy on [`build`](Self::build).
pub struct RetryBuilder<'a> {
    registry: &'a RetryRegistry,
    name: OperationId,
    config: RetryConfig,
}

impl RetryBuilder<'_> {
    /// Replace the whole configuration, keeping the registered name.
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = RetryConfig {
            name: self.name.to_string(),
            ..config
        };
        self
    }

    /// Set the retry count.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the base delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Set the jitter.
    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    /// Set or clear the total duration bound.
    pub fn max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.config.max_duration = max_duration;
        self
    }

    /// Replace the retry-on set.
    pub fn retry_on<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FailureKind>,
    {
        self.config = self.config.retry_on(kinds);
        self
    }

    /// Replace the abort-on set.
    pub fn abort_on<I, K>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<FailureKind>,
    {
        self.config = self.config.abort_on(kinds);
        self
    }

    /// Register the policy, or return the one already registered.
    pub fn build(self) -> Arc<RetryPolicy> {
        let config = self.config;
        self.registry.register(self.name, move || RetryPolicy::new(config))
    }
}
