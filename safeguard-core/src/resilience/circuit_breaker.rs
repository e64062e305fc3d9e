//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker watches a rolling window of call outcomes and "opens"
//! once the failure ratio in a full window crosses its threshold.
//!
//! ## States
//!
//! - **Closed**: Normal operation, attempts pass through
//! - **Open**: Attempts are rejected immediately until the delay elapses
//! - **Half-Open**: A limited number of trial attempts probe for recovery
//!
//! ```text
//! Closed    → Open:   window full and failure ratio > threshold (or all failed)
//! Open      → Half-Open: delay elapsed
//! Half-Open → Closed: success_threshold consecutive trial successes
//! Half-Open → Open:   any trial failure
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("inventory::reserve(u64)")
//!         .failure_threshold(0.5)
//!         .request_volume_threshold(4)
//!         .delay(Duration::from_secs(5)),
//! );
//!
//! if breaker.try_acquire() {
//!     match call().await {
//!         Ok(_) => breaker.record_success(),
//!         Err(_) => breaker.record_failure(),
//!     }
//! }
//! ```

use crate::identity::OperationId;
use crate::resilience::registry::PolicyRegistry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, attempts pass through normally.
    Closed,
    /// Circuit is open, attempts are rejected.
    Open,
    /// Circuit is half-open, trial attempts probe recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the circuit breaker (the operation it guards).
    pub name: String,
    /// Failure ratio in `[0, 1]` that trips the circuit.
    pub failure_threshold: f64,
    /// Size of the rolling outcome window.
    pub request_volume_threshold: u32,
    /// Time to stay open before allowing trial attempts.
    pub delay: Duration,
    /// Consecutive trial successes needed to close again. Also the number of
    /// trial attempts admitted while half-open.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 0.5,
            request_volume_threshold: 20,
            delay: Duration::from_secs(5),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the failure ratio threshold.
    pub fn failure_threshold(mut self, ratio: f64) -> Self {
        self.failure_threshold = ratio;
        self
    }

    /// Set the rolling window size.
    pub fn request_volume_threshold(mut self, volume: u32) -> Self {
        self.request_volume_threshold = volume;
        self
    }

    /// Set the open delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the success threshold for recovery.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }
}

/// Internal circuit breaker state.
struct CircuitBreakerState {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Rolling window, `true` marks a failure.
    window: VecDeque<bool>,
    trials_admitted: u32,
    trial_successes: u32,
}

/// Circuit breaker guarding one operation.
///
/// All state lives behind one mutex so transitions are atomic per operation;
/// counters used only for reporting are plain atomics.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitBreakerState>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            request_volume_threshold = config.request_volume_threshold,
            delay = ?config.delay,
            "Circuit breaker initialized"
        );

        Arc::new(Self {
            inner: Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                opened_at: None,
                window: VecDeque::with_capacity(config.request_volume_threshold as usize),
                trials_admitted: 0,
                trial_successes: 0,
            }),
            config,
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Ask permission for one attempt.
    ///
    /// Returns `false` while open, or while half-open once every trial slot
    /// has been handed out. A `true` must be followed by exactly one
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_acquire(&self) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);

        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trials_admitted < self.config.success_threshold {
                    inner.trials_admitted += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !allowed {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.config.name, state = %inner.state, "Circuit breaker rejected attempt");
        }
        allowed
    }

    /// Acquire a permit for one attempt.
    ///
    /// The outcome is recorded through the permit; a permit dropped without
    /// an outcome (the attempt was cancelled) counts as a failure.
    pub fn acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        self.try_acquire().then(|| BreakerPermit {
            breaker: Arc::clone(self),
            recorded: false,
        })
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                self.push_outcome(&mut inner, false);
                self.maybe_trip(&mut inner);
            }
            CircuitState::HalfOpen => {
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.success_threshold {
                    self.close(&mut inner);
                }
            }
            CircuitState::Open => {
                debug!(name = %self.config.name, "Success recorded while circuit open");
            }
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                self.push_outcome(&mut inner, true);
                self.maybe_trip(&mut inner);
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Open => {}
        }
    }

    fn push_outcome(&self, inner: &mut CircuitBreakerState, failed: bool) {
        inner.window.push_back(failed);
        while inner.window.len() > self.config.request_volume_threshold as usize {
            inner.window.pop_front();
        }
    }

    fn maybe_trip(&self, inner: &mut CircuitBreakerState) {
        let volume = self.config.request_volume_threshold as usize;
        if volume == 0 || inner.window.len() < volume {
            return;
        }
        let failures = inner.window.iter().filter(|failed| **failed).count();
        let ratio = failures as f64 / volume as f64;
        if ratio > self.config.failure_threshold || failures == volume {
            self.open(inner);
        }
    }

    fn open(&self, inner: &mut CircuitBreakerState) {
        if inner.state != CircuitState::Open {
            warn!(
                name = %self.config.name,
                window_failures = inner.window.iter().filter(|failed| **failed).count(),
                "Circuit breaker OPENED"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trials_admitted = 0;
            inner.trial_successes = 0;
        }
    }

    fn close(&self, inner: &mut CircuitBreakerState) {
        if inner.state != CircuitState::Closed {
            info!(name = %self.config.name, "Circuit breaker CLOSED");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.window.clear();
        inner.trials_admitted = 0;
        inner.trial_successes = 0;
    }

    fn maybe_half_open(&self, inner: &mut CircuitBreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.delay
        {
            debug!(name = %self.config.name, "Circuit breaker transitioning to HALF-OPEN");
            inner.state = CircuitState::HalfOpen;
            inner.trials_admitted = 0;
            inner.trial_successes = 0;
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.close(&mut inner);
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.open(&mut inner);
    }

    /// Time left before an open circuit admits trial attempts.
    ///
    /// Zero unless the circuit is open.
    pub fn open_remaining(&self) -> Duration {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                self.config.delay.saturating_sub(opened_at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    /// Failures in the current rolling window.
    pub fn window_failures(&self) -> u32 {
        self.inner.lock().window.iter().filter(|failed| **failed).count() as u32
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: self.state(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            window_failures: self.window_failures(),
        }
    }
}

/// Admission for one attempt through a circuit breaker.
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    recorded: bool,
}

impl BreakerPermit {
    /// Record the attempt as successful.
    pub fn success(mut self) {
        self.recorded = true;
        self.breaker.record_success();
    }

    /// Record the attempt as failed.
    pub fn failure(mut self) {
        self.recorded = true;
        self.breaker.record_failure();
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.record_failure();
        }
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Total permission requests.
    pub total_requests: u64,
    /// Total successes.
    pub total_successes: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Failures in the rolling window.
    pub window_failures: u32,
}

impl CircuitBreakerStats {
    /// Calculate failure rate over recorded outcomes (0.0 - 1.0).
    pub fn failure_rate(&self) -> f64 {
        let recorded = self.total_successes + self.total_failures;
        if recorded == 0 {
            0.0
        } else {
            self.total_failures as f64 / recorded as f64
        }
    }
}

/// Registry of circuit breakers, one per operation.
pub type CircuitBreakerRegistry = PolicyRegistry<CircuitBreaker>;

impl PolicyRegistry<CircuitBreaker> {
    /// Start building a circuit breaker that registers under `name`.
    pub fn new_builder(&self, name: OperationId) -> CircuitBreakerBuilder<'_> {
        CircuitBreakerBuilder {
            config: CircuitBreakerConfig::new(name.as_str()),
            registry: self,
            name,
        }
    }
}

/// Builder registering a circuit breaker on [`build`](Self::build).
pub struct CircuitBreakerBuilder<'a> {
    registry: &'a CircuitBreakerRegistry,
    name: OperationId,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerBuilder<'_> {
    /// Replace the whole configuration, keeping the registered name.
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = CircuitBreakerConfig {
            name: self.name.to_string(),
            ..config
        };
        self
    }

    /// Set the failure ratio threshold.
    pub fn failure_threshold(mut self, ratio: f64) -> Self {
        self.config.failure_threshold = ratio;
        self
    }

    /// Set the rolling window size.
    pub fn request_volume_threshold(mut self, volume: u32) -> Self {
        self.config.request_volume_threshold = volume;
        self
    }

    /// Set the open delay.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Set the success threshold.
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Register the breaker. If one already exists under this name it is
    /// returned unchanged.
    pub fn build(self) -> Arc<CircuitBreaker> {
        let config = self.config;
        self.registry.register(self.name, move || CircuitBreaker::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(delay: Duration, success_threshold: u32) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            CircuitBreakerConfig::new("test")
                .failure_threshold(0.5)
                .request_volume_threshold(4)
                .delay(delay)
                .success_threshold(success_threshold),
        )
    }

    #[test]
    fn test_half_failures_keep_circuit_closed() {
        let cb = breaker(Duration::from_secs(30), 1);
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.window_failures(), 2);
    }

    #[test]
    fn test_three_of_four_failures_open_circuit() {
        let cb = breaker(Duration::from_secs(30), 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
        assert_eq!(cb.stats().total_rejections, 1);
    }

    #[test]
    fn test_window_rolls_old_outcomes_out() {
        let cb = breaker(Duration::from_secs(30), 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_success();
        // window is now [F, S, S, S] after the next success
        cb.record_success();
        assert_eq!(cb.window_failures(), 1);
        cb.record_failure();
        cb.record_failure();
        // [S, S, F, F]
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_requires_consecutive_successes() {
        let cb = breaker(Duration::from_millis(50), 2);
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(cb.try_acquire());
        assert!(cb.try_acquire());
        // only success_threshold trial slots
        assert!(!cb.try_acquire());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(Duration::from_millis(50), 2);
        cb.force_open();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn test_dropped_permit_counts_as_failure() {
        let cb = breaker(Duration::from_secs(30), 1);
        for _ in 0..3 {
            cb.acquire().unwrap().success();
        }
        drop(cb.acquire().unwrap());
        assert_eq!(cb.window_failures(), 1);
        assert_eq!(cb.stats().total_successes, 3);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset_closes_and_clears_window() {
        let cb = breaker(Duration::from_secs(30), 1);
        cb.force_open();
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.window_failures(), 0);
    }

    #[test]
    fn test_open_remaining_counts_down() {
        let cb = breaker(Duration::from_secs(30), 1);
        assert_eq!(cb.open_remaining(), Duration::ZERO);
        cb.force_open();
        let remaining = cb.open_remaining();
        assert!(remaining > Duration::from_secs(29) && remaining <= Duration::from_secs(30));
    }

    #[test]
    fn test_builder_registers_once() {
        let registry = CircuitBreakerRegistry::new();
        let name = OperationId::new("svc::op()");
        let first = registry
            .new_builder(name.clone())
            .request_volume_threshold(4)
            .build();
        let second = registry
            .new_builder(name.clone())
            .request_volume_threshold(10)
            .build();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().request_volume_threshold, 4);
        assert_eq!(registry.len(), 1);
    }
}
