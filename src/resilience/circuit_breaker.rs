//! # Circuit Breaker Implementation
//!
//! Classic three-state breaker in front of the key-value store: Closed
//! (normal operation), Open (failing fast), Half-Open (probing recovery).
//! Consecutive failures open the circuit; after the cooldown a bounded
//! number of trial calls probe the store, and a single trial failure
//! re-opens with a fresh cooldown.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - limited calls allowed to probe store health
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Configuration for a circuit breaker instance. All values are inputs,
/// never hardcoded at call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing recovery.
    pub cooldown: Duration,
    /// Successful trial calls required to close from half-open.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }
        if self.cooldown.is_zero() {
            return Err("cooldown must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("operation failed: {0}")]
    OperationFailed(E),
}

/// Counters tracked per breaker, snapshotted for the health surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub short_circuited: u64,
    pub times_opened: u64,
    #[serde(skip)]
    half_open_probes: u32,
    #[serde(skip)]
    half_open_successes: u32,
    pub current_state: Option<CircuitState>,
}

/// Core circuit breaker with atomic state management.
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    /// Metrics tracking protected by mutex
    metrics: Arc<Mutex<CircuitBreakerMetrics>>,

    /// Time when circuit was opened (for cooldown calculations)
    opened_at: Arc<Mutex<Option<Instant>>>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            cooldown_ms = config.cooldown.as_millis() as u64,
            success_threshold = config.success_threshold,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            metrics: Arc::new(Mutex::new(CircuitBreakerMetrics::default())),
            opened_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Execute a store operation with circuit breaker protection.
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.should_allow_call().await {
            let mut metrics = self.metrics.lock().await;
            metrics.short_circuited += 1;
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Check if a call should be allowed based on current state
    async fn should_allow_call(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.lock().await;
                match *opened_at {
                    Some(opened_time) if opened_time.elapsed() >= self.config.cooldown => {
                        drop(opened_at);
                        self.transition_to_half_open().await;
                        // The transitioning call is the first probe.
                        let mut metrics = self.metrics.lock().await;
                        metrics.half_open_probes = 1;
                        true
                    }
                    Some(_) => false,
                    None => {
                        // Open without a timestamp shouldn't happen; allow the call.
                        warn!(component = %self.name, "Circuit open but no timestamp recorded");
                        true
                    }
                }
            }
            CircuitState::HalfOpen => {
                // Bound the number of concurrent trial calls.
                let mut metrics = self.metrics.lock().await;
                if metrics.half_open_probes < self.config.success_threshold {
                    metrics.half_open_probes += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_calls += 1;
        metrics.success_count += 1;

        debug!(component = %self.name, "🟢 Store operation succeeded");

        match self.state() {
            CircuitState::HalfOpen => {
                metrics.half_open_successes += 1;
                if metrics.half_open_successes >= self.config.success_threshold {
                    drop(metrics);
                    self.transition_to_closed().await;
                }
            }
            CircuitState::Closed => {
                // Reset failure count on success
                metrics.consecutive_failures = 0;
            }
            CircuitState::Open => {
                warn!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    async fn record_failure(&self) {
        let mut metrics = self.metrics.lock().await;
        metrics.total_calls += 1;
        metrics.failure_count += 1;

        warn!(component = %self.name, "🔴 Store operation failed");

        match self.state() {
            CircuitState::Closed => {
                metrics.consecutive_failures += 1;
                if metrics.consecutive_failures >= u64::from(self.config.failure_threshold) {
                    drop(metrics);
                    self.transition_to_open().await;
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state immediately re-opens
                drop(metrics);
                self.transition_to_open().await;
            }
            CircuitState::Open => {
                // Already open, just record the failure
            }
        }
    }

    async fn transition_to_closed(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);

        let mut metrics = self.metrics.lock().await;
        metrics.consecutive_failures = 0;
        metrics.half_open_probes = 0;
        metrics.half_open_successes = 0;

        let mut opened_at = self.opened_at.lock().await;
        *opened_at = None;

        info!(
            component = %self.name,
            total_calls = metrics.total_calls,
            "🟢 Circuit breaker closed (recovered)"
        );
    }

    async fn transition_to_open(&self) {
        self.state.store(CircuitState::Open as u8, Ordering::Release);

        let mut opened_at = self.opened_at.lock().await;
        *opened_at = Some(Instant::now());

        let mut metrics = self.metrics.lock().await;
        metrics.half_open_probes = 0;
        metrics.half_open_successes = 0;
        metrics.times_opened += 1;

        warn!(
            component = %self.name,
            consecutive_failures = metrics.consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    async fn transition_to_half_open(&self) {
        self.state
            .store(CircuitState::HalfOpen as u8, Ordering::Release);

        let mut metrics = self.metrics.lock().await;
        metrics.half_open_probes = 0;
        metrics.half_open_successes = 0;

        info!(
            component = %self.name,
            success_threshold = self.config.success_threshold,
            "🟡 Circuit breaker half-open (probing recovery)"
        );
    }

    /// Force circuit to open state (used by outage tests and maintenance)
    pub async fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        self.transition_to_open().await;
    }

    /// Force circuit to closed state
    pub async fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        self.transition_to_closed().await;
    }

    /// Get current metrics snapshot
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let metrics = self.metrics.lock().await;
        let mut snapshot = metrics.clone();
        snapshot.current_state = Some(self.state());
        snapshot
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn test_config(failure_threshold: u32, cooldown_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            cooldown: Duration::from_millis(cooldown_ms),
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn normal_operation_stays_closed() {
        let circuit = CircuitBreaker::new("store".to_string(), test_config(3, 100));

        assert_eq!(circuit.state(), CircuitState::Closed);

        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());

        let metrics = circuit.metrics().await;
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let circuit = CircuitBreaker::new("store".to_string(), test_config(2, 100));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Closed);

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        // Next call fails fast without executing
        let result = circuit
            .call(|| async { Ok::<_, String>("should not execute") })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));

        let metrics = circuit.metrics().await;
        assert_eq!(metrics.short_circuited, 1);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let circuit = CircuitBreaker::new("store".to_string(), test_config(2, 100));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        let _ = circuit.call(|| async { Ok::<_, String>("ok") }).await;
        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;

        // Never two consecutive failures, so still closed.
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let circuit = CircuitBreaker::new("store".to_string(), test_config(1, 50));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(60)).await;

        // Trial call transitions through half-open and closes on success.
        let result = circuit.call(|| async { Ok::<_, String>("success") }).await;
        assert!(result.is_ok());
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_with_fresh_cooldown() {
        let circuit = CircuitBreaker::new("store".to_string(), test_config(1, 50));

        let _ = circuit.call(|| async { Err::<String, _>("error") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        sleep(Duration::from_millis(60)).await;

        let _ = circuit.call(|| async { Err::<String, _>("still down") }).await;
        assert_eq!(circuit.state(), CircuitState::Open);

        // Cooldown restarted: immediately after re-opening, calls short-circuit.
        let result = circuit.call(|| async { Ok::<_, String>("nope") }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn force_operations() {
        let circuit = CircuitBreaker::new("store".to_string(), test_config(1, 1_000));

        circuit.force_open().await;
        assert_eq!(circuit.state(), CircuitState::Open);

        circuit.force_closed().await;
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[test]
    fn config_validation_rejects_zeroes() {
        assert!(test_config(0, 100).validate().is_err());
        assert!(test_config(1, 0).validate().is_err());
        let mut config = test_config(1, 100);
        config.success_threshold = 0;
        assert!(config.validate().is_err());
        assert!(test_config(3, 100).validate().is_ok());
    }
}
