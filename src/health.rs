//! # Health Surface
//!
//! Point-in-time snapshot of store reachability, circuit state, and
//! component counters, assembled for an out-of-scope health endpoint.
//! Everything here is approximate and observability-only.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheManager, CacheOrchestrator, CacheStatsSnapshot, OrchestratorStatsSnapshot};
use crate::limiter::{LimiterStatsSnapshot, RateLimiter};
use crate::resilience::CircuitState;

/// Aggregated health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store_reachable: bool,
    pub backend: &'static str,
    pub circuit_state: CircuitState,
    pub cache: CacheStatsSnapshot,
    pub orchestrator: OrchestratorStatsSnapshot,
    pub limiter: LimiterStatsSnapshot,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Probe the store and snapshot every component's counters.
    ///
    /// The probe goes straight to the store, not through the breaker: the
    /// report should reflect actual reachability even while the circuit
    /// is open.
    pub async fn collect(
        manager: &CacheManager,
        orchestrator: &CacheOrchestrator,
        limiter: &RateLimiter,
    ) -> Self {
        let store = manager.store();
        let store_reachable = store.ping().await.is_ok();

        Self {
            store_reachable,
            backend: store.backend_name(),
            circuit_state: manager.circuit_state(),
            cache: manager.stats(),
            orchestrator: orchestrator.stats(),
            limiter: limiter.stats(),
            checked_at: Utc::now(),
        }
    }

    /// Healthy means the store answered and the circuit is closed.
    pub fn is_healthy(&self) -> bool {
        self.store_reachable && self.circuit_state == CircuitState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, LimiterConfig, OrchestratorConfig};
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn components() -> (
        Arc<MemoryStore>,
        Arc<CacheManager>,
        CacheOrchestrator,
        RateLimiter,
    ) {
        let store = Arc::new(MemoryStore::new());
        let breaker = Arc::new(CircuitBreaker::new(
            "store".to_string(),
            CircuitBreakerConfig::default(),
        ));
        let manager = Arc::new(CacheManager::new(
            store.clone(),
            breaker.clone(),
            CacheConfig::default(),
        ));
        let orchestrator = CacheOrchestrator::new(manager.clone(), OrchestratorConfig::default());
        let limiter = RateLimiter::new(store.clone(), breaker, LimiterConfig::default());
        (store, manager, orchestrator, limiter)
    }

    #[tokio::test]
    async fn healthy_when_store_answers_and_circuit_closed() {
        let (_store, manager, orchestrator, limiter) = components();
        let report = HealthReport::collect(&manager, &orchestrator, &limiter).await;
        assert!(report.is_healthy());
        assert!(report.store_reachable);
        assert_eq!(report.backend, "memory");
        assert_eq!(report.circuit_state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn unhealthy_during_outage_and_while_circuit_open() {
        let (store, manager, orchestrator, limiter) = components();

        store.set_failing(true);
        let report = HealthReport::collect(&manager, &orchestrator, &limiter).await;
        assert!(!report.store_reachable);
        assert!(!report.is_healthy());

        // Store back, but circuit still open: degraded until it closes.
        store.set_failing(false);
        manager.breaker().force_open().await;
        let report = HealthReport::collect(&manager, &orchestrator, &limiter).await;
        assert!(report.store_reachable);
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn report_serializes_for_the_endpoint() {
        let (_store, manager, orchestrator, limiter) = components();
        manager.get("warmup-miss").await;
        let report = HealthReport::collect(&manager, &orchestrator, &limiter).await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["backend"], "memory");
        assert_eq!(json["cache"]["misses"], 1);
    }
}
