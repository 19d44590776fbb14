//! # Cache Manager
//!
//! Basic caching operations over the store seam, every round trip guarded
//! by the circuit breaker. The contract callers rely on: `get` never
//! raises (an unavailable store reads as absent and the error counter
//! ticks), while `set`/`delete` report success through a flag.
//!
//! Stats counters are process-wide and approximate: they reset on process
//! restart (or an explicit reset) and exist for observability, not
//! accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{GatecacheError, Result};
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};
use crate::store::StoreClient;

/// Point-in-time view of the manager's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sets.store(0, Ordering::Relaxed);
        self.deletes.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Breaker-guarded cache operations with hit/miss/error accounting.
pub struct CacheManager {
    store: Arc<dyn StoreClient>,
    breaker: Arc<CircuitBreaker>,
    config: CacheConfig,
    stats: CacheStats,
}

impl CacheManager {
    pub fn new(
        store: Arc<dyn StoreClient>,
        breaker: Arc<CircuitBreaker>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            breaker,
            config,
            stats: CacheStats::default(),
        }
    }

    /// Shared store handle, for components layered on top of the manager.
    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    /// Shared breaker handle.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Current circuit state of the guarded store.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Get a cached value. Absent on miss, expiry, open circuit, or store
    /// error; the caller decides the fallback.
    pub async fn get(&self, key: &str) -> Option<String> {
        let store = self.store.clone();
        let result = self.breaker.call(|| async move { store.get(key).await }).await;
        match result {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.log_unavailable("get", key, &err);
                None
            }
        }
    }

    /// Typed variant of [`get`](Self::get). A payload that no longer
    /// decodes is treated as an error-counted miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "Cached payload failed to decode");
                None
            }
        }
    }

    /// Set a value. `ttl` of `None` applies the configured default TTL.
    /// Returns whether the write went through.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let effective_ttl = ttl.unwrap_or(self.config.default_ttl);
        let store = self.store.clone();
        let result = self
            .breaker
            .call(|| async move { store.set(key, value, Some(effective_ttl)).await })
            .await;
        match result {
            Ok(()) => {
                self.stats.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.log_unavailable("set", key, &err);
                false
            }
        }
    }

    /// Serialize and set a typed value.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "Value failed to encode for caching");
                false
            }
        }
    }

    /// Delete a key. Idempotent: deleting an absent key succeeds.
    pub async fn delete(&self, key: &str) -> bool {
        let store = self.store.clone();
        let result = self
            .breaker
            .call(|| async move { store.delete(key).await })
            .await;
        match result {
            Ok(_) => {
                self.stats.deletes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.log_unavailable("delete", key, &err);
                false
            }
        }
    }

    /// Delete several keys in one round trip. Returns removed count, 0 on
    /// store failure.
    pub async fn delete_many(&self, keys: &[String]) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        let store = self.store.clone();
        let result = self
            .breaker
            .call(|| async move { store.delete_many(keys).await })
            .await;
        match result {
            Ok(removed) => {
                self.stats.deletes.fetch_add(removed, Ordering::Relaxed);
                removed
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.log_unavailable("delete_many", "batch", &err);
                0
            }
        }
    }

    /// Whether `key` currently exists. False on store failure.
    pub async fn exists(&self, key: &str) -> bool {
        let store = self.store.clone();
        self.breaker
            .call(|| async move { store.exists(key).await })
            .await
            .unwrap_or(false)
    }

    /// Remaining TTL of `key`, if any.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let store = self.store.clone();
        self.breaker
            .call(|| async move { store.ttl(key).await })
            .await
            .ok()
            .flatten()
    }

    /// Get `key`, or compute and cache it. The loader's failure is
    /// surfaced verbatim as `ComputationFailed`; single-flight callers
    /// should use the orchestrator instead.
    pub async fn get_or_set<F, Fut>(&self, key: &str, ttl: Option<Duration>, loader: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<
            Output = std::result::Result<String, Box<dyn std::error::Error + Send + Sync>>,
        >,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await.map_err(GatecacheError::computation)?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Delete every key under `{namespace}:*` using cursor-paginated scans
    /// and bounded delete batches. Returns the number of keys removed;
    /// stops early (with the partial count) if the store becomes
    /// unavailable mid-flush.
    pub async fn flush_namespace(&self, namespace: &str) -> u64 {
        let pattern = format!("{namespace}:*");
        let mut removed = 0u64;

        // Deleting invalidates scan cursors, so each round rescans from the
        // start; the keyspace shrinks every round until nothing matches.
        loop {
            let store = self.store.clone();
            let page_pattern = pattern.clone();
            let page = self
                .breaker
                .call(|| async move {
                    store
                        .scan(&page_pattern, 0, self.config.scan_page_size)
                        .await
                })
                .await;

            let (keys, _next) = match page {
                Ok(page) => page,
                Err(err) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    self.log_unavailable("flush_namespace", namespace, &err);
                    return removed;
                }
            };
            if keys.is_empty() {
                break;
            }

            let mut removed_this_round = 0u64;
            for chunk in keys.chunks(self.config.flush_batch_size) {
                removed_this_round += self.delete_many(chunk).await;
            }
            removed += removed_this_round;
            if removed_this_round == 0 {
                // Store stopped deleting (outage mid-flush): report partial.
                return removed;
            }
        }

        debug!(namespace = %namespace, removed = removed, "Namespace flushed");
        removed
    }

    /// Process-wide, approximate counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Reset counters (normally only on process restart).
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn log_unavailable(&self, operation: &str, key: &str, err: &CircuitBreakerError<crate::store::StoreError>) {
        match err {
            CircuitBreakerError::CircuitOpen { .. } => {
                debug!(operation = %operation, key = %key, "Cache call short-circuited (circuit open)");
            }
            CircuitBreakerError::OperationFailed(store_err) => {
                warn!(operation = %operation, key = %key, error = %store_err, "Cache store call failed");
            }
        }
    }
}
