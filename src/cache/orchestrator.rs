//! # Cache Orchestrator
//!
//! Get-or-compute with the full policy surface: single-flight
//! deduplication, bounded polling for contended callers, stale-while-
//! revalidate, warm-on-expiry background refresh, and cache bypass while
//! the circuit is open.
//!
//! The guarantees callers get on a miss: at most one concurrent
//! recomputation per key, and nobody waits past the configured poll
//! bound. Every caller leaves with a fresh value, a stale value, or an
//! explicit `ComputationFailed`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::error::{GatecacheError, Result};
use crate::resilience::CircuitState;
use crate::store::key::lock_key;
use crate::store::StoreClient;

use super::manager::CacheManager;

type ComputeError = Box<dyn std::error::Error + Send + Sync>;

/// Stored representation of an orchestrated value. The store-level TTL is
/// `ttl + stale_ttl`, so the envelope itself carries the freshness
/// boundary: fresh until `stored_at + fresh_ttl`, then stale until the
/// store expires it. A stale value can only ever come from a previously
/// successful store, which is exactly the stale-serving invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    payload: serde_json::Value,
    stored_at_ms: i64,
    fresh_ttl_ms: i64,
    stale_ttl_ms: i64,
}

impl Envelope {
    fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.stored_at_ms + self.fresh_ttl_ms
    }

    fn within_stale_window(&self, now_ms: i64) -> bool {
        now_ms < self.stored_at_ms + self.fresh_ttl_ms + self.stale_ttl_ms
    }

    fn remaining_freshness(&self, now_ms: i64) -> Duration {
        Duration::from_millis((self.stored_at_ms + self.fresh_ttl_ms - now_ms).max(0) as u64)
    }
}

/// Point-in-time view of the orchestrator's counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct OrchestratorStatsSnapshot {
    pub fresh_hits: u64,
    pub stale_served: u64,
    pub computes: u64,
    pub contended_waits: u64,
    pub bypasses: u64,
    pub background_refreshes: u64,
}

#[derive(Debug, Default)]
struct OrchestratorStats {
    fresh_hits: AtomicU64,
    stale_served: AtomicU64,
    computes: AtomicU64,
    contended_waits: AtomicU64,
    bypasses: AtomicU64,
    background_refreshes: AtomicU64,
}

impl OrchestratorStats {
    fn snapshot(&self) -> OrchestratorStatsSnapshot {
        OrchestratorStatsSnapshot {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            computes: self.computes.load(Ordering::Relaxed),
            contended_waits: self.contended_waits.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
        }
    }
}

enum LockAttempt {
    Acquired,
    Contended,
    Unavailable,
}

/// Releases the single-flight token. Explicit release is the happy path;
/// if the holder is cancelled mid-compute, `Drop` schedules a best-effort
/// delete and the token's TTL remains the safety net.
struct InFlightGuard {
    store: Arc<dyn StoreClient>,
    key: String,
    released: bool,
}

impl InFlightGuard {
    fn new(store: Arc<dyn StoreClient>, key: String) -> Self {
        Self {
            store,
            key,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(err) = self.store.delete(&self.key).await {
            debug!(key = %self.key, error = %err, "Single-flight token release failed; TTL will reap it");
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let store = self.store.clone();
            let key = std::mem::take(&mut self.key);
            handle.spawn(async move {
                let _ = store.delete(&key).await;
            });
        }
        // Without a runtime the token simply ages out via its TTL.
    }
}

/// Single-flight get-or-compute policy wrapped around a computation.
pub struct CacheOrchestrator {
    manager: Arc<CacheManager>,
    config: OrchestratorConfig,
    stats: Arc<OrchestratorStats>,
}

impl CacheOrchestrator {
    pub fn new(manager: Arc<CacheManager>, config: OrchestratorConfig) -> Self {
        Self {
            manager,
            config,
            stats: Arc::new(OrchestratorStats::default()),
        }
    }

    /// Return the cached value for `key` if fresh, otherwise compute it
    /// with single-flight deduplication.
    ///
    /// Contended callers poll for the winner's result up to the configured
    /// bound, then fall back to a stale value if one exists, then compute
    /// for themselves. While the circuit is open the cache is skipped
    /// entirely and the computation runs directly (fail-open, not an
    /// error). Only `ComputationFailed` (and a decode mismatch) reach the
    /// caller.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &str, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, ComputeError>> + Send,
    {
        if self.manager.circuit_state() == CircuitState::Open {
            self.stats.bypasses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Circuit open; bypassing cache for direct computation");
            return compute().await.map_err(GatecacheError::computation);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let first_read = self.read_envelope(key).await;

        if let Some(envelope) = &first_read {
            if envelope.is_fresh(now) {
                self.stats.fresh_hits.fetch_add(1, Ordering::Relaxed);
                self.maybe_schedule_refresh(key, envelope, now, compute.clone());
                return decode(envelope);
            }
        }

        match self.try_acquire_token(key).await {
            LockAttempt::Acquired => {
                let guard = InFlightGuard::new(self.manager.store().clone(), lock_key(key));
                match compute().await {
                    Ok(value) => {
                        self.stats.computes.fetch_add(1, Ordering::Relaxed);
                        self.store_envelope(key, &value).await;
                        guard.release().await;
                        Ok(value)
                    }
                    Err(err) => {
                        guard.release().await;
                        if let Some(envelope) =
                            first_read.filter(|e| e.within_stale_window(now))
                        {
                            warn!(key = %key, error = %err, "Computation failed; serving stale value");
                            self.stats.stale_served.fetch_add(1, Ordering::Relaxed);
                            return decode(&envelope);
                        }
                        Err(GatecacheError::computation(err))
                    }
                }
            }
            LockAttempt::Contended => {
                self.stats.contended_waits.fetch_add(1, Ordering::Relaxed);
                self.await_winner_or_fallback(key, first_read, compute).await
            }
            LockAttempt::Unavailable => {
                // Store died between the read and the lock attempt: same
                // policy as an open circuit.
                self.stats.bypasses.fetch_add(1, Ordering::Relaxed);
                compute().await.map_err(GatecacheError::computation)
            }
        }
    }

    /// Process-wide, approximate counters.
    pub fn stats(&self) -> OrchestratorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Bounded poll for another caller's in-flight result, then stale,
    /// then last-resort direct computation.
    async fn await_winner_or_fallback<T, F, Fut>(
        &self,
        key: &str,
        first_read: Option<Envelope>,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, ComputeError>> + Send,
    {
        for _ in 0..self.config.poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;
            if let Some(envelope) = self.read_envelope(key).await {
                if envelope.is_fresh(chrono::Utc::now().timestamp_millis()) {
                    return decode(&envelope);
                }
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        let last_read = self.read_envelope(key).await.or(first_read);
        if let Some(envelope) = last_read.filter(|e| e.within_stale_window(now)) {
            warn!(key = %key, "Poll bound exhausted; serving stale value");
            self.stats.stale_served.fetch_add(1, Ordering::Relaxed);
            return decode(&envelope);
        }

        // First-ever miss under contention with nothing to fall back to:
        // compute without the token rather than hang.
        debug!(key = %key, "Poll bound exhausted with no value; computing directly");
        let value = compute().await.map_err(GatecacheError::computation)?;
        self.stats.computes.fetch_add(1, Ordering::Relaxed);
        self.store_envelope(key, &value).await;
        Ok(value)
    }

    async fn try_acquire_token(&self, key: &str) -> LockAttempt {
        let store = self.manager.store().clone();
        let token_key = lock_key(key);
        let lock_ttl = self.config.lock_ttl;
        let result = self
            .manager
            .breaker()
            .call(|| async move { store.set_if_absent(&token_key, "1", lock_ttl).await })
            .await;
        match result {
            Ok(true) => LockAttempt::Acquired,
            Ok(false) => LockAttempt::Contended,
            Err(_) => LockAttempt::Unavailable,
        }
    }

    async fn read_envelope(&self, key: &str) -> Option<Envelope> {
        let raw = self.manager.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(envelope) => Some(envelope),
            Err(err) => {
                warn!(key = %key, error = %err, "Cached envelope failed to decode; treating as miss");
                None
            }
        }
    }

    async fn store_envelope<T: Serialize>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %key, error = %err, "Computed value failed to encode; result not cached");
                return;
            }
        };
        let envelope = Envelope {
            payload,
            stored_at_ms: chrono::Utc::now().timestamp_millis(),
            fresh_ttl_ms: self.config.ttl.as_millis() as i64,
            stale_ttl_ms: self.config.stale_ttl.as_millis() as i64,
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %key, error = %err, "Envelope failed to encode; result not cached");
                return;
            }
        };
        let store_ttl = self.config.ttl + self.config.stale_ttl;
        self.manager.set(key, &raw, Some(store_ttl)).await;
    }

    /// Warm-on-expiry: when a fresh hit is close to the freshness
    /// boundary, refresh it in a detached task. The refresh runs under the
    /// same single-flight token, so concurrent hits schedule at most one.
    fn maybe_schedule_refresh<T, F, Fut>(&self, key: &str, envelope: &Envelope, now: i64, compute: F)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, ComputeError>> + Send,
    {
        if !self.config.warm_on_refresh {
            return;
        }
        if envelope.remaining_freshness(now) > self.config.refresh_threshold {
            return;
        }

        let manager = self.manager.clone();
        let config = self.config.clone();
        let stats = self.stats.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let store = manager.store().clone();
            let token_key = lock_key(&key);
            let lock_ttl = config.lock_ttl;
            let acquired = manager
                .breaker()
                .call(|| async move { store.set_if_absent(&token_key, "1", lock_ttl).await })
                .await;
            if !matches!(acquired, Ok(true)) {
                return;
            }
            let guard = InFlightGuard::new(manager.store().clone(), lock_key(&key));

            match compute().await {
                Ok(value) => {
                    stats.background_refreshes.fetch_add(1, Ordering::Relaxed);
                    write_envelope(&manager, &config, &key, &value).await;
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Background refresh failed");
                }
            }
            guard.release().await;
        });
    }
}

/// Envelope write shared by the foreground and background paths.
async fn write_envelope<T: Serialize>(
    manager: &CacheManager,
    config: &OrchestratorConfig,
    key: &str,
    value: &T,
) {
    let payload = match serde_json::to_value(value) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(key = %key, error = %err, "Refreshed value failed to encode");
            return;
        }
    };
    let envelope = Envelope {
        payload,
        stored_at_ms: chrono::Utc::now().timestamp_millis(),
        fresh_ttl_ms: config.ttl.as_millis() as i64,
        stale_ttl_ms: config.stale_ttl.as_millis() as i64,
    };
    if let Ok(raw) = serde_json::to_string(&envelope) {
        manager.set(key, &raw, Some(config.ttl + config.stale_ttl)).await;
    }
}

fn decode<T: DeserializeOwned>(envelope: &Envelope) -> Result<T> {
    serde_json::from_value(envelope.payload.clone()).map_err(GatecacheError::from)
}
