//! # Rate Limiting
//!
//! One facade, four algorithm families: fixed window, sliding window,
//! token bucket, and throttle/debounce markers. Every decision is a single
//! atomic check-and-update against the store, never a read followed by a
//! conditional write from this process, so concurrent callers cannot race
//! state.
//!
//! The decision is an explicit sum type. Fail-open is a visible,
//! mandatory branch: when the store errors or the circuit is open, every
//! algorithm answers [`Verdict::FailOpen`] and ticks a counter. Rate
//! limiting must never deny service because the store is down.

pub mod fixed_window;
pub mod sliding_window;
pub mod throttle;
pub mod token_bucket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::LimiterConfig;
use crate::error::{GatecacheError, Result};
use crate::resilience::CircuitBreaker;
use crate::store::key::rate_key;
use crate::store::{ScriptOutcome, StoreClient, StoreResult};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Verdict {
    /// The action is admitted. `remaining` is the post-decision headroom
    /// where the algorithm tracks one.
    Allowed { remaining: Option<u32> },
    /// The action is rejected until roughly `retry_after` from now.
    Denied { retry_after: Option<Duration> },
    /// Debounce only: the call is absorbed into the live interval, neither
    /// admitted nor rejected.
    Coalesced,
    /// The store could not answer; admitted by the fail-open policy.
    FailOpen,
}

impl Verdict {
    /// Whether the caller should proceed with the action.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed { .. } | Verdict::FailOpen)
    }

    pub fn is_coalesced(&self) -> bool {
        matches!(self, Verdict::Coalesced)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Verdict::Denied { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Algorithm selection plus parameters, validated once at setup.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum RatePolicy {
    /// Counter with TTL = window. Cheap; bursts can double up at window
    /// boundaries.
    FixedWindow { limit: u32, window: Duration },
    /// Timestamp set pruned to the trailing window. Accurate at
    /// boundaries at the cost of per-request store state.
    SlidingWindow { limit: u32, window: Duration },
    /// Lazily refilled token bucket; idle keys accrue no work.
    TokenBucket {
        capacity: u32,
        refill_amount: u32,
        refill_interval: Duration,
    },
    /// At most one admitted action per interval; later calls are denied.
    Throttle { interval: Duration },
    /// At most one admitted action per interval; later calls coalesce.
    Debounce { interval: Duration },
}

impl RatePolicy {
    /// Reject invalid parameters at configuration time.
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| Err(GatecacheError::ConfigurationError(message.into()));
        match self {
            RatePolicy::FixedWindow { limit, window }
            | RatePolicy::SlidingWindow { limit, window } => {
                if *limit == 0 {
                    return fail("rate limit must be greater than 0");
                }
                if window.is_zero() {
                    return fail("rate window must be greater than 0");
                }
            }
            RatePolicy::TokenBucket {
                capacity,
                refill_amount,
                refill_interval,
            } => {
                if *capacity == 0 || *refill_amount == 0 {
                    return fail("token bucket capacity and refill_amount must be greater than 0");
                }
                if refill_interval.is_zero() {
                    return fail("token bucket refill_interval must be greater than 0");
                }
            }
            RatePolicy::Throttle { interval } | RatePolicy::Debounce { interval } => {
                if interval.is_zero() {
                    return fail("throttle/debounce interval must be greater than 0");
                }
            }
        }
        Ok(())
    }
}

/// Rate-limit consumption report for response headers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RemainingInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Point-in-time view of the limiter's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct LimiterStatsSnapshot {
    pub allowed: u64,
    pub denied: u64,
    pub coalesced: u64,
    pub fail_open: u64,
}

#[derive(Debug, Default)]
struct LimiterStats {
    allowed: AtomicU64,
    denied: AtomicU64,
    coalesced: AtomicU64,
    fail_open: AtomicU64,
}

/// Breaker-guarded rate limiter over the store seam.
pub struct RateLimiter {
    store: Arc<dyn StoreClient>,
    breaker: Arc<CircuitBreaker>,
    config: LimiterConfig,
    stats: LimiterStats,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn StoreClient>,
        breaker: Arc<CircuitBreaker>,
        config: LimiterConfig,
    ) -> Self {
        Self {
            store,
            breaker,
            config,
            stats: LimiterStats::default(),
        }
    }

    /// Run one atomic check-and-update for `key` under `policy`.
    ///
    /// Never errors: a store failure or open circuit yields
    /// [`Verdict::FailOpen`].
    pub async fn allow(&self, key: &str, policy: &RatePolicy) -> Verdict {
        let store = self.store.clone();
        let result = self
            .breaker
            .call(|| async move { evaluate(&store, key, policy).await })
            .await;

        let verdict = match result {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(key = %key, error = %err, "⚠️ Rate limit check unavailable; failing open");
                Verdict::FailOpen
            }
        };

        match &verdict {
            Verdict::Allowed { .. } => self.stats.allowed.fetch_add(1, Ordering::Relaxed),
            Verdict::Denied { .. } => {
                debug!(key = %key, "Rate limit exceeded");
                self.stats.denied.fetch_add(1, Ordering::Relaxed)
            }
            Verdict::Coalesced => self.stats.coalesced.fetch_add(1, Ordering::Relaxed),
            Verdict::FailOpen => self.stats.fail_open.fetch_add(1, Ordering::Relaxed),
        };
        verdict
    }

    /// Check an identity acting on an endpoint, keyed
    /// `rate:{endpoint}:{identity}`.
    pub async fn allow_endpoint(
        &self,
        identity: &str,
        endpoint: &str,
        policy: &RatePolicy,
    ) -> Verdict {
        self.allow(&rate_key(endpoint, identity), policy).await
    }

    /// [`allow_endpoint`](Self::allow_endpoint) with the configured
    /// default fixed-window policy.
    pub async fn allow_default(&self, identity: &str, endpoint: &str) -> Verdict {
        let policy = RatePolicy::FixedWindow {
            limit: self.config.default_limit,
            window: self.config.default_window,
        };
        self.allow_endpoint(identity, endpoint, &policy).await
    }

    /// Fixed-window consumption report for `key`. Approximate and
    /// observability-only; a store failure reports the full limit
    /// remaining (the fail-open lean).
    pub async fn remaining(&self, key: &str, limit: u32, window: Duration) -> RemainingInfo {
        let store = self.store.clone();
        let result = self
            .breaker
            .call(|| async move {
                let count = match store.get(key).await? {
                    Some(raw) => raw.parse::<u32>().unwrap_or(0),
                    None => 0,
                };
                let ttl = store.ttl(key).await?;
                Ok::<_, crate::store::StoreError>((count, ttl))
            })
            .await;

        match result {
            Ok((count, ttl)) => RemainingInfo {
                limit,
                remaining: limit.saturating_sub(count),
                reset_at: Utc::now() + chrono::Duration::from_std(ttl.unwrap_or(window)).unwrap_or_else(|_| chrono::Duration::zero()),
            },
            Err(err) => {
                debug!(key = %key, error = %err, "Remaining-limit query unavailable");
                RemainingInfo {
                    limit,
                    remaining: limit,
                    reset_at: Utc::now() + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero()),
                }
            }
        }
    }

    /// Process-wide, approximate counters.
    pub fn stats(&self) -> LimiterStatsSnapshot {
        LimiterStatsSnapshot {
            allowed: self.stats.allowed.load(Ordering::Relaxed),
            denied: self.stats.denied.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            fail_open: self.stats.fail_open.load(Ordering::Relaxed),
        }
    }
}

/// Dispatch to the algorithm module for one store round trip.
async fn evaluate(
    store: &Arc<dyn StoreClient>,
    key: &str,
    policy: &RatePolicy,
) -> StoreResult<Verdict> {
    match policy {
        RatePolicy::FixedWindow { limit, window } => {
            fixed_window::check(store, key, *limit, *window).await
        }
        RatePolicy::SlidingWindow { limit, window } => {
            sliding_window::check(store, key, *limit, *window).await
        }
        RatePolicy::TokenBucket {
            capacity,
            refill_amount,
            refill_interval,
        } => token_bucket::check(store, key, *capacity, *refill_amount, *refill_interval).await,
        RatePolicy::Throttle { interval } => throttle::check_throttle(store, key, *interval).await,
        RatePolicy::Debounce { interval } => throttle::check_debounce(store, key, *interval).await,
    }
}

pub(crate) fn outcome_to_verdict(outcome: ScriptOutcome) -> Verdict {
    match outcome {
        ScriptOutcome::Allowed { remaining } => Verdict::Allowed {
            remaining: Some(remaining),
        },
        ScriptOutcome::Denied { retry_after } => Verdict::Denied {
            retry_after: Some(retry_after),
        },
    }
}
