#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Gatecache
//!
//! Resilient caching and rate-limiting layer in front of a shared
//! key-value store, built for request-handling code that must stay
//! available when the store is slow, partitioned, or down.
//!
//! ## Overview
//!
//! Two capabilities share one store seam and one failure policy:
//!
//! - **Caching**: cache-aside get-or-compute with single-flight
//!   deduplication, stale-while-revalidate, warm-on-expiry background
//!   refresh, namespace invalidation, and proactive batch warming.
//! - **Rate limiting**: fixed window, sliding window, token bucket, and
//!   throttle/debounce, with every decision a single atomic
//!   check-and-update executed store-side.
//!
//! A process-local circuit breaker guards every store round trip. When the
//! store cannot answer, the system degrades instead of failing: cache
//! reads report absent, the orchestrator computes directly, and the rate
//! limiter fails open. Callers never observe a store outage as an error.
//!
//! ## Module Organization
//!
//! - [`store`] - The `StoreClient` seam, atomic scripts, key builders, and
//!   the in-memory reference store
//! - [`resilience`] - Circuit breaker state machine
//! - [`cache`] - Manager, single-flight orchestrator, and warmer
//! - [`limiter`] - Rate-limiting algorithm family and verdicts
//! - [`config`] - Environment-aware configuration
//! - [`health`] - Aggregated health/stats snapshot
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatecache::cache::{CacheManager, CacheOrchestrator};
//! use gatecache::config::GatecacheConfig;
//! use gatecache::limiter::{RateLimiter, RatePolicy};
//! use gatecache::resilience::CircuitBreaker;
//! use gatecache::store::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> gatecache::Result<()> {
//! let config = GatecacheConfig::from_environment();
//! config.validate()?;
//!
//! // One store handle and one breaker, injected into each component.
//! let store = Arc::new(MemoryStore::new());
//! let breaker = Arc::new(CircuitBreaker::new(
//!     "kv-store".to_string(),
//!     config.circuit_breaker.clone(),
//! ));
//!
//! let manager = Arc::new(CacheManager::new(store.clone(), breaker.clone(), config.cache.clone()));
//! let orchestrator = CacheOrchestrator::new(manager.clone(), config.orchestrator.clone());
//! let limiter = RateLimiter::new(store, breaker, config.limiter.clone());
//!
//! let report: String = orchestrator
//!     .get_or_compute("report:daily", || async { Ok("expensive result".to_string()) })
//!     .await?;
//!
//! let verdict = limiter
//!     .allow_endpoint("10.0.0.1", "/search", &RatePolicy::FixedWindow {
//!         limit: 100,
//!         window: Duration::from_secs(60),
//!     })
//!     .await;
//! assert!(verdict.is_allowed());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod limiter;
pub mod logging;
pub mod resilience;
pub mod store;

pub use cache::{CacheManager, CacheOrchestrator, CacheWarmer, WarmSummary};
pub use config::GatecacheConfig;
pub use error::{GatecacheError, Result};
pub use health::HealthReport;
pub use limiter::{RateLimiter, RatePolicy, Verdict};
pub use resilience::{CircuitBreaker, CircuitState};
pub use store::{MemoryStore, StoreClient};
