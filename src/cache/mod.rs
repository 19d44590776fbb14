//! # Caching Layer
//!
//! Cache-aside orchestration over the store seam:
//!
//! - [`CacheManager`]: breaker-guarded get/set/delete/flush with
//!   process-wide stats. Reads never error: an unavailable store reads as
//!   absent and the caller decides its fallback.
//! - [`CacheOrchestrator`]: get-or-compute with single-flight
//!   deduplication, stale-while-revalidate, and warm-on-expiry refresh.
//! - [`CacheWarmer`]: best-effort proactive batch loading.

pub mod manager;
pub mod orchestrator;
pub mod warmer;

pub use manager::{CacheManager, CacheStatsSnapshot};
pub use orchestrator::{CacheOrchestrator, OrchestratorStatsSnapshot};
pub use warmer::{CacheWarmer, WarmSummary};
