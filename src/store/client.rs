//! # StoreClient Seam
//!
//! Async interface to the shared key-value store. Implementations handle
//! transport, pooling, and sharding; components in this crate only issue
//! logical operations. Two disciplines are load-bearing:
//!
//! - `scan` is cursor-paginated. The core never issues a full-keyspace
//!   blocking scan.
//! - Rate-limit state is mutated exclusively through [`AtomicScript`]
//!   programs evaluated by the store in a single atomic step, never via
//!   read-then-write from this process.

use async_trait::async_trait;
use std::time::Duration;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-layer errors (transport/command/value).
///
/// Kept separate from [`crate::GatecacheError`] so each caller decides its
/// own failure policy: the cache manager reports absent, the rate limiter
/// fails open.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Could not reach the store (connect, timeout, partition).
    #[error("store connection error: {0}")]
    Connection(String),

    /// The store rejected or failed the command.
    #[error("store command error: {0}")]
    Command(String),

    /// A stored value had an unexpected shape.
    #[error("store value error: {0}")]
    InvalidValue(String),
}

/// Scripted check-and-update programs the store executes atomically.
///
/// Each variant corresponds to one rate-limiting algorithm's state
/// transition. The caller supplies `now_ms` so the decision timestamp is
/// fixed once per call, and implementations must apply the whole program
/// under the store's single-operation atomicity (a server-side script or
/// equivalent).
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicScript {
    /// Increment the window counter, arming TTL = `window` on first hit.
    /// Allowed while the count stays within `limit`.
    FixedWindow { limit: u32, window: Duration },

    /// Prune members with timestamp <= `now_ms - window`, count the rest,
    /// and add `member` only if the count is below `limit`. A denied
    /// request consumes no window capacity.
    SlidingWindow {
        limit: u32,
        window: Duration,
        now_ms: i64,
        member: String,
    },

    /// Lazily refill `refill_amount` tokens per elapsed `refill_interval`
    /// (capped at `capacity`), then consume one token if available. The
    /// refill clock advances only by whole intervals so partial progress
    /// is never discarded.
    TokenBucket {
        capacity: u32,
        refill_amount: u32,
        refill_interval: Duration,
        now_ms: i64,
    },
}

/// Result of an [`AtomicScript`] evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    /// The action was admitted; `remaining` is the post-decision headroom.
    Allowed { remaining: u32 },
    /// The action was rejected; `retry_after` is the store's estimate of
    /// when capacity frees up.
    Denied { retry_after: Duration },
}

/// Async key-value store interface consumed by every component.
///
/// Implementations must be cheap to share (`Arc` internally) and fully
/// non-blocking; all methods are suspension points.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    /// Backend name for logging and health reports.
    fn backend_name(&self) -> &'static str;

    /// Liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Get the value at `key`, absent if missing or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set `key` to `value`, with an optional TTL (none = no expiry).
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete a key. Returns the number of keys removed (0 or 1).
    async fn delete(&self, key: &str) -> StoreResult<u64>;

    /// Delete a batch of keys in one round trip. Returns removed count.
    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64>;

    /// Set `key` only if it does not exist, with TTL. Returns whether the
    /// key was acquired. This is the single-flight lock primitive.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Atomically increment the integer at `key` (missing counts as 0).
    /// Returns the new value.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Arm or refresh a key's TTL. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining TTL of `key`, absent if the key is missing or persistent.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Whether `key` currently exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Cursor-paginated key scan. `pattern` supports a trailing `*`
    /// wildcard. Returns up to `count` keys and the next cursor (0 when
    /// iteration is complete).
    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(Vec<String>, u64)>;

    /// Evaluate a scripted check-and-update against `key` in one atomic
    /// step.
    async fn eval_atomic(&self, key: &str, script: AtomicScript) -> StoreResult<ScriptOutcome>;
}
