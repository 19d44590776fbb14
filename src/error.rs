//! # Structured Error Handling
//!
//! Central error taxonomy for the caching and rate-limiting core. Store
//! outages are recovered locally (fail-open, cache bypass) and never reach
//! callers as errors; only computation failures and configuration mistakes
//! propagate.

/// Errors surfaced by gatecache components.
///
/// `StoreUnavailable` exists so internal plumbing can reason about outages,
/// but public read paths swallow it by design: `CacheManager::get` reports
/// absent, the rate limiter fails open. `ComputationFailed` wraps whatever
/// a caller-supplied loader returned and is always surfaced verbatim.
#[derive(Debug, thiserror::Error)]
pub enum GatecacheError {
    /// The backing store could not serve the request (transport error,
    /// timeout, or the circuit breaker is open).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A caller-supplied computation or loader failed.
    #[error("computation failed: {source}")]
    ComputationFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Invalid configuration, rejected at setup time.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A cached payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatecacheError {
    /// Wrap a loader failure for propagation to the orchestrator's caller.
    pub fn computation<E>(source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        GatecacheError::ComputationFailed {
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatecacheError>;
