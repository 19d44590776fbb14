//! # Configuration Management
//!
//! Environment-aware configuration for every component. Defaults suit
//! production; `for_test` and `for_development` tighten timings for rapid
//! feedback, and environment variables override individual values.
//! Validation happens once at setup time: invalid ttl/limit/window values
//! are configuration errors, never runtime surprises.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::info;

use crate::error::{GatecacheError, Result};
pub use crate::resilience::CircuitBreakerConfig;

/// Settings for [`crate::cache::CacheManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a set does not specify one.
    pub default_ttl: Duration,
    /// Keys deleted per round trip during a namespace flush.
    pub flush_batch_size: usize,
    /// Keys requested per scan page during a namespace flush.
    pub scan_page_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            flush_batch_size: 128,
            scan_page_size: 512,
        }
    }
}

/// Settings for [`crate::cache::CacheOrchestrator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Freshness window of a computed value.
    pub ttl: Duration,
    /// Additional window during which a no-longer-fresh value may still be
    /// served if recomputation fails or is contended. Zero disables stale
    /// serving.
    pub stale_ttl: Duration,
    /// TTL of the single-flight token; the safety net if a holder crashes.
    pub lock_ttl: Duration,
    /// How many times a non-holder polls the cache for the winner's result.
    pub poll_attempts: u32,
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Schedule a detached refresh when a fresh hit is close to expiry.
    pub warm_on_refresh: bool,
    /// Remaining freshness below which warm-on-refresh fires.
    pub refresh_threshold: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            stale_ttl: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(5),
            poll_attempts: 10,
            poll_interval: Duration::from_millis(50),
            warm_on_refresh: false,
            refresh_threshold: Duration::from_secs(30),
        }
    }
}

/// Settings for [`crate::limiter::RateLimiter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Requests admitted per window when a caller does not pass a policy.
    pub default_limit: u32,
    /// Window applied when a caller does not pass a policy.
    pub default_window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            default_window: Duration::from_secs(60),
        }
    }
}

/// Top-level configuration, one section per component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatecacheConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub limiter: LimiterConfig,
}

impl GatecacheConfig {
    /// Test-optimized configuration with rapid expiry and short cooldowns.
    pub fn for_test() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_millis(100),
                success_threshold: 1,
            },
            cache: CacheConfig {
                default_ttl: Duration::from_secs(2),
                flush_batch_size: 8,
                scan_page_size: 16,
            },
            orchestrator: OrchestratorConfig {
                ttl: Duration::from_secs(2),
                stale_ttl: Duration::from_secs(2),
                lock_ttl: Duration::from_secs(1),
                poll_attempts: 20,
                poll_interval: Duration::from_millis(25),
                warm_on_refresh: false,
                refresh_threshold: Duration::from_millis(500),
            },
            limiter: LimiterConfig {
                default_limit: 5,
                default_window: Duration::from_secs(1),
            },
        }
    }

    /// Development configuration: production shape, shorter windows.
    pub fn for_development() -> Self {
        Self {
            cache: CacheConfig {
                default_ttl: Duration::from_secs(60),
                ..CacheConfig::default()
            },
            orchestrator: OrchestratorConfig {
                ttl: Duration::from_secs(30),
                stale_ttl: Duration::from_secs(30),
                ..OrchestratorConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load configuration based on the detected environment, then apply
    /// environment variable overrides.
    pub fn from_environment() -> Self {
        let environment = detect_environment();

        let config = match environment.as_str() {
            "test" => {
                info!("Loading test gatecache configuration (rapid expiry)");
                Self::for_test()
            }
            "development" => {
                info!("Loading development gatecache configuration");
                Self::for_development()
            }
            _ => {
                info!("Loading production gatecache configuration");
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    /// Apply environment variable overrides to individual values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(seconds) = env_u64("GATECACHE_DEFAULT_TTL_SECONDS") {
            self.cache.default_ttl = Duration::from_secs(seconds);
            info!("Cache default TTL override: {}s", seconds);
        }
        if let Some(size) = env_u64("GATECACHE_FLUSH_BATCH_SIZE") {
            self.cache.flush_batch_size = size as usize;
            info!("Flush batch size override: {}", size);
        }
        if let Some(threshold) = env_u64("GATECACHE_CB_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = threshold as u32;
            info!("Circuit breaker failure threshold override: {}", threshold);
        }
        if let Some(seconds) = env_u64("GATECACHE_CB_COOLDOWN_SECONDS") {
            self.circuit_breaker.cooldown = Duration::from_secs(seconds);
            info!("Circuit breaker cooldown override: {}s", seconds);
        }
        if let Some(limit) = env_u64("GATECACHE_RATE_LIMIT") {
            self.limiter.default_limit = limit as u32;
            info!("Rate limit override: {}", limit);
        }
        if let Some(seconds) = env_u64("GATECACHE_RATE_WINDOW_SECONDS") {
            self.limiter.default_window = Duration::from_secs(seconds);
            info!("Rate window override: {}s", seconds);
        }
        if let Some(seconds) = env_u64("GATECACHE_LOCK_TTL_SECONDS") {
            self.orchestrator.lock_ttl = Duration::from_secs(seconds);
            info!("Single-flight lock TTL override: {}s", seconds);
        }
        self
    }

    /// Validate configuration values. Rejected values are fatal at setup,
    /// not at runtime.
    pub fn validate(&self) -> Result<()> {
        self.circuit_breaker
            .validate()
            .map_err(GatecacheError::ConfigurationError)?;

        if self.cache.default_ttl.is_zero() {
            return Err(GatecacheError::ConfigurationError(
                "cache default_ttl must be greater than 0".into(),
            ));
        }
        if self.cache.flush_batch_size == 0 || self.cache.scan_page_size == 0 {
            return Err(GatecacheError::ConfigurationError(
                "flush_batch_size and scan_page_size must be greater than 0".into(),
            ));
        }

        if self.orchestrator.ttl.is_zero() {
            return Err(GatecacheError::ConfigurationError(
                "orchestrator ttl must be greater than 0".into(),
            ));
        }
        if self.orchestrator.lock_ttl.is_zero() {
            return Err(GatecacheError::ConfigurationError(
                "orchestrator lock_ttl must be greater than 0".into(),
            ));
        }
        if self.orchestrator.poll_attempts == 0 || self.orchestrator.poll_interval.is_zero() {
            return Err(GatecacheError::ConfigurationError(
                "orchestrator poll_attempts and poll_interval must be greater than 0".into(),
            ));
        }
        if self.orchestrator.warm_on_refresh
            && self.orchestrator.refresh_threshold >= self.orchestrator.ttl
        {
            return Err(GatecacheError::ConfigurationError(
                "refresh_threshold must be shorter than ttl".into(),
            ));
        }

        if self.limiter.default_limit == 0 {
            return Err(GatecacheError::ConfigurationError(
                "limiter default_limit must be greater than 0".into(),
            ));
        }
        if self.limiter.default_window.is_zero() {
            return Err(GatecacheError::ConfigurationError(
                "limiter default_window must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Log current configuration for debugging.
    pub fn log_configuration(&self) {
        info!("Gatecache configuration:");
        info!(
            "  Circuit breaker: threshold {}, cooldown {}s, success threshold {}",
            self.circuit_breaker.failure_threshold,
            self.circuit_breaker.cooldown.as_secs(),
            self.circuit_breaker.success_threshold
        );
        info!(
            "  Cache: default TTL {}s, flush batch {}, scan page {}",
            self.cache.default_ttl.as_secs(),
            self.cache.flush_batch_size,
            self.cache.scan_page_size
        );
        info!(
            "  Orchestrator: ttl {}s, stale {}s, lock {}s, poll {}x{}ms, warm_on_refresh {}",
            self.orchestrator.ttl.as_secs(),
            self.orchestrator.stale_ttl.as_secs(),
            self.orchestrator.lock_ttl.as_secs(),
            self.orchestrator.poll_attempts,
            self.orchestrator.poll_interval.as_millis(),
            self.orchestrator.warm_on_refresh
        );
        info!(
            "  Limiter: default {} per {}s",
            self.limiter.default_limit,
            self.limiter.default_window.as_secs()
        );
    }
}

fn detect_environment() -> String {
    env::var("GATECACHE_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .or_else(|_| env::var("RUST_ENV"))
        .unwrap_or_else(|_| "production".to_string())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(GatecacheConfig::default().validate().is_ok());
        assert!(GatecacheConfig::for_test().validate().is_ok());
        assert!(GatecacheConfig::for_development().validate().is_ok());
    }

    #[test]
    fn zero_ttl_rejected() {
        let mut config = GatecacheConfig::default();
        config.cache.default_ttl = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn warm_on_refresh_requires_sane_threshold() {
        let mut config = GatecacheConfig::default();
        config.orchestrator.warm_on_refresh = true;
        config.orchestrator.refresh_threshold = config.orchestrator.ttl;
        assert!(config.validate().is_err());

        config.orchestrator.refresh_threshold = Duration::from_secs(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limit_rejected() {
        let mut config = GatecacheConfig::default();
        config.limiter.default_limit = 0;
        assert!(config.validate().is_err());
    }
}
