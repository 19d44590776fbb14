//! # Resilience Module
//!
//! Fault isolation for the shared key-value store. Every store round trip
//! in this crate is wrapped by a [`CircuitBreaker`] so a slow or partitioned
//! backend degrades callers (cache misses, permissive rate limiting)
//! instead of failing them.
//!
//! The breaker state is process-local by design: independent instances may
//! disagree transiently about store health, which trades immediate fleet-
//! wide consistency for zero coordination cost.

pub mod circuit_breaker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics, CircuitState,
};
