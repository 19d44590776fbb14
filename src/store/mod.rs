//! # Store Abstraction
//!
//! The key-value store is an external collaborator: connection pooling,
//! sharding, and cluster topology all live behind the [`StoreClient`] trait.
//! This module owns only the seam itself, the scripted atomic operations the
//! rate limiter depends on, key construction, and an in-memory reference
//! implementation used by the test suites.

pub mod client;
pub mod key;
pub mod memory;

pub use client::{AtomicScript, ScriptOutcome, StoreClient, StoreError, StoreResult};
pub use memory::MemoryStore;
