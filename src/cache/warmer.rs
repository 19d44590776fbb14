//! # Cache Warmer
//!
//! Proactive batch loading, typically at startup or on a schedule. Keys
//! are partitioned into batches and loaded with a bounded concurrency
//! fan-out so neither the store nor the loader's own dependency is
//! overwhelmed. Semantics are best effort: a failed key is recorded and
//! the remaining work continues.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::manager::CacheManager;

type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a warming run, in input-key order.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WarmSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Batch loader writing through the cache manager.
pub struct CacheWarmer {
    manager: Arc<CacheManager>,
    concurrency: usize,
}

impl CacheWarmer {
    /// `concurrency` bounds in-flight loader invocations per batch.
    pub fn new(manager: Arc<CacheManager>, concurrency: usize) -> Self {
        Self {
            manager,
            concurrency: concurrency.max(1),
        }
    }

    /// Load every key via `loader` and cache the results with `ttl`.
    ///
    /// Keys are processed in batches of `batch_size`; within a batch up to
    /// `concurrency` loads run at once. A key lands in `failed` when its
    /// load errored or its cache write did not go through; neither aborts
    /// the rest of the run.
    pub async fn warm<F, Fut>(
        &self,
        keys: Vec<String>,
        loader: F,
        ttl: Duration,
        batch_size: usize,
    ) -> WarmSummary
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<serde_json::Value, LoadError>> + Send,
    {
        let mut summary = WarmSummary::default();
        let loader = &loader;

        for batch in keys.chunks(batch_size.max(1)) {
            let outcomes: HashMap<String, bool> = stream::iter(batch.iter().cloned())
                .map(|key| async move {
                    match loader(key.clone()).await {
                        Ok(value) => {
                            let raw = value.to_string();
                            let written = self.manager.set(&key, &raw, Some(ttl)).await;
                            if !written {
                                warn!(key = %key, "Warm load succeeded but cache write failed");
                            }
                            (key, written)
                        }
                        Err(err) => {
                            warn!(key = %key, error = %err, "Warm load failed");
                            (key, false)
                        }
                    }
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for key in batch {
                if outcomes.get(key).copied().unwrap_or(false) {
                    summary.succeeded.push(key.clone());
                } else {
                    summary.failed.push(key.clone());
                }
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "🔥 Cache warming pass complete"
        );
        summary
    }
}
