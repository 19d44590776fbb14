//! Fixed-window rate limiting: one counter per key with TTL = window.
//!
//! The first increment of a window arms the TTL, so the window starts at
//! the first request rather than on a wall-clock boundary. Cheap (one
//! integer per key) but bursty: up to `2 * limit - 1` requests can land
//! across one boundary.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{AtomicScript, StoreClient, StoreResult};

use super::{outcome_to_verdict, Verdict};

pub async fn check(
    store: &Arc<dyn StoreClient>,
    key: &str,
    limit: u32,
    window: Duration,
) -> StoreResult<Verdict> {
    let outcome = store
        .eval_atomic(key, AtomicScript::FixedWindow { limit, window })
        .await?;
    Ok(outcome_to_verdict(outcome))
}
