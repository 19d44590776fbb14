//! Sliding-window rate limiting over a timestamp set.
//!
//! Each admitted request records a unique member; the window slides
//! continuously, so boundary bursts cannot double up the way fixed
//! windows allow. Two boundary rules are pinned by tests: a member aged
//! exactly `window` falls outside it, and a denied request records
//! nothing (rejections never extend the throttled period).

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
    let now_ms = chrono::Utc::now().timestamp_millis();
    let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());
    let outcome = store
        .eval_atomic(
            key,
            AtomicScript::SlidingWindow {
                limit,
                window,
                now_ms,
                member,
            },
        )
        .await?;
    Ok(outcome_to_verdict(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> Arc<dyn StoreClient> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let store = store();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            assert!(check(&store, "k", 3, window).await.unwrap().is_allowed());
        }
        assert!(!check(&store, "k", 3, window).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn window_slides_rather_than_resets() {
        let store = store();
        let window = Duration::from_millis(100);

        assert!(check(&store, "k", 2, window).await.unwrap().is_allowed());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(check(&store, "k", 2, window).await.unwrap().is_allowed());
        // First member still inside the trailing window.
        assert!(!check(&store, "k", 2, window).await.unwrap().is_allowed());

        // After the first member ages out, one slot frees up.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(check(&store, "k", 2, window).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn denied_retry_after_tracks_oldest_member() {
        let store = store();
        let window = Duration::from_secs(60);

        assert!(check(&store, "k", 1, window).await.unwrap().is_allowed());
        let denied = check(&store, "k", 1, window).await.unwrap();
        let retry = denied.retry_after().expect("denied carries retry_after");
        assert!(retry <= window);
        assert!(retry > Duration::from_secs(50));
    }
}
