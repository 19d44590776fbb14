//! Throttle and debounce: a single marker per key, TTL = interval.
//!
//! Both admit at most one action per interval via the same atomic
//! `set_if_absent`; they differ only in how a suppressed call reads.
//! Throttle rejects it (the caller backs off), debounce coalesces it (the
//! caller drops it silently). The tri-state [`Verdict`] carries the
//! difference.

use std::sync::Arc;
use std::time::Duration;

use crate::store::{StoreClient, StoreResult};

use super::Verdict;

pub async fn check_throttle(
    store: &Arc<dyn StoreClient>,
    key: &str,
    interval: Duration,
) -> StoreResult<Verdict> {
    if acquire_marker(store, key, interval).await? {
        Ok(Verdict::Allowed { remaining: None })
    } else {
        let retry_after = store.ttl(key).await?;
        Ok(Verdict::Denied { retry_after })
    }
}

pub async fn check_debounce(
    store: &Arc<dyn StoreClient>,
    key: &str,
    interval: Duration,
) -> StoreResult<Verdict> {
    if acquire_marker(store, key, interval).await? {
        Ok(Verdict::Allowed { remaining: None })
    } else {
        Ok(Verdict::Coalesced)
    }
}

async fn acquire_marker(
    store: &Arc<dyn StoreClient>,
    key: &str,
    interval: Duration,
) -> StoreResult<bool> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    store
        .set_if_absent(key, &now_ms.to_string(), interval)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> Arc<dyn StoreClient> {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn throttle_admits_one_per_interval() {
        let store = store();
        let interval = Duration::from_millis(100);

        assert!(check_throttle(&store, "k", interval).await.unwrap().is_allowed());

        let second = check_throttle(&store, "k", interval).await.unwrap();
        assert!(matches!(second, Verdict::Denied { .. }));
        assert!(second.retry_after().unwrap() <= interval);

        tokio::time::sleep(Duration::from_millis(130)).await;
        assert!(check_throttle(&store, "k", interval).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn debounce_coalesces_instead_of_denying() {
        let store = store();
        let interval = Duration::from_millis(100);

        assert!(check_debounce(&store, "k", interval).await.unwrap().is_allowed());

        let second = check_debounce(&store, "k", interval).await.unwrap();
        assert_eq!(second, Verdict::Coalesced);
        assert!(!second.is_allowed());
        assert!(second.is_coalesced());

        tokio::time::sleep(Duration::from_millis(130)).await;
        assert!(check_debounce(&store, "k", interval).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn throttle_and_debounce_markers_are_per_key() {
        let store = store();
        let interval = Duration::from_secs(60);
        assert!(check_throttle(&store, "a", interval).await.unwrap().is_allowed());
        assert!(check_throttle(&store, "b", interval).await.unwrap().is_allowed());
    }
}
