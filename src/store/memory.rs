//! # In-Memory Store
//!
//! Reference [`StoreClient`] used by the test suites and local development.
//! A single mutex guards the keyspace so every operation, including the
//! scripted check-and-updates, is atomic exactly the way a server-side
//! script would be. TTLs are bookkept lazily: an expired entry is dropped
//! the next time it is touched.
//!
//! The store can also simulate an outage (`set_failing`) so fail-open and
//! circuit-breaker behavior is testable without a real network partition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::client::{AtomicScript, ScriptOutcome, StoreClient, StoreError, StoreResult};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
enum Stored {
    Text(String),
    /// Sorted-set of (timestamp_ms, member), ordered by timestamp.
    Window(Vec<(i64, String)>),
    Bucket {
        tokens: u32,
        last_refill_ms: i64,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    value: Stored,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at_ms.map_or(true, |at| at > now)
    }
}

/// Mutex-guarded in-process keyspace implementing [`StoreClient`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
    fail_requests: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage: while set, every operation returns a
    /// connection error.
    pub fn set_failing(&self, failing: bool) {
        self.fail_requests.store(failing, Ordering::SeqCst);
    }

    /// Number of live keys (test helper).
    pub fn live_keys(&self) -> usize {
        let now = now_ms();
        self.inner.lock().values().filter(|e| e.is_live(now)).count()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            Err(StoreError::Connection("simulated store outage".into()))
        } else {
            Ok(())
        }
    }

    /// Remove the entry if it expired; returns whether a live entry remains.
    fn purge_if_expired(map: &mut HashMap<String, Entry>, key: &str, now: i64) -> bool {
        match map.get(key) {
            Some(entry) if entry.is_live(now) => true,
            Some(_) => {
                map.remove(key);
                false
            }
            None => false,
        }
    }

    fn expiry(now: i64, ttl: Duration) -> i64 {
        now + ttl.as_millis() as i64
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        if !Self::purge_if_expired(&mut map, key, now) {
            return Ok(None);
        }
        match &map[key].value {
            Stored::Text(text) => Ok(Some(text.clone())),
            other => Err(StoreError::InvalidValue(format!(
                "key {key} holds non-text state: {other:?}"
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        map.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at_ms: ttl.map(|t| Self::expiry(now, t)),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        let live = Self::purge_if_expired(&mut map, key, now);
        if live {
            map.remove(key);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        let mut removed = 0;
        for key in keys {
            if Self::purge_if_expired(&mut map, key, now) {
                map.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        if Self::purge_if_expired(&mut map, key, now) {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry {
                value: Stored::Text(value.to_string()),
                expires_at_ms: Some(Self::expiry(now, ttl)),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        if !Self::purge_if_expired(&mut map, key, now) {
            map.insert(
                key.to_string(),
                Entry {
                    value: Stored::Text("1".to_string()),
                    expires_at_ms: None,
                },
            );
            return Ok(1);
        }
        let entry = map.get_mut(key).ok_or_else(|| {
            StoreError::Command(format!("key {key} vanished during increment"))
        })?;
        match &mut entry.value {
            Stored::Text(text) => {
                let current: i64 = text.parse().map_err(|_| {
                    StoreError::InvalidValue(format!("key {key} is not an integer"))
                })?;
                let next = current + 1;
                *text = next.to_string();
                Ok(next)
            }
            other => Err(StoreError::InvalidValue(format!(
                "key {key} holds non-counter state: {other:?}"
            ))),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        if !Self::purge_if_expired(&mut map, key, now) {
            return Ok(false);
        }
        if let Some(entry) = map.get_mut(key) {
            entry.expires_at_ms = Some(Self::expiry(now, ttl));
            return Ok(true);
        }
        Ok(false)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        if !Self::purge_if_expired(&mut map, key, now) {
            return Ok(None);
        }
        Ok(map[key]
            .expires_at_ms
            .map(|at| Duration::from_millis((at - now).max(0) as u64)))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let now = now_ms();
        let mut map = self.inner.lock();
        Ok(Self::purge_if_expired(&mut map, key, now))
    }

    async fn scan(
        &self,
        pattern: &str,
        cursor: u64,
        count: usize,
    ) -> StoreResult<(Vec<String>, u64)> {
        self.check_available()?;
        let now = now_ms();
        let map = self.inner.lock();

        let matches = |key: &str| -> bool {
            if let Some(prefix) = pattern.strip_suffix('*') {
                key.starts_with(prefix)
            } else {
                key == pattern
            }
        };

        let mut keys: Vec<String> = map
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_unstable();

        let start = cursor as usize;
        if start >= keys.len() {
            return Ok((Vec::new(), 0));
        }
        let end = (start + count.max(1)).min(keys.len());
        let page = keys[start..end].to_vec();
        let next = if end == keys.len() { 0 } else { end as u64 };
        Ok((page, next))
    }

    async fn eval_atomic(&self, key: &str, script: AtomicScript) -> StoreResult<ScriptOutcome> {
        self.check_available()?;
        let wall_now = now_ms();
        let mut map = self.inner.lock();

        match script {
            AtomicScript::FixedWindow { limit, window } => {
                let live = Self::purge_if_expired(&mut map, key, wall_now);
                let count = if live {
                    let entry = map.get_mut(key).ok_or_else(|| {
                        StoreError::Command(format!("key {key} vanished during increment"))
                    })?;
                    match &mut entry.value {
                        Stored::Text(text) => {
                            let current: i64 = text.parse().map_err(|_| {
                                StoreError::InvalidValue(format!("key {key} is not an integer"))
                            })?;
                            let next = current + 1;
                            *text = next.to_string();
                            next
                        }
                        other => {
                            return Err(StoreError::InvalidValue(format!(
                                "key {key} holds non-counter state: {other:?}"
                            )))
                        }
                    }
                } else {
                    map.insert(
                        key.to_string(),
                        Entry {
                            value: Stored::Text("1".to_string()),
                            expires_at_ms: Some(Self::expiry(wall_now, window)),
                        },
                    );
                    1
                };

                if count as u64 <= u64::from(limit) {
                    Ok(ScriptOutcome::Allowed {
                        remaining: limit.saturating_sub(count as u32),
                    })
                } else {
                    let retry = map[key]
                        .expires_at_ms
                        .map(|at| Duration::from_millis((at - wall_now).max(0) as u64))
                        .unwrap_or(window);
                    Ok(ScriptOutcome::Denied { retry_after: retry })
                }
            }

            AtomicScript::SlidingWindow {
                limit,
                window,
                now_ms: now,
                member,
            } => {
                let window_ms = window.as_millis() as i64;
                let live = Self::purge_if_expired(&mut map, key, wall_now);
                let entry = if live {
                    map.get_mut(key).ok_or_else(|| {
                        StoreError::Command(format!("key {key} vanished during update"))
                    })?
                } else {
                    map.entry(key.to_string()).or_insert(Entry {
                        value: Stored::Window(Vec::new()),
                        expires_at_ms: None,
                    })
                };
                let members = match &mut entry.value {
                    Stored::Window(members) => members,
                    other => {
                        return Err(StoreError::InvalidValue(format!(
                            "key {key} holds non-window state: {other:?}"
                        )))
                    }
                };

                // Members at exactly now - window fall outside the window.
                members.retain(|(ts, _)| *ts > now - window_ms);

                if (members.len() as u64) < u64::from(limit) {
                    let position = members.partition_point(|(ts, _)| *ts <= now);
                    members.insert(position, (now, member));
                    let count = members.len() as u32;
                    entry.expires_at_ms = Some(Self::expiry(wall_now, window));
                    Ok(ScriptOutcome::Allowed {
                        remaining: limit.saturating_sub(count),
                    })
                } else {
                    let oldest = members.first().map(|(ts, _)| *ts).unwrap_or(now);
                    let retry_ms = (oldest + window_ms - now).max(0) as u64;
                    Ok(ScriptOutcome::Denied {
                        retry_after: Duration::from_millis(retry_ms),
                    })
                }
            }

            AtomicScript::TokenBucket {
                capacity,
                refill_amount,
                refill_interval,
                now_ms: now,
            } => {
                let interval_ms = refill_interval.as_millis() as i64;
                let live = Self::purge_if_expired(&mut map, key, wall_now);
                let (mut tokens, mut last) = if live {
                    match &map[key].value {
                        Stored::Bucket {
                            tokens,
                            last_refill_ms,
                        } => (u64::from(*tokens), *last_refill_ms),
                        other => {
                            return Err(StoreError::InvalidValue(format!(
                                "key {key} holds non-bucket state: {other:?}"
                            )))
                        }
                    }
                } else {
                    (u64::from(capacity), now)
                };

                // Refill by whole intervals only; the remainder stays on the
                // clock so sustained polling cannot starve the bucket.
                let elapsed = (now - last).max(0);
                if interval_ms > 0 {
                    let ticks = elapsed / interval_ms;
                    if ticks > 0 {
                        tokens = tokens
                            .saturating_add(ticks as u64 * u64::from(refill_amount))
                            .min(u64::from(capacity));
                        last += ticks * interval_ms;
                    }
                }

                let outcome = if tokens >= 1 {
                    tokens -= 1;
                    ScriptOutcome::Allowed {
                        remaining: tokens as u32,
                    }
                } else {
                    let retry_ms = (last + interval_ms - now).max(0) as u64;
                    ScriptOutcome::Denied {
                        retry_after: Duration::from_millis(retry_ms),
                    }
                };

                map.insert(
                    key.to_string(),
                    Entry {
                        value: Stored::Bucket {
                            tokens: tokens as u32,
                            last_refill_ms: last,
                        },
                        expires_at_ms: Some(Self::expiry(wall_now, refill_interval * 2)),
                    },
                );
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("user:1", "\"alice\"", None).await.unwrap();
        assert_eq!(store.get("user:1").await.unwrap().as_deref(), Some("\"alice\""));
    }

    #[tokio::test]
    async fn ttl_expiry_is_lazy_but_effective() {
        let store = MemoryStore::new();
        store
            .set("ephemeral", "1", Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(store.exists("ephemeral").await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!store.exists("ephemeral").await.unwrap());
        assert_eq!(store.get("ephemeral").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive_until_expiry() {
        let store = MemoryStore::new();
        assert!(store
            .set_if_absent("lock:k", "1", Duration::from_millis(40))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent("lock:k", "1", Duration::from_millis(40))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store
            .set_if_absent("lock:k", "1", Duration::from_millis(40))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn incr_starts_at_one_and_counts() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
        assert_eq!(store.incr("counter").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.delete("k").await.unwrap(), 1);
        assert_eq!(store.delete("k").await.unwrap(), 0);
        assert_eq!(store.delete("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn scan_pages_through_matches_only() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.set(&format!("user:{i}"), "x", None).await.unwrap();
        }
        store.set("session:1", "x", None).await.unwrap();

        let mut collected = Vec::new();
        let mut cursor = 0;
        loop {
            let (page, next) = store.scan("user:*", cursor, 2).await.unwrap();
            assert!(page.len() <= 2);
            collected.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        collected.sort();
        assert_eq!(
            collected,
            vec!["user:0", "user:1", "user:2", "user:3", "user:4"]
        );
    }

    #[tokio::test]
    async fn sliding_window_boundary_member_is_pruned() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        let base = 1_000_000;

        let first = store
            .eval_atomic(
                "rate:k",
                AtomicScript::SlidingWindow {
                    limit: 1,
                    window,
                    now_ms: base,
                    member: "a".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(first, ScriptOutcome::Allowed { remaining: 0 });

        // Exactly window later: the old member sits on the boundary and is
        // outside the window, so the call is admitted.
        let second = store
            .eval_atomic(
                "rate:k",
                AtomicScript::SlidingWindow {
                    limit: 1,
                    window,
                    now_ms: base + 60_000,
                    member: "b".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(second, ScriptOutcome::Allowed { remaining: 0 });
    }

    #[tokio::test]
    async fn sliding_window_denial_consumes_no_capacity() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        let base = 1_000_000;

        for i in 0..2 {
            let outcome = store
                .eval_atomic(
                    "rate:k",
                    AtomicScript::SlidingWindow {
                        limit: 2,
                        window,
                        now_ms: base + i,
                        member: format!("m{i}"),
                    },
                )
                .await
                .unwrap();
            assert!(matches!(outcome, ScriptOutcome::Allowed { .. }));
        }

        // Denied calls must not extend the throttled period.
        for i in 0..10 {
            let outcome = store
                .eval_atomic(
                    "rate:k",
                    AtomicScript::SlidingWindow {
                        limit: 2,
                        window,
                        now_ms: base + 1_000 + i,
                        member: format!("d{i}"),
                    },
                )
                .await
                .unwrap();
            assert!(matches!(outcome, ScriptOutcome::Denied { .. }));
        }

        let after_window = store
            .eval_atomic(
                "rate:k",
                AtomicScript::SlidingWindow {
                    limit: 2,
                    window,
                    now_ms: base + 61_000,
                    member: "late".into(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(after_window, ScriptOutcome::Allowed { .. }));
    }

    #[tokio::test]
    async fn token_bucket_sustained_polling_still_refills() {
        let store = MemoryStore::new();
        let script = |now: i64| AtomicScript::TokenBucket {
            capacity: 1,
            refill_amount: 1,
            refill_interval: Duration::from_secs(60),
            now_ms: now,
        };
        let base = 1_000_000;

        assert!(matches!(
            store.eval_atomic("bucket", script(base)).await.unwrap(),
            ScriptOutcome::Allowed { .. }
        ));

        // Poll every 10s; none of these may succeed, and none may push the
        // refill clock forward.
        for i in 1..=5 {
            let outcome = store
                .eval_atomic("bucket", script(base + i * 10_000))
                .await
                .unwrap();
            assert!(matches!(outcome, ScriptOutcome::Denied { .. }));
        }

        // One full interval after the initial consume, a token is back.
        assert!(matches!(
            store.eval_atomic("bucket", script(base + 60_000)).await.unwrap(),
            ScriptOutcome::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn token_bucket_caps_at_capacity() {
        let store = MemoryStore::new();
        let base = 1_000_000;
        // Long idle period: refill must cap at capacity, not accumulate.
        store
            .eval_atomic(
                "bucket",
                AtomicScript::TokenBucket {
                    capacity: 2,
                    refill_amount: 1,
                    refill_interval: Duration::from_secs(1),
                    now_ms: base,
                },
            )
            .await
            .unwrap();
        let outcome = store
            .eval_atomic(
                "bucket",
                AtomicScript::TokenBucket {
                    capacity: 2,
                    refill_amount: 1,
                    refill_interval: Duration::from_secs(1),
                    now_ms: base + 3_600_000,
                },
            )
            .await
            .unwrap();
        // Bucket refilled to 2, consumed 1.
        assert_eq!(outcome, ScriptOutcome::Allowed { remaining: 1 });
    }

    #[tokio::test]
    async fn simulated_outage_fails_every_operation() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        store.set_failing(true);
        assert!(store.get("k").await.is_err());
        assert!(store.ping().await.is_err());
        assert!(store.incr("c").await.is_err());
        store.set_failing(false);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
