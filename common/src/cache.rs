//! Bounded, single-flight TTL cache (C2, spec.md §4.6).
//!
//! No cache crate appears in the teacher's dependency stack, so this is
//! hand-rolled the way the teacher hand-rolls its other concurrency
//! primitives (a `Semaphore` + `Mutex`-guarded pool, mirroring
//! `RerankerPool` in `retrieval-pipeline/src/reranking`): a
//! `Mutex<HashMap<Fingerprint, Slot<T>>>` where a `Slot` is either
//! `Pending` (a `watch::Receiver` the rest of the callers await) or `Ready`,
//! giving single-flight coalescing without a third-party cache crate.

use std::{
    collections::HashMap,
    future::Future,
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex};

use crate::error::AppError;

/// A deterministic key over (corpus version, operation kind, normalized
/// parameters), per spec.md §4.6 and the GLOSSARY's "Fingerprint" entry.
pub type Fingerprint = String;

pub fn fingerprint(corpus_version: u64, operation_kind: &str, params: &[(&str, &str)]) -> Fingerprint {
    let mut sorted = params.to_vec();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(corpus_version.to_le_bytes());
    hasher.update(operation_kind.as_bytes());
    for (k, v) in sorted {
        hasher.update(k.as_bytes());
        hasher.update(0u8.to_le_bytes());
        hasher.update(v.as_bytes());
        hasher.update(0u8.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
struct Entry<T> {
    payload: T,
    created_at: Instant,
    ttl: Duration,
    last_used: Instant,
}

impl<T> Entry<T> {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

enum Slot<T> {
    Pending(watch::Receiver<Option<T>>),
    Ready(Entry<T>),
}

/// Single-flight, bounded, TTL cache keyed by [`Fingerprint`].
///
/// Eviction is TTL-first, then least-recently-used down to `max_entries`
/// (spec.md §4.6's "Eviction is TTL-first, then LRU to the size bound").
pub struct Cache<T> {
    slots: Mutex<HashMap<Fingerprint, Slot<T>>>,
    max_entries: usize,
}

impl<T: Clone + Send + Sync + 'static> Cache<T> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Direct lookup, ignoring in-flight computations. Returns `None` on a
    /// miss or an expired entry (the expired entry is dropped).
    pub async fn get(&self, key: &Fingerprint) -> Option<T> {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(key) {
            Some(Slot::Ready(entry)) => {
                if entry.is_expired() {
                    slots.remove(key);
                    None
                } else {
                    entry.last_used = Instant::now();
                    Some(entry.payload.clone())
                }
            }
            _ => None,
        }
    }

    pub async fn put(&self, key: Fingerprint, value: T, ttl: Duration) {
        let mut slots = self.slots.lock().await;
        Self::insert_ready(&mut slots, self.max_entries, key, value, ttl);
    }

    fn insert_ready(
        slots: &mut HashMap<Fingerprint, Slot<T>>,
        max_entries: usize,
        key: Fingerprint,
        value: T,
        ttl: Duration,
    ) {
        let now = Instant::now();
        slots.insert(
            key,
            Slot::Ready(Entry {
                payload: value,
                created_at: now,
                ttl,
                last_used: now,
            }),
        );
        Self::evict_to_bound(slots, max_entries);
    }

    fn evict_to_bound(slots: &mut HashMap<Fingerprint, Slot<T>>, max_entries: usize) {
        // TTL-first: drop anything already expired regardless of bound.
        slots.retain(|_, slot| !matches!(slot, Slot::Ready(e) if e.is_expired()));

        if slots.len() <= max_entries {
            return;
        }
        let mut by_age: Vec<(Fingerprint, Instant)> = slots
            .iter()
            .filter_map(|(k, v)| match v {
                Slot::Ready(e) => Some((k.clone(), e.last_used)),
                Slot::Pending(_) => None,
            })
            .collect();
        by_age.sort_by_key(|(_, last_used)| *last_used);
        let overflow = slots.len().saturating_sub(max_entries);
        for (key, _) in by_age.into_iter().take(overflow) {
            slots.remove(&key);
        }
    }

    /// Remove every entry whose key satisfies `predicate`. O(n), used on a
    /// corpus-version bump (spec.md §4.6).
    pub async fn invalidate(&self, predicate: impl Fn(&Fingerprint) -> bool) {
        let mut slots = self.slots.lock().await;
        slots.retain(|k, _| !predicate(k));
    }

    /// Single-flight get-or-compute: concurrent callers for the same missing
    /// key cause exactly one invocation of `compute`; the rest await its
    /// result (spec.md §4.6).
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: Fingerprint,
        ttl: Duration,
        compute: F,
    ) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        enum Role<T> {
            Ready(T),
            Await(watch::Receiver<Option<T>>),
            Lead(watch::Sender<Option<T>>),
        }

        let role = {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::Ready(entry)) if !entry.is_expired() => {
                    Role::Ready(entry.payload.clone())
                }
                Some(Slot::Pending(rx)) => Role::Await(rx.clone()),
                _ => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(key.clone(), Slot::Pending(rx));
                    Role::Lead(tx)
                }
            }
        };

        match role {
            Role::Ready(value) => Ok(value),
            Role::Await(mut rx) => loop {
                if let Some(value) = rx.borrow().clone() {
                    return Ok(value);
                }
                if rx.changed().await.is_err() {
                    // The leader dropped without ever sending a value
                    // (it failed); fall back to computing ourselves.
                    return compute().await;
                }
            },
            Role::Lead(tx) => {
                let result = compute().await;
                let mut slots = self.slots.lock().await;
                match &result {
                    Ok(value) => {
                        let _ = tx.send(Some(value.clone()));
                        Self::insert_ready(&mut slots, self.max_entries, key, value.clone(), ttl);
                    }
                    Err(_) => {
                        slots.remove(&key);
                        // dropping `tx` without sending signals failure to
                        // any waiters still polling `changed()`.
                    }
                }
                result
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fingerprint_is_deterministic_and_order_independent() {
        let a = fingerprint(3, "search", &[("k", "5"), ("mode", "HYBRID")]);
        let b = fingerprint(3, "search", &[("mode", "HYBRID"), ("k", "5")]);
        assert_eq!(a, b);

        let c = fingerprint(4, "search", &[("k", "5"), ("mode", "HYBRID")]);
        assert_ne!(a, c, "corpus version must be part of the key");
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache: Cache<String> = Cache::new(10);
        let key = fingerprint(1, "q", &[("text", "hello")]);
        cache
            .put(key.clone(), "result".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get(&key).await, Some("result".to_string()));
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_read() {
        let cache: Cache<u32> = Cache::new(10);
        let key = "k".to_string();
        cache.put(key.clone(), 1, Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.get(&key).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn lru_eviction_trims_to_bound() {
        let cache: Cache<u32> = Cache::new(2);
        cache.put("a".into(), 1, Duration::from_secs(60)).await;
        cache.put("b".into(), 2, Duration::from_secs(60)).await;
        // touch "a" so it's more recently used than "b"
        assert_eq!(cache.get(&"a".to_string()).await, Some(1));
        cache.put("c".into(), 3, Duration::from_secs(60)).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&"b".to_string()).await, None, "b was least-recently-used");
        assert_eq!(cache.get(&"a".to_string()).await, Some(1));
        assert_eq!(cache.get(&"c".to_string()).await, Some(3));
    }

    #[tokio::test]
    async fn invalidate_removes_matching_keys_only() {
        let cache: Cache<u32> = Cache::new(10);
        cache.put("filter:a".into(), 1, Duration::from_secs(60)).await;
        cache.put("filter:b".into(), 2, Duration::from_secs(60)).await;
        cache.put("other".into(), 3, Duration::from_secs(60)).await;

        cache.invalidate(|k| k.starts_with("filter:")).await;

        assert_eq!(cache.get(&"filter:a".to_string()).await, None);
        assert_eq!(cache.get(&"filter:b".to_string()).await, None);
        assert_eq!(cache.get(&"other".to_string()).await, Some(3));
    }

    #[tokio::test]
    async fn concurrent_gets_coalesce_into_one_computation() {
        let cache: Arc<Cache<u32>> = Arc::new(Cache::new(10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("key".to_string(), Duration::from_secs(60), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "only the single-flight leader should compute"
        );
    }
}
