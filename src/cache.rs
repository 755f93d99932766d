use anyhow::{anyhow, Result};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

type SharedFetch<V> = Shared<BoxFuture<'static, std::result::Result<V, Arc<anyhow::Error>>>>;

enum Slot<V> {
    Ready { value: V, fetched_at: Instant },
    Pending(SharedFetch<V>),
}

/// Keyed query cache: fresh values are served without fetching, and callers
/// asking for a key whose fetch is still running join that fetch. Errors are
/// never stored.
pub struct QueryCache<V> {
    slots: Mutex<HashMap<String, Slot<V>>>,
}

impl<V> Default for QueryCache<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &str, stale_after: Duration, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let pending = {
            let mut slots = self.lock();
            match slots.get(key) {
                Some(Slot::Ready { value, fetched_at }) if fetched_at.elapsed() < stale_after => {
                    debug!(key, "cache hit");
                    return Ok(value.clone());
                }
                Some(Slot::Pending(fut)) => {
                    debug!(key, "joining in-flight fetch");
                    fut.clone()
                }
                _ => {
                    let fut = fetch().map(|r| r.map_err(Arc::new)).boxed().shared();
                    slots.insert(key.to_string(), Slot::Pending(fut.clone()));
                    fut
                }
            }
        };

        let res = pending.clone().await;

        let mut slots = self.lock();
        let still_ours = matches!(slots.get(key), Some(Slot::Pending(f)) if Shared::ptr_eq(f, &pending));
        if still_ours {
            match &res {
                Ok(value) => {
                    slots.insert(
                        key.to_string(),
                        Slot::Ready {
                            value: value.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Err(_) => {
                    slots.remove(key);
                }
            }
        }

        res.map_err(|e| anyhow!("{e:#}"))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<V>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::task::yield_now().await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn fresh_values_are_not_refetched() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(600);

        assert_eq!(cache.get_or_fetch("k", ttl, counting_fetch(&calls, 1)).await.unwrap(), 1);
        assert_eq!(cache.get_or_fetch("k", ttl, counting_fetch(&calls, 2)).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_values_are_refetched() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        cache.get_or_fetch("k", Duration::ZERO, counting_fetch(&calls, 1)).await.unwrap();
        let v = cache.get_or_fetch("k", Duration::ZERO, counting_fetch(&calls, 2)).await.unwrap();
        assert_eq!(v, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(600);

        let (a, b) = tokio::join!(
            cache.get_or_fetch("k", ttl, counting_fetch(&calls, 7)),
            cache.get_or_fetch("k", ttl, counting_fetch(&calls, 8)),
        );
        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: QueryCache<u32> = QueryCache::new();
        let ttl = Duration::from_secs(600);

        let err = cache
            .get_or_fetch("k", ttl, || async { Err(anyhow!("Failed to fetch stations")) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to fetch stations"));

        let v = cache.get_or_fetch("k", ttl, || async { Ok(3) }).await.unwrap();
        assert_eq!(v, 3);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let cache = QueryCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(600);

        cache.get_or_fetch("a", ttl, counting_fetch(&calls, 1)).await.unwrap();
        let v = cache.get_or_fetch("b", ttl, counting_fetch(&calls, 2)).await.unwrap();
        assert_eq!(v, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
