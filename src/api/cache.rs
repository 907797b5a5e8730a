//! Query cache with request de-duplication and tag invalidation.
//!
//! Each read is keyed by a [`QueryKey`] (domain tag + endpoint + sorted
//! parameters). Per key the cache holds one of `Idle`, `Loading`, `Success`
//! or `Error`, at most one in-flight request shared by every caller, and a
//! subscriber count that drives eviction.
//!
//! Invalidation detaches the in-flight request: callers already waiting on
//! it still get its answer, but the answer is never stored, so any read
//! issued after a mutation succeeded goes back to the server.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::error::ApiError;

/// Outcome of a cached read. Errors are shared between all waiters.
pub type QueryResult<T> = Result<Arc<T>, Arc<ApiError>>;

type CachedValue = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue, Arc<ApiError>>>>;

/// Invalidation group a cached read belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheTag {
    Catalog,
    Auth,
    Lease,
    Payment,
}

/// Deterministic request signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    tag: CacheTag,
    endpoint: &'static str,
    params: BTreeMap<String, String>,
}

impl QueryKey {
    pub fn new(tag: CacheTag, endpoint: &'static str) -> Self {
        Self {
            tag,
            endpoint,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn tag(&self) -> CacheTag {
        self.tag
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.tag, self.endpoint)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

/// Observable state of one signature.
#[derive(Debug)]
pub enum QueryStatus<T> {
    Idle,
    Loading,
    Success(Arc<T>),
    Error(Arc<ApiError>),
}

impl<T> QueryStatus<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryStatus::Loading)
    }

    pub fn data(&self) -> Option<&Arc<T>> {
        match self {
            QueryStatus::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Arc<ApiError>> {
        match self {
            QueryStatus::Error(error) => Some(error),
            _ => None,
        }
    }
}

enum Slot {
    Idle,
    Loading,
    Success(CachedValue),
    Error(Arc<ApiError>),
}

/// The one request running for a key.
struct InFlight {
    id: u64,
    fetch: SharedFetch,
    /// Callers currently awaiting `fetch`.
    waiters: usize,
}

struct Entry {
    slot: Slot,
    in_flight: Option<InFlight>,
    subscribers: usize,
    unused_since: Option<Instant>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            slot: Slot::Idle,
            in_flight: None,
            subscribers: 0,
            unused_since: Some(Instant::now()),
        }
    }
}

impl Entry {
    fn evictable(&self, now: Instant, keep_unused: Duration) -> bool {
        self.subscribers == 0
            && self.in_flight.is_none()
            && self
                .unused_since
                .is_some_and(|since| now.saturating_duration_since(since) >= keep_unused)
    }
}

#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    next_fetch_id: Mutex<u64>,
    keep_unused: Duration,
    revision: watch::Sender<u64>,
}

impl QueryCache {
    pub fn new(keep_unused: Duration) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                next_fetch_id: Mutex::new(0),
                keep_unused,
                revision,
            }),
        }
    }

    /// Cached result for `key`, or the result of the one request in flight
    /// for it, or a new request made with `fetcher`.
    pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> QueryResult<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.run(key, fetcher, false).await
    }

    /// Like [`fetch`](Self::fetch) but ignores a cached result.
    ///
    /// Still joins a request that is already in flight.
    pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> QueryResult<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        self.run(key, fetcher, true).await
    }

    async fn run<T, F, Fut>(&self, key: &QueryKey, fetcher: F, force: bool) -> QueryResult<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let (fetch_id, shared, started) = {
            let mut entries = self.inner.entries.lock();
            self.evict_locked(&mut entries, Instant::now());
            let entry = entries.entry(key.clone()).or_default();

            if !force {
                match &entry.slot {
                    Slot::Success(value) => {
                        tracing::trace!(key = %key, "Cache hit");
                        return downcast(value.clone(), key);
                    }
                    Slot::Error(error) => return Err(error.clone()),
                    Slot::Idle | Slot::Loading => {}
                }
            }

            match &mut entry.in_flight {
                Some(flight) => {
                    tracing::trace!(key = %key, "Joining in-flight request");
                    flight.waiters += 1;
                    (flight.id, flight.fetch.clone(), false)
                }
                None => {
                    let fetch_id = self.next_fetch_id();
                    let request = fetcher();
                    let shared = async move {
                        request
                            .await
                            .map(|value| Arc::new(value) as CachedValue)
                            .map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    entry.in_flight = Some(InFlight {
                        id: fetch_id,
                        fetch: shared.clone(),
                        waiters: 1,
                    });
                    entry.slot = Slot::Loading;
                    tracing::debug!(key = %key, "Cache miss, fetching");
                    (fetch_id, shared, true)
                }
            }
        };
        if started {
            self.bump();
        }

        // Releases the request if this caller is dropped before it resolves.
        let mut waiter = Waiter {
            cache: self,
            key,
            fetch_id,
            resolved: false,
        };
        let result = shared.await;
        waiter.resolved = true;

        let stored = {
            let mut entries = self.inner.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.in_flight.as_ref().is_some_and(|f| f.id == fetch_id) => {
                    entry.in_flight = None;
                    entry.slot = match &result {
                        Ok(value) => Slot::Success(value.clone()),
                        Err(error) => Slot::Error(error.clone()),
                    };
                    if entry.subscribers == 0 {
                        entry.unused_since = Some(Instant::now());
                    }
                    true
                }
                // Invalidated (or evicted) while in flight.
                _ => false,
            }
        };
        if stored {
            self.bump();
        }

        match result {
            Ok(value) => downcast(value, key),
            Err(error) => Err(error),
        }
    }

    /// Reset every entry carrying one of `tags`. Returns how many were reset.
    pub fn invalidate(&self, tags: &[CacheTag]) -> usize {
        let mut count = 0;
        {
            let mut entries = self.inner.entries.lock();
            for (key, entry) in entries.iter_mut() {
                if !tags.contains(&key.tag) {
                    continue;
                }
                entry.in_flight = None;
                entry.slot = Slot::Idle;
                count += 1;
            }
        }
        if count > 0 {
            tracing::debug!(tags = ?tags, entries = count, "Cache invalidated");
            self.bump();
        }
        count
    }

    pub fn status<T: Send + Sync + 'static>(&self, key: &QueryKey) -> QueryStatus<T> {
        let entries = self.inner.entries.lock();
        let Some(entry) = entries.get(key) else {
            return QueryStatus::Idle;
        };
        match &entry.slot {
            Slot::Idle => QueryStatus::Idle,
            Slot::Loading => QueryStatus::Loading,
            Slot::Success(value) => match downcast::<T>(value.clone(), key) {
                Ok(data) => QueryStatus::Success(data),
                Err(error) => QueryStatus::Error(error),
            },
            Slot::Error(error) => QueryStatus::Error(error.clone()),
        }
    }

    /// Register a consumer of `key`; the entry is kept while any exist.
    pub fn subscribe(&self, key: &QueryKey) -> Subscription {
        {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_default();
            entry.subscribers += 1;
            entry.unused_since = None;
        }
        Subscription {
            cache: self.clone(),
            key: key.clone(),
            revision: self.inner.revision.subscribe(),
            active: true,
        }
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .entries
            .lock()
            .get(key)
            .map_or(0, |entry| entry.subscribers)
    }

    /// Drop unused entries whose grace period has elapsed.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.inner.entries.lock();
        self.evict_locked(&mut entries, Instant::now())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A caller stopped waiting on `fetch_id`. The last one to leave an
    /// unresolved request resets the entry so it can be fetched again.
    fn abandon(&self, key: &QueryKey, fetch_id: u64) {
        let reset = {
            let mut entries = self.inner.entries.lock();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            let Some(flight) = entry.in_flight.as_mut().filter(|f| f.id == fetch_id) else {
                return;
            };
            flight.waiters = flight.waiters.saturating_sub(1);
            if flight.waiters > 0 {
                return;
            }
            entry.in_flight = None;
            entry.slot = Slot::Idle;
            if entry.subscribers == 0 {
                entry.unused_since = Some(Instant::now());
            }
            true
        };
        if reset {
            tracing::debug!(key = %key, "Request abandoned by every caller");
            self.bump();
        }
    }

    fn release(&self, key: &QueryKey) {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.unused_since = Some(Instant::now());
            }
        }
    }

    fn evict_locked(&self, entries: &mut HashMap<QueryKey, Entry>, now: Instant) -> usize {
        let before = entries.len();
        let keep_unused = self.inner.keep_unused;
        entries.retain(|_, entry| !entry.evictable(now, keep_unused));
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::trace!(evicted, "Evicted unused cache entries");
        }
        evicted
    }

    fn next_fetch_id(&self) -> u64 {
        let mut next = self.inner.next_fetch_id.lock();
        *next += 1;
        *next
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }
}

struct Waiter<'a> {
    cache: &'a QueryCache,
    key: &'a QueryKey,
    fetch_id: u64,
    resolved: bool,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.cache.abandon(self.key, self.fetch_id);
        }
    }
}

/// Ref-counted interest in one signature.
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) releases the
/// count exactly once.
pub struct Subscription {
    cache: QueryCache,
    key: QueryKey,
    revision: watch::Receiver<u64>,
    active: bool,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn status<T: Send + Sync + 'static>(&self) -> QueryStatus<T> {
        self.cache.status(&self.key)
    }

    /// Wait until the cache changes. Returns false once unsubscribed.
    pub async fn changed(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.revision.changed().await.is_ok()
    }

    pub fn unsubscribe(&mut self) {
        if std::mem::take(&mut self.active) {
            self.cache.release(&self.key);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

fn downcast<T: Send + Sync + 'static>(value: CachedValue, key: &QueryKey) -> QueryResult<T> {
    value.downcast::<T>().map_err(|_| {
        Arc::new(ApiError::Decode {
            endpoint: key.to_string(),
            reason: "cached value has a different type".to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, ApiError>> {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[test]
    fn key_display_is_sorted_and_stable() {
        let a = QueryKey::new(CacheTag::Lease, "leases")
            .param("userId", "42")
            .param("page", "1");
        let b = QueryKey::new(CacheTag::Lease, "leases")
            .param("page", "1")
            .param("userId", "42");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "Lease:leases?page=1&userId=42");
    }

    #[tokio::test]
    async fn concurrent_identical_reads_share_one_request() {
        let cache = QueryCache::new(Duration::from_secs(60));
        let key = QueryKey::new(CacheTag::Catalog, "cars");
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            cache.fetch(&key, counted(&calls, 7)),
            cache.fetch(&key, counted(&calls, 8)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(*a, 7);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn invalidation_forces_refetch() {
        let cache = QueryCache::new(Duration::from_secs(60));
        let key = QueryKey::new(CacheTag::Lease, "leases");
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(*cache.fetch(&key, counted(&calls, 1)).await.unwrap(), 1);
        assert_eq!(*cache.fetch(&key, counted(&calls, 2)).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.invalidate(&[CacheTag::Catalog]), 0);
        assert_eq!(cache.invalidate(&[CacheTag::Lease]), 1);
        assert!(matches!(cache.status::<u32>(&key), QueryStatus::Idle));

        assert_eq!(*cache.fetch(&key, counted(&calls, 3)).await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn result_of_detached_request_is_not_cached() {
        let cache = QueryCache::new(Duration::from_secs(60));
        let key = QueryKey::new(CacheTag::Lease, "leases");
        let calls = Arc::new(AtomicUsize::new(0));

        let stale = cache.fetch(&key, counted(&calls, 1));
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cache.invalidate(&[CacheTag::Lease]);
        };
        let (stale, _) = tokio::join!(stale, invalidate);

        // The caller already waiting still gets the old answer...
        assert_eq!(*stale.unwrap(), 1);
        // ...but it was not stored.
        assert!(matches!(cache.status::<u32>(&key), QueryStatus::Idle));
        assert_eq!(*cache.fetch(&key, counted(&calls, 2)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn errors_are_cached_until_refetch() {
        let cache = QueryCache::new(Duration::from_secs(60));
        let key = QueryKey::new(CacheTag::Catalog, "brands");

        let failed: QueryResult<u32> = cache
            .fetch(&key, || async {
                Err(ApiError::Status {
                    status: 500,
                    message: None,
                })
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.status::<u32>(&key).error().is_some());

        let again: QueryResult<u32> = cache.fetch(&key, || async { Ok(1) }).await;
        assert!(again.is_err());

        let retried: QueryResult<u32> = cache.refetch(&key, || async { Ok(1) }).await;
        assert_eq!(*retried.unwrap(), 1);
    }

    #[tokio::test]
    async fn subscriptions_pin_entries_until_released() {
        let cache = QueryCache::new(Duration::ZERO);
        let key = QueryKey::new(CacheTag::Catalog, "cars");

        let mut first = cache.subscribe(&key);
        let second = cache.subscribe(&key);
        cache.fetch(&key, || async { Ok(1u32) }).await.unwrap();
        assert_eq!(cache.subscriber_count(&key), 2);
        assert_eq!(cache.evict_expired(), 0);

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(cache.subscriber_count(&key), 1);

        drop(second);
        assert_eq!(cache.subscriber_count(&key), 0);
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn subscription_observes_status_changes() {
        let cache = QueryCache::new(Duration::from_secs(60));
        let key = QueryKey::new(CacheTag::Catalog, "cars");
        let mut subscription = cache.subscribe(&key);
        assert!(matches!(subscription.status::<u32>(), QueryStatus::Idle));

        cache.fetch(&key, || async { Ok(5u32) }).await.unwrap();
        assert!(subscription.changed().await);
        assert_eq!(subscription.status::<u32>().data().map(|v| **v), Some(5));

        subscription.unsubscribe();
        assert!(!subscription.changed().await);
    }

    #[tokio::test]
    async fn cancelled_caller_releases_the_request() {
        let cache = QueryCache::new(Duration::ZERO);
        let key = QueryKey::new(CacheTag::Lease, "leases");
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = cache.subscribe(&key);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), cache.fetch(&key, counted(&calls, 1)))
                .await;
        assert!(abandoned.is_err());
        assert!(matches!(subscription.status::<u32>(), QueryStatus::Idle));

        assert_eq!(*cache.fetch(&key, counted(&calls, 2)).await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(subscription);
        assert_eq!(cache.evict_expired(), 1);
    }

    #[tokio::test]
    async fn remaining_waiter_still_stores_the_result() {
        let cache = QueryCache::new(Duration::from_secs(60));
        let key = QueryKey::new(CacheTag::Catalog, "brands");
        let calls = Arc::new(AtomicUsize::new(0));

        let (first, second) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(5), cache.fetch(&key, counted(&calls, 1))),
            cache.fetch(&key, counted(&calls, 2)),
        );

        assert!(first.is_err());
        assert_eq!(*second.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.status::<u32>(&key).data().map(|v| **v), Some(1));
    }

    #[tokio::test]
    async fn mismatched_type_is_reported_as_decode_error() {
        let cache = QueryCache::new(Duration::from_secs(60));
        let key = QueryKey::new(CacheTag::Catalog, "cars");
        cache.fetch(&key, || async { Ok(5u32) }).await.unwrap();

        let wrong: QueryResult<String> = cache.fetch(&key, || async { Ok(String::new()) }).await;
        assert!(matches!(
            wrong.unwrap_err().as_ref(),
            ApiError::Decode { .. }
        ));
    }
}
