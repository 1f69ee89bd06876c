//! In-memory cache engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::Shared;
use lru::LruCache;
use metrics::{counter, histogram};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::QueryError;
use crate::query::QueryKey;
use crate::telemetry::{
    METRIC_FETCH_MS, METRIC_QUERY_CANCELLED, METRIC_QUERY_DEDUP, METRIC_QUERY_EVICT,
    METRIC_QUERY_HIT, METRIC_QUERY_INVALIDATED, METRIC_QUERY_MISS,
};

use super::config::EngineConfig;
use super::events::{InvalidationEvent, InvalidationLog};
use super::lock::{mutex_lock, rw_read, rw_write};
use super::registry::ResourceRegistry;
use super::{CacheEngine, EntrySnapshot, ErasedData, FetchFuture, FetchOperation, QueryRegistration};

const SOURCE: &str = "engine::client";

#[derive(Default)]
struct Entry {
    data: Option<ErasedData>,
    error: Option<QueryError>,
    updated_at: Option<Instant>,
    invalidated: bool,
}

impl Entry {
    fn is_fresh(&self, stale_time: Duration, now: Instant) -> bool {
        !self.invalidated
            && self.data.is_some()
            && self
                .updated_at
                .is_some_and(|at| now.duration_since(at) < stale_time)
    }

    fn snapshot(&self, is_fetching: bool) -> EntrySnapshot {
        EntrySnapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            is_fetching,
            is_invalidated: self.invalidated,
            updated_at: self.updated_at,
        }
    }
}

type SharedFetch = Shared<FetchFuture>;

struct InFlight {
    id: u64,
    token: CancellationToken,
    result: SharedFetch,
    /// Set when an invalidation lands while the fetch runs. Its result is
    /// stored as invalidated and later reads do not join it.
    invalidated: bool,
}

/// In-memory [`CacheEngine`] with LRU capacity and request de-duplication.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: EngineConfig,
    entries: RwLock<LruCache<QueryKey, Entry>>,
    in_flight: Mutex<HashMap<QueryKey, InFlight>>,
    registry: ResourceRegistry,
    events: InvalidationLog,
    next_fetch_id: AtomicU64,
}

impl QueryClient {
    pub fn new(config: EngineConfig) -> Self {
        let inner = ClientInner {
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            in_flight: Mutex::new(HashMap::new()),
            registry: ResourceRegistry::new(),
            events: InvalidationLog::new(config.invalidation_history),
            next_fetch_id: AtomicU64::new(0),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        rw_read(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.inner.is_fetching(key)
    }

    /// Recent invalidation events, oldest first.
    pub fn recent_invalidations(&self) -> Vec<InvalidationEvent> {
        self.inner.events.recent()
    }

    /// Drop every entry and abort every in-flight fetch.
    pub fn clear(&self) {
        {
            let mut in_flight = mutex_lock(&self.inner.in_flight, SOURCE, "clear.in_flight");
            for (_, fetch) in in_flight.drain() {
                fetch.token.cancel();
            }
        }
        rw_write(&self.inner.entries, SOURCE, "clear.entries").clear();
        self.inner.registry.clear();
    }

    async fn load(&self, registration: QueryRegistration, supersede: bool) -> EntrySnapshot {
        let key = registration.key.clone();
        let result = self.join_or_start(registration, supersede).await;

        let mut snapshot = self.snapshot(&key).unwrap_or_default();
        match result {
            Ok(data) => {
                snapshot.data = Some(data);
                snapshot.error = None;
            }
            Err(err) => snapshot.error = Some(err),
        }
        snapshot
    }

    fn join_or_start(&self, registration: QueryRegistration, supersede: bool) -> SharedFetch {
        let QueryRegistration { key, fetch, .. } = registration;
        let mut in_flight = mutex_lock(&self.inner.in_flight, SOURCE, "join_or_start");

        if let Some(existing) = in_flight.get(&key) {
            if supersede {
                debug!(key = %key, fetch_id = existing.id, "Superseding in-flight fetch");
                existing.token.cancel();
            } else if existing.invalidated {
                // Existing waiters keep their result; the cache gets a new fetch.
                debug!(key = %key, fetch_id = existing.id, "Detached invalidated in-flight fetch");
            } else {
                counter!(METRIC_QUERY_DEDUP).increment(1);
                debug!(key = %key, fetch_id = existing.id, "Joined in-flight fetch");
                return existing.result.clone();
            }
        }

        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let task = tokio::spawn(run_fetch(
            Arc::clone(&self.inner),
            key.clone(),
            id,
            token.clone(),
            fetch,
        ));
        let inner: Weak<ClientInner> = Arc::downgrade(&self.inner);
        let task_key = key.clone();
        let result = async move {
            match task.await {
                Ok(result) => result,
                Err(err) => {
                    // The task never reached `settle`; release the slot so the
                    // next read can fetch again.
                    if let Some(inner) = inner.upgrade() {
                        inner.release(&task_key, id);
                    }
                    if err.is_cancelled() {
                        Err(QueryError::Cancelled)
                    } else {
                        warn!(key = %task_key, fetch_id = id, error = %err, "Fetch task failed");
                        Err(QueryError::transport(format!("fetch task failed: {err}")))
                    }
                }
            }
        }
        .boxed()
        .shared();

        in_flight.insert(
            key,
            InFlight {
                id,
                token,
                result: result.clone(),
                invalidated: false,
            },
        );
        result
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

async fn run_fetch(
    inner: Arc<ClientInner>,
    key: QueryKey,
    id: u64,
    token: CancellationToken,
    fetch: FetchOperation,
) -> Result<ErasedData, QueryError> {
    debug!(key = %key, key_hash = key.fingerprint(), fetch_id = id, "Fetch started");
    let started = Instant::now();

    let mut attempt = 0;
    let result = loop {
        match fetch(token.clone()).await {
            Err(err @ QueryError::Transport { .. })
                if attempt < inner.config.retry && !token.is_cancelled() =>
            {
                attempt += 1;
                warn!(key = %key, fetch_id = id, attempt, error = %err, "Fetch failed; retrying");
            }
            outcome => break outcome,
        }
    };

    histogram!(METRIC_FETCH_MS).record(started.elapsed().as_secs_f64() * 1000.0);
    inner.settle(&key, id, &token, result)
}

impl ClientInner {
    fn is_fetching(&self, key: &QueryKey) -> bool {
        mutex_lock(&self.in_flight, SOURCE, "is_fetching").contains_key(key)
    }

    fn fresh(&self, key: &QueryKey, stale_time: Duration) -> Option<EntrySnapshot> {
        let is_fetching = self.is_fetching(key);
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "fresh");
        let entry = entries.get(key)?;
        entry
            .is_fresh(stale_time, now)
            .then(|| entry.snapshot(is_fetching))
    }

    /// Write a fetch outcome into the cache.
    ///
    /// The token check and the write happen under the in-flight lock, so a
    /// concurrent `cancel` either wins (nothing is written) or loses (the
    /// fetch had already settled).
    fn settle(
        &self,
        key: &QueryKey,
        id: u64,
        token: &CancellationToken,
        result: Result<ErasedData, QueryError>,
    ) -> Result<ErasedData, QueryError> {
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "settle");

        if token.is_cancelled() {
            counter!(METRIC_QUERY_CANCELLED).increment(1);
            debug!(key = %key, fetch_id = id, "Discarded result of cancelled fetch");
            return Err(QueryError::Cancelled);
        }

        // A detached fetch is no longer the key's current one; its waiters get
        // the result but the cache does not.
        let Some(current) = in_flight.get(key).filter(|fetch| fetch.id == id) else {
            debug!(key = %key, fetch_id = id, "Detached fetch settled without caching");
            return result;
        };
        let invalidated = current.invalidated;

        match &result {
            Ok(data) => {
                let data = Arc::clone(data);
                self.upsert(key, "settle.store", move |entry| {
                    entry.data = Some(data);
                    entry.error = None;
                    entry.updated_at = Some(Instant::now());
                    entry.invalidated = invalidated;
                });
            }
            Err(err) => {
                let err = err.clone();
                self.upsert(key, "settle.error", move |entry| entry.error = Some(err));
            }
        }

        in_flight.remove(key);
        result
    }

    fn release(&self, key: &QueryKey, id: u64) {
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "release");
        if in_flight.get(key).is_some_and(|fetch| fetch.id == id) {
            in_flight.remove(key);
        }
    }

    /// Flag running fetches under `prefix` so their results land invalidated.
    fn invalidate_in_flight(&self, prefix: &QueryKey) -> usize {
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "invalidate.in_flight");
        let mut flagged = 0;
        for (key, fetch) in in_flight.iter_mut() {
            if key.starts_with(prefix) {
                fetch.invalidated = true;
                flagged += 1;
            }
        }
        flagged
    }

    fn upsert(&self, key: &QueryKey, op: &'static str, update: impl FnOnce(&mut Entry)) {
        let evicted = {
            let mut entries = rw_write(&self.entries, SOURCE, op);
            if let Some(entry) = entries.get_mut(key) {
                update(entry);
                return;
            }
            let mut entry = Entry::default();
            update(&mut entry);
            entries
                .push(key.clone(), entry)
                .map(|(evicted_key, _)| evicted_key)
        };

        self.registry.register(key);
        if let Some(evicted) = evicted {
            self.registry.unregister(&evicted);
            counter!(METRIC_QUERY_EVICT).increment(1);
            debug!(key = %evicted, "Evicted cache entry");
        }
    }
}

#[async_trait]
impl CacheEngine for QueryClient {
    async fn query(&self, registration: QueryRegistration) -> EntrySnapshot {
        let key = &registration.key;
        if !registration.enabled {
            debug!(key = %key, "Query disabled; fetch skipped");
            return self.snapshot(key).unwrap_or_default();
        }

        if let Some(snapshot) = self.inner.fresh(key, registration.stale_time) {
            counter!(METRIC_QUERY_HIT).increment(1);
            return snapshot;
        }

        counter!(METRIC_QUERY_MISS).increment(1);
        debug!(key = %key, "Cache miss");
        self.load(registration, false).await
    }

    async fn refetch(&self, registration: QueryRegistration) -> EntrySnapshot {
        self.load(registration, true).await
    }

    fn snapshot(&self, key: &QueryKey) -> Option<EntrySnapshot> {
        let is_fetching = self.inner.is_fetching(key);
        let entries = rw_read(&self.inner.entries, SOURCE, "snapshot");
        match entries.peek(key) {
            Some(entry) => Some(entry.snapshot(is_fetching)),
            None if is_fetching => Some(EntrySnapshot {
                is_fetching,
                ..Default::default()
            }),
            None => None,
        }
    }

    fn cancel(&self, key: &QueryKey) -> bool {
        let mut in_flight = mutex_lock(&self.inner.in_flight, SOURCE, "cancel");
        match in_flight.remove(key) {
            Some(fetch) => {
                fetch.token.cancel();
                debug!(key = %key, fetch_id = fetch.id, "Cancelled in-flight fetch");
                true
            }
            None => false,
        }
    }

    fn invalidate(&self, prefix: &QueryKey) -> InvalidationEvent {
        // In-flight first: a fetch settling after this step sees the flag, and
        // one that settled before it is already in the registry.
        let flagged = self.inner.invalidate_in_flight(prefix);
        if flagged > 0 {
            debug!(prefix = %prefix, flagged, "Flagged in-flight fetches as invalidated");
        }
        let keys = self.inner.registry.keys_matching(prefix);
        let mut affected = 0;
        {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "invalidate");
            for key in &keys {
                if let Some(entry) = entries.peek_mut(key) {
                    entry.invalidated = true;
                    affected += 1;
                }
            }
        }

        counter!(METRIC_QUERY_INVALIDATED).increment(affected as u64);
        self.inner.events.record(prefix.clone(), affected)
    }

    fn default_stale_time(&self) -> Duration {
        self.inner.config.stale_time
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;

    fn counting_fetch(calls: Arc<AtomicUsize>, value: u32) -> FetchOperation {
        Arc::new(move |_token| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(value) as ErasedData)
            }
            .boxed()
        })
    }

    fn registration(key: QueryKey, fetch: FetchOperation) -> QueryRegistration {
        QueryRegistration {
            key,
            fetch,
            enabled: true,
            stale_time: Duration::from_secs(60),
        }
    }

    fn value(snapshot: &EntrySnapshot) -> Option<u32> {
        snapshot
            .data
            .as_ref()
            .and_then(|data| data.downcast_ref::<u32>())
            .copied()
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_fetching() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::list("users", None);

        let first = client
            .query(registration(key.clone(), counting_fetch(calls.clone(), 7)))
            .await;
        let second = client
            .query(registration(key.clone(), counting_fetch(calls.clone(), 8)))
            .await;

        assert_eq!(value(&first), Some(7));
        assert_eq!(value(&second), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_query_creates_no_entry() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut reg = registration(QueryKey::list("users", None), counting_fetch(calls.clone(), 1));
        reg.enabled = false;

        let snapshot = client.query(reg).await;

        assert!(snapshot.data.is_none());
        assert!(!snapshot.is_fetching);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn cancelled_fetch_never_populates_cache() {
        let client = QueryClient::default();
        let gate = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let key = QueryKey::list("users", None);

        // Ignores its token and resolves only when the gate opens.
        let fetch: FetchOperation = {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            Arc::new(move |_token| {
                let gate = Arc::clone(&gate);
                let started = Arc::clone(&started);
                async move {
                    started.notify_one();
                    gate.notified().await;
                    Ok(Arc::new(1_u32) as ErasedData)
                }
                .boxed()
            })
        };

        let pending = tokio::spawn({
            let client = client.clone();
            let reg = registration(key.clone(), fetch);
            async move { client.query(reg).await }
        });

        started.notified().await;
        assert!(client.cancel(&key));
        gate.notify_one();

        let snapshot = pending.await.expect("query task");
        assert_eq!(snapshot.error, Some(QueryError::Cancelled));
        assert!(snapshot.data.is_none());
        assert!(client.snapshot(&key).is_none());
        assert!(client.is_empty());
    }

    #[tokio::test]
    async fn transport_error_is_recorded_and_keeps_data() {
        let client = QueryClient::default();
        let key = QueryKey::list("users", None);
        let calls = Arc::new(AtomicUsize::new(0));
        client
            .query(registration(key.clone(), counting_fetch(calls, 3)))
            .await;

        let failing: FetchOperation =
            Arc::new(|_token| async { Err(QueryError::status(500, "boom")) }.boxed());
        let snapshot = client.refetch(registration(key.clone(), failing)).await;

        assert_eq!(snapshot.error, Some(QueryError::status(500, "boom")));
        assert_eq!(value(&snapshot), Some(3));
    }

    #[tokio::test]
    async fn retry_repeats_transport_failures() {
        let client = QueryClient::new(EngineConfig {
            retry: 2,
            ..Default::default()
        });
        let attempts = Arc::new(AtomicUsize::new(0));
        let fetch: FetchOperation = {
            let attempts = Arc::clone(&attempts);
            Arc::new(move |_token| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(QueryError::transport("flaky"))
                    } else {
                        Ok(Arc::new(9_u32) as ErasedData)
                    }
                }
                .boxed()
            })
        };

        let snapshot = client
            .query(registration(QueryKey::list("users", None), fetch))
            .await;
        assert_eq!(value(&snapshot), Some(9));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalidate_marks_only_matching_entries() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let users = QueryKey::list("users", None);
        let user = QueryKey::detail("users", 1);
        let posts = QueryKey::list("posts", None);
        for key in [&users, &user, &posts] {
            client
                .query(registration(key.clone(), counting_fetch(calls.clone(), 1)))
                .await;
        }

        let event = client.invalidate(&QueryKey::resource("users"));

        assert_eq!(event.affected, 2);
        assert!(client.snapshot(&users).expect("users").is_invalidated);
        assert!(client.snapshot(&user).expect("user").is_invalidated);
        assert!(!client.snapshot(&posts).expect("posts").is_invalidated);
        assert_eq!(client.recent_invalidations().len(), 1);
    }

    #[tokio::test]
    async fn eviction_unregisters_key() {
        let client = QueryClient::new(EngineConfig {
            max_entries: 1,
            ..Default::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let first = QueryKey::list("users", None);
        let second = QueryKey::list("posts", None);

        client
            .query(registration(first.clone(), counting_fetch(calls.clone(), 1)))
            .await;
        client
            .query(registration(second.clone(), counting_fetch(calls.clone(), 2)))
            .await;

        assert_eq!(client.len(), 1);
        assert!(client.snapshot(&first).is_none());
        assert_eq!(client.invalidate(&QueryKey::resource("users")).affected, 0);
        assert_eq!(client.inner.registry.key_count(), 1);
    }

    #[tokio::test]
    async fn clear_drops_entries() {
        let client = QueryClient::default();
        let calls = Arc::new(AtomicUsize::new(0));
        client
            .query(registration(QueryKey::list("users", None), counting_fetch(calls, 1)))
            .await;
        assert!(!client.is_empty());

        client.clear();
        assert!(client.is_empty());
        assert_eq!(client.inner.registry.key_count(), 0);
    }

    #[test]
    fn engine_recovers_from_poisoned_lock() {
        use std::panic::{AssertUnwindSafe, catch_unwind};

        let client = QueryClient::default();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = client
                .inner
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        assert!(client.is_empty());
        assert!(client.snapshot(&QueryKey::list("users", None)).is_none());
    }
}
