//! Query binding: one typed read registered with the cache engine.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::{CacheEngine, EntrySnapshot, ErasedData, FetchOperation, QueryRegistration};
use crate::error::QueryError;
use crate::transport::Transport;

use super::fetch;
use super::filters::{FilterSet, NormalizedFilterSet, normalize};
use super::keys::QueryKey;

/// Parameters of a list read.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Resource name; the first segment of the cache key.
    pub key: String,
    pub url: String,
    pub filters: Option<FilterSet>,
    pub enabled: bool,
    /// Freshness window. Falls back to the context default.
    pub stale_time: Option<Duration>,
}

impl QueryOptions {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            filters: None,
            enabled: true,
            stale_time: None,
        }
    }

    pub fn filters(mut self, filters: FilterSet) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

/// What a caller observes about a read.
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<QueryError>,
    /// No data yet and a fetch is running.
    pub is_loading: bool,
    pub is_fetching: bool,
    /// Data is missing, invalidated, or older than the freshness window.
    pub is_stale: bool,
}

impl<T> QueryState<T>
where
    T: Send + Sync + 'static,
{
    fn from_snapshot(key: &QueryKey, snapshot: EntrySnapshot, stale_time: Duration) -> Self {
        let mut error = snapshot.error;
        let data = match snapshot.data {
            Some(erased) => match erased.downcast::<T>() {
                Ok(data) => Some(data),
                Err(_) => {
                    error = Some(QueryError::configuration(format!(
                        "cached value for {key} is not a {}",
                        std::any::type_name::<T>()
                    )));
                    None
                }
            },
            None => None,
        };

        let expired = snapshot
            .updated_at
            .is_none_or(|at| Instant::now().duration_since(at) >= stale_time);

        Self {
            is_loading: data.is_none() && snapshot.is_fetching,
            is_stale: data.is_none() || snapshot.is_invalidated || expired,
            is_fetching: snapshot.is_fetching,
            data,
            error,
        }
    }
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.is_loading,
            is_fetching: self.is_fetching,
            is_stale: self.is_stale,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
            is_fetching: false,
            is_stale: true,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for QueryState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("data", &self.data)
            .field("error", &self.error)
            .field("is_loading", &self.is_loading)
            .field("is_fetching", &self.is_fetching)
            .field("is_stale", &self.is_stale)
            .finish()
    }
}

/// A list read bound to its key, fetch operation and caching policy.
pub struct QueryBinding<T> {
    key: QueryKey,
    url: String,
    filters: Option<NormalizedFilterSet>,
    enabled: bool,
    stale_time: Duration,
    engine: Arc<dyn CacheEngine>,
    transport: Arc<dyn Transport>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for QueryBinding<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            url: self.url.clone(),
            filters: self.filters.clone(),
            enabled: self.enabled,
            stale_time: self.stale_time,
            engine: Arc::clone(&self.engine),
            transport: Arc::clone(&self.transport),
            _payload: PhantomData,
        }
    }
}

impl<T> QueryBinding<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        options: QueryOptions,
        engine: Arc<dyn CacheEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let QueryOptions {
            key,
            url,
            filters,
            enabled,
            stale_time,
        } = options;

        Self {
            key: QueryKey::list(&key, filters.as_ref()),
            filters: normalize(filters.as_ref()),
            stale_time: stale_time.unwrap_or_else(|| engine.default_stale_time()),
            url,
            enabled,
            engine,
            transport,
            _payload: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Serve the cached value if fresh, otherwise fetch and wait.
    pub async fn run(&self) -> QueryState<T> {
        let snapshot = self.engine.query(self.registration()).await;
        self.state_from(snapshot)
    }

    /// Force a new fetch, superseding any fetch in flight.
    pub async fn refetch(&self) -> QueryState<T> {
        let snapshot = self.engine.refetch(self.registration()).await;
        self.state_from(snapshot)
    }

    pub fn cancel(&self) -> bool {
        self.engine.cancel(&self.key)
    }

    /// Current state without fetching.
    pub fn state(&self) -> QueryState<T> {
        self.engine
            .snapshot(&self.key)
            .map(|snapshot| self.state_from(snapshot))
            .unwrap_or_default()
    }

    fn state_from(&self, snapshot: EntrySnapshot) -> QueryState<T> {
        QueryState::from_snapshot(&self.key, snapshot, self.stale_time)
    }

    fn registration(&self) -> QueryRegistration {
        let transport = Arc::clone(&self.transport);
        let url = self.url.clone();
        let filters = self.filters.clone();

        let fetch: FetchOperation = Arc::new(move |token: CancellationToken| {
            let transport = Arc::clone(&transport);
            let url = url.clone();
            let filters = filters.clone();
            async move {
                let data: T =
                    fetch::fetch(transport.as_ref(), &url, filters.as_ref(), Some(&token)).await?;
                Ok(Arc::new(data) as ErasedData)
            }
            .boxed()
        });

        QueryRegistration {
            key: self.key.clone(),
            fetch,
            enabled: self.enabled,
            stale_time: self.stale_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_enabled() {
        let options = QueryOptions::new("users", "/users");
        assert!(options.enabled);
        assert!(options.filters.is_none());
        assert!(options.stale_time.is_none());
    }

    #[test]
    fn mismatched_cached_type_is_configuration_error() {
        let key = QueryKey::list("users", None);
        let snapshot = EntrySnapshot {
            data: Some(Arc::new("not a number".to_string()) as ErasedData),
            updated_at: Some(Instant::now()),
            ..Default::default()
        };

        let state = QueryState::<u32>::from_snapshot(&key, snapshot, Duration::from_secs(60));
        assert!(state.data.is_none());
        assert!(matches!(state.error, Some(QueryError::Configuration { .. })));
    }

    #[test]
    fn invalidated_entry_is_stale() {
        let key = QueryKey::list("users", None);
        let snapshot = EntrySnapshot {
            data: Some(Arc::new(5_u32) as ErasedData),
            updated_at: Some(Instant::now()),
            is_invalidated: true,
            ..Default::default()
        };

        let state = QueryState::<u32>::from_snapshot(&key, snapshot, Duration::from_secs(60));
        assert_eq!(state.data.as_deref(), Some(&5));
        assert!(state.is_stale);
        assert!(!state.is_loading);
    }

    #[test]
    fn fetching_without_data_is_loading() {
        let key = QueryKey::list("users", None);
        let snapshot = EntrySnapshot {
            is_fetching: true,
            ..Default::default()
        };

        let state = QueryState::<u32>::from_snapshot(&key, snapshot, Duration::from_secs(60));
        assert!(state.is_loading);
        assert!(state.is_stale);
    }
}
