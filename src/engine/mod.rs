//! Cache engine.
//!
//! Bindings reach the cache only through the [`CacheEngine`] trait:
//!
//! - **query / refetch**: serve a fresh entry or run the registered fetch
//!   operation, de-duplicating concurrent reads of the same key
//! - **cancel**: abort the in-flight fetch for a key
//! - **invalidate**: mark every entry under a key prefix as stale
//!
//! [`QueryClient`] is the in-memory implementation. Entries are type-erased;
//! the typed bindings downcast them back.

mod client;
mod config;
mod events;
mod lock;
mod registry;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;
use crate::query::QueryKey;

pub use client::QueryClient;
pub use config::EngineConfig;
pub use events::{Epoch, InvalidationEvent, InvalidationLog};
pub use registry::ResourceRegistry;

/// Cached payload with its concrete type erased.
pub type ErasedData = Arc<dyn Any + Send + Sync>;

pub type FetchFuture = BoxFuture<'static, Result<ErasedData, QueryError>>;

/// Fetch closure; the engine passes the token that aborts this invocation.
pub type FetchOperation = Arc<dyn Fn(CancellationToken) -> FetchFuture + Send + Sync>;

/// A read handed to the engine by a query binding.
#[derive(Clone)]
pub struct QueryRegistration {
    pub key: QueryKey,
    pub fetch: FetchOperation,
    /// When false the engine neither fetches nor touches the cache.
    pub enabled: bool,
    pub stale_time: Duration,
}

/// Point-in-time view of one cache entry.
#[derive(Clone, Default)]
pub struct EntrySnapshot {
    pub data: Option<ErasedData>,
    pub error: Option<QueryError>,
    pub is_fetching: bool,
    pub is_invalidated: bool,
    pub updated_at: Option<Instant>,
}

impl fmt::Debug for EntrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrySnapshot")
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("is_fetching", &self.is_fetching)
            .field("is_invalidated", &self.is_invalidated)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[async_trait]
pub trait CacheEngine: Send + Sync {
    /// Serve a fresh entry, join an in-flight fetch, or start a new one.
    async fn query(&self, registration: QueryRegistration) -> EntrySnapshot;

    /// Fetch regardless of freshness, superseding any fetch in flight.
    async fn refetch(&self, registration: QueryRegistration) -> EntrySnapshot;

    /// Current state of a key without fetching.
    fn snapshot(&self, key: &QueryKey) -> Option<EntrySnapshot>;

    /// Abort the in-flight fetch for `key`. Returns false if none was running.
    fn cancel(&self, key: &QueryKey) -> bool;

    /// Mark every cached entry whose key starts with `prefix` as stale.
    fn invalidate(&self, prefix: &QueryKey) -> InvalidationEvent;

    /// Freshness window used when a binding does not set its own.
    fn default_stale_time(&self) -> Duration;
}
