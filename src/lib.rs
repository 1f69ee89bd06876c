//! quarry: canonical query keys, cached reads, and mutation-driven invalidation.
//!
//! ```no_run
//! # async fn demo() -> Result<(), quarry::QueryError> {
//! use quarry::{FilterSet, MutationOptions, QueryContext, QueryOptions, config::Settings};
//!
//! let context = QueryContext::from_settings(&Settings::default())?;
//! let users = context.query::<serde_json::Value>(
//!     QueryOptions::new("users", "https://api.example.com/users")
//!         .filters(FilterSet::new().with("role", "admin")),
//! );
//! let state = users.run().await;
//!
//! let create = context.mutation::<serde_json::Value, serde_json::Value>(
//!     MutationOptions::new()
//!         .url("https://api.example.com/users")
//!         .invalidates(["users"]),
//! )?;
//! create.mutate(serde_json::json!({ "name": "ada" })).await?;
//! # let _ = state;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod telemetry;
pub mod transport;

pub use engine::{CacheEngine, EngineConfig, QueryClient};
pub use error::QueryError;
pub use query::{
    FilterSet, FilterValue, MutationBinding, MutationMethod, MutationOptions, MutationState,
    QueryBinding, QueryContext, QueryKey, QueryOptions, QueryState, normalize,
};
pub use transport::{HttpTransport, Transport, TransportRequest};
