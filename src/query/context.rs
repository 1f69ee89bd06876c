//! Query context: the injected engine and transport, plus binding defaults.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{QuerySettings, Settings};
use crate::engine::{CacheEngine, EngineConfig, QueryClient};
use crate::error::QueryError;
use crate::transport::{HttpTransport, Transport};

use super::binding::{QueryBinding, QueryOptions};
use super::mutation::{MutationBinding, MutationOptions};

/// Values applied to bindings that leave them unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDefaults {
    pub stale_time: Duration,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self::from(&QuerySettings::default())
    }
}

impl From<&QuerySettings> for QueryDefaults {
    fn from(settings: &QuerySettings) -> Self {
        Self {
            stale_time: settings.stale_time,
        }
    }
}

/// Entry point for building bindings against a shared engine.
#[derive(Clone)]
pub struct QueryContext {
    engine: Arc<dyn CacheEngine>,
    transport: Arc<dyn Transport>,
    defaults: QueryDefaults,
}

impl QueryContext {
    pub fn new(engine: Arc<dyn CacheEngine>, transport: Arc<dyn Transport>) -> Self {
        let defaults = QueryDefaults {
            stale_time: engine.default_stale_time(),
        };
        Self {
            engine,
            transport,
            defaults,
        }
    }

    /// Build the in-memory engine and HTTP transport described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, QueryError> {
        let transport = HttpTransport::new(&settings.transport)?;
        let engine = QueryClient::new(EngineConfig::from(&settings.query));
        Ok(Self::new(Arc::new(engine), Arc::new(transport))
            .with_defaults(QueryDefaults::from(&settings.query)))
    }

    pub fn with_defaults(mut self, defaults: QueryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn defaults(&self) -> QueryDefaults {
        self.defaults
    }

    pub fn query<T>(&self, mut options: QueryOptions) -> QueryBinding<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        options.stale_time.get_or_insert(self.defaults.stale_time);
        QueryBinding::new(options, Arc::clone(&self.engine), Arc::clone(&self.transport))
    }

    pub fn mutation<D, V>(
        &self,
        options: MutationOptions<D, V>,
    ) -> Result<MutationBinding<D, V>, QueryError>
    where
        D: DeserializeOwned + Send + Sync + 'static,
        V: Serialize + Send + 'static,
    {
        MutationBinding::new(options, Arc::clone(&self.engine), Arc::clone(&self.transport))
    }

    pub fn engine(&self) -> &Arc<dyn CacheEngine> {
        &self.engine
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}
