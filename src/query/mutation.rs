//! Mutation binding: a write that invalidates the resources it touches.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::engine::CacheEngine;
use crate::error::QueryError;
use crate::telemetry::METRIC_MUTATION;
use crate::transport::{Transport, TransportRequest};

use super::fetch::decode;
use super::keys::QueryKey;

/// HTTP verb used by the default write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MutationMethod {
    #[default]
    Create,
    Update,
    Replace,
    Delete,
}

impl MutationMethod {
    pub fn as_http(self) -> Method {
        match self {
            Self::Create => Method::POST,
            Self::Update => Method::PATCH,
            Self::Replace => Method::PUT,
            Self::Delete => Method::DELETE,
        }
    }
}

/// Custom write used instead of the default transport call.
pub type MutationOperation<D, V> =
    Arc<dyn Fn(V) -> BoxFuture<'static, Result<D, QueryError>> + Send + Sync>;

pub struct MutationOptions<D, V> {
    pub url: Option<String>,
    pub method: MutationMethod,
    /// Resource names marked stale after a successful write.
    pub invalidates: Vec<String>,
    pub operation: Option<MutationOperation<D, V>>,
}

impl<D, V> Default for MutationOptions<D, V> {
    fn default() -> Self {
        Self {
            url: None,
            method: MutationMethod::default(),
            invalidates: Vec::new(),
            operation: None,
        }
    }
}

impl<D, V> MutationOptions<D, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: MutationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn invalidates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidates = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn operation<F, Fut>(mut self, operation: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, QueryError>> + Send + 'static,
    {
        self.operation = Some(Arc::new(move |variables| operation(variables).boxed()));
        self
    }
}

impl<D, V> fmt::Debug for MutationOptions<D, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("invalidates", &self.invalidates)
            .field("operation", &self.operation.is_some())
            .finish()
    }
}

/// Observable outcome of the latest write.
pub struct MutationState<D> {
    pub data: Option<Arc<D>>,
    pub error: Option<QueryError>,
    pub is_loading: bool,
}

impl<D> Clone for MutationState<D> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            is_loading: self.is_loading,
        }
    }
}

impl<D> Default for MutationState<D> {
    fn default() -> Self {
        Self {
            data: None,
            error: None,
            is_loading: false,
        }
    }
}

impl<D: fmt::Debug> fmt::Debug for MutationState<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationState")
            .field("data", &self.data)
            .field("error", &self.error)
            .field("is_loading", &self.is_loading)
            .finish()
    }
}

/// A write bound to the resource names it invalidates.
pub struct MutationBinding<D, V> {
    write: MutationOperation<D, V>,
    invalidates: Arc<[String]>,
    engine: Arc<dyn CacheEngine>,
    state: Arc<watch::Sender<MutationState<D>>>,
}

impl<D, V> Clone for MutationBinding<D, V> {
    fn clone(&self) -> Self {
        Self {
            write: Arc::clone(&self.write),
            invalidates: Arc::clone(&self.invalidates),
            engine: Arc::clone(&self.engine),
            state: Arc::clone(&self.state),
        }
    }
}

impl<D, V> MutationBinding<D, V>
where
    D: DeserializeOwned + Send + Sync + 'static,
    V: Serialize + Send + 'static,
{
    /// Fails with `Configuration` when neither a URL nor an operation is set.
    pub fn new(
        options: MutationOptions<D, V>,
        engine: Arc<dyn CacheEngine>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, QueryError> {
        let MutationOptions {
            url,
            method,
            invalidates,
            operation,
        } = options;

        let write = match (operation, url) {
            (Some(operation), _) => operation,
            (None, Some(url)) => default_write(transport, url, method),
            (None, None) => {
                return Err(QueryError::configuration(
                    "mutation requires either a url or an operation",
                ));
            }
        };

        Ok(Self {
            write,
            invalidates: invalidates.into(),
            engine,
            state: Arc::new(watch::Sender::new(MutationState::default())),
        })
    }

    /// Run the write once. On success every configured resource is
    /// invalidated before the result is published.
    pub async fn mutate(&self, variables: V) -> Result<Arc<D>, QueryError> {
        self.state.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });

        match (self.write)(variables).await {
            Ok(data) => {
                let data = Arc::new(data);
                for name in self.invalidates.iter() {
                    self.engine.invalidate(&QueryKey::resource(name));
                }
                counter!(METRIC_MUTATION, "outcome" => "success").increment(1);
                info!(invalidated = ?self.invalidates, "Mutation succeeded");
                self.state.send_replace(MutationState {
                    data: Some(Arc::clone(&data)),
                    error: None,
                    is_loading: false,
                });
                Ok(data)
            }
            Err(err) => {
                counter!(METRIC_MUTATION, "outcome" => "failure").increment(1);
                warn!(error = %err, "Mutation failed; cache left untouched");
                self.state.send_modify(|state| {
                    state.is_loading = false;
                    state.error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    pub fn state(&self) -> MutationState<D> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationState<D>> {
        self.state.subscribe()
    }

    pub fn reset(&self) {
        self.state.send_replace(MutationState::default());
    }

    pub fn invalidates(&self) -> &[String] {
        &self.invalidates
    }
}

fn default_write<D, V>(
    transport: Arc<dyn Transport>,
    url: String,
    method: MutationMethod,
) -> MutationOperation<D, V>
where
    D: DeserializeOwned + Send + 'static,
    V: Serialize + Send + 'static,
{
    Arc::new(move |variables: V| {
        let transport = Arc::clone(&transport);
        let url = url.clone();
        let body = serde_json::to_value(&variables).map_err(QueryError::payload);
        async move {
            let mut request = TransportRequest::new(method.as_http(), url);
            // `()` and `Value::Null` variables mean "no body".
            match body? {
                Value::Null => {}
                body => request = request.body(body),
            }
            decode(transport.send(request).await?)
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_mapping() {
        assert_eq!(MutationMethod::default(), MutationMethod::Create);
        assert_eq!(MutationMethod::Create.as_http(), Method::POST);
        assert_eq!(MutationMethod::Update.as_http(), Method::PATCH);
        assert_eq!(MutationMethod::Replace.as_http(), Method::PUT);
        assert_eq!(MutationMethod::Delete.as_http(), Method::DELETE);
    }

    #[test]
    fn invalidates_accepts_any_string_like() {
        let options = MutationOptions::<(), ()>::new()
            .url("/users")
            .invalidates(["users", "teams"]);
        assert_eq!(options.invalidates, vec!["users", "teams"]);
        assert_eq!(options.method, MutationMethod::Create);
    }

    #[test]
    fn state_defaults_to_idle() {
        let state = MutationState::<()>::default();
        assert!(state.data.is_none());
        assert!(state.error.is_none());
        assert!(!state.is_loading);
    }
}
