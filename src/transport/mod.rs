//! Transport boundary.
//!
//! The cache layer never talks to the network directly; it hands a
//! [`TransportRequest`] to a [`Transport`] and receives the decoded JSON
//! payload back.

mod http;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;

pub use http::HttpTransport;

/// A single request handed to the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
    pub signal: Option<CancellationToken>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Vec::new(),
            body: None,
            signal: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn signal(mut self, signal: Option<CancellationToken>) -> Self {
        self.signal = signal;
        self
    }
}

/// Sends requests and returns the decoded response payload.
///
/// Implementations must report non-success responses as
/// [`QueryError::Transport`] carrying the status and body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<Value, QueryError>;
}
