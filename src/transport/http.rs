use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Response, Url};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::TransportSettings;
use crate::error::QueryError;

use super::{Transport, TransportRequest};

/// reqwest-backed transport rooted at a configured base URL.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, QueryError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(Self::user_agent())
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("quarry/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a request URL against the base.
    ///
    /// Absolute URLs pass through untouched. Relative ones are appended to the
    /// base with exactly one separating slash; without a base they are
    /// rejected.
    pub fn resolve(&self, path: &str) -> Result<Url, QueryError> {
        if let Ok(absolute) = Url::parse(path) {
            return Ok(absolute);
        }
        if self.base_url.is_empty() {
            return Err(QueryError::configuration(format!(
                "relative URL `{path}` requires a configured base URL"
            )));
        }
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&joined)?)
    }

    async fn handle(response: Response) -> Result<Value, QueryError> {
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Err(QueryError::status(status.as_u16(), text));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(QueryError::payload)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<Value, QueryError> {
        let TransportRequest {
            method,
            url,
            params,
            body,
            signal,
        } = request;

        let mut url = self.resolve(&url)?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params {
                pairs.append_pair(key, value);
            }
        }

        let mut builder = self.client.request(method.clone(), url.clone());
        if let Some(body) = body.as_ref() {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let sent = match signal {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(QueryError::Cancelled),
                sent = builder.send() => sent,
            },
            None => builder.send().await,
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                warn!(%method, %url, elapsed_ms, error = %err, "Client fetch failed");
                return Err(err.into());
            }
        };

        let status = response.status().as_u16();
        let result = Self::handle(response).await;
        match &result {
            Ok(_) => info!(%method, %url, status, elapsed_ms, "Client fetch"),
            Err(err) => warn!(%method, %url, status, elapsed_ms, error = %err, "Client fetch failed"),
        }
        result
    }
}
