//! Fetch adapter: a typed GET through a [`Transport`].

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::QueryError;
use crate::transport::{Transport, TransportRequest};

use super::NormalizedFilterSet;

/// Read `url` with the filters as query parameters and decode the payload.
///
/// When `signal` fires first the transport future is dropped, which aborts
/// the request, and `Cancelled` is returned.
pub async fn fetch<T: DeserializeOwned>(
    transport: &dyn Transport,
    url: &str,
    filters: Option<&NormalizedFilterSet>,
    signal: Option<&CancellationToken>,
) -> Result<T, QueryError> {
    let params = filters
        .map(NormalizedFilterSet::to_query_pairs)
        .unwrap_or_default();
    let request = TransportRequest::get(url)
        .params(params)
        .signal(signal.cloned());

    let payload = match signal {
        Some(signal) => {
            tokio::select! {
                biased;
                _ = signal.cancelled() => return Err(QueryError::Cancelled),
                result = transport.send(request) => result?,
            }
        }
        None => transport.send(request).await?,
    };

    decode(payload)
}

pub(crate) fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, QueryError> {
    serde_json::from_value(payload).map_err(QueryError::payload)
}
