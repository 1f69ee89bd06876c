use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use thiserror::Error;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

pub const METRIC_QUERY_HIT: &str = "quarry_query_hit_total";
pub const METRIC_QUERY_MISS: &str = "quarry_query_miss_total";
pub const METRIC_QUERY_DEDUP: &str = "quarry_query_dedup_total";
pub const METRIC_QUERY_CANCELLED: &str = "quarry_query_cancelled_total";
pub const METRIC_QUERY_EVICT: &str = "quarry_query_evict_total";
pub const METRIC_QUERY_INVALIDATED: &str = "quarry_query_invalidated_total";
pub const METRIC_FETCH_MS: &str = "quarry_fetch_ms";
pub const METRIC_MUTATION: &str = "quarry_mutation_total";

static METRIC_DESCRIPTIONS: Once = Once::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), TelemetryError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| TelemetryError::Install(err.to_string()))
}

/// Register metric descriptions with the installed recorder. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_QUERY_HIT,
            Unit::Count,
            "Reads served from a fresh cache entry."
        );
        describe_counter!(
            METRIC_QUERY_MISS,
            Unit::Count,
            "Reads that required a fetch."
        );
        describe_counter!(
            METRIC_QUERY_DEDUP,
            Unit::Count,
            "Reads that joined a fetch already in flight for the same key."
        );
        describe_counter!(
            METRIC_QUERY_CANCELLED,
            Unit::Count,
            "Fetches whose results were discarded after cancellation."
        );
        describe_counter!(
            METRIC_QUERY_EVICT,
            Unit::Count,
            "Cache entries evicted due to capacity."
        );
        describe_counter!(
            METRIC_QUERY_INVALIDATED,
            Unit::Count,
            "Cache entries marked stale by invalidation."
        );
        describe_histogram!(
            METRIC_FETCH_MS,
            Unit::Milliseconds,
            "Fetch latency in milliseconds, retries included."
        );
        describe_counter!(
            METRIC_MUTATION,
            Unit::Count,
            "Completed mutations, labelled by outcome."
        );
    });
}
