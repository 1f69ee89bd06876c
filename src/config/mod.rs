//! Configuration layer: typed settings with layered precedence (defaults → file → env).

use std::{
    num::NonZeroUsize,
    path::Path,
    str::FromStr,
    time::Duration,
};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "quarry";
const ENV_PREFIX: &str = "QUARRY";
const DEFAULT_TRANSPORT_TIMEOUT_MS: u64 = 15_000;
pub(crate) const DEFAULT_STALE_TIME_MS: u64 = 60_000;
pub(crate) const DEFAULT_QUERY_RETRY: u32 = 0;
pub(crate) const DEFAULT_MAX_ENTRIES: usize = 500;
pub(crate) const DEFAULT_INVALIDATION_HISTORY: usize = 64;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub transport: TransportSettings,
    pub query: QuerySettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Prefix for relative request URLs; empty means requests must be absolute.
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// How long a cached entry is served without revalidation.
    pub stale_time: Duration,
    /// Automatic retries for failed query fetches. Mutations never retry.
    pub retry: u32,
    pub max_entries: NonZeroUsize,
    pub invalidation_history: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_millis(DEFAULT_TRANSPORT_TIMEOUT_MS),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_millis(DEFAULT_STALE_TIME_MS),
            retry: DEFAULT_QUERY_RETRY,
            max_entries: NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            invalidation_history: DEFAULT_INVALIDATION_HISTORY,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment).
///
/// `config_file`, when given, must exist; the conventional
/// `config/default.*` and `quarry.*` files are optional.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    transport: RawTransportSettings,
    query: RawQuerySettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            transport,
            query,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            transport: build_transport_settings(transport)?,
            query: build_query_settings(query)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_transport_settings(
    transport: RawTransportSettings,
) -> Result<TransportSettings, LoadError> {
    let base_url = transport
        .base_url
        .map(|value| value.trim().to_string())
        .unwrap_or_default();
    if !base_url.is_empty() {
        Url::parse(&base_url).map_err(|err| {
            LoadError::invalid(
                "transport.base_url",
                format!("`{base_url}` is not an absolute URL: {err}"),
            )
        })?;
    }

    let timeout_ms = transport
        .timeout_ms
        .unwrap_or(DEFAULT_TRANSPORT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "transport.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(TransportSettings {
        base_url,
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_query_settings(query: RawQuerySettings) -> Result<QuerySettings, LoadError> {
    let stale_time_ms = query.stale_time_ms.unwrap_or(DEFAULT_STALE_TIME_MS);
    let retry = query.retry.unwrap_or(DEFAULT_QUERY_RETRY);

    let max_entries_value = query.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES);
    let max_entries = NonZeroUsize::new(max_entries_value)
        .ok_or_else(|| LoadError::invalid("query.max_entries", "must be greater than zero"))?;

    let invalidation_history = query
        .invalidation_history
        .unwrap_or(DEFAULT_INVALIDATION_HISTORY);

    Ok(QuerySettings {
        stale_time: Duration::from_millis(stale_time_ms),
        retry,
        max_entries,
        invalidation_history,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTransportSettings {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQuerySettings {
    stale_time_ms: Option<u64>,
    retry: Option<u32>,
    max_entries: Option<usize>,
    invalidation_history: Option<usize>,
}
