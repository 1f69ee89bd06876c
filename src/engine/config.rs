//! Engine configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::{
    DEFAULT_INVALIDATION_HISTORY, DEFAULT_MAX_ENTRIES, DEFAULT_QUERY_RETRY, DEFAULT_STALE_TIME_MS,
    QuerySettings,
};

/// Tuning for the in-memory [`QueryClient`](super::QueryClient).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Freshness window applied when a registration does not carry its own.
    pub stale_time: Duration,
    /// Automatic retries for failed fetches; cancellations are never retried.
    pub retry: u32,
    /// Maximum cached entries before LRU eviction.
    pub max_entries: usize,
    /// Number of invalidation events kept for inspection.
    pub invalidation_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_millis(DEFAULT_STALE_TIME_MS),
            retry: DEFAULT_QUERY_RETRY,
            max_entries: DEFAULT_MAX_ENTRIES,
            invalidation_history: DEFAULT_INVALIDATION_HISTORY,
        }
    }
}

impl From<&QuerySettings> for EngineConfig {
    fn from(settings: &QuerySettings) -> Self {
        Self {
            stale_time: settings.stale_time,
            retry: settings.retry,
            max_entries: settings.max_entries.get(),
            invalidation_history: settings.invalidation_history,
        }
    }
}

impl EngineConfig {
    /// Returns the entry capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.stale_time, Duration::from_secs(60));
        assert_eq!(config.retry, 0);
        assert_eq!(config.max_entries, 500);
        assert_eq!(config.invalidation_history, 64);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = EngineConfig {
            max_entries: 0,
            ..Default::default()
        };
        assert_eq!(config.max_entries_non_zero().get(), 1);
    }

    #[test]
    fn built_from_query_settings() {
        let settings = QuerySettings {
            stale_time: Duration::from_secs(5),
            retry: 3,
            ..Default::default()
        };
        let config = EngineConfig::from(&settings);
        assert_eq!(config.stale_time, Duration::from_secs(5));
        assert_eq!(config.retry, 3);
    }
}
