//! Invalidation events.
//!
//! Every invalidation is recorded as an event with a unique id and a
//! monotonic epoch, logged, and kept in a bounded history for inspection.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::query::QueryKey;

use super::lock::mutex_lock;

const SOURCE: &str = "engine::events";

/// Monotonic epoch for ordering invalidations within this process.
pub type Epoch = u64;

/// A completed invalidation request.
#[derive(Debug, Clone)]
pub struct InvalidationEvent {
    /// Unique identifier for correlating log lines.
    pub id: Uuid,
    pub epoch: Epoch,
    /// Key prefix that was invalidated, usually `[resource]`.
    pub prefix: QueryKey,
    /// Number of cached entries marked stale.
    pub affected: usize,
    pub timestamp: OffsetDateTime,
}

/// Bounded log of recent invalidations.
pub struct InvalidationLog {
    history: Mutex<VecDeque<InvalidationEvent>>,
    limit: usize,
    epoch_counter: AtomicU64,
}

impl InvalidationLog {
    pub fn new(limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
            epoch_counter: AtomicU64::new(0),
        }
    }

    fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Record an invalidation and return the resulting event.
    pub fn record(&self, prefix: QueryKey, affected: usize) -> InvalidationEvent {
        let event = InvalidationEvent {
            id: Uuid::new_v4(),
            epoch: self.next_epoch(),
            prefix,
            affected,
            timestamp: OffsetDateTime::now_utc(),
        };

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            prefix = %event.prefix,
            affected = event.affected,
            "Cache entries invalidated"
        );

        if self.limit > 0 {
            let mut history = mutex_lock(&self.history, SOURCE, "record");
            if history.len() == self.limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        event
    }

    /// Recent events, oldest first.
    pub fn recent(&self) -> Vec<InvalidationEvent> {
        mutex_lock(&self.history, SOURCE, "recent")
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        mutex_lock(&self.history, SOURCE, "clear").clear();
    }
}
