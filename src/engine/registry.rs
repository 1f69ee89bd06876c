//! Resource registry.
//!
//! Indexes cached query keys by resource name so a name-scoped
//! invalidation touches only the keys of that resource.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::query::QueryKey;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "engine::registry";

/// Tracks resource name → cached keys.
pub struct ResourceRegistry {
    by_resource: RwLock<HashMap<String, HashSet<QueryKey>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            by_resource: RwLock::new(HashMap::new()),
        }
    }

    /// Record a cached key under its resource name.
    ///
    /// Keys without a resource segment are never produced by the key factory
    /// and are ignored.
    pub fn register(&self, key: &QueryKey) {
        let Some(resource) = key.resource_name() else {
            return;
        };
        rw_write(&self.by_resource, SOURCE, "register")
            .entry(resource.to_string())
            .or_default()
            .insert(key.clone());
    }

    /// Forget a key, e.g. after the store evicted it.
    pub fn unregister(&self, key: &QueryKey) {
        let Some(resource) = key.resource_name() else {
            return;
        };
        let mut by_resource = rw_write(&self.by_resource, SOURCE, "unregister");
        if let Some(keys) = by_resource.get_mut(resource) {
            keys.remove(key);
            if keys.is_empty() {
                by_resource.remove(resource);
            }
        }
    }

    /// All registered keys that start with `prefix`.
    pub fn keys_matching(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        let by_resource = rw_read(&self.by_resource, SOURCE, "keys_matching");
        let candidates: Box<dyn Iterator<Item = &QueryKey>> = match prefix.resource_name() {
            Some(resource) => match by_resource.get(resource) {
                Some(keys) => Box::new(keys.iter()),
                None => return Vec::new(),
            },
            None => Box::new(by_resource.values().flatten()),
        };
        candidates
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        rw_write(&self.by_resource, SOURCE, "clear").clear();
    }

    /// Number of resources with at least one cached key.
    pub fn resource_count(&self) -> usize {
        rw_read(&self.by_resource, SOURCE, "resource_count").len()
    }

    /// Number of cached keys across all resources.
    pub fn key_count(&self) -> usize {
        rw_read(&self.by_resource, SOURCE, "key_count")
            .values()
            .map(HashSet::len)
            .sum()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
