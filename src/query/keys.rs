//! Query key definitions.
//!
//! Defines `QueryKey`, the identity under which the cache engine stores a
//! query's result, and the factory constructors for each query variant.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use uuid::Uuid;

use super::filters::{FilterSet, NormalizedFilterSet, normalize};

/// Identifier of a single resource, used verbatim in detail keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum ResourceId {
    Int(i64),
    Text(String),
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ResourceId {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for ResourceId {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Uuid> for ResourceId {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

/// Marker for non-default query variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyVariant {
    Infinite,
}

/// One element of a query key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum KeySegment {
    Resource(String),
    Variant(KeyVariant),
    Id(ResourceId),
    Filters(Option<NormalizedFilterSet>),
}

/// Cache identity of a query.
///
/// Keys compare element by element. Segments are typed, so a detail id can
/// never be mistaken for a filter set or a variant marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeySegment>);

impl QueryKey {
    /// `[resource, filters]`
    pub fn list(resource: &str, filters: Option<&FilterSet>) -> Self {
        Self(vec![
            KeySegment::Resource(resource.to_string()),
            KeySegment::Filters(normalize(filters)),
        ])
    }

    /// `[resource, id]`
    pub fn detail(resource: &str, id: impl Into<ResourceId>) -> Self {
        Self(vec![
            KeySegment::Resource(resource.to_string()),
            KeySegment::Id(id.into()),
        ])
    }

    /// `[resource, "infinite", filters]`
    pub fn infinite(resource: &str, filters: Option<&FilterSet>) -> Self {
        Self(vec![
            KeySegment::Resource(resource.to_string()),
            KeySegment::Variant(KeyVariant::Infinite),
            KeySegment::Filters(normalize(filters)),
        ])
    }

    /// `[resource]`, the prefix shared by every key of a resource.
    pub fn resource(resource: &str) -> Self {
        Self(vec![KeySegment::Resource(resource.to_string())])
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.0
    }

    pub fn resource_name(&self) -> Option<&str> {
        match self.0.first() {
            Some(KeySegment::Resource(name)) => Some(name),
            _ => None,
        }
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Compact hash for log fields.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}
