//! Filter sets and their canonical form.
//!
//! A `FilterSet` keeps whatever order the caller built it in. `normalize`
//! turns it into a `NormalizedFilterSet` whose content (and therefore cache
//! identity) depends only on the key/value pairs, never on insertion order.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::QueryError;

/// A single filter value as supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<FilterValue>),
    Map(FilterSet),
}

/// Caller-supplied filters, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    fields: Vec<(String, FilterValue)>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FilterSet::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a field, replacing any previous value for the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FilterValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FilterValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FilterValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for FilterSet
where
    K: Into<String>,
    V: Into<FilterValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = FilterSet::new();
        for (key, value) in iter {
            set.insert(key, value);
        }
        set
    }
}

impl TryFrom<Value> for FilterSet {
    type Error = QueryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(QueryError::configuration(format!(
                "filters must be a JSON object, got `{other}`"
            ))),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for FilterValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(int) => Self::Int(int),
            Err(_) => Self::UInt(value),
        }
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<FilterSet> for FilterValue {
    fn from(value: FilterSet) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<FilterValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(flag),
            Value::Number(number) => match (number.as_i64(), number.as_u64()) {
                (Some(int), _) => Self::Int(int),
                (None, Some(uint)) => Self::UInt(uint),
                (None, None) => Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(text) => Self::Text(text),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().collect()),
        }
    }
}

// ============================================================================
// Canonical form
// ============================================================================

/// A value inside a normalized filter set.
///
/// `Null` only survives as a list element; null fields are dropped.
/// `UInt` only holds values above `i64::MAX`.
#[derive(Debug, Clone)]
pub enum NormalizedValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    List(Vec<NormalizedValue>),
    Map(NormalizedFilterSet),
}

/// Canonical filters: sorted keys at every level, sorted lists, no nulls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NormalizedFilterSet(BTreeMap<String, NormalizedValue>);

impl NormalizedFilterSet {
    pub fn get(&self, key: &str) -> Option<&NormalizedValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NormalizedValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten into transport query parameters.
    ///
    /// Lists repeat their key once per element, nested maps use
    /// `parent[child]` names, and null list elements are skipped.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in &self.0 {
            flatten_into(key, value, &mut pairs);
        }
        pairs
    }
}

fn flatten_into(name: &str, value: &NormalizedValue, pairs: &mut Vec<(String, String)>) {
    match value {
        NormalizedValue::Null => {}
        NormalizedValue::Bool(flag) => pairs.push((name.to_string(), flag.to_string())),
        NormalizedValue::Int(int) => pairs.push((name.to_string(), int.to_string())),
        NormalizedValue::UInt(uint) => pairs.push((name.to_string(), uint.to_string())),
        NormalizedValue::Float(float) => pairs.push((name.to_string(), float.to_string())),
        NormalizedValue::Text(text) => pairs.push((name.to_string(), text.clone())),
        NormalizedValue::List(items) => {
            for item in items {
                flatten_into(name, item, pairs);
            }
        }
        NormalizedValue::Map(nested) => {
            for (key, item) in &nested.0 {
                flatten_into(&format!("{name}[{key}]"), item, pairs);
            }
        }
    }
}

/// Canonicalize a filter set.
///
/// `None` stays `None`; an empty set becomes an empty (but present) set.
pub fn normalize(filters: Option<&FilterSet>) -> Option<NormalizedFilterSet> {
    filters.map(normalize_set)
}

fn normalize_set(filters: &FilterSet) -> NormalizedFilterSet {
    let mut normalized = BTreeMap::new();
    for (key, value) in filters.iter() {
        if matches!(value, FilterValue::Null) {
            continue;
        }
        normalized.insert(key.to_string(), normalize_value(value));
    }
    NormalizedFilterSet(normalized)
}

fn normalize_value(value: &FilterValue) -> NormalizedValue {
    match value {
        FilterValue::Null => NormalizedValue::Null,
        FilterValue::Bool(flag) => NormalizedValue::Bool(*flag),
        FilterValue::Int(int) => NormalizedValue::Int(*int),
        FilterValue::UInt(uint) => match i64::try_from(*uint) {
            Ok(int) => NormalizedValue::Int(int),
            Err(_) => NormalizedValue::UInt(*uint),
        },
        FilterValue::Float(float) => canonical_float(*float),
        FilterValue::Text(text) => NormalizedValue::Text(text.clone()),
        FilterValue::List(items) => {
            let mut items: Vec<NormalizedValue> = items.iter().map(normalize_value).collect();
            items.sort();
            NormalizedValue::List(items)
        }
        FilterValue::Map(nested) => NormalizedValue::Map(normalize_set(nested)),
    }
}

// `1` and `1.0` are the same number to callers building filters.
fn canonical_float(value: f64) -> NormalizedValue {
    if value.is_nan() {
        return NormalizedValue::Float(f64::NAN);
    }
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        return NormalizedValue::Int(value as i64);
    }
    if value.fract() == 0.0 && value >= i64::MAX as f64 && value < u64::MAX as f64 {
        return NormalizedValue::UInt(value as u64);
    }
    NormalizedValue::Float(value)
}

// ============================================================================
// Total order
// ============================================================================

impl NormalizedValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::UInt(_) | Self::Float(_) => 2,
            Self::Text(_) => 3,
            Self::List(_) => 4,
            Self::Map(_) => 5,
        }
    }
}

impl Ord for NormalizedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use NormalizedValue::*;

        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (UInt(a), UInt(b)) => a.cmp(b),
            // UInt values all lie above i64::MAX.
            (Int(_), UInt(_)) => Ordering::Less,
            (UInt(_), Int(_)) => Ordering::Greater,
            (UInt(a), Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Float(a), UInt(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Float(a), Float(b)) => a.total_cmp(b),
            // Ties between an int and a float sort the int first.
            (Int(a), Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Text(a), Text(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for NormalizedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NormalizedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NormalizedValue {}

impl Hash for NormalizedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(flag) => flag.hash(state),
            Self::Int(int) => int.hash(state),
            Self::UInt(uint) => uint.hash(state),
            Self::Float(float) => float.to_bits().hash(state),
            Self::Text(text) => text.hash(state),
            Self::List(items) => items.hash(state),
            Self::Map(nested) => nested.hash(state),
        }
    }
}

impl Serialize for NormalizedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(flag) => serializer.serialize_bool(*flag),
            Self::Int(int) => serializer.serialize_i64(*int),
            Self::UInt(uint) => serializer.serialize_u64(*uint),
            Self::Float(float) => serializer.serialize_f64(*float),
            Self::Text(text) => serializer.serialize_str(text),
            Self::List(items) => items.serialize(serializer),
            Self::Map(nested) => nested.serialize(serializer),
        }
    }
}
