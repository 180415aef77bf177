use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

use super::json::{deep_merge, strip_nulls};
use super::key::{CacheKey, Collection};
use super::update::{Method, Update};
use super::{Repository, Store};

/// In-memory cache with the reactive store's write semantics.
///
/// - `replace` with `null` removes the key; any other value is stored with
///   its `null` fields stripped.
/// - `merge` deep-merges into the stored object (`null` leaves delete), or
///   stores the stripped patch when the key is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    entries: BTreeMap<CacheKey, Value>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value directly, as if delivered by the remote.
    pub fn seed(&mut self, key: CacheKey, value: Value) {
        self.apply(&Update::replace(key, value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &Value)> {
        self.entries.iter()
    }

    /// Copy without error-annotation collections.
    #[must_use]
    pub fn without_annotations(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| !k.collection().is_annotation())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Wire-form snapshot: `<collection>:<id>` → value.
    #[must_use]
    pub fn to_wire(&self) -> BTreeMap<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.format(), v.clone()))
            .collect()
    }
}

impl Repository for MemoryStore {
    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    fn collection(&self, collection: Collection) -> Vec<(CacheKey, Value)> {
        self.entries
            .iter()
            .filter(|(k, _)| k.collection() == collection)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Store for MemoryStore {
    fn apply(&mut self, update: &Update) {
        trace!(key = %update.key, method = ?update.method, "apply");
        match update.method {
            Method::Replace if update.value.is_null() => {
                self.entries.remove(&update.key);
            }
            Method::Replace => {
                self.entries
                    .insert(update.key.clone(), strip_nulls(&update.value));
            }
            Method::Merge => match self.entries.get_mut(&update.key) {
                Some(existing) => {
                    deep_merge(existing, &update.value);
                    if existing.as_object().is_some_and(serde_json::Map::is_empty) {
                        self.entries.remove(&update.key);
                    }
                }
                None if update.value.is_null() => {}
                None => {
                    let stripped = strip_nulls(&update.value);
                    if !stripped.as_object().is_some_and(serde_json::Map::is_empty) {
                        self.entries.insert(update.key.clone(), stripped);
                    }
                }
            },
        }
    }
}
