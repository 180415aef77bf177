//! The store boundary.
//!
//! Orchestrators never talk to a live cache. They read through the
//! [`Repository`] trait (explicit `get` / `collection` contracts) and return
//! an [`UpdateSet`]; only a dispatcher holding a [`Store`] writes.
//!
//! - [`key`] - typed [`CacheKey`]s and their wire form
//! - [`json`] - merge, snapshot and diff helpers over `serde_json::Value`
//! - [`update`] - [`Update`], [`Method`], [`UpdateSet`]
//! - [`read`] - typed lookups layered over any repository
//! - [`memory`] - [`MemoryStore`], the in-process implementation

pub mod json;
pub mod key;
pub mod memory;
pub mod read;
pub mod update;

use serde_json::Value;

pub use key::{CacheKey, Collection, UnknownKey};
pub use memory::MemoryStore;
pub use read::Entities;
pub use update::{Method, Update, UpdateSet};

/// Read-through view of the cache.
pub trait Repository {
    /// Current value at `key`, if any.
    fn get(&self, key: &CacheKey) -> Option<Value>;

    /// Every stored `(key, value)` pair of one collection, in key order.
    fn collection(&self, collection: Collection) -> Vec<(CacheKey, Value)>;
}

/// A repository that can also be written.
pub trait Store: Repository {
    /// Apply one update with cache semantics.
    fn apply(&mut self, update: &Update);

    /// Apply updates in order.
    fn apply_all(&mut self, updates: &[Update]) {
        for update in updates {
            self.apply(update);
        }
    }
}
