//! The three-phase update set.
//!
//! An [`UpdateSet`] is the single result type of every orchestrator. It is
//! built through a handful of primitives, each of which writes the
//! optimistic entry *and* its rollback in one call, so a failure entry can
//! never be forgotten:
//!
//! | Primitive | optimistic | success | failure |
//! |---|---|---|---|
//! | [`create`](UpdateSet::create) | replace value | clear transient | replace `null` |
//! | [`patch`](UpdateSet::patch) | merge patch | clear transient | merge prior snapshot of the patched fields |
//! | [`replace`](UpdateSet::replace) | replace value | – | replace prior value |
//! | [`tombstone`](UpdateSet::tombstone) | merge `pendingAction: delete` | replace `null` | merge prior snapshot |
//! | [`remove`](UpdateSet::remove) | replace `null` | – | replace prior value |
//! | [`transient`](UpdateSet::transient) | replace value | replace `null` | replace `null` |
//!
//! Prior values are captured at assembly time from the repository, never
//! lazily when a phase is applied.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;

use super::json::{snapshot_for_patch, strip_nulls, transient_clear};
use super::key::CacheKey;
use super::Repository;

/// How an update is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Full overwrite; `null` deletes the key.
    Replace,
    /// Deep patch; `null` leaves delete fields.
    Merge,
}

/// One `(key, method, value)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub key: CacheKey,
    pub method: Method,
    pub value: Value,
}

impl Update {
    #[must_use]
    pub const fn replace(key: CacheKey, value: Value) -> Self {
        Self {
            key,
            method: Method::Replace,
            value,
        }
    }

    #[must_use]
    pub const fn merge(key: CacheKey, value: Value) -> Self {
        Self {
            key,
            method: Method::Merge,
            value,
        }
    }
}

/// Ordered optimistic / success / failure update lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSet {
    pub optimistic: Vec<Update>,
    pub success: Vec<Update>,
    pub failure: Vec<Update>,
}

impl UpdateSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every phase of `other` after this set's entries.
    pub fn merge(&mut self, other: Self) {
        self.optimistic.extend(other.optimistic);
        self.success.extend(other.success);
        self.failure.extend(other.failure);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.optimistic.is_empty() && self.success.is_empty() && self.failure.is_empty()
    }

    /// Keys written by the optimistic phase.
    #[must_use]
    pub fn optimistic_keys(&self) -> BTreeSet<CacheKey> {
        self.optimistic.iter().map(|u| u.key.clone()).collect()
    }

    /// Keys written by the failure phase.
    #[must_use]
    pub fn failure_keys(&self) -> BTreeSet<CacheKey> {
        self.failure.iter().map(|u| u.key.clone()).collect()
    }

    /// Union of every key any phase may touch.
    #[must_use]
    pub fn touched_keys(&self) -> BTreeSet<CacheKey> {
        self.optimistic
            .iter()
            .chain(&self.success)
            .chain(&self.failure)
            .map(|u| u.key.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Primitives
    // -----------------------------------------------------------------------

    /// Write a brand-new entity.
    pub fn create(&mut self, key: CacheKey, value: Value) {
        let value = strip_nulls(&value);
        if let Some(clear) = transient_clear(&value) {
            self.success.push(Update::merge(key.clone(), clear));
        }
        self.optimistic.push(Update::replace(key.clone(), value));
        self.failure.push(Update::replace(key, Value::Null));
    }

    /// Merge `patch` into whatever `repo` holds at `key`.
    ///
    /// If nothing is stored yet the failure phase deletes the key; otherwise
    /// it merges back the prior values of exactly the patched sub-fields.
    pub fn patch(&mut self, repo: &dyn Repository, key: CacheKey, patch: Value) {
        let rollback = match repo.get(&key) {
            Some(before) => Update::merge(key.clone(), snapshot_for_patch(&before, &patch)),
            None => Update::replace(key.clone(), Value::Null),
        };
        if let Some(clear) = transient_clear(&patch) {
            self.success.push(Update::merge(key.clone(), clear));
        }
        self.optimistic.push(Update::merge(key, patch));
        self.failure.push(rollback);
    }

    /// Overwrite a derived entity wholesale, restoring the full prior value
    /// on failure.
    pub fn replace(&mut self, repo: &dyn Repository, key: CacheKey, value: Value) {
        let before = repo.get(&key).unwrap_or(Value::Null);
        self.optimistic
            .push(Update::replace(key.clone(), strip_nulls(&value)));
        self.failure.push(Update::replace(key, before));
    }

    /// Mark an existing entity deleted; removal is confirmed on success.
    pub fn tombstone(&mut self, repo: &dyn Repository, key: CacheKey) {
        self.tombstone_with(repo, key, json!({ "pendingAction": "delete" }), Value::Null, Method::Replace);
    }

    /// Mark one entry of an action map deleted.
    pub fn tombstone_entry(&mut self, repo: &dyn Repository, key: CacheKey, entry: &str) {
        let mut patch = serde_json::Map::new();
        patch.insert(entry.to_string(), json!({ "pendingAction": "delete" }));
        let mut confirm = serde_json::Map::new();
        confirm.insert(entry.to_string(), Value::Null);
        self.tombstone_with(
            repo,
            key,
            Value::Object(patch),
            Value::Object(confirm),
            Method::Merge,
        );
    }

    fn tombstone_with(
        &mut self,
        repo: &dyn Repository,
        key: CacheKey,
        patch: Value,
        confirm: Value,
        confirm_method: Method,
    ) {
        let before = repo.get(&key).unwrap_or(Value::Null);
        self.optimistic.push(Update::merge(key.clone(), patch.clone()));
        self.success.push(Update {
            key: key.clone(),
            method: confirm_method,
            value: confirm,
        });
        let rollback = if before.is_null() {
            Update::replace(key, Value::Null)
        } else {
            Update::merge(key, snapshot_for_patch(&before, &patch))
        };
        self.failure.push(rollback);
    }

    /// Hard-delete an entity now; failure restores the full prior value.
    pub fn remove(&mut self, repo: &dyn Repository, key: CacheKey) {
        let before = repo.get(&key).unwrap_or(Value::Null);
        self.optimistic.push(Update::replace(key.clone(), Value::Null));
        self.failure.push(Update::replace(key, before));
    }

    /// Client-only placeholder that the remote response supersedes.
    pub fn transient(&mut self, key: CacheKey, value: Value) {
        self.optimistic
            .push(Update::replace(key.clone(), strip_nulls(&value)));
        self.success.push(Update::replace(key.clone(), Value::Null));
        self.failure.push(Update::replace(key, Value::Null));
    }

    /// Extra success-only merge (flag flips such as `isOptimisticReport`).
    pub fn on_success(&mut self, key: CacheKey, patch: Value) {
        self.success.push(Update::merge(key, patch));
    }

    /// Extra failure-only merge (error annotations).
    pub fn on_failure(&mut self, key: CacheKey, patch: Value) {
        self.failure.push(Update::merge(key, patch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReportId, TransactionId};
    use crate::store::{MemoryStore, Store};

    fn report_key() -> CacheKey {
        CacheKey::Report(ReportId::new("r1"))
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.seed(report_key(), json!({"reportID": "r1", "total": -100, "name": "Trip"}));
        store
    }

    fn roundtrip(store: &MemoryStore, set: &UpdateSet) -> MemoryStore {
        let mut scratch = store.clone();
        scratch.apply_all(&set.optimistic);
        scratch.apply_all(&set.failure);
        scratch
    }

    #[test]
    fn create_rolls_back_to_absent() {
        let store = MemoryStore::new();
        let mut set = UpdateSet::new();
        let key = CacheKey::Transaction(TransactionId::new("t1"));
        set.create(key.clone(), json!({"amount": -5, "pendingAction": "add", "tag": null}));

        assert_eq!(set.optimistic[0].value, json!({"amount": -5, "pendingAction": "add"}));
        assert_eq!(set.success[0].value, json!({"pendingAction": null}));
        assert_eq!(roundtrip(&store, &set), store);
    }

    #[test]
    fn patch_rolls_back_only_patched_fields() {
        let store = seeded();
        let mut set = UpdateSet::new();
        set.patch(&store, report_key(), json!({"total": -300, "pendingFields": {"total": "update"}}));

        assert_eq!(
            set.failure[0],
            Update::merge(report_key(), json!({"total": -100, "pendingFields": null}))
        );
        assert_eq!(roundtrip(&store, &set), store);
    }

    #[test]
    fn patch_of_missing_key_rolls_back_to_absent() {
        let store = MemoryStore::new();
        let mut set = UpdateSet::new();
        set.patch(&store, report_key(), json!({"total": 1}));
        assert_eq!(set.failure[0], Update::replace(report_key(), Value::Null));
    }

    #[test]
    fn tombstone_confirms_removal_and_restores_on_failure() {
        let store = seeded();
        let mut set = UpdateSet::new();
        set.tombstone(&store, report_key());

        assert_eq!(set.success[0], Update::replace(report_key(), Value::Null));
        let mut confirmed = store.clone();
        confirmed.apply_all(&set.optimistic);
        confirmed.apply_all(&set.success);
        assert!(confirmed.get(&report_key()).is_none());
        assert_eq!(roundtrip(&store, &set), store);
    }

    #[test]
    fn tombstone_entry_targets_one_map_entry() {
        let key = CacheKey::ReportActions(ReportId::new("r1"));
        let mut store = MemoryStore::new();
        store.seed(key.clone(), json!({"a1": {"x": 1}, "a2": {"x": 2}}));
        let mut set = UpdateSet::new();
        set.tombstone_entry(&store, key.clone(), "a1");

        let mut confirmed = store.clone();
        confirmed.apply_all(&set.optimistic);
        assert_eq!(
            confirmed.get(&key),
            Some(json!({"a1": {"x": 1, "pendingAction": "delete"}, "a2": {"x": 2}}))
        );
        confirmed.apply_all(&set.success);
        assert_eq!(confirmed.get(&key), Some(json!({"a2": {"x": 2}})));
        assert_eq!(roundtrip(&store, &set), store);
    }

    #[test]
    fn replace_and_remove_restore_full_prior_value() {
        let store = seeded();
        let mut set = UpdateSet::new();
        set.replace(&store, report_key(), json!({"reportID": "r1"}));
        assert_eq!(roundtrip(&store, &set), store);

        let mut set = UpdateSet::new();
        set.remove(&store, report_key());
        assert_eq!(roundtrip(&store, &set), store);
    }

    #[test]
    fn merge_concatenates_phases_in_order() {
        let store = MemoryStore::new();
        let mut a = UpdateSet::new();
        a.patch(&store, report_key(), json!({"a": 1}));
        let mut b = UpdateSet::new();
        b.transient(CacheKey::Report(ReportId::new("r2")), json!({"b": 2}));
        a.merge(b);
        assert_eq!(a.optimistic.len(), 2);
        assert_eq!(a.success.len(), 1);
        assert_eq!(a.failure.len(), 2);
        assert_eq!(a.touched_keys().len(), 2);
        assert_eq!(a.optimistic_keys(), a.failure_keys());
    }
}
