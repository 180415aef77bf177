//! Update-set assembler.
//!
//! [`Assembly`] turns "this entity now looks like that" into the narrow
//! three-phase writes of an [`UpdateSet`]. Orchestrators hand it whole
//! before/after entities; it serializes them, derives the smallest merge
//! patch with [`json::diff`], and lets the [`UpdateSet`] primitives capture
//! rollback snapshots from the repository at assembly time.
//!
//! Audit-log entries for one report are buffered and flushed as a single
//! merge into `reportActions:<id>`, so a plan that appends a `Created` entry
//! and the entry it causes touches that key once.
//!
//! Derived entities (violations, next steps) are written only when their
//! value actually changes; a gated-off derivation emits nothing at all.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::MutationError;
use crate::model::violation;
use crate::model::{
    ActionId, AuditLogEntry, NextStep, Policy, ReportId, ReportMetadata, Transaction,
    TransactionId, Violation,
};
use crate::store::json::diff;
use crate::store::{CacheKey, Repository, UpdateSet};

/// Serialize an entity for the cache.
pub fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Value, MutationError> {
    serde_json::to_value(value).map_err(|source| MutationError::Encode { what, source })
}

/// Builder for one plan's [`UpdateSet`].
pub struct Assembly<'r> {
    repo: &'r dyn Repository,
    set: UpdateSet,
    actions: BTreeMap<ReportId, Map<String, Value>>,
}

impl<'r> Assembly<'r> {
    #[must_use]
    pub fn new(repo: &'r dyn Repository) -> Self {
        Self {
            repo,
            set: UpdateSet::new(),
            actions: BTreeMap::new(),
        }
    }

    /// Write a brand-new entity.
    pub fn create<T: Serialize>(&mut self, key: CacheKey, entity: &T) -> Result<(), MutationError> {
        let value = encode("entity", entity)?;
        self.set.create(key, value);
        Ok(())
    }

    /// Patch an existing entity from `before` to `after`. Emits nothing when
    /// they serialize identically.
    pub fn update<T: Serialize>(
        &mut self,
        key: CacheKey,
        before: &T,
        after: &T,
    ) -> Result<(), MutationError> {
        let before = encode("entity", before)?;
        let after = encode("entity", after)?;
        if let Some(patch) = diff(&before, &after) {
            self.set.patch(self.repo, key, patch);
        }
        Ok(())
    }

    /// Write `after`, creating it when there is no `before`.
    pub fn upsert<T: Serialize>(
        &mut self,
        key: CacheKey,
        before: Option<&T>,
        after: &T,
    ) -> Result<(), MutationError> {
        match before {
            Some(before) => self.update(key, before, after),
            None => self.create(key, after),
        }
    }

    pub fn tombstone(&mut self, key: CacheKey) {
        self.set.tombstone(self.repo, key);
    }

    pub fn remove(&mut self, key: CacheKey) {
        self.set.remove(self.repo, key);
    }

    pub fn transient<T: Serialize>(&mut self, key: CacheKey, value: &T) -> Result<(), MutationError> {
        let value = encode("placeholder", value)?;
        self.set.transient(key, value);
        Ok(())
    }

    /// Client-only flags for a report created by this plan.
    pub fn new_report_metadata(&mut self, report_id: &ReportId) -> Result<(), MutationError> {
        let key = CacheKey::ReportMetadata(report_id.clone());
        self.create(
            key.clone(),
            &ReportMetadata {
                is_optimistic_report: true,
            },
        )?;
        self.set
            .on_success(key, serde_json::json!({ "isOptimisticReport": false }));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Audit log
    // -----------------------------------------------------------------------

    /// Append a new entry to its report's log.
    pub fn append_action(&mut self, entry: &AuditLogEntry) -> Result<(), MutationError> {
        let value = encode("audit-log entry", entry)?;
        self.actions
            .entry(entry.report_id.clone())
            .or_default()
            .insert(entry.action_id.to_string(), value);
        Ok(())
    }

    /// Change an existing entry in place.
    pub fn update_action(
        &mut self,
        before: &AuditLogEntry,
        after: &AuditLogEntry,
    ) -> Result<(), MutationError> {
        let old = encode("audit-log entry", before)?;
        let new = encode("audit-log entry", after)?;
        if let Some(patch) = diff(&old, &new) {
            self.actions
                .entry(after.report_id.clone())
                .or_default()
                .insert(after.action_id.to_string(), patch);
        }
        Ok(())
    }

    /// Mark one entry deleted; success drops it, failure restores it.
    pub fn tombstone_action(&mut self, report_id: &ReportId, action_id: &ActionId) {
        self.set.tombstone_entry(
            self.repo,
            CacheKey::ReportActions(report_id.clone()),
            action_id.as_str(),
        );
    }

    // -----------------------------------------------------------------------
    // Derived entities
    // -----------------------------------------------------------------------

    fn stored_violations(&self, id: &TransactionId) -> Result<Vec<Violation>, MutationError> {
        let key = CacheKey::TransactionViolations(id.clone());
        match self.repo.get(&key) {
            Some(value) => serde_json::from_value(value)
                .map_err(|source| MutationError::Corrupt { key, source }),
            None => Ok(Vec::new()),
        }
    }

    /// Rebuild the violation list of `txn`.
    ///
    /// Skipped entirely unless rules are enforced or a marker (hold,
    /// duplicate) changed. When rules are not enforced, stored rule
    /// violations are carried over untouched. Returns the resulting list.
    pub fn refresh_violations(
        &mut self,
        txn: &Transaction,
        policy: Option<&Policy>,
        enforce: bool,
        markers_changed: bool,
    ) -> Result<Vec<Violation>, MutationError> {
        let stored = self.stored_violations(&txn.transaction_id)?;
        if !enforce && !markers_changed {
            return Ok(stored);
        }
        let mut next = violation::compute(txn, policy, enforce);
        if !enforce {
            next.extend(stored.iter().filter(|v| !v.name.is_marker()).cloned());
            next.sort_by_key(|v| v.name);
        }
        if next != stored {
            let key = CacheKey::TransactionViolations(txn.transaction_id.clone());
            let value = if next.is_empty() {
                Value::Null
            } else {
                encode("violations", &next)?
            };
            self.set.replace(self.repo, key, value);
        }
        Ok(next)
    }

    /// Drop the violation list of a transaction that is going away.
    pub fn clear_violations(&mut self, id: &TransactionId) {
        let key = CacheKey::TransactionViolations(id.clone());
        if self.repo.get(&key).is_some() {
            self.set.remove(self.repo, key);
        }
    }

    /// Store `step` for `report_id` if it differs from the cached one.
    pub fn next_step(&mut self, report_id: &ReportId, step: &NextStep) -> Result<(), MutationError> {
        let key = CacheKey::NextStep(report_id.clone());
        let value = encode("next step", step)?;
        if self.repo.get(&key).as_ref() != Some(&value) {
            self.set.replace(self.repo, key, value);
        }
        Ok(())
    }

    /// Extra failure-only merge.
    pub fn on_failure(&mut self, key: CacheKey, patch: Value) {
        self.set.on_failure(key, patch);
    }

    /// Flush buffered log entries and return the finished set.
    #[must_use]
    pub fn finish(mut self) -> UpdateSet {
        for (report_id, entries) in std::mem::take(&mut self.actions) {
            self.set.patch(
                self.repo,
                CacheKey::ReportActions(report_id),
                Value::Object(entries),
            );
        }
        debug!(
            optimistic = self.set.optimistic.len(),
            success = self.set.success.len(),
            failure = self.set.failure.len(),
            "assembled update set"
        );
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AccountId, ActionPayload, Currency, PolicyId, PolicyTier, WorkflowStage,
    };
    use crate::store::{MemoryStore, Store};
    use crate::synth::{self, ExpenseDetails};
    use chrono::{DateTime, NaiveDate};
    use serde_json::json;

    fn txn(id: &str) -> Transaction {
        let details = ExpenseDetails::new(
            2000,
            Currency::usd(),
            NaiveDate::from_ymd_opt(2024, 2, 3).expect("date"),
        );
        let mut t = synth::transaction(TransactionId::new(id), ReportId::new("r1"), -1, &details, AccountId(1));
        t.pending_action = None;
        t
    }

    fn closure_holds(store: &MemoryStore, set: &UpdateSet) {
        let mut scratch = store.clone();
        scratch.apply_all(&set.optimistic);
        scratch.apply_all(&set.failure);
        assert_eq!(&scratch, store);
    }

    #[test]
    fn update_emits_narrow_patch() {
        let before = txn("t1");
        let mut store = MemoryStore::new();
        let key = CacheKey::Transaction(before.transaction_id.clone());
        store.seed(key.clone(), encode("t", &before).expect("encode"));

        let mut after = before.clone();
        after.merchant = "Cafe".into();
        after.mark_pending("merchant");

        let mut asm = Assembly::new(&store);
        asm.update(key.clone(), &before, &after).expect("update");
        let set = asm.finish();
        assert_eq!(
            set.optimistic[0].value,
            json!({"merchant": "Cafe", "pendingFields": {"merchant": "update"}})
        );
        assert_eq!(set.success[0].value, json!({"pendingFields": {"merchant": null}}));
        closure_holds(&store, &set);
    }

    #[test]
    fn unchanged_entities_emit_nothing() {
        let store = MemoryStore::new();
        let t = txn("t1");
        let mut asm = Assembly::new(&store);
        asm.update(CacheKey::Transaction(t.transaction_id.clone()), &t, &t)
            .expect("update");
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn entries_for_one_report_flush_as_one_patch() {
        let store = MemoryStore::new();
        let at = DateTime::from_timestamp_millis(5_000).unwrap_or_default();
        let mut asm = Assembly::new(&store);
        for (id, payload) in [("a1", ActionPayload::Created), ("a2", ActionPayload::Reopened)] {
            let e = synth::entry(ActionId::new(id), ReportId::new("r1"), at, AccountId(1), payload);
            asm.append_action(&e).expect("append");
        }
        let set = asm.finish();
        assert_eq!(set.optimistic.len(), 1);
        let value = &set.optimistic[0].value;
        assert!(value.get("a1").is_some() && value.get("a2").is_some());
        closure_holds(&store, &set);
    }

    #[test]
    fn violations_are_gated_unless_markers_change() {
        let store = MemoryStore::new();
        let mut held = txn("t1");
        held.hold = Some(ActionId::new("h1"));
        let policy = Policy::new(PolicyId::new("p"), "P", AccountId(1), PolicyTier::Collect);

        let mut asm = Assembly::new(&store);
        asm.refresh_violations(&held, Some(&policy), false, false)
            .expect("refresh");
        assert!(asm.finish().is_empty());

        let mut asm = Assembly::new(&store);
        let list = asm
            .refresh_violations(&held, Some(&policy), false, true)
            .expect("refresh");
        assert_eq!(list.len(), 1);
        let set = asm.finish();
        assert_eq!(set.optimistic.len(), 1);
        closure_holds(&store, &set);
    }

    #[test]
    fn next_step_written_only_on_change() {
        let policy = Policy::new(PolicyId::new("p"), "P", AccountId(1), PolicyTier::Collect);
        let mut report = synth::report::expense_report(
            ReportId::new("r1"),
            ReportId::new("c1"),
            &policy,
            AccountId(1),
            Currency::usd(),
            NaiveDate::from_ymd_opt(2024, 2, 3).expect("date"),
        );
        report.set_stage(WorkflowStage::Open);
        let step = crate::model::next_step::derive(&report, &policy, AccountId(1), false);

        let mut store = MemoryStore::new();
        store.seed(CacheKey::NextStep(ReportId::new("r1")), encode("s", &step).expect("encode"));
        let mut asm = Assembly::new(&store);
        asm.next_step(&ReportId::new("r1"), &step).expect("next step");
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn metadata_flips_on_success() {
        let store = MemoryStore::new();
        let mut asm = Assembly::new(&store);
        asm.new_report_metadata(&ReportId::new("r9")).expect("metadata");
        let set = asm.finish();
        let mut confirmed = store.clone();
        confirmed.apply_all(&set.optimistic);
        confirmed.apply_all(&set.success);
        assert_eq!(
            confirmed.get(&CacheKey::ReportMetadata(ReportId::new("r9"))),
            Some(json!({"isOptimisticReport": false}))
        );
        closure_holds(&store, &set);
    }
}
