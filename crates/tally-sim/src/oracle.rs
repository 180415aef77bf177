//! Invariant checks run against the cache while a simulation proceeds.
//!
//! # Invariants checked
//!
//! 1. **Rollback closure**: when every command of one operation fails, the
//!    cache is back to exactly what it held before the operation, ignoring
//!    error annotations.
//! 2. **Aggregate conservation**: once nothing is in flight, every live
//!    expense report's `total` and `unheld_total` equal the sums over the
//!    transactions it holds.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tally_core::MutationError;
use tally_core::model::{Amount, ReportKind};
use tally_core::store::{Entities, MemoryStore};

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl Default for OracleResult {
    fn default() -> Self {
        Self::pass()
    }
}

impl OracleResult {
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Fold `other` into `self`; failures accumulate.
    pub fn absorb(&mut self, other: Self) {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
    }
}

/// One broken invariant, with enough context to find it again on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "invariant", rename_all = "snake_case")]
pub enum InvariantViolation {
    RollbackClosure {
        step: u64,
        operation: String,
        /// Wire keys whose value differs from the pre-operation cache.
        differing_keys: Vec<String>,
    },
    AggregateDrift {
        step: u64,
        report_id: String,
        field: &'static str,
        stored: Amount,
        recomputed: Amount,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RollbackClosure {
                step,
                operation,
                differing_keys,
            } => write!(
                f,
                "RollbackClosure: step {step} ({operation}) left {} key(s) changed: {differing_keys:?}",
                differing_keys.len()
            ),
            Self::AggregateDrift {
                step,
                report_id,
                field,
                stored,
                recomputed,
            } => write!(
                f,
                "AggregateDrift: step {step} report {report_id} {field}={stored}, transactions sum to {recomputed}"
            ),
        }
    }
}

/// Keys whose values differ between two caches, annotations excluded.
#[must_use]
pub fn differing_keys(before: &MemoryStore, after: &MemoryStore) -> Vec<String> {
    let before: BTreeMap<String, Value> = before.without_annotations().to_wire();
    let after: BTreeMap<String, Value> = after.without_annotations().to_wire();
    let mut keys: Vec<String> = before
        .iter()
        .filter(|(key, value)| after.get(*key) != Some(value))
        .map(|(key, _)| key.clone())
        .collect();
    keys.extend(after.keys().filter(|key| !before.contains_key(*key)).cloned());
    keys.sort();
    keys
}

#[must_use]
pub fn check_rollback(step: u64, operation: &str, before: &MemoryStore, after: &MemoryStore) -> OracleResult {
    let differing = differing_keys(before, after);
    if differing.is_empty() {
        return OracleResult::pass();
    }
    OracleResult::from_violations(vec![InvariantViolation::RollbackClosure {
        step,
        operation: operation.to_string(),
        differing_keys: differing,
    }])
}

/// Compare stored expense-report aggregates with their transactions.
pub fn check_aggregates(step: u64, store: &MemoryStore) -> Result<OracleResult, MutationError> {
    let mut violations = Vec::new();
    for report in store.live_reports()? {
        if report.kind != ReportKind::Expense || report.is_pending_delete() {
            continue;
        }
        let txns = store.transactions_on(&report.report_id)?;
        let total: Amount = txns.iter().map(|t| t.amount).sum();
        let unheld: Amount = txns.iter().filter(|t| !t.is_held()).map(|t| t.amount).sum();
        for (field, stored, recomputed) in [
            ("total", report.total, total),
            ("unheldTotal", report.unheld_total, unheld),
        ] {
            if stored != recomputed {
                violations.push(InvariantViolation::AggregateDrift {
                    step,
                    report_id: report.report_id.to_string(),
                    field,
                    stored,
                    recomputed,
                });
            }
        }
    }
    Ok(OracleResult::from_violations(violations))
}
