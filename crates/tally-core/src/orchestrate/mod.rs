//! Mutation orchestrators.
//!
//! Every orchestrator has the same shape: gather inputs from the
//! [`Repository`], resolve or create parent entities, synthesize new
//! entities, recompute aggregates, and assemble one or more [`Plan`]s. The
//! [`Engine`] applies each plan's optimistic phase through a [`Dispatcher`]
//! and hands the remote command its success and failure phases.
//!
//! Orchestrators are pure planners: they take a [`Context`] and return a
//! [`Decision`]. They never touch the dispatcher, which keeps them testable
//! against a bare [`MemoryStore`](crate::store::MemoryStore).
//!
//! Identifier minting is positional. Each orchestrator mints its ids in a
//! fixed order whether or not every id ends up used, so a retry that replays
//! the reserved ids recreates the same entities.
//!
//! [`Dispatcher`]: crate::command::Dispatcher

pub mod convert;
pub mod delete;
pub mod duplicates;
pub mod edit;
pub mod eligibility;
pub mod engine;
pub mod hold;
pub mod request;
pub mod split;
#[cfg(test)]
pub(crate) mod testkit;
pub mod workflow;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::assemble::Assembly;
use crate::clock::Timeline;
use crate::command::{Command, RequestId};
use crate::config::EngineConfig;
use crate::error::MutationError;
use crate::model::next_step;
use crate::model::{
    AccountId, ActionId, IdSource, LedgerReport, Policy, ReportId, ReportKind, Session,
    Transaction, TransactionId, Violation,
};
use crate::recalc;
use crate::store::{CacheKey, Entities, Repository, UpdateSet};

pub use eligibility::{Ineligible, Role};
pub use engine::Engine;

// ---------------------------------------------------------------------------
// Plans and outcomes
// ---------------------------------------------------------------------------

/// Entity that carries the error annotation when a plan's command fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorTarget {
    /// `created` marks a transaction this plan brings into existence.
    Transaction { id: TransactionId, created: bool },
    Report(ReportId),
}

impl ErrorTarget {
    #[must_use]
    pub fn key(&self) -> CacheKey {
        match self {
            Self::Transaction { id, .. } => CacheKey::TransactionErrors(id.clone()),
            Self::Report(id) => CacheKey::ReportErrors(id.clone()),
        }
    }

    /// The transaction this plan creates, if any.
    #[must_use]
    pub const fn created_transaction(&self) -> Option<&TransactionId> {
        match self {
            Self::Transaction { id, created: true } => Some(id),
            _ => None,
        }
    }
}

/// One remote command and the three phases that accompany it.
#[derive(Debug, Clone)]
pub struct Plan {
    pub command: Command,
    pub updates: UpdateSet,
    pub target: ErrorTarget,
}

/// What an orchestrator decided.
#[derive(Debug, Clone)]
pub enum Decision {
    Go(Vec<Plan>),
    Skip(Ineligible),
}

impl Decision {
    #[must_use]
    pub fn one(plan: Plan) -> Self {
        Self::Go(vec![plan])
    }
}

impl From<Ineligible> for Decision {
    fn from(reason: Ineligible) -> Self {
        Self::Skip(reason)
    }
}

/// What the engine did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Dispatched { requests: Vec<RequestId> },
    Skipped { reason: Ineligible },
}

impl Outcome {
    #[must_use]
    pub fn requests(&self) -> &[RequestId] {
        match self {
            Self::Dispatched { requests } => requests,
            Self::Skipped { .. } => &[],
        }
    }

    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Early return with a skip decision unless an eligibility check passed.
macro_rules! eligible {
    ($check:expr) => {
        if let Err(reason) = $check {
            return Ok($crate::orchestrate::Decision::Skip(reason));
        }
    };
}
pub(crate) use eligible;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything an orchestrator may read, plus the id source and timeline.
pub struct Context<'a> {
    pub repo: &'a dyn Repository,
    pub session: &'a Session,
    pub config: &'a EngineConfig,
    ids: &'a mut dyn IdSource,
    pub timeline: Timeline,
}

impl<'a> Context<'a> {
    pub fn new(
        repo: &'a dyn Repository,
        session: &'a Session,
        config: &'a EngineConfig,
        ids: &'a mut dyn IdSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            repo,
            session,
            config,
            ids,
            timeline: Timeline::new(now),
        }
    }

    #[must_use]
    pub const fn actor(&self) -> AccountId {
        self.session.account_id
    }

    pub fn mint_report(&mut self) -> ReportId {
        self.ids.mint().into()
    }

    pub fn mint_transaction(&mut self) -> TransactionId {
        self.ids.mint().into()
    }

    pub fn mint_action(&mut self) -> ActionId {
        self.ids.mint().into()
    }

    /// A fresh assembler over this context's repository.
    #[must_use]
    pub fn assembly(&self) -> Assembly<'a> {
        Assembly::new(self.repo)
    }

    /// Rule violations are computed for `policy`.
    #[must_use]
    pub fn enforce_violations(&self, policy: Option<&Policy>) -> bool {
        self.config.violations.enabled && policy.is_some_and(Policy::enforces_violations)
    }

    /// Report whose audit log holds the entries about `txn`: its ledger, or
    /// the actor's self DM for a tracked expense.
    pub(crate) fn log_report_for(&self, txn: &Transaction) -> Result<Option<ReportId>, MutationError> {
        if txn.is_unreported() {
            return Ok(self
                .repo
                .find_self_dm(txn.created_by)?
                .map(|r| r.report_id));
        }
        if txn.is_split_parent() {
            return Ok(None);
        }
        Ok(Some(txn.report_id.clone()))
    }

    /// Whether any transaction on `report_id` carries a violation, using
    /// `fresh` in place of the cached list where present.
    fn has_violations(
        &self,
        report_id: &ReportId,
        fresh: &BTreeMap<TransactionId, Vec<Violation>>,
    ) -> Result<bool, MutationError> {
        if fresh.values().any(|list| !list.is_empty()) {
            return Ok(true);
        }
        for txn in self.repo.transactions_on(report_id)? {
            if fresh.contains_key(&txn.transaction_id) {
                continue;
            }
            let stored: Option<Vec<Violation>> = self
                .repo
                .load(&CacheKey::TransactionViolations(txn.transaction_id))?;
            if stored.is_some_and(|list| !list.is_empty()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Re-derive the next step of an expense report on a paid workspace.
    pub(crate) fn refresh_next_step(
        &self,
        asm: &mut Assembly<'_>,
        report: &LedgerReport,
        policy: Option<&Policy>,
        fresh: &BTreeMap<TransactionId, Vec<Violation>>,
    ) -> Result<(), MutationError> {
        if !self.config.next_step.enabled || report.kind != ReportKind::Expense {
            return Ok(());
        }
        let Some(policy) = policy.filter(|p| p.is_paid()) else {
            return Ok(());
        };
        let has_violations = self.has_violations(&report.report_id, fresh)?;
        let step = next_step::derive(report, policy, self.actor(), has_violations);
        asm.next_step(&report.report_id, &step)
    }
}

// ---------------------------------------------------------------------------
// Ledgers touched by a plan
// ---------------------------------------------------------------------------

/// Before/after snapshots of every report a plan recomputes.
///
/// Several transaction changes on one report fold into one patch.
#[derive(Debug, Default)]
pub(crate) struct Ledgers {
    reports: BTreeMap<ReportId, (LedgerReport, LedgerReport)>,
}

impl Ledgers {
    /// Working copy of report `id`, loaded on first use. Sentinels and
    /// uncached reports yield `None`.
    pub fn get_mut(
        &mut self,
        repo: &dyn Repository,
        id: &ReportId,
    ) -> Result<Option<&mut LedgerReport>, MutationError> {
        if id.is_sentinel() {
            return Ok(None);
        }
        if !self.reports.contains_key(id) {
            let Some(report) = repo.report(id)? else {
                return Ok(None);
            };
            self.reports.insert(id.clone(), (report.clone(), report));
        }
        Ok(self.reports.get_mut(id).map(|(_, after)| after))
    }

    /// Fold one transaction change into the owning report(s).
    pub fn apply(
        &mut self,
        repo: &dyn Repository,
        previous: Option<&Transaction>,
        next: Option<&Transaction>,
    ) -> Result<(), MutationError> {
        if let (Some(p), Some(n)) = (previous, next) {
            if p.report_id != n.report_id {
                self.apply(repo, Some(p), None)?;
                return self.apply(repo, None, Some(n));
            }
        }
        let Some(id) = previous.or(next).map(|t| t.report_id.clone()) else {
            return Ok(());
        };
        if let Some(report) = self.get_mut(repo, &id)? {
            recalc::apply(report, previous, next);
        }
        Ok(())
    }

    #[must_use]
    pub fn after(&self, id: &ReportId) -> Option<&LedgerReport> {
        self.reports.get(id).map(|(_, after)| after)
    }

    pub fn updated(&self) -> impl Iterator<Item = &LedgerReport> {
        self.reports.values().map(|(_, after)| after)
    }

    /// Patch every touched report.
    pub fn write(&self, asm: &mut Assembly<'_>) -> Result<(), MutationError> {
        for (id, (before, after)) in &self.reports {
            asm.update(CacheKey::Report(id.clone()), before, after)?;
        }
        Ok(())
    }
}
