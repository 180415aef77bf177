//! Typed lookups over any [`Repository`].
//!
//! Decoding failures surface as [`MutationError::Corrupt`] naming the key, so
//! a single bad cache entry never turns into a silent default.

use serde::de::DeserializeOwned;
use std::collections::BTreeSet;

use super::key::{CacheKey, Collection};
use super::Repository;
use crate::error::MutationError;
use crate::model::{
    AccountId, ActionLog, AuditLogEntry, ChatType, LedgerReport, PersonalDetails, Policy, PolicyId,
    ReportId, ReportKind, Transaction, TransactionId,
};

fn decode<T: DeserializeOwned>(key: &CacheKey, value: serde_json::Value) -> Result<T, MutationError> {
    serde_json::from_value(value).map_err(|source| MutationError::Corrupt {
        key: key.clone(),
        source,
    })
}

/// Typed read helpers, available on every repository.
pub trait Entities: Repository {
    /// Decode the value at `key`, if present.
    fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>, MutationError> {
        self.get(key).map(|value| decode(key, value)).transpose()
    }

    /// Decode the value at `key`, failing with `NotFound` if absent.
    fn require<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T, MutationError> {
        self.load(key)?
            .ok_or_else(|| MutationError::NotFound { key: key.clone() })
    }

    fn report(&self, id: &ReportId) -> Result<Option<LedgerReport>, MutationError> {
        self.load(&CacheKey::Report(id.clone()))
    }

    fn transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, MutationError> {
        self.load(&CacheKey::Transaction(id.clone()))
    }

    fn policy(&self, id: &PolicyId) -> Result<Option<Policy>, MutationError> {
        self.load(&CacheKey::Policy(id.clone()))
    }

    /// Policy governing `report`, if it belongs to a workspace.
    fn policy_of(&self, report: &LedgerReport) -> Result<Option<Policy>, MutationError> {
        match &report.policy_id {
            Some(id) => self.policy(id),
            None => Ok(None),
        }
    }

    /// Audit log of one report; empty if none is cached.
    fn actions(&self, report_id: &ReportId) -> Result<ActionLog, MutationError> {
        Ok(self
            .load(&CacheKey::ReportActions(report_id.clone()))?
            .unwrap_or_default())
    }

    fn personal_details(&self, account: AccountId) -> Result<Option<PersonalDetails>, MutationError> {
        self.load(&CacheKey::PersonalDetails(account))
    }

    fn details_by_login(&self, login: &str) -> Result<Option<PersonalDetails>, MutationError> {
        let wanted = login.trim().to_ascii_lowercase();
        for (key, value) in self.collection(Collection::PersonalDetails) {
            let details: PersonalDetails = decode(&key, value)?;
            if details.login.eq_ignore_ascii_case(&wanted) {
                return Ok(Some(details));
            }
        }
        Ok(None)
    }

    /// Every cached report that is not pending deletion.
    fn live_reports(&self) -> Result<Vec<LedgerReport>, MutationError> {
        let mut out = Vec::new();
        for (key, value) in self.collection(Collection::Report) {
            let report: LedgerReport = decode(&key, value)?;
            if !report.is_pending_delete() {
                out.push(report);
            }
        }
        Ok(out)
    }

    /// Every cached transaction that is not pending deletion.
    fn live_transactions(&self) -> Result<Vec<Transaction>, MutationError> {
        let mut out = Vec::new();
        for (key, value) in self.collection(Collection::Transaction) {
            let txn: Transaction = decode(&key, value)?;
            if !txn.is_pending_delete() {
                out.push(txn);
            }
        }
        Ok(out)
    }

    /// Live transactions owned by `report_id`.
    fn transactions_on(&self, report_id: &ReportId) -> Result<Vec<Transaction>, MutationError> {
        Ok(self
            .live_transactions()?
            .into_iter()
            .filter(|t| &t.report_id == report_id)
            .collect())
    }

    /// The money-movement entry for `transaction_id` in `report_id`'s log.
    fn request_action(
        &self,
        report_id: &ReportId,
        transaction_id: &TransactionId,
    ) -> Result<Option<AuditLogEntry>, MutationError> {
        Ok(self
            .actions(report_id)?
            .into_values()
            .find(|entry| entry.is_request_for(transaction_id)))
    }

    /// The preview entry in `chat_id` that points at `ledger_id`.
    fn preview_action(
        &self,
        chat_id: &ReportId,
        ledger_id: &ReportId,
    ) -> Result<Option<AuditLogEntry>, MutationError> {
        Ok(self
            .actions(chat_id)?
            .into_values()
            .find(|entry| entry.is_preview_of(ledger_id)))
    }

    /// One-on-one chat between exactly `a` and `b`.
    fn find_direct_chat(&self, a: AccountId, b: AccountId) -> Result<Option<LedgerReport>, MutationError> {
        let wanted = BTreeSet::from([a, b]);
        Ok(self.live_reports()?.into_iter().find(|r| {
            r.is_chat_of(ChatType::Direct) && r.member_ids().collect::<BTreeSet<_>>() == wanted
        }))
    }

    /// Group chat whose visible members are exactly `members`.
    fn find_group_chat(&self, members: &BTreeSet<AccountId>) -> Result<Option<LedgerReport>, MutationError> {
        Ok(self.live_reports()?.into_iter().find(|r| {
            r.is_chat_of(ChatType::Group) && &r.member_ids().collect::<BTreeSet<_>>() == members
        }))
    }

    /// `owner`'s expense chat inside `policy_id`.
    fn find_policy_expense_chat(
        &self,
        policy_id: &PolicyId,
        owner: AccountId,
    ) -> Result<Option<LedgerReport>, MutationError> {
        Ok(self.live_reports()?.into_iter().find(|r| {
            r.is_chat_of(ChatType::PolicyExpenseChat)
                && r.policy_id.as_ref() == Some(policy_id)
                && r.owner == owner
        }))
    }

    /// `account`'s conversation with itself.
    fn find_self_dm(&self, account: AccountId) -> Result<Option<LedgerReport>, MutationError> {
        Ok(self
            .live_reports()?
            .into_iter()
            .find(|r| r.is_chat_of(ChatType::SelfDm) && r.owner == account))
    }

    /// Ledger report `id`, requiring it to be a money-carrying kind.
    fn ledger(&self, id: &ReportId) -> Result<LedgerReport, MutationError> {
        let report: LedgerReport = self.require(&CacheKey::Report(id.clone()))?;
        if report.kind == ReportKind::Chat {
            return Err(MutationError::WrongKind {
                report_id: id.clone(),
                kind: report.kind,
            });
        }
        Ok(report)
    }
}

impl<R: Repository + ?Sized> Entities for R {}
