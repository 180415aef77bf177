//! Editing the fields of one transaction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{eligibility, request};
use super::{Context, Decision, ErrorTarget, Ineligible, Ledgers, Plan, eligible};
use crate::assemble::encode;
use crate::command::{Command, EditPayload};
use crate::error::MutationError;
use crate::model::{
    ActionPayload, Amount, Currency, FieldChange, Receipt, ReportKind, Transaction, TransactionId,
};
use crate::store::{CacheKey, Entities};
use crate::synth;

/// Fields to change. Absent fields are left alone; an empty category or
/// tag clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reimbursable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

/// Changed fields, by wire name.
pub type Changes = BTreeMap<String, FieldChange>;

fn note(changes: &mut Changes, txn: &mut Transaction, field: &str, old: Value, new: Value) {
    if old != new {
        txn.mark_pending(field);
        changes.insert(field.to_string(), FieldChange { old, new });
    }
}

fn cleared(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl TransactionEdit {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Write the requested fields into `txn`, restating the amount with
    /// `sign`, and report what actually changed.
    pub fn apply(&self, txn: &mut Transaction, sign: i64) -> Result<Changes, MutationError> {
        let mut changes = Changes::new();
        if let Some(amount) = self.amount {
            let scanning = self
                .receipt
                .as_ref()
                .or(txn.receipt.as_ref())
                .is_some_and(Receipt::is_scanning);
            request::check_amount(amount, scanning)?;
            let old = txn.display_amount();
            txn.amount = amount * sign;
            note(&mut changes, txn, "amount", old.into(), amount.into());
        }
        if let Some(currency) = &self.currency {
            let old = std::mem::replace(&mut txn.currency, currency.clone());
            note(&mut changes, txn, "currency", old.as_str().into(), currency.as_str().into());
        }
        if let Some(created) = self.created {
            let old = std::mem::replace(&mut txn.created, created);
            note(&mut changes, txn, "created", old.to_string().into(), created.to_string().into());
        }
        if let Some(merchant) = &self.merchant {
            let old = std::mem::replace(&mut txn.merchant, merchant.clone());
            note(&mut changes, txn, "merchant", old.into(), merchant.as_str().into());
        }
        if let Some(comment) = &self.comment {
            let old = std::mem::replace(&mut txn.comment, comment.clone());
            note(&mut changes, txn, "comment", old.into(), comment.as_str().into());
        }
        if let Some(category) = &self.category {
            let next = cleared(category);
            let old = std::mem::replace(&mut txn.category, next.clone());
            note(&mut changes, txn, "category", old.into(), next.into());
        }
        if let Some(tag) = &self.tag {
            let next = cleared(tag);
            let old = std::mem::replace(&mut txn.tag, next.clone());
            note(&mut changes, txn, "tag", old.into(), next.into());
        }
        if let Some(billable) = self.billable {
            let old = std::mem::replace(&mut txn.billable, billable);
            note(&mut changes, txn, "billable", old.into(), billable.into());
        }
        if let Some(reimbursable) = self.reimbursable {
            let old = std::mem::replace(&mut txn.reimbursable, reimbursable);
            note(&mut changes, txn, "reimbursable", old.into(), reimbursable.into());
        }
        if let Some(code) = &self.tax_code {
            let next = cleared(code);
            let old = std::mem::replace(&mut txn.tax_code, next.clone());
            note(&mut changes, txn, "taxCode", old.into(), next.into());
        }
        if let Some(tax) = self.tax_amount {
            request::check_range(tax, "tax amount")?;
            let old = std::mem::replace(&mut txn.tax_amount, Some(tax));
            note(&mut changes, txn, "taxAmount", old.into(), tax.into());
        }
        if let Some(receipt) = &self.receipt {
            let old = encode("receipt", &txn.receipt)?;
            txn.receipt = Some(receipt.clone());
            note(&mut changes, txn, "receipt", old, encode("receipt", receipt)?);
        }
        Ok(changes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditTransaction {
    pub transaction_id: TransactionId,
    #[serde(flatten)]
    pub edit: TransactionEdit,
}

pub fn edit_transaction(ctx: &mut Context<'_>, params: &EditTransaction) -> Result<Decision, MutationError> {
    let action_id = ctx.mint_action();
    let before: Transaction = ctx
        .repo
        .require(&CacheKey::Transaction(params.transaction_id.clone()))?;
    if before.is_split_parent() {
        return Err(MutationError::invalid("edit the shares of a split, not its parent"));
    }
    if before.is_pending_delete() {
        return Ok(Ineligible::PendingDelete.into());
    }
    let ledger = if before.is_unreported() {
        None
    } else {
        ctx.repo.report(&before.report_id)?
    };
    if let Some(report) = &ledger {
        eligible!(eligibility::editable(report));
    }

    let sign = ledger
        .as_ref()
        .map_or(ReportKind::Expense.amount_sign(), |r| r.kind.amount_sign());
    let mut after = before.clone();
    let changes = params.edit.apply(&mut after, sign)?;
    if changes.is_empty() {
        return Ok(Ineligible::NoChanges.into());
    }

    let mut asm = ctx.assembly();
    let mut ledgers = Ledgers::default();
    ledgers.apply(ctx.repo, Some(&before), Some(&after))?;
    ledgers.write(&mut asm)?;

    let log = ctx.log_report_for(&before)?;
    if let Some(report_id) = &log {
        let at = ctx.timeline.next();
        asm.append_action(&synth::entry(
            action_id.clone(),
            report_id.clone(),
            at,
            ctx.actor(),
            ActionPayload::ModifiedExpense {
                transaction_id: before.transaction_id.clone(),
                changes: changes.clone(),
            },
        ))?;
    }
    asm.update(CacheKey::Transaction(before.transaction_id.clone()), &before, &after)?;

    let policy = match &ledger {
        Some(report) => ctx.repo.policy_of(report)?,
        None => None,
    };
    let violations =
        asm.refresh_violations(&after, policy.as_ref(), ctx.enforce_violations(policy.as_ref()), false)?;
    if let Some(report) = ledgers.after(&before.report_id) {
        let fresh = BTreeMap::from([(after.transaction_id.clone(), violations)]);
        ctx.refresh_next_step(&mut asm, report, policy.as_ref(), &fresh)?;
    }

    let payload = EditPayload {
        transaction_id: before.transaction_id.clone(),
        report_id: before.report_id.clone(),
        action_id: log.map(|_| action_id),
        changes: changes.into_iter().map(|(field, change)| (field, change.new)).collect(),
    };
    Ok(Decision::one(Plan {
        command: Command::UpdateRequest(payload),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: before.transaction_id,
            created: false,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        MAX_AMOUNT, PendingAction, PolicyTier, ReceiptState, ViolationName, Violation,
        WorkflowStage,
    };
    use crate::orchestrate::testkit::{Fixture, bob, workspace};

    fn edit(txn: &Transaction, edit: TransactionEdit) -> EditTransaction {
        EditTransaction {
            transaction_id: txn.transaction_id.clone(),
            edit,
        }
    }

    #[test]
    fn amount_edit_moves_the_total_and_logs_the_change() {
        let mut fx = Fixture::new();
        let policy = fx.workspace(PolicyTier::Collect);
        let txn = fx.request(workspace(&policy), 2000);
        let params = edit(
            &txn,
            TransactionEdit {
                amount: Some(2500),
                merchant: Some("Bistro".into()),
                ..TransactionEdit::default()
            },
        );
        let plans = fx.plans(|ctx| edit_transaction(ctx, &params));
        let after = fx.optimistic(&plans);

        let edited = after.transaction(&txn.transaction_id).expect("read").expect("txn");
        assert_eq!(edited.amount, -2500);
        assert_eq!(edited.pending_fields.get("amount"), Some(&PendingAction::Update));
        assert_eq!(after.ledger(&txn.report_id).expect("ledger").total, -2500);

        let log = after.actions(&txn.report_id).expect("log");
        let modified = log
            .values()
            .find_map(|e| match &e.original_message {
                ActionPayload::ModifiedExpense { changes, .. } => Some(changes.clone()),
                _ => None,
            })
            .expect("modified entry");
        assert_eq!(modified["amount"].old, Value::from(2000));
        assert_eq!(modified["merchant"].new, Value::from("Bistro"));
        fx.assert_rollback_closure(&plans);

        let confirmed = fx.confirmed(&plans);
        let edited = confirmed.transaction(&txn.transaction_id).expect("read").expect("txn");
        assert!(edited.pending_fields.is_empty());
    }

    #[test]
    fn identical_values_are_no_changes() {
        let mut fx = Fixture::new();
        let txn = fx.request(bob(), 700);
        let params = edit(
            &txn,
            TransactionEdit {
                merchant: Some(txn.merchant.clone()),
                ..TransactionEdit::default()
            },
        );
        assert_eq!(fx.skipped(|ctx| edit_transaction(ctx, &params)), Ineligible::NoChanges);
    }

    #[test]
    fn currency_changes_leave_the_total_pending() {
        let mut fx = Fixture::new();
        let txn = fx.request(bob(), 700);
        let params = edit(
            &txn,
            TransactionEdit {
                currency: Some("EUR".parse().expect("currency")),
                ..TransactionEdit::default()
            },
        );
        let plans = fx.plans(|ctx| edit_transaction(ctx, &params));
        let report = fx.optimistic(&plans).ledger(&txn.report_id).expect("ledger");
        assert_eq!(report.total, 700);
        assert_eq!(report.pending_fields.get("total"), Some(&PendingAction::Update));
        fx.assert_rollback_closure(&plans);
    }

    #[test]
    fn edited_amounts_follow_the_request_rules() {
        let mut fx = Fixture::new();
        let txn = fx.request(bob(), 700);
        for bad in [
            TransactionEdit { amount: Some(0), ..TransactionEdit::default() },
            TransactionEdit { amount: Some(-5), ..TransactionEdit::default() },
            TransactionEdit { amount: Some(MAX_AMOUNT + 1), ..TransactionEdit::default() },
            TransactionEdit { tax_amount: Some(-1), ..TransactionEdit::default() },
        ] {
            let params = edit(&txn, bad);
            let err = fx.try_plan(|ctx| edit_transaction(ctx, &params)).expect_err("invalid");
            assert!(matches!(err, MutationError::InvalidInput(_)));
        }

        let scanning = TransactionEdit {
            amount: Some(0),
            receipt: Some(Receipt {
                source: "receipt.jpg".into(),
                filename: None,
                state: ReceiptState::Scanning,
            }),
            ..TransactionEdit::default()
        };
        let params = edit(&txn, scanning);
        assert!(!fx.plans(|ctx| edit_transaction(ctx, &params)).is_empty());
    }

    #[test]
    fn settled_reports_refuse_edits() {
        let mut fx = Fixture::new();
        let policy = fx.workspace(PolicyTier::Collect);
        let txn = fx.request(workspace(&policy), 1000);
        let mut report = fx.report_of(&txn);
        report.set_stage(WorkflowStage::Approved);
        fx.seed(CacheKey::Report(report.report_id.clone()), &report);
        let params = edit(&txn, TransactionEdit { amount: Some(1), ..TransactionEdit::default() });
        assert_eq!(
            fx.skipped(|ctx| edit_transaction(ctx, &params)),
            Ineligible::WrongStage { stage: WorkflowStage::Approved }
        );
    }

    #[test]
    fn control_workspaces_recompute_violations() {
        let mut fx = Fixture::new();
        let mut policy = fx.workspace(PolicyTier::Control);
        policy.requires_category = true;
        fx.seed(CacheKey::Policy(policy.id.clone()), &policy);
        let txn = fx.request(workspace(&policy), 1000);
        let key = CacheKey::TransactionViolations(txn.transaction_id.clone());
        let stored: Vec<Violation> = fx.store.load(&key).expect("read").unwrap_or_default();
        assert!(stored.iter().any(|v| v.name == ViolationName::MissingCategory));

        let params = edit(&txn, TransactionEdit { category: Some("Meals".into()), ..TransactionEdit::default() });
        let plans = fx.plans(|ctx| edit_transaction(ctx, &params));
        let after: Option<Vec<Violation>> = fx.optimistic(&plans).load(&key).expect("read");
        assert!(after.unwrap_or_default().iter().all(|v| v.name != ViolationName::MissingCategory));
        fx.assert_rollback_closure(&plans);
    }
}
