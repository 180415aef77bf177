use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{
    AccountId, Amount, Currency, PendingAction, PendingFields, Receipt, ReportId, Transaction,
    TransactionId,
};

/// User-entered fields of an expense, as typed into a form.
///
/// `amount` is the positive magnitude; the owning report decides the stored
/// sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDetails {
    pub amount: Amount,
    pub currency: Currency,
    pub created: NaiveDate,
    #[serde(default)]
    pub merchant: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub billable: bool,
    #[serde(default = "default_true")]
    pub reimbursable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

const fn default_true() -> bool {
    true
}

impl ExpenseDetails {
    /// Minimal details: amount, currency and date.
    #[must_use]
    pub fn new(amount: Amount, currency: Currency, created: NaiveDate) -> Self {
        Self {
            amount,
            currency,
            created,
            merchant: String::new(),
            comment: String::new(),
            category: None,
            tag: None,
            billable: false,
            reimbursable: true,
            tax_code: None,
            tax_amount: None,
            receipt: None,
        }
    }

    #[must_use]
    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = merchant.into();
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_receipt(mut self, receipt: Receipt) -> Self {
        self.receipt = Some(receipt);
        self
    }

    /// Same details for a different amount (split shares).
    #[must_use]
    pub fn with_amount(&self, amount: Amount) -> Self {
        Self {
            amount,
            ..self.clone()
        }
    }
}

/// Build a new transaction owned by `report_id`.
///
/// `sign` is the owning report kind's [`amount_sign`]; tracked expenses use
/// `-1` like expense reports. Currency and tax fields are copied verbatim.
///
/// [`amount_sign`]: crate::model::ReportKind::amount_sign
#[must_use]
pub fn transaction(
    id: TransactionId,
    report_id: ReportId,
    sign: i64,
    details: &ExpenseDetails,
    created_by: AccountId,
) -> Transaction {
    Transaction {
        transaction_id: id,
        report_id,
        amount: details.amount * sign,
        currency: details.currency.clone(),
        created: details.created,
        merchant: details.merchant.clone(),
        comment: details.comment.clone(),
        category: details.category.clone(),
        tag: details.tag.clone(),
        billable: details.billable,
        reimbursable: details.reimbursable,
        tax_code: details.tax_code.clone(),
        tax_amount: details.tax_amount,
        receipt: details.receipt.clone(),
        created_by,
        hold: None,
        duplicates: Vec::new(),
        splits: Vec::new(),
        split_parent: None,
        pending_action: Some(PendingAction::Add),
        pending_fields: PendingFields::new(),
    }
}

/// Re-home `txn` on another report, restating its amount in that report's
/// sign convention.
#[must_use]
pub fn rehomed(txn: &Transaction, report_id: ReportId, sign: i64) -> Transaction {
    let mut moved = txn.clone();
    moved.report_id = report_id;
    moved.amount = txn.display_amount() * sign;
    moved.mark_pending("reportID");
    moved.mark_pending("amount");
    moved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> ExpenseDetails {
        ExpenseDetails::new(
            4250,
            Currency::usd(),
            NaiveDate::from_ymd_opt(2024, 5, 2).expect("date"),
        )
        .with_merchant("Diner")
    }

    #[test]
    fn sign_follows_report_kind() {
        let expense = transaction(TransactionId::new("t1"), ReportId::new("r"), -1, &details(), AccountId(1));
        assert_eq!(expense.amount, -4250);
        let iou = transaction(TransactionId::new("t2"), ReportId::new("r"), 1, &details(), AccountId(1));
        assert_eq!(iou.amount, 4250);
        assert_eq!(iou.pending_action, Some(PendingAction::Add));
        assert_eq!(iou.merchant, "Diner");
    }

    #[test]
    fn rehoming_restates_sign_and_marks_fields() {
        let mut txn = transaction(TransactionId::new("t1"), ReportId::unreported(), -1, &details(), AccountId(1));
        txn.pending_action = None;
        let moved = rehomed(&txn, ReportId::new("iou"), 1);
        assert_eq!(moved.amount, 4250);
        assert_eq!(moved.report_id, ReportId::new("iou"));
        assert_eq!(moved.pending_fields.len(), 2);
    }
}
