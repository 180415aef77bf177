use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

use super::ids::{AccountId, ActionId, ReportId, TransactionId};
use super::money::{Amount, Currency};
use super::split::Split;
use super::{ParseEnumError, PendingAction, PendingFields, normalize};

/// Lifecycle of an attached receipt image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptState {
    Open,
    ScanReady,
    Scanning,
    ScanComplete,
    ScanFailed,
}

impl ReceiptState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::ScanReady => "scanReady",
            Self::Scanning => "scanning",
            Self::ScanComplete => "scanComplete",
            Self::ScanFailed => "scanFailed",
        }
    }
}

impl fmt::Display for ReceiptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "open" => Ok(Self::Open),
            "scanready" | "scan-ready" => Ok(Self::ScanReady),
            "scanning" => Ok(Self::Scanning),
            "scancomplete" | "scan-complete" => Ok(Self::ScanComplete),
            "scanfailed" | "scan-failed" => Ok(Self::ScanFailed),
            _ => Err(ParseEnumError {
                expected: "receipt state",
                got: s.to_string(),
            }),
        }
    }
}

/// A receipt attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub state: ReceiptState,
}

impl Receipt {
    /// True while the remote is still extracting amount and merchant.
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        matches!(self.state, ReceiptState::ScanReady | ReceiptState::Scanning)
    }
}

/// A single expense or money-request line.
///
/// `amount` is stored with the sign convention of the report kind that owns
/// it: negative on expense and invoice reports and for tracked expenses,
/// positive on IOU reports. Use [`Transaction::display_amount`] for the
/// user-facing magnitude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(rename = "transactionID")]
    pub transaction_id: TransactionId,
    #[serde(rename = "reportID")]
    pub report_id: ReportId,
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
    #[serde(rename = "createdByAccountID")]
    pub created_by: AccountId,
    /// Hold marker: the audit-log entry that placed the hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold: Option<ActionId>,
    /// Duplicate marker: transactions this one may duplicate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<TransactionId>,
    /// Shares carried by the parent transaction of a split.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub splits: Vec<Split>,
    /// Set on a share transaction: the split parent it came from.
    #[serde(
        default,
        rename = "originalTransactionID",
        skip_serializing_if = "Option::is_none"
    )]
    pub split_parent: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_fields: PendingFields,
}

const fn default_true() -> bool {
    true
}

impl Transaction {
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.hold.is_some()
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.receipt.as_ref().is_some_and(Receipt::is_scanning)
    }

    /// A tracked expense lives outside any ledger report.
    #[must_use]
    pub fn is_unreported(&self) -> bool {
        self.report_id == ReportId::unreported()
    }

    #[must_use]
    pub fn is_split_parent(&self) -> bool {
        self.report_id == ReportId::split_parent()
    }

    /// Optimistically deleted, awaiting confirmation.
    #[must_use]
    pub fn is_pending_delete(&self) -> bool {
        self.pending_action == Some(PendingAction::Delete)
    }

    /// Magnitude as the user entered it.
    #[must_use]
    pub const fn display_amount(&self) -> Amount {
        self.amount.abs()
    }

    /// Mark `field` as carrying an unconfirmed edit.
    pub fn mark_pending(&mut self, field: &str) {
        if self.pending_action != Some(PendingAction::Add) {
            self.pending_fields
                .insert(field.to_string(), PendingAction::Update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            transaction_id: TransactionId::new("t1"),
            report_id: ReportId::new("r1"),
            amount: -4250,
            currency: Currency::usd(),
            created: NaiveDate::from_ymd_opt(2024, 3, 1).expect("date"),
            merchant: "Cafe".into(),
            comment: String::new(),
            category: None,
            tag: None,
            billable: false,
            reimbursable: true,
            tax_code: None,
            tax_amount: None,
            receipt: None,
            created_by: AccountId(1),
            hold: None,
            duplicates: Vec::new(),
            splits: Vec::new(),
            split_parent: None,
            pending_action: None,
            pending_fields: PendingFields::new(),
        }
    }

    #[test]
    fn empty_markers_are_not_serialized() {
        let value = serde_json::to_value(sample()).expect("serialize");
        let obj = value.as_object().expect("object");
        assert!(!obj.contains_key("hold"));
        assert!(!obj.contains_key("duplicates"));
        assert!(!obj.contains_key("pendingFields"));
        assert_eq!(obj["transactionID"], "t1");
        assert_eq!(obj["amount"], -4250);
    }

    #[test]
    fn missing_reimbursable_defaults_to_true() {
        let mut value = serde_json::to_value(sample()).expect("serialize");
        value
            .as_object_mut()
            .expect("object")
            .remove("reimbursable");
        let txn: Transaction = serde_json::from_value(value).expect("deserialize");
        assert!(txn.reimbursable);
    }

    #[test]
    fn mark_pending_skips_new_entities() {
        let mut txn = sample();
        txn.mark_pending("amount");
        assert_eq!(txn.pending_fields.get("amount"), Some(&PendingAction::Update));

        let mut fresh = sample();
        fresh.pending_action = Some(PendingAction::Add);
        fresh.mark_pending("amount");
        assert!(fresh.pending_fields.is_empty());
    }

    #[test]
    fn scanning_receipts_are_detected() {
        let mut txn = sample();
        assert!(!txn.is_scanning());
        txn.receipt = Some(Receipt {
            source: "blob:1".into(),
            filename: None,
            state: ReceiptState::Scanning,
        });
        assert!(txn.is_scanning());
        assert_eq!("scan-ready".parse::<ReceiptState>(), Ok(ReceiptState::ScanReady));
    }
}
