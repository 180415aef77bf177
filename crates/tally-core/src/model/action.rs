//! Audit-log entries ("report actions").
//!
//! Every mutation that changes a report or transaction appends or mutates
//! exactly one entry whose `pending_action` mirrors the mutation's phase.
//! Entries are stored per report as a map from [`ActionId`] to entry under
//! the `reportActions:<reportID>` key, and ordered by `created`.
//!
//! | Payload | Appended by |
//! |---|---|
//! | `Created` | every brand-new report, strictly before the caused entry |
//! | `Iou` | create, track, split, pay, delete (as tombstone) |
//! | `ReportPreview` | the chat that owns a ledger report |
//! | `Submitted` / `Approved` / `Unapproved` / `Closed` | workflow moves |
//! | `Reopened` / `Retracted` / `CanceledPayment` | compensating workflow moves |
//! | `Hold` / `Unhold` | hold orchestrators |
//! | `ModifiedExpense` | transaction edits, duplicate merge |
//! | `DismissedViolation` | duplicate resolution |
//! | `MovedTransactions` | partial approve / pay |
//! | `Comment` | user discussion (only read, never synthesized here) |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

use super::ids::{AccountId, ActionId, ReportId, TransactionId};
use super::money::{Amount, Currency};
use super::violation::ViolationName;
use super::{ParseEnumError, PendingAction, normalize};

/// Sub-kind of a money-movement entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IouType {
    Create,
    Track,
    Split,
    Pay,
    Delete,
}

/// How a report was paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentType {
    /// Paid through the platform's own reimbursement rails.
    Platform,
    /// Marked as paid outside the platform.
    Elsewhere,
}

impl PaymentType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Elsewhere => "elsewhere",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "platform" | "vbba" => Ok(Self::Platform),
            "elsewhere" => Ok(Self::Elsewhere),
            _ => Err(ParseEnumError {
                expected: "payment type",
                got: s.to_string(),
            }),
        }
    }
}

/// One field of a `ModifiedExpense` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    #[serde(default)]
    pub old: Value,
    #[serde(default)]
    pub new: Value,
}

/// Payload variants of an audit-log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "actionName", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionPayload {
    Created,
    #[serde(rename_all = "camelCase")]
    Iou {
        iou_type: IouType,
        amount: Amount,
        currency: Currency,
        #[serde(
            default,
            rename = "IOUTransactionID",
            skip_serializing_if = "Option::is_none"
        )]
        transaction_id: Option<TransactionId>,
        #[serde(
            default,
            rename = "IOUReportID",
            skip_serializing_if = "Option::is_none"
        )]
        iou_report_id: Option<ReportId>,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        comment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payment_type: Option<PaymentType>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        participant_account_ids: Vec<AccountId>,
    },
    #[serde(rename_all = "camelCase")]
    ReportPreview {
        #[serde(rename = "linkedReportID")]
        linked_report_id: ReportId,
        request_count: u32,
    },
    Submitted {
        amount: Amount,
        currency: Currency,
    },
    Approved {
        amount: Amount,
        currency: Currency,
        full: bool,
    },
    Unapproved {
        amount: Amount,
        currency: Currency,
    },
    Closed {
        amount: Amount,
        currency: Currency,
    },
    Reopened,
    Retracted,
    CanceledPayment {
        amount: Amount,
        currency: Currency,
    },
    #[serde(rename_all = "camelCase")]
    Hold {
        #[serde(rename = "transactionID")]
        transaction_id: TransactionId,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Unhold {
        #[serde(rename = "transactionID")]
        transaction_id: TransactionId,
    },
    #[serde(rename_all = "camelCase")]
    ModifiedExpense {
        #[serde(rename = "transactionID")]
        transaction_id: TransactionId,
        changes: BTreeMap<String, FieldChange>,
    },
    #[serde(rename_all = "camelCase")]
    DismissedViolation {
        #[serde(rename = "transactionID")]
        transaction_id: TransactionId,
        violation: ViolationName,
    },
    #[serde(rename_all = "camelCase")]
    MovedTransactions {
        #[serde(rename = "toReportID")]
        to_report_id: ReportId,
        transaction_ids: Vec<TransactionId>,
    },
    Comment {
        text: String,
    },
}

impl ActionPayload {
    /// Stable name used in logs and tests.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Iou { .. } => "IOU",
            Self::ReportPreview { .. } => "REPORT_PREVIEW",
            Self::Submitted { .. } => "SUBMITTED",
            Self::Approved { .. } => "APPROVED",
            Self::Unapproved { .. } => "UNAPPROVED",
            Self::Closed { .. } => "CLOSED",
            Self::Reopened => "REOPENED",
            Self::Retracted => "RETRACTED",
            Self::CanceledPayment { .. } => "CANCELED_PAYMENT",
            Self::Hold { .. } => "HOLD",
            Self::Unhold { .. } => "UNHOLD",
            Self::ModifiedExpense { .. } => "MODIFIED_EXPENSE",
            Self::DismissedViolation { .. } => "DISMISSED_VIOLATION",
            Self::MovedTransactions { .. } => "MOVED_TRANSACTIONS",
            Self::Comment { .. } => "COMMENT",
        }
    }

    /// Transaction this entry is about, for money-movement entries.
    #[must_use]
    pub const fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            Self::Iou { transaction_id, .. } => transaction_id.as_ref(),
            _ => None,
        }
    }
}

/// One entry in a report's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    #[serde(rename = "reportActionID")]
    pub action_id: ActionId,
    #[serde(rename = "reportID")]
    pub report_id: ReportId,
    pub created: DateTime<Utc>,
    #[serde(rename = "actorAccountID")]
    pub actor: AccountId,
    pub original_message: ActionPayload,
    /// Thread report hanging off this entry, if one was ever opened.
    #[serde(
        default,
        rename = "childReportID",
        skip_serializing_if = "Option::is_none"
    )]
    pub child_report_id: Option<ReportId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
}

impl AuditLogEntry {
    #[must_use]
    pub fn is_pending_delete(&self) -> bool {
        self.pending_action == Some(PendingAction::Delete)
    }

    /// User-authored discussion that keeps a thread alive.
    #[must_use]
    pub fn is_visible_discussion(&self) -> bool {
        matches!(self.original_message, ActionPayload::Comment { .. }) && !self.is_pending_delete()
    }

    /// The money-movement entry for `transaction_id`, if this is one.
    #[must_use]
    pub fn is_request_for(&self, transaction_id: &TransactionId) -> bool {
        matches!(
            &self.original_message,
            ActionPayload::Iou {
                iou_type: IouType::Create | IouType::Track,
                ..
            }
        ) && self.original_message.transaction_id() == Some(transaction_id)
            && !self.is_pending_delete()
    }

    /// Preview entry pointing at the ledger `report_id`.
    #[must_use]
    pub fn is_preview_of(&self, report_id: &ReportId) -> bool {
        matches!(
            &self.original_message,
            ActionPayload::ReportPreview { linked_report_id, .. } if linked_report_id == report_id
        ) && !self.is_pending_delete()
    }
}

/// All entries of one report, keyed by entry id.
pub type ActionLog = BTreeMap<ActionId, AuditLogEntry>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(payload: ActionPayload) -> AuditLogEntry {
        AuditLogEntry {
            action_id: ActionId::new("a1"),
            report_id: ReportId::new("r1"),
            created: Utc.timestamp_millis_opt(1_700_000_000_000).single().expect("ts"),
            actor: AccountId(1),
            original_message: payload,
            child_report_id: None,
            pending_action: Some(PendingAction::Add),
        }
    }

    #[test]
    fn payload_is_tagged_by_action_name() {
        let value = serde_json::to_value(entry(ActionPayload::Hold {
            transaction_id: TransactionId::new("t1"),
            reason: "receipt missing".into(),
        }))
        .expect("serialize");
        assert_eq!(value["originalMessage"]["actionName"], "HOLD");
        assert_eq!(value["originalMessage"]["transactionID"], "t1");
        assert_eq!(value["pendingAction"], "add");
    }

    #[test]
    fn unit_payloads_roundtrip() {
        let original = entry(ActionPayload::Created);
        let value = serde_json::to_value(&original).expect("serialize");
        let back: AuditLogEntry = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, original);
        assert_eq!(back.original_message.name(), "CREATED");
    }

    #[test]
    fn request_lookup_ignores_tombstones() {
        let mut iou = entry(ActionPayload::Iou {
            iou_type: IouType::Create,
            amount: 100,
            currency: Currency::usd(),
            transaction_id: Some(TransactionId::new("t1")),
            iou_report_id: Some(ReportId::new("r1")),
            comment: String::new(),
            payment_type: None,
            participant_account_ids: Vec::new(),
        });
        assert!(iou.is_request_for(&TransactionId::new("t1")));
        assert!(!iou.is_request_for(&TransactionId::new("t2")));
        iou.pending_action = Some(PendingAction::Delete);
        assert!(!iou.is_request_for(&TransactionId::new("t1")));
    }

    #[test]
    fn only_comments_count_as_discussion() {
        assert!(entry(ActionPayload::Comment { text: "hi".into() }).is_visible_discussion());
        assert!(!entry(ActionPayload::Created).is_visible_discussion());
    }

    #[test]
    fn payment_type_parses_aliases() {
        assert_eq!("vbba".parse::<PaymentType>(), Ok(PaymentType::Platform));
        assert_eq!("Elsewhere".parse::<PaymentType>(), Ok(PaymentType::Elsewhere));
        assert!("cash".parse::<PaymentType>().is_err());
    }
}
