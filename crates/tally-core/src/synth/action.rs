use chrono::{DateTime, Utc};

use crate::model::{
    AccountId, ActionId, ActionPayload, Amount, AuditLogEntry, Currency, IouType, PendingAction,
    ReportId, TransactionId,
};

/// A pending audit-log entry.
#[must_use]
pub fn entry(
    id: ActionId,
    report_id: ReportId,
    created: DateTime<Utc>,
    actor: AccountId,
    payload: ActionPayload,
) -> AuditLogEntry {
    AuditLogEntry {
        action_id: id,
        report_id,
        created,
        actor,
        original_message: payload,
        child_report_id: None,
        pending_action: Some(PendingAction::Add),
    }
}

/// Fields of a money-movement entry.
#[derive(Debug, Clone)]
pub struct IouEntry {
    pub iou_type: IouType,
    pub amount: Amount,
    pub currency: Currency,
    pub transaction_id: Option<TransactionId>,
    pub iou_report_id: Option<ReportId>,
    pub comment: String,
    pub participants: Vec<AccountId>,
}

impl IouEntry {
    #[must_use]
    pub fn new(iou_type: IouType, amount: Amount, currency: Currency) -> Self {
        Self {
            iou_type,
            amount,
            currency,
            transaction_id: None,
            iou_report_id: None,
            comment: String::new(),
            participants: Vec::new(),
        }
    }

    #[must_use]
    pub fn for_transaction(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    #[must_use]
    pub fn on_report(mut self, id: ReportId) -> Self {
        self.iou_report_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    #[must_use]
    pub fn between(mut self, participants: Vec<AccountId>) -> Self {
        self.participants = participants;
        self
    }

    #[must_use]
    pub fn into_payload(self) -> ActionPayload {
        ActionPayload::Iou {
            iou_type: self.iou_type,
            amount: self.amount,
            currency: self.currency,
            transaction_id: self.transaction_id,
            iou_report_id: self.iou_report_id,
            comment: self.comment,
            payment_type: None,
            participant_account_ids: self.participants,
        }
    }
}

/// Preview of `linked` shown in the chat that owns it.
#[must_use]
pub fn preview(linked: ReportId, request_count: u32) -> ActionPayload {
    ActionPayload::ReportPreview {
        linked_report_id: linked,
        request_count,
    }
}
