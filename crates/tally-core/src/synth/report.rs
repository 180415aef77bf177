use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::model::report::Participant;
use crate::model::{
    AccountId, ActionId, ChatType, Currency, LedgerReport, PendingAction, PendingFields, Policy,
    ReportId, ReportKind, WorkflowStage,
};

fn participants(members: &[AccountId]) -> BTreeMap<AccountId, Participant> {
    members
        .iter()
        .map(|id| {
            (
                *id,
                Participant {
                    hidden: false,
                    pending_action: Some(PendingAction::Add),
                },
            )
        })
        .collect()
}

fn blank(id: ReportId, kind: ReportKind, owner: AccountId, currency: Currency) -> LedgerReport {
    LedgerReport {
        report_id: id,
        kind,
        chat_type: None,
        policy_id: None,
        owner,
        manager: None,
        participants: BTreeMap::new(),
        report_name: String::new(),
        currency,
        total: 0,
        unheld_total: 0,
        non_reimbursable_total: 0,
        unheld_non_reimbursable_total: 0,
        state_num: 0,
        stage: WorkflowStage::Open,
        parent_report_id: None,
        parent_action_id: None,
        iou_report_id: None,
        has_outstanding_child_request: false,
        last_visible_action_created: None,
        pending_action: Some(PendingAction::Add),
        pending_fields: PendingFields::new(),
    }
}

/// A new conversation of `chat_type` between `members`.
///
/// The first member owns the chat. Participant entries carry an `add`
/// marker that the success phase drops.
#[must_use]
pub fn chat(
    id: ReportId,
    chat_type: ChatType,
    members: &[AccountId],
    policy: Option<&Policy>,
    currency: Currency,
) -> LedgerReport {
    let owner = members.first().copied().unwrap_or(AccountId(0));
    let mut report = blank(id, ReportKind::Chat, owner, currency);
    report.chat_type = Some(chat_type);
    report.policy_id = policy.map(|p| p.id.clone());
    report.participants = participants(members);
    report
}

/// A new person-to-person ledger where `payer` owes `payee`.
///
/// Requests to a person skip the draft stage.
#[must_use]
pub fn iou_report(
    id: ReportId,
    chat_id: ReportId,
    payee: AccountId,
    payer: AccountId,
    currency: Currency,
) -> LedgerReport {
    let mut report = blank(id, ReportKind::Iou, payee, currency);
    report.manager = Some(payer);
    report.parent_report_id = Some(chat_id);
    report.participants = participants(&[payee, payer]);
    report.report_name = "IOU".to_string();
    report.set_stage(WorkflowStage::Submitted);
    report
}

/// A new workspace expense ledger owned by `owner`.
///
/// Instant-submit workspaces open it directly in the submitted stage.
#[must_use]
pub fn expense_report(
    id: ReportId,
    chat_id: ReportId,
    policy: &Policy,
    owner: AccountId,
    currency: Currency,
    created: NaiveDate,
) -> LedgerReport {
    let mut report = blank(id, ReportKind::Expense, owner, currency);
    report.policy_id = Some(policy.id.clone());
    report.manager = Some(policy.effective_approver());
    report.parent_report_id = Some(chat_id);
    report.participants = participants(&[owner]);
    report.report_name = format!("{} {}", policy.name, created.format("%Y-%m-%d"));
    if policy.is_instant_submit() {
        report.set_stage(WorkflowStage::Submitted);
    }
    report
}

/// Empty ledger of the same kind as `source`, used to receive transactions
/// moved off it.
#[must_use]
pub fn sibling_ledger(id: ReportId, source: &LedgerReport) -> LedgerReport {
    let mut report = blank(id, source.kind, source.owner, source.currency.clone());
    report.policy_id.clone_from(&source.policy_id);
    report.manager = source.manager;
    report.parent_report_id.clone_from(&source.parent_report_id);
    report.participants = participants(&source.member_ids().collect::<Vec<_>>());
    report.report_name.clone_from(&source.report_name);
    report
}

/// A discussion thread hanging off entry `parent_action` of `parent`.
#[must_use]
pub fn thread(id: ReportId, parent: &LedgerReport, parent_action: ActionId) -> LedgerReport {
    let members: Vec<AccountId> = parent.member_ids().collect();
    let mut report = blank(id, ReportKind::Chat, parent.owner, parent.currency.clone());
    report.chat_type = Some(ChatType::Thread);
    report.policy_id.clone_from(&parent.policy_id);
    report.parent_report_id = Some(parent.report_id.clone());
    report.parent_action_id = Some(parent_action);
    report.participants = participants(&members);
    report
}
