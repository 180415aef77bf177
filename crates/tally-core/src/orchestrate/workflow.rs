//! Workflow moves on a ledger report.
//!
//! Every move follows the same path: check eligibility against the policy
//! and current stage, validate the target against the workflow lattice,
//! then write the new stage, one audit-log entry, and the recomputed next
//! step. Partial approval and partial payment additionally move held
//! transactions onto a fresh sibling report, which becomes the chat's
//! current ledger.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::eligibility;
use super::{Context, Decision, ErrorTarget, Ineligible, Ledgers, Plan, eligible};
use crate::assemble::Assembly;
use crate::command::{Command, WorkflowPayload};
use crate::error::MutationError;
use crate::model::{
    ActionId, ActionPayload, IouType, LedgerReport, PaymentType, Policy, ReportId, ReportKind,
    Transaction, WorkflowStage,
};
use crate::recalc;
use crate::store::{CacheKey, Entities};
use crate::synth::{self, IouEntry};

/// A workflow move that needs nothing but the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRef {
    pub report_id: ReportId,
}

const fn default_full() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveReport {
    pub report_id: ReportId,
    /// `false` leaves held transactions behind on a new report.
    #[serde(default = "default_full")]
    pub full: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayReport {
    pub report_id: ReportId,
    pub payment_type: PaymentType,
    #[serde(default = "default_full")]
    pub full: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Submit,
    Approve { full: bool },
    Unapprove,
    Pay { payment_type: PaymentType, full: bool },
    CancelPayment,
    Retract,
    Reopen,
}

impl Move {
    const fn partial(self) -> bool {
        matches!(self, Self::Approve { full: false } | Self::Pay { full: false, .. })
    }

    fn check(self, report: &LedgerReport, policy: Option<&Policy>, ctx: &Context<'_>) -> Result<(), Ineligible> {
        let actor = ctx.actor();
        match self {
            Self::Submit => eligibility::submit(report, policy, actor),
            Self::Approve { .. } => eligibility::approve(report, policy, actor),
            Self::Unapprove => eligibility::unapprove(report, policy, actor),
            Self::Pay { .. } => eligibility::pay(report, policy, actor),
            Self::CancelPayment => eligibility::cancel_payment(report, policy, actor),
            Self::Retract => eligibility::retract(report, actor),
            Self::Reopen => eligibility::reopen(report, policy, actor),
        }
    }

    fn target(self, report: &LedgerReport, policy: Option<&Policy>) -> WorkflowStage {
        match self {
            Self::Submit if policy.is_some_and(|p| !p.approvals_enabled()) => WorkflowStage::Closed,
            Self::Submit | Self::Unapprove => WorkflowStage::Submitted,
            Self::Approve { .. } => WorkflowStage::Approved,
            Self::Pay { .. } => WorkflowStage::Reimbursed,
            Self::CancelPayment if report.kind == ReportKind::Iou => WorkflowStage::Submitted,
            Self::CancelPayment => WorkflowStage::Approved,
            Self::Retract | Self::Reopen => WorkflowStage::Open,
        }
    }

    fn entry(self, report: &LedgerReport, target: WorkflowStage, amount: i64) -> ActionPayload {
        let currency = report.currency.clone();
        match self {
            Self::Submit if target == WorkflowStage::Closed => ActionPayload::Closed { amount, currency },
            Self::Submit => ActionPayload::Submitted { amount, currency },
            Self::Approve { full } => ActionPayload::Approved {
                amount,
                currency,
                full,
            },
            Self::Unapprove => ActionPayload::Unapproved { amount, currency },
            Self::Pay { payment_type, .. } => {
                let mut payload = IouEntry::new(IouType::Pay, amount, currency)
                    .on_report(report.report_id.clone())
                    .between(report.member_ids().collect())
                    .into_payload();
                if let ActionPayload::Iou { payment_type: paid_with, .. } = &mut payload {
                    *paid_with = Some(payment_type);
                }
                payload
            }
            Self::CancelPayment => ActionPayload::CanceledPayment { amount, currency },
            Self::Retract => ActionPayload::Retracted,
            Self::Reopen => ActionPayload::Reopened,
        }
    }

    fn command(self, payload: WorkflowPayload) -> Command {
        match self {
            Self::Submit => Command::SubmitReport(payload),
            Self::Approve { .. } => Command::ApproveReport(payload),
            Self::Unapprove => Command::UnapproveReport(payload),
            Self::Pay { .. } => Command::PayReport(payload),
            Self::CancelPayment => Command::CancelPayment(payload),
            Self::Retract => Command::RetractReport(payload),
            Self::Reopen => Command::ReopenReport(payload),
        }
    }
}

struct WorkflowIds {
    action: ActionId,
    sibling: ReportId,
    sibling_created: ActionId,
    sibling_preview: ActionId,
    moved: ActionId,
}

/// Held transactions moved onto a new report, and what that produced.
struct Carved {
    report: LedgerReport,
    transactions: Vec<(Transaction, Transaction)>,
}

/// Build the sibling ledger receiving `held`.
fn carve(ids: &WorkflowIds, source: &LedgerReport, held: Vec<Transaction>) -> Carved {
    let mut report = synth::report::sibling_ledger(ids.sibling.clone(), source);
    let sign = source.kind.amount_sign();
    let transactions = held
        .into_iter()
        .map(|txn| {
            let moved = synth::rehomed(&txn, report.report_id.clone(), sign);
            recalc::apply(&mut report, None, Some(&moved));
            (txn, moved)
        })
        .collect();
    Carved { report, transactions }
}

fn write_carved(
    ctx: &mut Context<'_>,
    asm: &mut Assembly<'_>,
    ids: &WorkflowIds,
    source: &LedgerReport,
    carved: &Carved,
) -> Result<(), MutationError> {
    let actor = ctx.actor();
    let created_at = ctx.timeline.before();
    let moved_at = ctx.timeline.next();
    let preview_at = ctx.timeline.next();

    asm.append_action(&synth::entry(
        ids.sibling_created.clone(),
        carved.report.report_id.clone(),
        created_at,
        actor,
        ActionPayload::Created,
    ))?;
    asm.create(CacheKey::Report(carved.report.report_id.clone()), &carved.report)?;
    asm.new_report_metadata(&carved.report.report_id)?;

    asm.append_action(&synth::entry(
        ids.moved.clone(),
        source.report_id.clone(),
        moved_at,
        actor,
        ActionPayload::MovedTransactions {
            to_report_id: carved.report.report_id.clone(),
            transaction_ids: carved.transactions.iter().map(|(t, _)| t.transaction_id.clone()).collect(),
        },
    ))?;
    for (before, after) in &carved.transactions {
        asm.update(CacheKey::Transaction(before.transaction_id.clone()), before, after)?;
    }

    if let Some(chat_id) = &source.parent_report_id {
        let count = u32::try_from(carved.transactions.len()).unwrap_or(u32::MAX);
        asm.append_action(&synth::entry(
            ids.sibling_preview.clone(),
            chat_id.clone(),
            preview_at,
            actor,
            synth::preview(carved.report.report_id.clone(), count),
        ))?;
    }
    Ok(())
}

fn transition(ctx: &mut Context<'_>, report_id: &ReportId, step: Move) -> Result<Decision, MutationError> {
    let ids = WorkflowIds {
        action: ctx.mint_action(),
        sibling: ctx.mint_report(),
        sibling_created: ctx.mint_action(),
        sibling_preview: ctx.mint_action(),
        moved: ctx.mint_action(),
    };
    let report = ctx.repo.ledger(report_id)?;
    let policy = ctx.repo.policy_of(&report)?;
    eligible!(step.check(&report, policy.as_ref(), ctx));

    let target = step.target(&report, policy.as_ref());
    report.stage.can_transition_to(target, report.kind)?;

    let held: Vec<Transaction> = if step.partial() {
        ctx.repo
            .transactions_on(&report.report_id)?
            .into_iter()
            .filter(Transaction::is_held)
            .collect()
    } else {
        Vec::new()
    };
    let carved = (!held.is_empty()).then(|| carve(&ids, &report, held));

    let mut ledgers = Ledgers::default();
    if let Some(carved) = &carved {
        for (before, after) in &carved.transactions {
            ledgers.apply(ctx.repo, Some(before), Some(after))?;
        }
    }
    let Some(after) = ledgers.get_mut(ctx.repo, &report.report_id)? else {
        return Err(MutationError::NotFound {
            key: CacheKey::Report(report.report_id.clone()),
        });
    };

    let amount = after.total.abs();
    if matches!(step, Move::Pay { .. }) && amount == 0 {
        return Ok(Ineligible::NothingToPay.into());
    }
    after.set_stage(target);
    after.mark_pending("stateNum");
    after.mark_pending("statusNum");

    let mut asm = ctx.assembly();
    if let Some(carved) = &carved {
        write_carved(ctx, &mut asm, &ids, &report, carved)?;
    }
    let at = ctx.timeline.next();
    let Some(after) = ledgers.get_mut(ctx.repo, &report.report_id)? else {
        return Err(MutationError::NotFound {
            key: CacheKey::Report(report.report_id.clone()),
        });
    };
    after.last_visible_action_created = Some(at);
    let payload = step.entry(after, target, amount);
    asm.append_action(&synth::entry(
        ids.action.clone(),
        report.report_id.clone(),
        at,
        ctx.actor(),
        payload,
    ))?;
    ledgers.write(&mut asm)?;

    if let Some(chat_id) = &report.parent_report_id {
        if let Some(before) = ctx.repo.report(chat_id)? {
            let mut chat = before.clone();
            if let Some(carved) = &carved {
                chat.iou_report_id = Some(carved.report.report_id.clone());
            }
            match step {
                Move::Pay { .. } if carved.is_none() => chat.has_outstanding_child_request = false,
                Move::CancelPayment => chat.has_outstanding_child_request = true,
                _ => {}
            }
            asm.update(CacheKey::Report(chat_id.clone()), &before, &chat)?;
        }
    }

    let fresh = BTreeMap::new();
    if let Some(updated) = ledgers.after(&report.report_id) {
        ctx.refresh_next_step(&mut asm, updated, policy.as_ref(), &fresh)?;
    }
    if let Some(carved) = &carved {
        ctx.refresh_next_step(&mut asm, &carved.report, policy.as_ref(), &fresh)?;
    }

    let payload = WorkflowPayload {
        report_id: report.report_id.clone(),
        action_id: ids.action,
        amount,
        currency: report.currency.clone(),
        full: match step {
            Move::Approve { full } | Move::Pay { full, .. } => Some(full),
            _ => None,
        },
        payment_type: match step {
            Move::Pay { payment_type, .. } => Some(payment_type),
            _ => None,
        },
        moved_to_report_id: carved.as_ref().map(|c| c.report.report_id.clone()),
        moved_created_action_id: carved.as_ref().map(|_| ids.sibling_created),
    };
    Ok(Decision::one(Plan {
        command: step.command(payload),
        updates: asm.finish(),
        target: ErrorTarget::Report(report.report_id),
    }))
}

/// Open → Submitted, or straight to Closed when the workspace has no
/// approval step.
pub fn submit_report(ctx: &mut Context<'_>, params: &ReportRef) -> Result<Decision, MutationError> {
    transition(ctx, &params.report_id, Move::Submit)
}

pub fn approve_report(ctx: &mut Context<'_>, params: &ApproveReport) -> Result<Decision, MutationError> {
    transition(ctx, &params.report_id, Move::Approve { full: params.full })
}

pub fn unapprove_report(ctx: &mut Context<'_>, params: &ReportRef) -> Result<Decision, MutationError> {
    transition(ctx, &params.report_id, Move::Unapprove)
}

pub fn pay_report(ctx: &mut Context<'_>, params: &PayReport) -> Result<Decision, MutationError> {
    transition(
        ctx,
        &params.report_id,
        Move::Pay {
            payment_type: params.payment_type,
            full: params.full,
        },
    )
}

/// Compensates a payment: Reimbursed goes back to Approved, or to
/// Submitted on a person-to-person report.
pub fn cancel_payment(ctx: &mut Context<'_>, params: &ReportRef) -> Result<Decision, MutationError> {
    transition(ctx, &params.report_id, Move::CancelPayment)
}

pub fn retract_report(ctx: &mut Context<'_>, params: &ReportRef) -> Result<Decision, MutationError> {
    transition(ctx, &params.report_id, Move::Retract)
}

pub fn reopen_report(ctx: &mut Context<'_>, params: &ReportRef) -> Result<Decision, MutationError> {
    transition(ctx, &params.report_id, Move::Reopen)
}
