//! Preconditions evaluated before any optimistic write.
//!
//! Every check returns `Err(Ineligible)` instead of a [`MutationError`]: an
//! ineligible operation is a silent, logged no-op, not a failure.
//!
//! [`MutationError`]: crate::error::MutationError

use serde::Serialize;
use std::fmt;

use crate::model::{AccountId, LedgerReport, Policy, ReportKind, WorkflowStage};

/// The role an actor lacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Submitter,
    Approver,
    Payer,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Submitter => "submitter",
            Self::Approver => "approver",
            Self::Payer => "payer",
            Self::Admin => "admin",
        })
    }
}

/// Why an operation declined to mutate anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Ineligible {
    WrongStage { stage: WorkflowStage },
    NotPermitted { role: Role },
    WrongKind { kind: ReportKind },
    AlreadyHeld,
    NotHeld,
    PendingDelete,
    NotTracked,
    NotOnReport,
    NoChanges,
    NothingToPay,
    /// Every plan of a retried operation already reached the cache.
    AlreadyApplied,
}

impl fmt::Display for Ineligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongStage { stage } => write!(f, "report is {stage}"),
            Self::NotPermitted { role } => write!(f, "actor is not the {role}"),
            Self::WrongKind { kind } => write!(f, "not applicable to {kind} reports"),
            Self::AlreadyHeld => f.write_str("transaction is already on hold"),
            Self::NotHeld => f.write_str("transaction is not on hold"),
            Self::PendingDelete => f.write_str("entity is being deleted"),
            Self::NotTracked => f.write_str("transaction is not a tracked expense"),
            Self::NotOnReport => f.write_str("transaction is not on a report"),
            Self::NoChanges => f.write_str("nothing changed"),
            Self::NothingToPay => f.write_str("nothing left to pay"),
            Self::AlreadyApplied => f.write_str("already applied"),
        }
    }
}

fn live(report: &LedgerReport) -> Result<(), Ineligible> {
    if report.is_pending_delete() {
        return Err(Ineligible::PendingDelete);
    }
    Ok(())
}

fn expense_only(report: &LedgerReport) -> Result<(), Ineligible> {
    if report.kind != ReportKind::Expense {
        return Err(Ineligible::WrongKind { kind: report.kind });
    }
    Ok(())
}

fn at(report: &LedgerReport, stages: &[WorkflowStage]) -> Result<(), Ineligible> {
    if !stages.contains(&report.stage) {
        return Err(Ineligible::WrongStage {
            stage: report.stage,
        });
    }
    Ok(())
}

fn is_admin(policy: Option<&Policy>, actor: AccountId) -> bool {
    policy.is_some_and(|p| p.is_admin(actor))
}

fn require(ok: bool, role: Role) -> Result<(), Ineligible> {
    if ok { Ok(()) } else { Err(Ineligible::NotPermitted { role }) }
}

/// Who may release money on `report`.
fn may_pay(report: &LedgerReport, policy: Option<&Policy>, actor: AccountId) -> bool {
    match report.kind {
        ReportKind::Iou => report.payer() == Some(actor),
        _ => {
            policy.is_some_and(|p| p.effective_reimburser() == actor) || is_admin(policy, actor)
        }
    }
}

pub fn submit(report: &LedgerReport, policy: Option<&Policy>, actor: AccountId) -> Result<(), Ineligible> {
    live(report)?;
    expense_only(report)?;
    at(report, &[WorkflowStage::Open])?;
    require(report.owner == actor || is_admin(policy, actor), Role::Submitter)
}

pub fn approve(report: &LedgerReport, policy: Option<&Policy>, actor: AccountId) -> Result<(), Ineligible> {
    live(report)?;
    expense_only(report)?;
    at(report, &[WorkflowStage::Submitted])?;
    let approver = policy.map(Policy::effective_approver);
    require(
        report.manager == Some(actor) || approver == Some(actor) || is_admin(policy, actor),
        Role::Approver,
    )
}

pub fn unapprove(report: &LedgerReport, policy: Option<&Policy>, actor: AccountId) -> Result<(), Ineligible> {
    live(report)?;
    expense_only(report)?;
    at(report, &[WorkflowStage::Approved])?;
    let approver = policy.map(Policy::effective_approver);
    require(
        report.manager == Some(actor) || approver == Some(actor) || is_admin(policy, actor),
        Role::Approver,
    )
}

pub fn pay(report: &LedgerReport, policy: Option<&Policy>, actor: AccountId) -> Result<(), Ineligible> {
    live(report)?;
    match report.kind {
        ReportKind::Iou => at(report, &[WorkflowStage::Submitted, WorkflowStage::Approved])?,
        ReportKind::Expense => at(report, &[WorkflowStage::Approved, WorkflowStage::Closed])?,
        kind => return Err(Ineligible::WrongKind { kind }),
    }
    require(may_pay(report, policy, actor), Role::Payer)
}

pub fn cancel_payment(
    report: &LedgerReport,
    policy: Option<&Policy>,
    actor: AccountId,
) -> Result<(), Ineligible> {
    live(report)?;
    if !matches!(report.kind, ReportKind::Iou | ReportKind::Expense) {
        return Err(Ineligible::WrongKind { kind: report.kind });
    }
    at(report, &[WorkflowStage::Reimbursed])?;
    require(may_pay(report, policy, actor), Role::Payer)
}

pub fn retract(report: &LedgerReport, actor: AccountId) -> Result<(), Ineligible> {
    live(report)?;
    expense_only(report)?;
    at(report, &[WorkflowStage::Submitted])?;
    require(report.owner == actor, Role::Submitter)
}

pub fn reopen(report: &LedgerReport, policy: Option<&Policy>, actor: AccountId) -> Result<(), Ineligible> {
    live(report)?;
    expense_only(report)?;
    at(report, &[WorkflowStage::Closed, WorkflowStage::Approved])?;
    require(is_admin(policy, actor), Role::Admin)
}

/// Stages in which a report still accepts edits to its transactions.
pub fn editable(report: &LedgerReport) -> Result<(), Ineligible> {
    live(report)?;
    at(report, &[WorkflowStage::Open, WorkflowStage::Submitted])
}
