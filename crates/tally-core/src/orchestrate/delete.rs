//! Deleting one request.
//!
//! Both structural decisions are taken from the cache as it was before the
//! mutation: whether the ledger report is left empty (so the report and its
//! preview go too) and whether the transaction's thread has any discussion
//! worth keeping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Context, Decision, ErrorTarget, Ineligible, Ledgers, Plan};
use crate::command::{Command, DeletePayload};
use crate::error::MutationError;
use crate::model::{ActionPayload, LedgerReport, ReportId, Transaction, TransactionId};
use crate::store::{CacheKey, Entities};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub transaction_id: TransactionId,
}

/// Thread with no visible discussion left.
fn idle_thread(ctx: &Context<'_>, thread: &ReportId) -> Result<bool, MutationError> {
    if ctx.repo.report(thread)?.is_none() {
        return Ok(false);
    }
    Ok(!ctx
        .repo
        .actions(thread)?
        .values()
        .any(|entry| entry.is_visible_discussion()))
}

/// Drop `ledger` and everything in its chat that points at it.
fn retire_ledger(
    ctx: &Context<'_>,
    asm: &mut crate::assemble::Assembly<'_>,
    ledger: &LedgerReport,
) -> Result<(), MutationError> {
    asm.tombstone(CacheKey::Report(ledger.report_id.clone()));
    let Some(chat_id) = &ledger.parent_report_id else {
        return Ok(());
    };
    if let Some(preview) = ctx.repo.preview_action(chat_id, &ledger.report_id)? {
        asm.tombstone_action(chat_id, &preview.action_id);
    }
    if let Some(before) = ctx.repo.report(chat_id)? {
        let mut after = before.clone();
        if after.iou_report_id.as_ref() == Some(&ledger.report_id) {
            after.iou_report_id = None;
            after.has_outstanding_child_request = false;
        }
        asm.update(CacheKey::Report(chat_id.clone()), &before, &after)?;
    }
    Ok(())
}

pub fn delete_request(ctx: &mut Context<'_>, params: &DeleteRequest) -> Result<Decision, MutationError> {
    let txn: Transaction = ctx
        .repo
        .require(&CacheKey::Transaction(params.transaction_id.clone()))?;
    if txn.is_split_parent() {
        return Err(MutationError::invalid("a split parent is removed with its shares"));
    }
    if txn.is_pending_delete() {
        return Ok(Ineligible::PendingDelete.into());
    }
    let ledger = if txn.is_unreported() {
        None
    } else {
        ctx.repo.report(&txn.report_id)?
    };
    if let Some(report) = &ledger {
        if report.is_pending_delete() {
            return Ok(Ineligible::PendingDelete.into());
        }
        if report.stage.is_settled() {
            return Ok(Ineligible::WrongStage { stage: report.stage }.into());
        }
    }

    let log = ctx.log_report_for(&txn)?;
    let entry = match &log {
        Some(report_id) => ctx.repo.request_action(report_id, &txn.transaction_id)?,
        None => None,
    };
    let thread = match entry.as_ref().and_then(|e| e.child_report_id.clone()) {
        Some(id) if idle_thread(ctx, &id)? => Some(id),
        _ => None,
    };
    let empties_ledger = match &ledger {
        Some(report) => ctx
            .repo
            .transactions_on(&report.report_id)?
            .iter()
            .all(|t| t.transaction_id == txn.transaction_id),
        None => false,
    };

    let mut asm = ctx.assembly();
    asm.tombstone(CacheKey::Transaction(txn.transaction_id.clone()));
    asm.clear_violations(&txn.transaction_id);
    if let (Some(report_id), Some(entry)) = (&log, &entry) {
        asm.tombstone_action(report_id, &entry.action_id);
    }
    if let Some(id) = &thread {
        asm.tombstone(CacheKey::Report(id.clone()));
    }

    match &ledger {
        Some(report) if empties_ledger => retire_ledger(ctx, &mut asm, report)?,
        Some(report) => {
            let mut ledgers = Ledgers::default();
            ledgers.apply(ctx.repo, Some(&txn), None)?;
            ledgers.write(&mut asm)?;
            if let Some(chat_id) = &report.parent_report_id {
                if let Some(before) = ctx.repo.preview_action(chat_id, &report.report_id)? {
                    let mut after = before.clone();
                    if let ActionPayload::ReportPreview { request_count, .. } = &mut after.original_message {
                        *request_count = request_count.saturating_sub(1);
                    }
                    asm.update_action(&before, &after)?;
                }
            }
            if let Some(updated) = ledgers.after(&report.report_id) {
                let policy = ctx.repo.policy_of(report)?;
                let fresh = BTreeMap::from([(txn.transaction_id.clone(), Vec::new())]);
                ctx.refresh_next_step(&mut asm, updated, policy.as_ref(), &fresh)?;
            }
        }
        None => {}
    }

    let payload = DeletePayload {
        transaction_id: txn.transaction_id.clone(),
        report_id: txn.report_id.clone(),
        action_id: entry.map(|e| e.action_id),
        delete_report: empties_ledger,
        delete_thread_id: thread,
    };
    Ok(Decision::one(Plan {
        command: Command::DeleteRequest(payload),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: txn.transaction_id,
            created: false,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionId, ActionLog, PolicyTier, WorkflowStage};
    use crate::orchestrate::testkit::{ALICE, Fixture, bob, workspace};
    use crate::store::Repository;
    use crate::synth;

    fn delete(txn: &Transaction) -> DeleteRequest {
        DeleteRequest {
            transaction_id: txn.transaction_id.clone(),
        }
    }

    #[test]
    fn deleting_the_last_request_retires_the_report() {
        let mut fx = Fixture::new();
        let txn = fx.request(bob(), 1200);
        let report = fx.report_of(&txn);
        let chat_id = report.parent_report_id.clone().expect("chat");

        let params = delete(&txn);
        let plans = fx.plans(|ctx| delete_request(ctx, &params));
        let Command::DeleteRequest(payload) = &plans[0].command else {
            panic!("expected a delete");
        };
        assert!(payload.delete_report);
        assert!(payload.delete_thread_id.is_some());

        let after = fx.optimistic(&plans);
        assert!(after.report(&report.report_id).expect("read").expect("report").is_pending_delete());
        let chat = after.report(&chat_id).expect("read").expect("chat");
        assert!(chat.iou_report_id.is_none());
        fx.assert_rollback_closure(&plans);

        let confirmed = fx.confirmed(&plans);
        assert!(confirmed.get(&CacheKey::Report(report.report_id.clone())).is_none());
        assert!(confirmed.get(&CacheKey::Transaction(txn.transaction_id.clone())).is_none());
        assert!(confirmed.preview_action(&chat_id, &report.report_id).expect("read").is_none());
    }

    #[test]
    fn deleting_one_of_two_recomputes_the_report() {
        let mut fx = Fixture::new();
        let policy = fx.workspace(PolicyTier::Collect);
        let first = fx.request(workspace(&policy), 1000);
        let second = fx.request(workspace(&policy), 400);
        assert_eq!(first.report_id, second.report_id);

        let params = delete(&first);
        let plans = fx.plans(|ctx| delete_request(ctx, &params));
        let confirmed = fx.confirmed(&plans);
        let report = confirmed.ledger(&second.report_id).expect("ledger");
        assert_eq!(report.total, -400);
        let chat_id = report.parent_report_id.clone().expect("chat");
        let preview = confirmed
            .preview_action(&chat_id, &report.report_id)
            .expect("read")
            .expect("preview");
        assert!(matches!(preview.original_message, ActionPayload::ReportPreview { request_count: 1, .. }));
        fx.assert_rollback_closure(&plans);
    }

    #[test]
    fn discussed_threads_survive() {
        let mut fx = Fixture::new();
        let txn = fx.request(bob(), 1200);
        let entry = fx
            .store
            .request_action(&txn.report_id, &txn.transaction_id)
            .expect("read")
            .expect("entry");
        let thread = entry.child_report_id.expect("thread");
        let mut comment = synth::entry(
            ActionId::new("c1"),
            thread.clone(),
            chrono::Utc::now(),
            ALICE,
            ActionPayload::Comment { text: "lunch?".into() },
        );
        comment.pending_action = None;
        let log = ActionLog::from([(comment.action_id.clone(), comment)]);
        fx.seed(CacheKey::ReportActions(thread), &log);

        let params = delete(&txn);
        let plans = fx.plans(|ctx| delete_request(ctx, &params));
        let Command::DeleteRequest(payload) = &plans[0].command else {
            panic!("expected a delete");
        };
        assert!(payload.delete_thread_id.is_none());
    }

    #[test]
    fn paid_reports_keep_their_requests() {
        let mut fx = Fixture::new();
        let txn = fx.request(bob(), 1200);
        let mut report = fx.report_of(&txn);
        report.set_stage(WorkflowStage::Reimbursed);
        fx.seed(CacheKey::Report(report.report_id.clone()), &report);
        let params = delete(&txn);
        assert_eq!(
            fx.skipped(|ctx| delete_request(ctx, &params)),
            Ineligible::WrongStage { stage: WorkflowStage::Reimbursed }
        );
    }
}
