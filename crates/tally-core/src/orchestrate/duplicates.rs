//! Settling a group of transactions flagged as duplicates of each other.
//!
//! Merge keeps one transaction, applies the chosen field values to it, and
//! deletes the rest outright. Resolve keeps all of them but holds every
//! transaction except the kept one. Either way, the duplicate markers that
//! point into the group are cleared everywhere they appear.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::edit::TransactionEdit;
use super::eligibility;
use super::{Context, Decision, ErrorTarget, Ineligible, Ledgers, Plan};
use crate::assemble::{Assembly, encode};
use crate::command::{Command, DuplicatesPayload};
use crate::error::MutationError;
use crate::model::{
    ActionId, ActionPayload, FieldChange, ReportId, ReportKind, Transaction, TransactionId,
    Violation, ViolationName,
};
use crate::store::{CacheKey, Entities};
use crate::synth;

const HOLD_REASON: &str = "duplicate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDuplicates {
    /// The transaction that survives.
    pub transaction_id: TransactionId,
    /// The duplicates merged into it.
    pub transaction_ids: Vec<TransactionId>,
    /// Field values picked from the group for the survivor.
    #[serde(flatten)]
    pub edit: TransactionEdit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveDuplicates {
    pub transaction_id: TransactionId,
    pub transaction_ids: Vec<TransactionId>,
}

/// The kept transaction and the rest of its group, loaded and checked.
struct Group {
    kept: Transaction,
    others: Vec<Transaction>,
}

impl Group {
    fn ids(&self) -> BTreeSet<TransactionId> {
        std::iter::once(&self.kept)
            .chain(&self.others)
            .map(|t| t.transaction_id.clone())
            .collect()
    }
}

fn gather(
    ctx: &Context<'_>,
    kept: &TransactionId,
    others: &[TransactionId],
) -> Result<Result<Group, Ineligible>, MutationError> {
    let unique: BTreeSet<&TransactionId> = others.iter().collect();
    if others.is_empty() || unique.contains(kept) || unique.len() != others.len() {
        return Err(MutationError::invalid(
            "duplicates need at least one other distinct transaction",
        ));
    }
    let mut group = Vec::with_capacity(others.len() + 1);
    for id in std::iter::once(kept).chain(others) {
        let txn: Transaction = ctx.repo.require(&CacheKey::Transaction(id.clone()))?;
        if txn.is_split_parent() {
            return Err(MutationError::invalid("a split parent cannot be a duplicate"));
        }
        if txn.is_pending_delete() {
            return Ok(Err(Ineligible::PendingDelete));
        }
        if !txn.is_unreported() {
            if let Some(report) = ctx.repo.report(&txn.report_id)? {
                if let Err(reason) = eligibility::editable(&report) {
                    return Ok(Err(reason));
                }
            }
        }
        group.push(txn);
    }
    let kept = group.remove(0);
    Ok(Ok(Group { kept, others: group }))
}

/// Drop `ids` from the duplicate markers of transactions outside the group.
fn clear_stale_markers(
    ctx: &Context<'_>,
    asm: &mut Assembly<'_>,
    ids: &BTreeSet<TransactionId>,
) -> Result<(), MutationError> {
    for before in ctx.repo.live_transactions()? {
        if ids.contains(&before.transaction_id) || !before.duplicates.iter().any(|d| ids.contains(d)) {
            continue;
        }
        let mut after = before.clone();
        after.duplicates.retain(|d| !ids.contains(d));
        after.mark_pending("duplicates");
        asm.update(CacheKey::Transaction(before.transaction_id.clone()), &before, &after)?;
        let policy = match ctx.repo.report(&before.report_id)? {
            Some(report) => ctx.repo.policy_of(&report)?,
            None => None,
        };
        asm.refresh_violations(&after, policy.as_ref(), ctx.enforce_violations(policy.as_ref()), true)?;
    }
    Ok(())
}

/// Lower the request count on the chat preview of each report that lost
/// transactions.
fn shrink_previews(
    ctx: &Context<'_>,
    asm: &mut Assembly<'_>,
    removed: &BTreeMap<ReportId, u32>,
) -> Result<(), MutationError> {
    for (report_id, count) in removed {
        let Some(report) = ctx.repo.report(report_id)? else {
            continue;
        };
        let Some(chat_id) = &report.parent_report_id else {
            continue;
        };
        if let Some(before) = ctx.repo.preview_action(chat_id, report_id)? {
            let mut after = before.clone();
            if let ActionPayload::ReportPreview { request_count, .. } = &mut after.original_message {
                *request_count = request_count.saturating_sub(*count);
            }
            asm.update_action(&before, &after)?;
        }
    }
    Ok(())
}

fn sign_of(ctx: &Context<'_>, txn: &Transaction) -> Result<i64, MutationError> {
    if txn.is_unreported() {
        return Ok(ReportKind::Expense.amount_sign());
    }
    Ok(ctx
        .repo
        .report(&txn.report_id)?
        .map_or(ReportKind::Expense.amount_sign(), |r| r.kind.amount_sign()))
}

/// Refresh the next step of every report in `ledgers`.
fn refresh_steps(
    ctx: &Context<'_>,
    asm: &mut Assembly<'_>,
    ledgers: &Ledgers,
    fresh: &BTreeMap<TransactionId, Vec<Violation>>,
) -> Result<(), MutationError> {
    for report in ledgers.updated() {
        let policy = ctx.repo.policy_of(report)?;
        ctx.refresh_next_step(asm, report, policy.as_ref(), fresh)?;
    }
    Ok(())
}

pub fn merge_duplicates(ctx: &mut Context<'_>, params: &MergeDuplicates) -> Result<Decision, MutationError> {
    let action_id = ctx.mint_action();
    let group = match gather(ctx, &params.transaction_id, &params.transaction_ids)? {
        Ok(group) => group,
        Err(reason) => return Ok(reason.into()),
    };
    let ids = group.ids();

    let mut kept = group.kept.clone();
    let mut changes = params.edit.apply(&mut kept, sign_of(ctx, &group.kept)?)?;
    if !kept.duplicates.is_empty() {
        changes.insert(
            "duplicates".to_string(),
            FieldChange {
                old: encode("duplicates", &kept.duplicates)?,
                new: serde_json::Value::Array(Vec::new()),
            },
        );
        kept.duplicates.clear();
        kept.mark_pending("duplicates");
    }

    let mut asm = ctx.assembly();
    let mut ledgers = Ledgers::default();
    let mut removed = BTreeMap::new();
    ledgers.apply(ctx.repo, Some(&group.kept), Some(&kept))?;
    for loser in &group.others {
        ledgers.apply(ctx.repo, Some(loser), None)?;
        if !loser.is_unreported() {
            *removed.entry(loser.report_id.clone()).or_insert(0_u32) += 1;
        }
        asm.remove(CacheKey::Transaction(loser.transaction_id.clone()));
        asm.clear_violations(&loser.transaction_id);
        if let Some(log) = ctx.log_report_for(loser)? {
            if let Some(entry) = ctx.repo.request_action(&log, &loser.transaction_id)? {
                asm.tombstone_action(&log, &entry.action_id);
            }
        }
    }
    ledgers.write(&mut asm)?;
    shrink_previews(ctx, &mut asm, &removed)?;

    if let Some(log) = ctx.log_report_for(&group.kept)? {
        let at = ctx.timeline.next();
        asm.append_action(&synth::entry(
            action_id.clone(),
            log,
            at,
            ctx.actor(),
            ActionPayload::ModifiedExpense {
                transaction_id: kept.transaction_id.clone(),
                changes: changes.clone(),
            },
        ))?;
    }
    asm.update(CacheKey::Transaction(kept.transaction_id.clone()), &group.kept, &kept)?;

    let policy = match ctx.repo.report(&kept.report_id)? {
        Some(report) => ctx.repo.policy_of(&report)?,
        None => None,
    };
    let violations =
        asm.refresh_violations(&kept, policy.as_ref(), ctx.enforce_violations(policy.as_ref()), true)?;
    clear_stale_markers(ctx, &mut asm, &ids)?;

    let mut fresh = BTreeMap::from([(kept.transaction_id.clone(), violations)]);
    fresh.extend(group.others.iter().map(|t| (t.transaction_id.clone(), Vec::new())));
    refresh_steps(ctx, &mut asm, &ledgers, &fresh)?;

    let payload = DuplicatesPayload {
        transaction_id: kept.transaction_id.clone(),
        transaction_ids: params.transaction_ids.clone(),
        action_id,
        hold_action_ids: BTreeMap::new(),
        changes: changes.into_iter().map(|(field, change)| (field, change.new)).collect(),
    };
    Ok(Decision::one(Plan {
        command: Command::MergeDuplicates(payload),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: kept.transaction_id,
            created: false,
        },
    }))
}

pub fn resolve_duplicates(ctx: &mut Context<'_>, params: &ResolveDuplicates) -> Result<Decision, MutationError> {
    let action_id = ctx.mint_action();
    let hold_ids: Vec<ActionId> = params.transaction_ids.iter().map(|_| ctx.mint_action()).collect();
    let group = match gather(ctx, &params.transaction_id, &params.transaction_ids)? {
        Ok(group) => group,
        Err(reason) => return Ok(reason.into()),
    };
    let ids = group.ids();

    let mut asm = ctx.assembly();
    let mut ledgers = Ledgers::default();
    let mut fresh = BTreeMap::new();
    let mut hold_action_ids = BTreeMap::new();

    for (before, hold_id) in group.others.iter().zip(hold_ids) {
        let mut after = before.clone();
        after.duplicates.clear();
        after.mark_pending("duplicates");
        if !before.is_held() {
            after.hold = Some(hold_id.clone());
            after.mark_pending("hold");
            if let Some(log) = ctx.log_report_for(before)? {
                let at = ctx.timeline.next();
                asm.append_action(&synth::entry(
                    hold_id.clone(),
                    log,
                    at,
                    ctx.actor(),
                    ActionPayload::Hold {
                        transaction_id: before.transaction_id.clone(),
                        reason: HOLD_REASON.to_string(),
                    },
                ))?;
            }
            hold_action_ids.insert(before.transaction_id.clone(), hold_id);
        }
        ledgers.apply(ctx.repo, Some(before), Some(&after))?;
        asm.update(CacheKey::Transaction(before.transaction_id.clone()), before, &after)?;
        let policy = match ctx.repo.report(&before.report_id)? {
            Some(report) => ctx.repo.policy_of(&report)?,
            None => None,
        };
        let violations =
            asm.refresh_violations(&after, policy.as_ref(), ctx.enforce_violations(policy.as_ref()), true)?;
        fresh.insert(before.transaction_id.clone(), violations);
    }

    let mut kept = group.kept.clone();
    kept.duplicates.clear();
    kept.mark_pending("duplicates");
    asm.update(CacheKey::Transaction(kept.transaction_id.clone()), &group.kept, &kept)?;
    let policy = match ctx.repo.report(&kept.report_id)? {
        Some(report) => ctx.repo.policy_of(&report)?,
        None => None,
    };
    let violations =
        asm.refresh_violations(&kept, policy.as_ref(), ctx.enforce_violations(policy.as_ref()), true)?;
    fresh.insert(kept.transaction_id.clone(), violations);
    if let Some(log) = ctx.log_report_for(&kept)? {
        let at = ctx.timeline.next();
        asm.append_action(&synth::entry(
            action_id.clone(),
            log,
            at,
            ctx.actor(),
            ActionPayload::DismissedViolation {
                transaction_id: kept.transaction_id.clone(),
                violation: ViolationName::DuplicatedTransaction,
            },
        ))?;
    }
    ledgers.write(&mut asm)?;
    clear_stale_markers(ctx, &mut asm, &ids)?;
    refresh_steps(ctx, &mut asm, &ledgers, &fresh)?;

    let payload = DuplicatesPayload {
        transaction_id: kept.transaction_id.clone(),
        transaction_ids: params.transaction_ids.clone(),
        action_id,
        hold_action_ids,
        changes: BTreeMap::new(),
    };
    Ok(Decision::one(Plan {
        command: Command::ResolveDuplicates(payload),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: kept.transaction_id,
            created: false,
        },
    }))
}
