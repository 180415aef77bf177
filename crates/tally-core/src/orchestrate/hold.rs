//! Placing a transaction on hold and releasing it.
//!
//! A hold only moves the unheld aggregates; `total` keeps counting the
//! transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Context, Decision, ErrorTarget, Ineligible, Ledgers, Plan};
use crate::command::{Command, HoldPayload};
use crate::error::MutationError;
use crate::model::{ActionPayload, Transaction, TransactionId};
use crate::store::{CacheKey, Entities};
use crate::synth;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRequest {
    pub transaction_id: TransactionId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnholdRequest {
    pub transaction_id: TransactionId,
}

/// `reason` is `Some` to hold, `None` to release.
fn toggle(
    ctx: &mut Context<'_>,
    transaction_id: &TransactionId,
    reason: Option<&str>,
) -> Result<Decision, MutationError> {
    let action_id = ctx.mint_action();
    let before: Transaction = ctx
        .repo
        .require(&CacheKey::Transaction(transaction_id.clone()))?;
    if before.is_pending_delete() {
        return Ok(Ineligible::PendingDelete.into());
    }
    match reason {
        Some(_) if before.is_held() => return Ok(Ineligible::AlreadyHeld.into()),
        None if !before.is_held() => return Ok(Ineligible::NotHeld.into()),
        _ => {}
    }
    if before.report_id.is_sentinel() {
        return Ok(Ineligible::NotOnReport.into());
    }
    let ledger = ctx.repo.ledger(&before.report_id)?;
    if ledger.is_pending_delete() {
        return Ok(Ineligible::PendingDelete.into());
    }
    if ledger.stage.is_settled() {
        return Ok(Ineligible::WrongStage { stage: ledger.stage }.into());
    }

    let mut after = before.clone();
    after.hold = reason.map(|_| action_id.clone());
    after.mark_pending("hold");

    let mut asm = ctx.assembly();
    let mut ledgers = Ledgers::default();
    ledgers.apply(ctx.repo, Some(&before), Some(&after))?;
    ledgers.write(&mut asm)?;

    let payload = match reason {
        Some(reason) => ActionPayload::Hold {
            transaction_id: before.transaction_id.clone(),
            reason: reason.to_string(),
        },
        None => ActionPayload::Unhold {
            transaction_id: before.transaction_id.clone(),
        },
    };
    let at = ctx.timeline.next();
    asm.append_action(&synth::entry(
        action_id.clone(),
        ledger.report_id.clone(),
        at,
        ctx.actor(),
        payload,
    ))?;
    asm.update(CacheKey::Transaction(before.transaction_id.clone()), &before, &after)?;

    let policy = ctx.repo.policy_of(&ledger)?;
    let violations =
        asm.refresh_violations(&after, policy.as_ref(), ctx.enforce_violations(policy.as_ref()), true)?;
    if let Some(report) = ledgers.after(&ledger.report_id) {
        let fresh = BTreeMap::from([(after.transaction_id.clone(), violations)]);
        ctx.refresh_next_step(&mut asm, report, policy.as_ref(), &fresh)?;
    }

    let payload = HoldPayload {
        transaction_id: before.transaction_id.clone(),
        action_id,
        comment: reason.unwrap_or_default().to_string(),
    };
    let command = if reason.is_some() {
        Command::HoldRequest(payload)
    } else {
        Command::UnholdRequest(payload)
    };
    Ok(Decision::one(Plan {
        command,
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: before.transaction_id,
            created: false,
        },
    }))
}

pub fn hold_request(ctx: &mut Context<'_>, params: &HoldRequest) -> Result<Decision, MutationError> {
    let reason = params.reason.trim();
    if reason.is_empty() {
        return Err(MutationError::invalid("a hold needs a reason"));
    }
    toggle(ctx, &params.transaction_id, Some(reason))
}

pub fn unhold_request(ctx: &mut Context<'_>, params: &UnholdRequest) -> Result<Decision, MutationError> {
    toggle(ctx, &params.transaction_id, None)
}
