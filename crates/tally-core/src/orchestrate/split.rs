//! Splitting a bill among several people.
//!
//! A split produces one plan for the shared parent transaction (amount 0,
//! parked on the split sentinel report, recorded in the group chat) and one
//! independent plan per non-payer share. Each share runs the same placement
//! as a plain request, so a rejected share rolls back only itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::request::{self, Destination, PlacementIds, Recipient};
use super::{Context, Decision, ErrorTarget, Plan};
use crate::command::{Command, SplitPayload};
use crate::error::MutationError;
use crate::model::split::fill_shares;
use crate::model::{
    AccountId, ActionPayload, Amount, ChatType, IouType, LedgerReport, ReportId, ReportKind,
    Split,
};
use crate::store::{CacheKey, Entities};
use crate::synth::{self, ExpenseDetails, IouEntry};

/// One person the bill is split with. The actor pays and is implied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitParticipant {
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
    /// Fixed share; everyone without one splits the remainder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBill {
    pub participants: Vec<SplitParticipant>,
    pub details: ExpenseDetails,
    /// Existing group chat to record the split in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_report_id: Option<ReportId>,
}

struct Share<'p> {
    participant: &'p SplitParticipant,
    account: AccountId,
    amount: Amount,
    ids: PlacementIds,
}

fn group_chat(
    ctx: &Context<'_>,
    params: &SplitBill,
    members: &BTreeSet<AccountId>,
    chat_id: ReportId,
) -> Result<(LedgerReport, bool), MutationError> {
    if let Some(id) = &params.chat_report_id {
        let chat: LedgerReport = ctx.repo.require(&CacheKey::Report(id.clone()))?;
        if chat.kind != ReportKind::Chat {
            return Err(MutationError::WrongKind {
                report_id: id.clone(),
                kind: chat.kind,
            });
        }
        return Ok((chat, false));
    }
    if let Some(chat) = ctx.repo.find_group_chat(members)? {
        return Ok((chat, false));
    }
    let mut ordered = vec![ctx.actor()];
    ordered.extend(members.iter().copied().filter(|m| *m != ctx.actor()));
    let chat = synth::report::chat(
        chat_id,
        ChatType::Group,
        &ordered,
        None,
        params.details.currency.clone(),
    );
    Ok((chat, true))
}

pub fn split_bill(ctx: &mut Context<'_>, params: &SplitBill) -> Result<Decision, MutationError> {
    request::validate_amount(&params.details)?;
    if params.participants.is_empty() {
        return Err(MutationError::invalid("a split needs at least one other participant"));
    }
    let parent_id = ctx.mint_transaction();
    let parent_action = ctx.mint_action();
    let chat_id = ctx.mint_report();
    let chat_created = ctx.mint_action();
    let placement: Vec<PlacementIds> = params
        .participants
        .iter()
        .map(|_| PlacementIds::mint(ctx))
        .collect();

    let actor = ctx.actor();
    let mut members = BTreeSet::from([actor]);
    let mut accounts = Vec::with_capacity(params.participants.len());
    for participant in &params.participants {
        let (account, _) = request::resolve_person(ctx, &participant.login, participant.account_id)?;
        if account == actor {
            return Err(MutationError::invalid("the payer is implied; do not list yourself"));
        }
        if !members.insert(account) {
            return Err(MutationError::invalid(format!(
                "{} is listed twice",
                participant.login
            )));
        }
        accounts.push(account);
    }

    for amount in params.participants.iter().filter_map(|p| p.amount) {
        request::check_range(amount, "a fixed share")?;
    }
    let mut explicit = vec![None];
    explicit.extend(params.participants.iter().map(|p| p.amount));
    let amounts = fill_shares(params.details.amount, &explicit)
        .ok_or_else(|| MutationError::invalid("fixed shares exceed the total"))?;

    let shares: Vec<Share<'_>> = params
        .participants
        .iter()
        .zip(accounts)
        .zip(amounts.iter().skip(1).copied())
        .zip(placement)
        .filter(|(((_, _), amount), _)| *amount != 0)
        .map(|(((participant, account), amount), ids)| Share {
            participant,
            account,
            amount,
            ids,
        })
        .collect();

    let mut placed: Vec<(Destination, ExpenseDetails)> = Vec::with_capacity(shares.len());
    for share in &shares {
        let details = params.details.with_amount(share.amount);
        let recipient = Recipient::Person {
            login: share.participant.login.clone(),
            account_id: share.participant.account_id,
        };
        placed.push((request::resolve_destination(ctx, &recipient, &share.ids, &details)?, details));
    }

    let mut splits = vec![Split {
        login: ctx.session.login.clone(),
        account_id: actor,
        amount: amounts[0],
        transaction_id: None,
        iou_report_id: None,
        chat_report_id: None,
        action_id: None,
    }];
    for (share, (dest, _)) in shares.iter().zip(&placed) {
        splits.push(Split {
            login: share.participant.login.trim().to_ascii_lowercase(),
            account_id: share.account,
            amount: share.amount,
            transaction_id: Some(share.ids.transaction.clone()),
            iou_report_id: Some(dest.ledger.report_id.clone()),
            chat_report_id: Some(dest.chat.report_id.clone()),
            action_id: Some(share.ids.iou_action.clone()),
        });
    }

    let (before_chat, chat_is_new) = group_chat(ctx, params, &members, chat_id)?;
    let mut plans = Vec::with_capacity(shares.len() + 1);

    // Parent transaction in the group chat.
    let mut asm = ctx.assembly();
    let created_at = chat_is_new.then(|| ctx.timeline.before());
    let at = ctx.timeline.next();
    let mut parent = synth::transaction(
        parent_id.clone(),
        ReportId::split_parent(),
        1,
        &params.details.with_amount(0),
        actor,
    );
    parent.splits.clone_from(&splits);
    asm.append_action(&synth::entry(
        parent_action.clone(),
        before_chat.report_id.clone(),
        at,
        actor,
        IouEntry::new(IouType::Split, params.details.amount, params.details.currency.clone())
            .for_transaction(parent_id.clone())
            .with_comment(params.details.comment.clone())
            .between(members.iter().copied().collect())
            .into_payload(),
    ))?;
    let mut chat = before_chat.clone();
    chat.last_visible_action_created = Some(at);
    if let Some(created) = created_at {
        asm.append_action(&synth::entry(
            chat_created.clone(),
            chat.report_id.clone(),
            created,
            actor,
            ActionPayload::Created,
        ))?;
        asm.create(CacheKey::Report(chat.report_id.clone()), &chat)?;
        asm.new_report_metadata(&chat.report_id)?;
    } else {
        asm.update(CacheKey::Report(chat.report_id.clone()), &before_chat, &chat)?;
    }
    asm.create(CacheKey::Transaction(parent_id.clone()), &parent)?;
    plans.push(Plan {
        command: Command::SplitBill(SplitPayload {
            transaction_id: parent_id.clone(),
            chat_report_id: chat.report_id.clone(),
            action_id: parent_action,
            created_chat_action_id: chat_is_new.then_some(chat_created),
            splits,
            details: params.details.clone(),
        }),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: parent_id.clone(),
            created: true,
        },
    });

    // One independent request per share.
    for (share, (dest, details)) in shares.iter().zip(&placed) {
        let mut txn = synth::transaction(
            share.ids.transaction.clone(),
            dest.ledger.report_id.clone(),
            dest.ledger.kind.amount_sign(),
            details,
            actor,
        );
        txn.split_parent = Some(parent_id.clone());
        let mut asm = ctx.assembly();
        let placement = request::place_transaction(ctx, &mut asm, dest, &share.ids, &txn, None)?;
        plans.push(Plan {
            command: Command::SplitShare(request::request_payload(dest, &share.ids, &placement, details)),
            updates: asm.finish(),
            target: ErrorTarget::Transaction {
                id: share.ids.transaction.clone(),
                created: true,
            },
        });
    }

    Ok(Decision::Go(plans))
}
