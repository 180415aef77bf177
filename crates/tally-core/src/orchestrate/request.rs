//! New requests and tracked expenses.
//!
//! The resolve-or-create step lives here because converting a tracked
//! expense and every share of a split run the same placement logic as a
//! plain request: find the conversation with the counterpart (or create
//! it), find a ledger still accepting requests (or open one), then write the
//! transaction, its audit entries, and the recomputed aggregates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Context, Decision, ErrorTarget, Plan};
use crate::assemble::Assembly;
use crate::command::{Command, RequestPayload};
use crate::error::MutationError;
use crate::model::{
    AccountId, ActionId, ActionPayload, Amount, ChatType, IouType, LedgerReport, MAX_AMOUNT,
    PersonalDetails, Policy, PolicyId, Receipt, ReportId, ReportKind, Transaction, TransactionId, WorkflowStage,
};
use crate::recalc;
use crate::store::{CacheKey, Entities};
use crate::synth::{self, ExpenseDetails, IouEntry};

/// Who a request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recipient {
    /// Another person, known by login and possibly by account.
    Person {
        login: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_id: Option<AccountId>,
    },
    /// A workspace the actor submits expenses to.
    Workspace { policy_id: PolicyId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub recipient: Recipient,
    pub details: ExpenseDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackExpense {
    pub details: ExpenseDetails,
}

/// Identifiers one placed transaction may need, minted up front.
#[derive(Debug, Clone)]
pub(crate) struct PlacementIds {
    pub transaction: TransactionId,
    pub iou_action: ActionId,
    pub thread: ReportId,
    pub chat: ReportId,
    pub chat_created: ActionId,
    pub report: ReportId,
    pub report_created: ActionId,
    pub preview: ActionId,
}

impl PlacementIds {
    pub fn mint(ctx: &mut Context<'_>) -> Self {
        Self {
            transaction: ctx.mint_transaction(),
            iou_action: ctx.mint_action(),
            thread: ctx.mint_report(),
            chat: ctx.mint_report(),
            chat_created: ctx.mint_action(),
            report: ctx.mint_report(),
            report_created: ctx.mint_action(),
            preview: ctx.mint_action(),
        }
    }
}

/// Where a transaction lands, resolved against the pre-mutation cache.
#[derive(Debug, Clone)]
pub(crate) struct Destination {
    pub chat: LedgerReport,
    pub chat_is_new: bool,
    pub ledger: LedgerReport,
    pub ledger_is_new: bool,
    pub policy: Option<Policy>,
    pub payer: AccountId,
    pub payee: AccountId,
    /// Placeholder details for a counterpart the cache has never seen.
    pub invitee: Option<PersonalDetails>,
}

/// What placement produced, for the command payload.
#[derive(Debug, Clone)]
pub(crate) struct Placed {
    pub preview_action: ActionId,
}

fn is_scanning(details: &ExpenseDetails) -> bool {
    details.receipt.as_ref().is_some_and(Receipt::is_scanning)
}

/// Reject amounts outside `0..=MAX_AMOUNT`. `what` names the field in the
/// error.
pub(crate) fn check_range(amount: Amount, what: &str) -> Result<(), MutationError> {
    if amount < 0 {
        return Err(MutationError::invalid(format!("{what} must not be negative")));
    }
    if amount > MAX_AMOUNT {
        return Err(MutationError::invalid(format!(
            "{what} must not exceed {MAX_AMOUNT}"
        )));
    }
    Ok(())
}

/// The rule every request amount follows, whether created or edited.
pub(crate) fn check_amount(amount: Amount, scanning: bool) -> Result<(), MutationError> {
    check_range(amount, "amount")?;
    if amount == 0 && !scanning {
        return Err(MutationError::invalid(
            "amount must be positive unless a receipt is being scanned",
        ));
    }
    Ok(())
}

pub(crate) fn validate_amount(details: &ExpenseDetails) -> Result<(), MutationError> {
    check_amount(details.amount, is_scanning(details))
}

/// Account behind `login`, minting placeholder details when it is unknown.
pub(crate) fn resolve_person(
    ctx: &Context<'_>,
    login: &str,
    account_id: Option<AccountId>,
) -> Result<(AccountId, Option<PersonalDetails>), MutationError> {
    if let Some(account) = account_id {
        return Ok((account, None));
    }
    if login.trim().is_empty() {
        return Err(MutationError::invalid("recipient needs a login or an account id"));
    }
    if let Some(known) = ctx.repo.details_by_login(login)? {
        return Ok((known.account_id, None));
    }
    let invitee = PersonalDetails::optimistic(login);
    Ok((invitee.account_id, Some(invitee)))
}

/// The ledger in `chat` still accepting requests of `kind`, if any.
fn open_ledger(
    ctx: &Context<'_>,
    chat: &LedgerReport,
    kind: ReportKind,
    policy: Option<&Policy>,
    details: &ExpenseDetails,
) -> Result<Option<LedgerReport>, MutationError> {
    if is_scanning(details) && ctx.config.requests.new_report_for_scans {
        return Ok(None);
    }
    let Some(id) = &chat.iou_report_id else {
        return Ok(None);
    };
    let Some(report) = ctx.repo.report(id)? else {
        return Ok(None);
    };
    if report.is_pending_delete() || report.kind != kind {
        return Ok(None);
    }
    let accepts = match kind {
        ReportKind::Expense => {
            report.stage == WorkflowStage::Open
                || (report.stage == WorkflowStage::Submitted
                    && policy.is_some_and(Policy::is_instant_submit))
        }
        _ => matches!(report.stage, WorkflowStage::Open | WorkflowStage::Submitted),
    };
    Ok(accepts.then_some(report))
}

pub(crate) fn resolve_destination(
    ctx: &Context<'_>,
    recipient: &Recipient,
    ids: &PlacementIds,
    details: &ExpenseDetails,
) -> Result<Destination, MutationError> {
    let actor = ctx.actor();
    match recipient {
        Recipient::Person { login, account_id } => {
            let (counterpart, invitee) = resolve_person(ctx, login, *account_id)?;
            if counterpart == actor {
                return Err(MutationError::invalid("cannot request money from yourself"));
            }
            let (chat, chat_is_new) = match ctx.repo.find_direct_chat(actor, counterpart)? {
                Some(chat) => (chat, false),
                None => (
                    synth::report::chat(
                        ids.chat.clone(),
                        ChatType::Direct,
                        &[actor, counterpart],
                        None,
                        details.currency.clone(),
                    ),
                    true,
                ),
            };
            let (ledger, ledger_is_new) = match open_ledger(ctx, &chat, ReportKind::Iou, None, details)? {
                Some(ledger) => (ledger, false),
                None => (
                    synth::report::iou_report(
                        ids.report.clone(),
                        chat.report_id.clone(),
                        actor,
                        counterpart,
                        details.currency.clone(),
                    ),
                    true,
                ),
            };
            Ok(Destination {
                chat,
                chat_is_new,
                ledger,
                ledger_is_new,
                policy: None,
                payer: counterpart,
                payee: actor,
                invitee,
            })
        }
        Recipient::Workspace { policy_id } => {
            let policy: Policy = ctx.repo.require(&CacheKey::Policy(policy_id.clone()))?;
            let (chat, chat_is_new) = match ctx.repo.find_policy_expense_chat(policy_id, actor)? {
                Some(chat) => (chat, false),
                None => {
                    let mut members = vec![actor];
                    if policy.owner != actor {
                        members.push(policy.owner);
                    }
                    (
                        synth::report::chat(
                            ids.chat.clone(),
                            ChatType::PolicyExpenseChat,
                            &members,
                            Some(&policy),
                            details.currency.clone(),
                        ),
                        true,
                    )
                }
            };
            let (ledger, ledger_is_new) =
                match open_ledger(ctx, &chat, ReportKind::Expense, Some(&policy), details)? {
                    Some(ledger) => (ledger, false),
                    None => (
                        synth::report::expense_report(
                            ids.report.clone(),
                            chat.report_id.clone(),
                            &policy,
                            actor,
                            details.currency.clone(),
                            details.created,
                        ),
                        true,
                    ),
                };
            let payer = policy.effective_reimburser();
            Ok(Destination {
                chat,
                chat_is_new,
                ledger,
                ledger_is_new,
                policy: Some(policy),
                payer,
                payee: actor,
                invitee: None,
            })
        }
    }
}

/// Write `txn` into `dest`: ledger and chat create-or-update, audit entries,
/// thread, aggregates, violations and next step.
///
/// `previous` is the cached state of `txn` when it already exists elsewhere
/// (a tracked expense being converted); it only decides create versus patch
/// for the transaction key; the destination ledger never held it.
pub(crate) fn place_transaction(
    ctx: &mut Context<'_>,
    asm: &mut Assembly<'_>,
    dest: &Destination,
    ids: &PlacementIds,
    txn: &Transaction,
    previous: Option<&Transaction>,
) -> Result<Placed, MutationError> {
    let actor = ctx.actor();
    if let Some(invitee) = &dest.invitee {
        asm.transient(CacheKey::PersonalDetails(invitee.account_id), invitee)?;
    }

    let report_created_at = dest.ledger_is_new.then(|| ctx.timeline.before());
    let chat_created_at = dest.chat_is_new.then(|| ctx.timeline.before());
    let iou_at = ctx.timeline.next();
    let preview_at = ctx.timeline.next();

    let mut ledger = dest.ledger.clone();
    recalc::apply(&mut ledger, None, Some(txn));
    ledger.last_visible_action_created = Some(iou_at);

    let mut iou = synth::entry(
        ids.iou_action.clone(),
        ledger.report_id.clone(),
        iou_at,
        actor,
        IouEntry::new(IouType::Create, txn.display_amount(), txn.currency.clone())
            .for_transaction(txn.transaction_id.clone())
            .on_report(ledger.report_id.clone())
            .with_comment(txn.comment.clone())
            .between(vec![dest.payee, dest.payer])
            .into_payload(),
    );
    iou.child_report_id = Some(ids.thread.clone());
    asm.append_action(&iou)?;
    let thread = synth::report::thread(ids.thread.clone(), &ledger, ids.iou_action.clone());
    asm.create(CacheKey::Report(thread.report_id.clone()), &thread)?;

    if let Some(at) = report_created_at {
        let created = synth::entry(
            ids.report_created.clone(),
            ledger.report_id.clone(),
            at,
            actor,
            ActionPayload::Created,
        );
        asm.append_action(&created)?;
        asm.create(CacheKey::Report(ledger.report_id.clone()), &ledger)?;
        asm.new_report_metadata(&ledger.report_id)?;
    } else {
        asm.update(CacheKey::Report(ledger.report_id.clone()), &dest.ledger, &ledger)?;
    }

    let existing_preview = if dest.ledger_is_new {
        None
    } else {
        ctx.repo
            .preview_action(&dest.chat.report_id, &ledger.report_id)?
    };
    let preview_action = match existing_preview {
        Some(before) => {
            let mut after = before.clone();
            if let ActionPayload::ReportPreview { request_count, .. } = &mut after.original_message {
                *request_count = request_count.saturating_add(1);
            }
            asm.update_action(&before, &after)?;
            before.action_id
        }
        None => {
            let count = if dest.ledger_is_new {
                1
            } else {
                ctx.repo.transactions_on(&ledger.report_id)?.len() + 1
            };
            let entry = synth::entry(
                ids.preview.clone(),
                dest.chat.report_id.clone(),
                preview_at,
                actor,
                synth::preview(ledger.report_id.clone(), u32::try_from(count).unwrap_or(u32::MAX)),
            );
            asm.append_action(&entry)?;
            ids.preview.clone()
        }
    };

    let mut chat = dest.chat.clone();
    chat.iou_report_id = Some(ledger.report_id.clone());
    chat.has_outstanding_child_request = true;
    chat.last_visible_action_created = Some(preview_at);
    if let Some(at) = chat_created_at {
        let created = synth::entry(
            ids.chat_created.clone(),
            chat.report_id.clone(),
            at,
            actor,
            ActionPayload::Created,
        );
        asm.append_action(&created)?;
        asm.create(CacheKey::Report(chat.report_id.clone()), &chat)?;
        asm.new_report_metadata(&chat.report_id)?;
    } else {
        asm.update(CacheKey::Report(chat.report_id.clone()), &dest.chat, &chat)?;
    }

    asm.upsert(
        CacheKey::Transaction(txn.transaction_id.clone()),
        previous,
        txn,
    )?;

    let policy = dest.policy.as_ref();
    let violations = asm.refresh_violations(txn, policy, ctx.enforce_violations(policy), false)?;
    let fresh = BTreeMap::from([(txn.transaction_id.clone(), violations)]);
    ctx.refresh_next_step(asm, &ledger, policy, &fresh)?;

    Ok(Placed { preview_action })
}

/// Command payload for a placed transaction.
pub(crate) fn request_payload(
    dest: &Destination,
    ids: &PlacementIds,
    placed: &Placed,
    details: &ExpenseDetails,
) -> RequestPayload {
    RequestPayload {
        transaction_id: ids.transaction.clone(),
        report_id: dest.ledger.report_id.clone(),
        chat_report_id: dest.chat.report_id.clone(),
        action_id: ids.iou_action.clone(),
        created_chat_action_id: dest.chat_is_new.then(|| ids.chat_created.clone()),
        created_report_action_id: dest.ledger_is_new.then(|| ids.report_created.clone()),
        preview_action_id: Some(placed.preview_action.clone()),
        thread_report_id: ids.thread.clone(),
        tracked_action_id: None,
        payer: dest.payer,
        payee: dest.payee,
        policy_id: dest.policy.as_ref().map(|p| p.id.clone()),
        details: details.clone(),
    }
}

/// Request money from a person, or submit an expense to a workspace.
pub fn create_request(ctx: &mut Context<'_>, params: &CreateRequest) -> Result<Decision, MutationError> {
    validate_amount(&params.details)?;
    let ids = PlacementIds::mint(ctx);
    let dest = resolve_destination(ctx, &params.recipient, &ids, &params.details)?;
    let txn = synth::transaction(
        ids.transaction.clone(),
        dest.ledger.report_id.clone(),
        dest.ledger.kind.amount_sign(),
        &params.details,
        ctx.actor(),
    );

    let mut asm = ctx.assembly();
    let placed = place_transaction(ctx, &mut asm, &dest, &ids, &txn, None)?;
    let payload = request_payload(&dest, &ids, &placed, &params.details);
    Ok(Decision::one(Plan {
        command: Command::CreateRequest(payload),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: ids.transaction,
            created: true,
        },
    }))
}

/// Record an expense in the actor's self DM, outside any report.
pub fn track_expense(ctx: &mut Context<'_>, params: &TrackExpense) -> Result<Decision, MutationError> {
    validate_amount(&params.details)?;
    let transaction_id = ctx.mint_transaction();
    let action_id = ctx.mint_action();
    let thread_id = ctx.mint_report();
    let chat_id = ctx.mint_report();
    let chat_created_id = ctx.mint_action();

    let actor = ctx.actor();
    let details = &params.details;
    let (before_chat, chat_is_new) = match ctx.repo.find_self_dm(actor)? {
        Some(chat) => (chat, false),
        None => (
            synth::report::chat(chat_id, ChatType::SelfDm, &[actor], None, details.currency.clone()),
            true,
        ),
    };
    let txn = synth::transaction(
        transaction_id.clone(),
        ReportId::unreported(),
        ReportKind::Expense.amount_sign(),
        details,
        actor,
    );

    let mut asm = ctx.assembly();
    let created_at = chat_is_new.then(|| ctx.timeline.before());
    let at = ctx.timeline.next();

    let mut entry = synth::entry(
        action_id.clone(),
        before_chat.report_id.clone(),
        at,
        actor,
        IouEntry::new(IouType::Track, details.amount, details.currency.clone())
            .for_transaction(transaction_id.clone())
            .with_comment(details.comment.clone())
            .into_payload(),
    );
    entry.child_report_id = Some(thread_id.clone());
    asm.append_action(&entry)?;
    let thread = synth::report::thread(thread_id.clone(), &before_chat, action_id.clone());
    asm.create(CacheKey::Report(thread_id.clone()), &thread)?;

    let mut chat = before_chat.clone();
    chat.last_visible_action_created = Some(at);
    if let Some(created) = created_at {
        asm.append_action(&synth::entry(
            chat_created_id.clone(),
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
    asm.create(CacheKey::Transaction(transaction_id.clone()), &txn)?;

    let payload = RequestPayload {
        transaction_id: transaction_id.clone(),
        report_id: ReportId::unreported(),
        chat_report_id: chat.report_id.clone(),
        action_id,
        created_chat_action_id: chat_is_new.then_some(chat_created_id),
        created_report_action_id: None,
        preview_action_id: None,
        thread_report_id: thread_id,
        tracked_action_id: None,
        payer: actor,
        payee: actor,
        policy_id: None,
        details: details.clone(),
    };
    Ok(Decision::one(Plan {
        command: Command::TrackExpense(payload),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: transaction_id,
            created: true,
        },
    }))
}
