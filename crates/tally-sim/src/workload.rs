//! Random operation choice over the current cache.
//!
//! Choices are drawn against what the cache holds right now, so most of them
//! are plausible; some are still refused by the engine as ineligible or
//! invalid, which is part of what the simulation exercises.

use chrono::NaiveDate;
use serde::Serialize;
use tally_core::MutationError;
use tally_core::model::{Currency, LedgerReport, PaymentType, PolicyId, Session, Transaction, TransactionId};
use tally_core::orchestrate::convert::ConvertTrackedExpense;
use tally_core::orchestrate::delete::DeleteRequest;
use tally_core::orchestrate::duplicates::{MergeDuplicates, ResolveDuplicates};
use tally_core::orchestrate::edit::{EditTransaction, TransactionEdit};
use tally_core::orchestrate::hold::{HoldRequest, UnholdRequest};
use tally_core::orchestrate::request::{CreateRequest, Recipient, TrackExpense};
use tally_core::orchestrate::split::{SplitBill, SplitParticipant};
use tally_core::orchestrate::workflow::{ApproveReport, PayReport, ReportRef};
use tally_core::retry::{Operation, PendingRetry, pending_retries};
use tally_core::store::{Entities, MemoryStore};
use tally_core::synth::ExpenseDetails;

use crate::rng::DeterministicRng;

const MERCHANTS: [&str; 5] = ["Cafe", "Taxi", "Hotel", "Books", "Hardware"];
const MIN_AMOUNT: i64 = 100;
const MAX_AMOUNT: i64 = 50_000;

/// The people a simulation runs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cast {
    /// Members, any of whom may act.
    pub members: Vec<Session>,
    /// Administrator and approver of the shared workspace.
    pub admin: Session,
    pub policy_id: PolicyId,
}

impl Cast {
    /// `members` people plus an administrator, all with fixed logins.
    #[must_use]
    pub fn new(members: usize) -> Self {
        let members = (1..=members as u64)
            .map(|n| Session::new(tally_core::model::AccountId(n), format!("user{n}@example.com")))
            .collect();
        Self {
            members,
            admin: Session::new(tally_core::model::AccountId(1000), "admin@example.com"),
            policy_id: PolicyId::new("sim"),
        }
    }

    /// Everyone who may act, members first.
    pub fn everyone(&self) -> impl Iterator<Item = &Session> {
        self.members.iter().chain(std::iter::once(&self.admin))
    }
}

/// What the simulated user does next.
#[derive(Debug, Clone)]
pub enum Action {
    Run(Operation),
    Retry(PendingRetry),
}

impl Action {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Run(op) => op.name(),
            Self::Retry(_) => "retry",
        }
    }
}

fn details(rng: &mut DeterministicRng) -> ExpenseDetails {
    let day = u32::try_from(rng.next_bounded(28)).unwrap_or(0) + 1;
    let created = NaiveDate::from_ymd_opt(2024, 5, day).unwrap_or_default();
    let merchant = rng.pick(&MERCHANTS).copied().unwrap_or("Cafe");
    ExpenseDetails::new(rng.amount(MIN_AMOUNT, MAX_AMOUNT), Currency::usd(), created).with_merchant(merchant)
}

fn recipient(rng: &mut DeterministicRng, cast: &Cast, actor: &Session) -> Recipient {
    let others: Vec<&Session> = cast.everyone().filter(|s| s.account_id != actor.account_id).collect();
    if rng.hit_rate_percent(40) {
        return Recipient::Workspace {
            policy_id: cast.policy_id.clone(),
        };
    }
    match rng.pick(&others) {
        Some(person) => Recipient::Person {
            login: person.login.clone(),
            account_id: Some(person.account_id),
        },
        None => Recipient::Workspace {
            policy_id: cast.policy_id.clone(),
        },
    }
}

fn split(rng: &mut DeterministicRng, cast: &Cast, actor: &Session) -> Operation {
    let mut participants: Vec<SplitParticipant> = Vec::new();
    let wanted = 1 + rng.next_bounded(2);
    for person in cast.everyone().filter(|s| s.account_id != actor.account_id) {
        if participants.len() as u64 >= wanted {
            break;
        }
        if rng.hit_rate_percent(60) {
            participants.push(SplitParticipant {
                login: person.login.clone(),
                account_id: Some(person.account_id),
                amount: None,
            });
        }
    }
    if participants.is_empty() {
        if let Some(person) = cast.everyone().find(|s| s.account_id != actor.account_id) {
            participants.push(SplitParticipant {
                login: person.login.clone(),
                account_id: Some(person.account_id),
                amount: None,
            });
        }
    }
    Operation::SplitBill(SplitBill {
        participants,
        details: details(rng),
        chat_report_id: None,
    })
}

fn two_of(rng: &mut DeterministicRng, txns: &[Transaction]) -> Option<(TransactionId, TransactionId)> {
    let first = rng.pick(txns)?.transaction_id.clone();
    let rest: Vec<&Transaction> = txns.iter().filter(|t| t.transaction_id != first).collect();
    let second = rng.pick(&rest)?.transaction_id.clone();
    Some((first, second))
}

fn report_ref(report: &LedgerReport) -> ReportRef {
    ReportRef {
        report_id: report.report_id.clone(),
    }
}

/// Draw the next action for `actor`.
pub fn next_action(
    rng: &mut DeterministicRng,
    store: &MemoryStore,
    cast: &Cast,
    actor: &Session,
) -> Result<Action, MutationError> {
    let txns: Vec<Transaction> = store
        .live_transactions()?
        .into_iter()
        .filter(|t| !t.is_split_parent())
        .collect();
    let tracked: Vec<Transaction> = txns.iter().filter(|t| t.is_unreported()).cloned().collect();
    let ledgers: Vec<LedgerReport> = store
        .live_reports()?
        .into_iter()
        .filter(|r| r.kind.is_ledger())
        .collect();

    let txn = rng.pick(&txns).map(|t| t.transaction_id.clone());
    let ledger = rng.pick(&ledgers).cloned();
    let roll = rng.next_bounded(100);
    let chosen = match roll {
        0..=24 => None,
        25..=31 => Some(Operation::TrackExpense(TrackExpense { details: details(rng) })),
        32..=37 => rng.pick(&tracked).map(|t| t.transaction_id.clone()).map(|transaction_id| {
            Operation::ConvertTrackedExpense(ConvertTrackedExpense {
                transaction_id,
                recipient: recipient(rng, cast, actor),
            })
        }),
        38..=43 => Some(split(rng, cast, actor)),
        44..=51 => txn.map(|transaction_id| {
            Operation::EditTransaction(EditTransaction {
                transaction_id,
                edit: TransactionEdit {
                    amount: Some(rng.amount(MIN_AMOUNT, MAX_AMOUNT)),
                    ..TransactionEdit::default()
                },
            })
        }),
        52..=57 => txn.map(|transaction_id| Operation::DeleteRequest(DeleteRequest { transaction_id })),
        58..=63 => txn.map(|transaction_id| {
            Operation::HoldRequest(HoldRequest {
                transaction_id,
                reason: "needs a receipt".into(),
            })
        }),
        64..=67 => txn.map(|transaction_id| Operation::UnholdRequest(UnholdRequest { transaction_id })),
        68..=73 => ledger.as_ref().map(|r| Operation::SubmitReport(report_ref(r))),
        74..=79 => ledger.as_ref().map(|r| {
            Operation::ApproveReport(ApproveReport {
                report_id: r.report_id.clone(),
                full: rng.hit_rate_percent(70),
            })
        }),
        80..=83 => ledger.as_ref().map(|r| {
            Operation::PayReport(PayReport {
                report_id: r.report_id.clone(),
                payment_type: PaymentType::Elsewhere,
                full: rng.hit_rate_percent(70),
            })
        }),
        84..=85 => ledger.as_ref().map(|r| Operation::CancelPayment(report_ref(r))),
        86..=87 => ledger.as_ref().map(|r| Operation::RetractReport(report_ref(r))),
        88..=89 => ledger.as_ref().map(|r| Operation::ReopenReport(report_ref(r))),
        90..=91 => ledger.as_ref().map(|r| Operation::UnapproveReport(report_ref(r))),
        92..=94 => two_of(rng, &txns).map(|(kept, other)| {
            Operation::MergeDuplicates(MergeDuplicates {
                transaction_id: kept,
                transaction_ids: vec![other],
                edit: TransactionEdit::default(),
            })
        }),
        95..=96 => two_of(rng, &txns).map(|(kept, other)| {
            Operation::ResolveDuplicates(ResolveDuplicates {
                transaction_id: kept,
                transaction_ids: vec![other],
            })
        }),
        _ => {
            let pending = pending_retries(store);
            if let Some(found) = rng.pick(&pending) {
                return Ok(Action::Retry(found.clone()));
            }
            None
        }
    };
    Ok(Action::Run(chosen.unwrap_or_else(|| {
        Operation::CreateRequest(CreateRequest {
            recipient: recipient(rng, cast, actor),
            details: details(rng),
        })
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_empty_cache_still_yields_an_action() {
        let cast = Cast::new(3);
        let store = MemoryStore::new();
        let mut rng = DeterministicRng::new(1);
        for _ in 0..50 {
            let action = next_action(&mut rng, &store, &cast, &cast.members[0]).expect("action");
            assert!(matches!(
                action,
                Action::Run(
                    Operation::CreateRequest(_) | Operation::TrackExpense(_) | Operation::SplitBill(_)
                )
            ));
        }
    }

    #[test]
    fn nobody_requests_money_from_themselves() {
        let cast = Cast::new(2);
        let actor = &cast.members[0];
        let mut rng = DeterministicRng::new(4);
        for _ in 0..100 {
            if let Recipient::Person { account_id, .. } = recipient(&mut rng, &cast, actor) {
                assert_ne!(account_id, Some(actor.account_id));
            }
        }
    }

    #[test]
    fn splits_always_name_someone_else() {
        let cast = Cast::new(3);
        let actor = &cast.members[1];
        let mut rng = DeterministicRng::new(8);
        for _ in 0..50 {
            let Operation::SplitBill(bill) = split(&mut rng, &cast, actor) else {
                panic!("expected a split");
            };
            assert!(!bill.participants.is_empty());
            assert!(bill.participants.iter().all(|p| p.account_id != Some(actor.account_id)));
        }
    }
}
