//! Turning a tracked expense into a request or a workspace expense.

use serde::{Deserialize, Serialize};

use super::request::{self, PlacementIds, Recipient};
use super::{Context, Decision, ErrorTarget, Ineligible, Plan};
use crate::command::Command;
use crate::error::MutationError;
use crate::model::{Transaction, TransactionId};
use crate::store::{CacheKey, Entities};
use crate::synth::{self, ExpenseDetails};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertTrackedExpense {
    pub transaction_id: TransactionId,
    pub recipient: Recipient,
}

fn details_of(txn: &Transaction) -> ExpenseDetails {
    ExpenseDetails {
        amount: txn.display_amount(),
        currency: txn.currency.clone(),
        created: txn.created,
        merchant: txn.merchant.clone(),
        comment: txn.comment.clone(),
        category: txn.category.clone(),
        tag: txn.tag.clone(),
        billable: txn.billable,
        reimbursable: txn.reimbursable,
        tax_code: txn.tax_code.clone(),
        tax_amount: txn.tax_amount,
        receipt: txn.receipt.clone(),
    }
}

pub fn convert_tracked_expense(
    ctx: &mut Context<'_>,
    params: &ConvertTrackedExpense,
) -> Result<Decision, MutationError> {
    let mut ids = PlacementIds::mint(ctx);
    let tracked: Transaction = ctx
        .repo
        .require(&CacheKey::Transaction(params.transaction_id.clone()))?;
    if tracked.is_pending_delete() {
        return Ok(Ineligible::PendingDelete.into());
    }
    if !tracked.is_unreported() {
        return Ok(Ineligible::NotTracked.into());
    }
    ids.transaction = tracked.transaction_id.clone();

    let details = details_of(&tracked);
    let dest = request::resolve_destination(ctx, &params.recipient, &ids, &details)?;
    let moved = synth::rehomed(
        &tracked,
        dest.ledger.report_id.clone(),
        dest.ledger.kind.amount_sign(),
    );

    let mut asm = ctx.assembly();
    let track_entry = match ctx.log_report_for(&tracked)? {
        Some(dm) => ctx
            .repo
            .request_action(&dm, &tracked.transaction_id)?
            .map(|entry| (dm, entry.action_id)),
        None => None,
    };
    if let Some((dm, action_id)) = &track_entry {
        asm.tombstone_action(dm, action_id);
    }
    let placed = request::place_transaction(ctx, &mut asm, &dest, &ids, &moved, Some(&tracked))?;

    let mut payload = request::request_payload(&dest, &ids, &placed, &details);
    payload.tracked_action_id = track_entry.map(|(_, id)| id);
    Ok(Decision::one(Plan {
        command: Command::ConvertTrackedExpense(payload),
        updates: asm.finish(),
        target: ErrorTarget::Transaction {
            id: tracked.transaction_id,
            created: false,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PolicyTier, ReportKind};
    use crate::orchestrate::request::{TrackExpense, track_expense};
    use crate::orchestrate::testkit::Fixture;

    fn tracked(fx: &mut Fixture, amount: i64) -> Transaction {
        let params = TrackExpense { details: fx.details(amount) };
        let plans = fx.plans(|ctx| track_expense(ctx, &params));
        fx.confirm(&plans);
        fx.only_transaction(&fx.store.clone())
    }

    #[test]
    fn converting_to_a_workspace_moves_the_expense() {
        let mut fx = Fixture::new();
        let policy = fx.workspace(PolicyTier::Collect);
        let txn = tracked(&mut fx, 1200);
        let params = ConvertTrackedExpense {
            transaction_id: txn.transaction_id.clone(),
            recipient: Recipient::Workspace { policy_id: policy.id },
        };
        let plans = fx.plans(|ctx| convert_tracked_expense(ctx, &params));
        let after = fx.optimistic(&plans);

        let moved = after.transaction(&txn.transaction_id).expect("read").expect("txn");
        assert!(!moved.is_unreported());
        assert_eq!(moved.amount, -1200);
        let report = after.ledger(&moved.report_id).expect("ledger");
        assert_eq!(report.kind, ReportKind::Expense);
        assert_eq!(report.total, -1200);

        let dm = after.find_self_dm(fx.session.account_id).expect("read").expect("dm");
        let log = after.actions(&dm.report_id).expect("log");
        assert!(log.values().all(|e| !e.is_request_for(&txn.transaction_id)));
        fx.assert_rollback_closure(&plans);
    }

    #[test]
    fn converting_to_a_person_flips_the_sign() {
        let mut fx = Fixture::new();
        let txn = tracked(&mut fx, 700);
        let params = ConvertTrackedExpense {
            transaction_id: txn.transaction_id.clone(),
            recipient: Recipient::Person { login: "bob@example.com".into(), account_id: None },
        };
        let plans = fx.plans(|ctx| convert_tracked_expense(ctx, &params));
        let confirmed = fx.confirmed(&plans);
        let moved = confirmed.transaction(&txn.transaction_id).expect("read").expect("txn");
        assert_eq!(moved.amount, 700);
        assert!(moved.pending_fields.is_empty());
    }

    #[test]
    fn reported_transactions_are_not_tracked() {
        let mut fx = Fixture::new();
        let txn = tracked(&mut fx, 700);
        let params = ConvertTrackedExpense {
            transaction_id: txn.transaction_id.clone(),
            recipient: Recipient::Person { login: "bob@example.com".into(), account_id: None },
        };
        let plans = fx.plans(|ctx| convert_tracked_expense(ctx, &params));
        fx.confirm(&plans);
        assert_eq!(
            fx.skipped(|ctx| convert_tracked_expense(ctx, &params)),
            Ineligible::NotTracked
        );
    }
}
