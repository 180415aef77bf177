//! Aggregate recalculators.
//!
//! A ledger report carries four running aggregates. Each transaction
//! contributes to them according to its stored amount and flags:
//!
//! | Aggregate | Includes |
//! |---|---|
//! | `total` | every live transaction |
//! | `unheldTotal` | live transactions not on hold |
//! | `nonReimbursableTotal` | live non-reimbursable transactions |
//! | `unheldNonReimbursableTotal` | live non-reimbursable transactions not on hold |
//!
//! Amounts are stored in the report kind's sign convention, so on expense
//! reports a larger expense makes `total` more negative. On person-to-person
//! reports totals are relative to the owner: a request made by the other
//! participant subtracts, and a negative result swaps owner and manager.

use tracing::warn;

use crate::model::{LedgerReport, ReportKind, Transaction};

/// Wire names of the four aggregates, in [`Totals::fields`] order.
const FIELDS: [&str; 4] = [
    "total",
    "unheldTotal",
    "nonReimbursableTotal",
    "unheldNonReimbursableTotal",
];

/// The four aggregates, as a value that can be added and subtracted.
///
/// All arithmetic is checked: `None` means the result left `i64`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub total: i64,
    pub unheld_total: i64,
    pub non_reimbursable_total: i64,
    pub unheld_non_reimbursable_total: i64,
}

impl Totals {
    /// Aggregates currently stored on `report`.
    #[must_use]
    pub const fn of(report: &LedgerReport) -> Self {
        Self {
            total: report.total,
            unheld_total: report.unheld_total,
            non_reimbursable_total: report.non_reimbursable_total,
            unheld_non_reimbursable_total: report.unheld_non_reimbursable_total,
        }
    }

    fn store(self, report: &mut LedgerReport) {
        report.total = self.total;
        report.unheld_total = self.unheld_total;
        report.non_reimbursable_total = self.non_reimbursable_total;
        report.unheld_non_reimbursable_total = self.unheld_non_reimbursable_total;
    }

    const fn fields(self) -> [i64; 4] {
        [
            self.total,
            self.unheld_total,
            self.non_reimbursable_total,
            self.unheld_non_reimbursable_total,
        ]
    }

    fn zip_with(self, rhs: Self, op: fn(i64, i64) -> Option<i64>) -> Option<Self> {
        Some(Self {
            total: op(self.total, rhs.total)?,
            unheld_total: op(self.unheld_total, rhs.unheld_total)?,
            non_reimbursable_total: op(self.non_reimbursable_total, rhs.non_reimbursable_total)?,
            unheld_non_reimbursable_total: op(
                self.unheld_non_reimbursable_total,
                rhs.unheld_non_reimbursable_total,
            )?,
        })
    }

    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.zip_with(rhs, i64::checked_add)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.zip_with(rhs, i64::checked_sub)
    }

    #[must_use]
    pub fn checked_neg(self) -> Option<Self> {
        Self::default().checked_sub(self)
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.total == 0
            && self.unheld_total == 0
            && self.non_reimbursable_total == 0
            && self.unheld_non_reimbursable_total == 0
    }
}

/// What `txn` contributes to `report`. Deleted transactions contribute
/// nothing. `None` when the amount cannot be restated for the report.
#[must_use]
pub fn contribution(report: &LedgerReport, txn: &Transaction) -> Option<Totals> {
    if txn.is_pending_delete() {
        return Some(Totals::default());
    }
    let amount = match report.kind {
        ReportKind::Iou if txn.created_by != report.owner => txn.amount.checked_neg()?,
        _ => txn.amount,
    };
    let unheld = if txn.is_held() { 0 } else { amount };
    let (non_reimbursable, unheld_non_reimbursable) = if txn.reimbursable {
        (0, 0)
    } else {
        (amount, unheld)
    };
    Some(Totals {
        total: amount,
        unheld_total: unheld,
        non_reimbursable_total: non_reimbursable,
        unheld_non_reimbursable_total: unheld_non_reimbursable,
    })
}

fn contribution_of(report: &LedgerReport, txn: Option<&Transaction>) -> Option<Totals> {
    txn.map_or(Some(Totals::default()), |t| contribution(report, t))
}

/// Aggregates a change from `previous` to `next` would move, by wire name.
///
/// When both sides share a currency an aggregate moves only if its
/// contribution differs. When the currency itself changes, every aggregate
/// either side contributes to moves by an unknown amount.
fn touched(
    report: &LedgerReport,
    previous: Option<&Transaction>,
    next: Option<&Transaction>,
) -> Vec<&'static str> {
    let (Some(before), Some(after)) = (
        contribution_of(report, previous),
        contribution_of(report, next),
    ) else {
        return FIELDS.to_vec();
    };
    let restated = matches!((previous, next), (Some(p), Some(n)) if p.currency != n.currency);
    FIELDS
        .iter()
        .zip(before.fields().into_iter().zip(after.fields()))
        .filter(|(_, (b, a))| if restated { *b != 0 || *a != 0 } else { b != a })
        .map(|(field, _)| *field)
        .collect()
}

fn leave_pending(report: &mut LedgerReport, fields: &[&str]) {
    for field in fields {
        report.mark_pending(field);
    }
}

/// Recompute `report` for a transaction changing from `previous` to `next`.
///
/// Either side may be absent (a new or a removed transaction). Returns the
/// updated report and the applied delta. When the currencies of the report
/// and the transaction states disagree no numeric delta can be derived: the
/// aggregates are left alone, the ones the change would have moved are
/// marked pending, and `None` is returned. A result outside `i64` is
/// handled the same way.
#[must_use]
pub fn recompute(
    report: &LedgerReport,
    previous: Option<&Transaction>,
    next: Option<&Transaction>,
) -> (LedgerReport, Option<Totals>) {
    let mut updated = report.clone();
    let delta = apply(&mut updated, previous, next);
    (updated, delta)
}

fn shifted(
    report: &LedgerReport,
    previous: Option<&Transaction>,
    next: Option<&Transaction>,
) -> Option<(Totals, Totals)> {
    let delta = contribution_of(report, next)?.checked_sub(contribution_of(report, previous)?)?;
    let totals = Totals::of(report).checked_add(delta)?;
    Some((delta, totals))
}

/// In-place form of [`recompute`], for folding several changes into one
/// report.
pub fn apply(
    report: &mut LedgerReport,
    previous: Option<&Transaction>,
    next: Option<&Transaction>,
) -> Option<Totals> {
    let mismatch = previous
        .into_iter()
        .chain(next)
        .any(|txn| txn.currency != report.currency);
    if mismatch {
        let fields = touched(report, previous, next);
        warn!(
            report = %report.report_id,
            currency = %report.currency,
            ?fields,
            "cannot recompute aggregates across currencies; left pending"
        );
        leave_pending(report, &fields);
        return None;
    }

    let Some((delta, mut totals)) = shifted(report, previous, next) else {
        let fields = touched(report, previous, next);
        warn!(report = %report.report_id, ?fields, "aggregates overflow; left pending");
        leave_pending(report, &fields);
        return None;
    };

    if report.kind == ReportKind::Iou && totals.total < 0 {
        if let (Some(manager), Some(flipped)) = (report.manager, totals.checked_neg()) {
            report.manager = Some(report.owner);
            report.owner = manager;
            totals = flipped;
        }
    }
    totals.store(report);
    Some(delta)
}

/// Aggregates `report` should carry given every cached transaction, or
/// `None` when they do not fit in `i64`.
#[must_use]
pub fn expected_totals<'a>(
    report: &LedgerReport,
    transactions: impl IntoIterator<Item = &'a Transaction>,
) -> Option<Totals> {
    transactions
        .into_iter()
        .filter(|t| t.report_id == report.report_id)
        .try_fold(Totals::default(), |acc, t| acc.checked_add(contribution(report, t)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountId, ActionId, Currency, PendingAction, ReportId, TransactionId};
    use crate::synth::{self, ExpenseDetails};
    use chrono::NaiveDate;

    fn details(amount: i64) -> ExpenseDetails {
        ExpenseDetails::new(amount, Currency::usd(), NaiveDate::from_ymd_opt(2024, 1, 2).expect("date"))
    }

    fn expense_report() -> LedgerReport {
        let mut report = synth::report::iou_report(
            ReportId::new("r1"),
            ReportId::new("c1"),
            AccountId(1),
            AccountId(2),
            Currency::usd(),
        );
        report.kind = ReportKind::Expense;
        report.pending_action = None;
        report
    }

    fn txn(id: &str, report: &LedgerReport, amount: i64, by: u64) -> Transaction {
        synth::transaction(
            TransactionId::new(id),
            report.report_id.clone(),
            report.kind.amount_sign(),
            &details(amount),
            AccountId(by),
        )
    }

    #[test]
    fn expense_totals_decrease_with_new_expenses() {
        let report = expense_report();
        let t = txn("t1", &report, 4250, 1);
        let (updated, delta) = recompute(&report, None, Some(&t));
        assert_eq!(updated.total, -4250);
        assert_eq!(updated.unheld_total, -4250);
        assert_eq!(delta.map(|d| d.total), Some(-4250));
    }

    #[test]
    fn iou_totals_increase_with_new_requests() {
        let mut report = expense_report();
        report.kind = ReportKind::Iou;
        let t = txn("t1", &report, 4250, 1);
        let (updated, _) = recompute(&report, None, Some(&t));
        assert_eq!(updated.total, 4250);
    }

    #[test]
    fn holding_moves_only_unheld_aggregates() {
        let mut report = expense_report();
        let t = txn("t1", &report, 1000, 1);
        apply(&mut report, None, Some(&t));
        let mut held = t.clone();
        held.hold = Some(ActionId::new("h1"));
        let (updated, _) = recompute(&report, Some(&t), Some(&held));
        assert_eq!(updated.total, -1000);
        assert_eq!(updated.unheld_total, 0);
    }

    #[test]
    fn non_reimbursable_tracked_separately() {
        let report = expense_report();
        let mut t = txn("t1", &report, 700, 1);
        t.reimbursable = false;
        let (updated, _) = recompute(&report, None, Some(&t));
        assert_eq!(updated.non_reimbursable_total, -700);
        assert_eq!(updated.unheld_non_reimbursable_total, -700);
    }

    #[test]
    fn currency_mismatch_is_indeterminate() {
        let report = expense_report();
        let mut t = txn("t1", &report, 700, 1);
        t.currency = "EUR".parse().expect("currency");
        let (updated, delta) = recompute(&report, None, Some(&t));
        assert!(delta.is_none());
        assert_eq!(updated.total, 0);
        assert_eq!(updated.pending_fields.get("total"), Some(&PendingAction::Update));
    }

    #[test]
    fn holding_across_currencies_leaves_only_unheld_aggregates_pending() {
        let report = expense_report();
        let mut t = txn("t1", &report, 700, 1);
        t.currency = "EUR".parse().expect("currency");
        let mut held = t.clone();
        held.hold = Some(ActionId::new("h1"));
        let (updated, delta) = recompute(&report, Some(&t), Some(&held));
        assert!(delta.is_none());
        assert!(!updated.pending_fields.contains_key("total"));
        assert_eq!(updated.pending_fields.get("unheldTotal"), Some(&PendingAction::Update));
        assert!(!updated.pending_fields.contains_key("nonReimbursableTotal"));

        let mut euro = txn("t2", &report, 300, 1);
        euro.reimbursable = false;
        let mut dollars = euro.clone();
        euro.currency = "EUR".parse().expect("currency");
        let (updated, _) = recompute(&report, Some(&dollars), Some(&euro));
        assert_eq!(updated.pending_fields.len(), 4);
    }

    #[test]
    fn overflowing_aggregates_are_left_pending() {
        let mut report = expense_report();
        report.kind = ReportKind::Iou;
        let first = txn("t1", &report, i64::MAX, 1);
        apply(&mut report, None, Some(&first));
        assert_eq!(report.total, i64::MAX);

        let second = txn("t2", &report, i64::MAX, 1);
        let (updated, delta) = recompute(&report, None, Some(&second));
        assert!(delta.is_none());
        assert_eq!(updated.total, i64::MAX);
        assert_eq!(updated.pending_fields.get("total"), Some(&PendingAction::Update));
        assert!(expected_totals(&report, [&first, &second]).is_none());
    }

    #[test]
    fn iou_flips_owner_when_balance_goes_negative() {
        let mut report = expense_report();
        report.kind = ReportKind::Iou;
        let mine = txn("t1", &report, 500, 1);
        apply(&mut report, None, Some(&mine));
        let theirs = txn("t2", &report, 800, 2);
        apply(&mut report, None, Some(&theirs));
        assert_eq!(report.owner, AccountId(2));
        assert_eq!(report.manager, Some(AccountId(1)));
        assert_eq!(report.total, 300);
        assert_eq!(expected_totals(&report, [&mine, &theirs]).map(|t| t.total), Some(300));
    }

    #[test]
    fn deleted_transactions_contribute_nothing() {
        let report = expense_report();
        let mut t = txn("t1", &report, 700, 1);
        t.pending_action = Some(PendingAction::Delete);
        assert!(contribution(&report, &t).is_some_and(|c| c.is_zero()));
    }
}
