use serde::{Deserialize, Serialize};

use super::ids::{AccountId, ActionId, ReportId, TransactionId};
use super::money::Amount;

/// One participant's share of a split.
///
/// The parent transaction carries the full list; each non-payer share also
/// points at the one-on-one request generated for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub login: String,
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    pub amount: Amount,
    #[serde(default, rename = "transactionID", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default, rename = "iouReportID", skip_serializing_if = "Option::is_none")]
    pub iou_report_id: Option<ReportId>,
    #[serde(default, rename = "chatReportID", skip_serializing_if = "Option::is_none")]
    pub chat_report_id: Option<ReportId>,
    #[serde(default, rename = "reportActionID", skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
}

/// Divide `total` evenly among `count` people.
///
/// Every share is `total / count` truncated toward zero; the payer's share
/// (index 0) absorbs the remainder, so the shares always sum to exactly
/// `total` and the payer never pays less than anyone else. Returns an empty
/// list when `count` is 0.
#[must_use]
pub fn even_shares(total: Amount, count: usize) -> Vec<Amount> {
    if count == 0 {
        return Vec::new();
    }
    let Ok(n) = i64::try_from(count) else {
        return Vec::new();
    };
    let base = total / n;
    let mut shares = vec![base; count];
    shares[0] = total - base * (n - 1);
    shares
}

/// Fill in unspecified shares around explicitly chosen ones.
///
/// `explicit[i]` is `Some(amount)` where participant `i` was given a fixed
/// share. The payer (index 0) and every unspecified participant split the
/// remainder evenly, the payer absorbing rounding. `None` is returned when
/// the explicit shares already exceed the total, when one of them has the
/// opposite sign to the total, or when they cannot be summed in an `i64`.
#[must_use]
pub fn fill_shares(total: Amount, explicit: &[Option<Amount>]) -> Option<Vec<Amount>> {
    let fixed = explicit
        .iter()
        .skip(1)
        .flatten()
        .try_fold(0_i64, |acc, share| {
            let against_total = (total >= 0 && *share < 0) || (total < 0 && *share > 0);
            if against_total { None } else { acc.checked_add(*share) }
        })?;
    let remainder = total.checked_sub(fixed)?;
    if (total >= 0 && remainder < 0) || (total < 0 && remainder > 0) {
        return None;
    }

    let open: Vec<usize> = explicit
        .iter()
        .enumerate()
        .filter(|(i, share)| *i == 0 || share.is_none())
        .map(|(i, _)| i)
        .collect();
    let even = even_shares(remainder, open.len());

    let mut out: Vec<Amount> = explicit.iter().map(|s| s.unwrap_or(0)).collect();
    for (slot, amount) in open.iter().zip(even) {
        out[*slot] = amount;
    }
    Some(out)
}
