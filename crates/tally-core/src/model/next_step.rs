use serde::{Deserialize, Serialize};

use super::ids::AccountId;
use super::policy::Policy;
use super::report::{LedgerReport, WorkflowStage};

/// Workflow hint attached 1:1 to a ledger report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStep {
    pub stage: WorkflowStage,
    /// Whose move it is, if anyone's.
    #[serde(default, rename = "actorAccountID", skip_serializing_if = "Option::is_none")]
    pub actor: Option<AccountId>,
    pub message: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub done: bool,
}

/// Derive the next step for `report` as seen by `viewer`.
///
/// `has_violations` switches the open-stage message from "submit" to "fix".
/// Names are rendered as "you" for the viewer and as the account id
/// otherwise; display names are resolved by the presentation layer.
#[must_use]
pub fn derive(
    report: &LedgerReport,
    policy: &Policy,
    viewer: AccountId,
    has_violations: bool,
) -> NextStep {
    let who = |account: AccountId| {
        if account == viewer {
            "you".to_string()
        } else {
            format!("account {account}")
        }
    };

    let (actor, message, done) = match report.stage {
        WorkflowStage::Open if has_violations => (
            Some(report.owner),
            format!("Waiting for {} to fix the issues.", who(report.owner)),
            false,
        ),
        WorkflowStage::Open => (
            Some(report.owner),
            format!("Waiting for {} to submit expenses.", who(report.owner)),
            false,
        ),
        WorkflowStage::Submitted => {
            let approver = report.manager.unwrap_or_else(|| policy.effective_approver());
            (
                Some(approver),
                format!("Waiting for {} to approve expenses.", who(approver)),
                false,
            )
        }
        WorkflowStage::Approved | WorkflowStage::Closed if report.total != 0 => {
            let payer = policy.effective_reimburser();
            (
                Some(payer),
                format!("Waiting for {} to pay expenses.", who(payer)),
                false,
            )
        }
        WorkflowStage::Approved | WorkflowStage::Closed | WorkflowStage::Reimbursed => (
            None,
            "Finished! No further action required.".to_string(),
            true,
        ),
    };

    NextStep {
        stage: report.stage,
        actor,
        message,
        done,
    }
}
