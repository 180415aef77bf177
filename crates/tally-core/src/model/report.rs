use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

use super::ids::{AccountId, ActionId, PolicyId, ReportId};
use super::money::{Amount, Currency};
use super::{ParseEnumError, PendingAction, PendingFields, normalize};

/// What a report is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// A conversation. Holds no money itself.
    Chat,
    /// Person-to-person money request ledger.
    Iou,
    /// Workspace expense ledger.
    Expense,
    /// Workspace invoice ledger.
    Invoice,
}

impl ReportKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Iou => "iou",
            Self::Expense => "expense",
            Self::Invoice => "invoice",
        }
    }

    /// Ledger reports carry aggregates and move through the workflow.
    #[must_use]
    pub const fn is_ledger(self) -> bool {
        !matches!(self, Self::Chat)
    }

    /// Sign applied to user-entered amounts when stored on this kind.
    #[must_use]
    pub const fn amount_sign(self) -> i64 {
        match self {
            Self::Iou | Self::Chat => 1,
            Self::Expense | Self::Invoice => -1,
        }
    }
}

/// Sub-type of a chat report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatType {
    /// One-on-one conversation.
    Direct,
    /// Multi-person conversation (split bills live here).
    Group,
    /// A member's expense chat inside a workspace.
    PolicyExpenseChat,
    /// Conversation with oneself; home of tracked expenses.
    SelfDm,
    /// Discussion thread hanging off one audit-log entry.
    Thread,
}

/// Approval workflow position of a ledger report.
///
/// Serialized as the remote's numeric status. The companion state number is
/// kept on [`LedgerReport`] and derived from the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum WorkflowStage {
    Open,
    Submitted,
    Closed,
    Approved,
    Reimbursed,
}

impl WorkflowStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Submitted => "submitted",
            Self::Closed => "closed",
            Self::Approved => "approved",
            Self::Reimbursed => "reimbursed",
        }
    }

    /// `(stateNum, statusNum)` as understood by the remote.
    #[must_use]
    pub const fn nums(self) -> (u8, u8) {
        match self {
            Self::Open => (0, 0),
            Self::Submitted => (1, 1),
            Self::Closed => (2, 2),
            Self::Approved => (2, 3),
            Self::Reimbursed => (2, 4),
        }
    }

    /// Money has left the payer.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Reimbursed)
    }

    /// Validate a workflow move from `self` to `target`.
    ///
    /// Valid transitions:
    /// - `open -> submitted`, `open -> closed`
    /// - `submitted -> approved`, `submitted -> open` (retract)
    /// - `submitted -> reimbursed` (person-to-person only)
    /// - `approved -> submitted` (unapprove), `approved -> reimbursed`,
    ///   `approved -> open` (reopen)
    /// - `closed -> reimbursed`, `closed -> open` (reopen)
    /// - `reimbursed -> approved` (cancel payment)
    /// - `reimbursed -> submitted` (cancel payment, person-to-person only)
    pub fn can_transition_to(
        self,
        target: Self,
        kind: ReportKind,
    ) -> Result<(), InvalidTransition> {
        if self == target {
            return Err(InvalidTransition {
                from: self,
                to: target,
                reason: "no-op transition is not allowed",
            });
        }

        let allowed = match (self, target) {
            (Self::Submitted, Self::Reimbursed) | (Self::Reimbursed, Self::Submitted) => {
                kind == ReportKind::Iou
            }
            pair => matches!(
                pair,
                (Self::Open, Self::Submitted | Self::Closed)
                    | (Self::Submitted, Self::Approved | Self::Open)
                    | (Self::Approved, Self::Submitted | Self::Reimbursed | Self::Open)
                    | (Self::Closed, Self::Reimbursed | Self::Open)
                    | (Self::Reimbursed, Self::Approved)
            ),
        };

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
                reason: "transition not allowed by approval workflow",
            })
        }
    }
}

impl TryFrom<u8> for WorkflowStage {
    type Error = ParseEnumError;

    fn try_from(status: u8) -> Result<Self, Self::Error> {
        match status {
            0 => Ok(Self::Open),
            1 => Ok(Self::Submitted),
            2 => Ok(Self::Closed),
            3 => Ok(Self::Approved),
            4 => Ok(Self::Reimbursed),
            other => Err(ParseEnumError {
                expected: "workflow status",
                got: other.to_string(),
            }),
        }
    }
}

impl From<WorkflowStage> for u8 {
    fn from(stage: WorkflowStage) -> Self {
        stage.nums().1
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "open" => Ok(Self::Open),
            "submitted" => Ok(Self::Submitted),
            "closed" => Ok(Self::Closed),
            "approved" => Ok(Self::Approved),
            "reimbursed" | "paid" => Ok(Self::Reimbursed),
            _ => Err(ParseEnumError {
                expected: "workflow stage",
                got: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "chat" => Ok(Self::Chat),
            "iou" => Ok(Self::Iou),
            "expense" => Ok(Self::Expense),
            "invoice" => Ok(Self::Invoice),
            _ => Err(ParseEnumError {
                expected: "report kind",
                got: s.to_string(),
            }),
        }
    }
}

/// Error returned when a workflow transition is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: WorkflowStage,
    pub to: WorkflowStage,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}: {}", self.from, self.to, self.reason)
    }
}

impl std::error::Error for InvalidTransition {}

/// Membership record of one account in a report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
}

/// A chat, IOU, expense, or invoice report.
///
/// Aggregates are meaningful only on ledger kinds. All four totals use the
/// stored sign convention of the kind (see [`ReportKind::amount_sign`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReport {
    #[serde(rename = "reportID")]
    pub report_id: ReportId,
    #[serde(rename = "type")]
    pub kind: ReportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<ChatType>,
    #[serde(default, rename = "policyID", skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<PolicyId>,
    #[serde(rename = "ownerAccountID")]
    pub owner: AccountId,
    #[serde(
        default,
        rename = "managerID",
        skip_serializing_if = "Option::is_none"
    )]
    pub manager: Option<AccountId>,
    #[serde(default)]
    pub participants: BTreeMap<AccountId, Participant>,
    #[serde(default)]
    pub report_name: String,
    pub currency: Currency,
    #[serde(default)]
    pub total: Amount,
    #[serde(default)]
    pub unheld_total: Amount,
    #[serde(default)]
    pub non_reimbursable_total: Amount,
    #[serde(default)]
    pub unheld_non_reimbursable_total: Amount,
    #[serde(default)]
    pub state_num: u8,
    #[serde(rename = "statusNum")]
    pub stage: WorkflowStage,
    /// For ledgers: the chat that owns them. For threads: the report whose
    /// entry they hang off.
    #[serde(
        default,
        rename = "parentReportID",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_report_id: Option<ReportId>,
    #[serde(
        default,
        rename = "parentReportActionID",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_action_id: Option<ActionId>,
    /// For chats: the ledger currently accepting new requests.
    #[serde(
        default,
        rename = "iouReportID",
        skip_serializing_if = "Option::is_none"
    )]
    pub iou_report_id: Option<ReportId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_outstanding_child_request: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visible_action_created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<PendingAction>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_fields: PendingFields,
}

impl LedgerReport {
    /// Move to `stage`, keeping the companion state number in sync.
    pub fn set_stage(&mut self, stage: WorkflowStage) {
        let (state, _) = stage.nums();
        self.stage = stage;
        self.state_num = state;
    }

    #[must_use]
    pub fn is_pending_delete(&self) -> bool {
        self.pending_action == Some(PendingAction::Delete)
    }

    /// Mark `field` as carrying an unconfirmed value.
    pub fn mark_pending(&mut self, field: &str) {
        if self.pending_action != Some(PendingAction::Add) {
            self.pending_fields
                .insert(field.to_string(), PendingAction::Update);
        }
    }

    #[must_use]
    pub fn is_chat_of(&self, chat_type: ChatType) -> bool {
        self.kind == ReportKind::Chat && self.chat_type == Some(chat_type)
    }

    /// Account ids of every visible participant.
    pub fn member_ids(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.participants
            .iter()
            .filter(|(_, p)| !p.hidden && p.pending_action != Some(PendingAction::Delete))
            .map(|(id, _)| *id)
    }

    /// The account that owes money on this ledger.
    #[must_use]
    pub fn payer(&self) -> Option<AccountId> {
        self.manager
    }
}

/// Client-only flags about a report, stored beside it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    #[serde(default)]
    pub is_optimistic_report: bool,
}
