//! Remote commands and the dispatcher boundary.
//!
//! A [`Command`] is what the remote service receives: a name plus a
//! denormalized payload that carries every client-minted id and amount the
//! remote needs to reproduce the mutation without reading anything back.
//! The [`Dispatcher`] applies the optimistic phase before returning and
//! later applies exactly one of the success or failure phases.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::{info, warn};

use crate::error::ErrorCode;
use crate::model::{
    AccountId, ActionId, Amount, Currency, PaymentType, PolicyId, ReportId, Split, TransactionId,
};
use crate::store::{Repository, Store, Update, UpdateSet};
use crate::synth::ExpenseDetails;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A new money movement: request, tracked expense, conversion or split share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    #[serde(rename = "transactionID")]
    pub transaction_id: TransactionId,
    #[serde(rename = "reportID")]
    pub report_id: ReportId,
    #[serde(rename = "chatReportID")]
    pub chat_report_id: ReportId,
    #[serde(rename = "reportActionID")]
    pub action_id: ActionId,
    #[serde(rename = "createdChatReportActionID", default, skip_serializing_if = "Option::is_none")]
    pub created_chat_action_id: Option<ActionId>,
    #[serde(rename = "createdReportActionID", default, skip_serializing_if = "Option::is_none")]
    pub created_report_action_id: Option<ActionId>,
    #[serde(rename = "reportPreviewReportActionID", default, skip_serializing_if = "Option::is_none")]
    pub preview_action_id: Option<ActionId>,
    #[serde(rename = "transactionThreadReportID")]
    pub thread_report_id: ReportId,
    #[serde(rename = "trackedReportActionID", default, skip_serializing_if = "Option::is_none")]
    pub tracked_action_id: Option<ActionId>,
    #[serde(rename = "payerAccountID")]
    pub payer: AccountId,
    #[serde(rename = "payeeAccountID")]
    pub payee: AccountId,
    #[serde(rename = "policyID", default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<PolicyId>,
    #[serde(flatten)]
    pub details: ExpenseDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPayload {
    #[serde(rename = "transactionID")]
    pub transaction_id: TransactionId,
    #[serde(rename = "chatReportID")]
    pub chat_report_id: ReportId,
    #[serde(rename = "reportActionID")]
    pub action_id: ActionId,
    #[serde(rename = "createdChatReportActionID", default, skip_serializing_if = "Option::is_none")]
    pub created_chat_action_id: Option<ActionId>,
    pub splits: Vec<Split>,
    #[serde(flatten)]
    pub details: ExpenseDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditPayload {
    #[serde(rename = "transactionID")]
    pub transaction_id: TransactionId,
    #[serde(rename = "reportID")]
    pub report_id: ReportId,
    #[serde(rename = "reportActionID", default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
    /// Wire field name → new value.
    pub changes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    #[serde(rename = "transactionID")]
    pub transaction_id: TransactionId,
    #[serde(rename = "reportID")]
    pub report_id: ReportId,
    #[serde(rename = "reportActionID", default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<ActionId>,
    #[serde(default)]
    pub delete_report: bool,
    #[serde(rename = "deleteThreadReportID", default, skip_serializing_if = "Option::is_none")]
    pub delete_thread_id: Option<ReportId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldPayload {
    #[serde(rename = "transactionID")]
    pub transaction_id: TransactionId,
    #[serde(rename = "reportActionID")]
    pub action_id: ActionId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,
}

/// A workflow move on one ledger report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPayload {
    #[serde(rename = "reportID")]
    pub report_id: ReportId,
    #[serde(rename = "reportActionID")]
    pub action_id: ActionId,
    pub amount: Amount,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<PaymentType>,
    /// New report receiving the held transactions of a partial move.
    #[serde(rename = "optimisticReportID", default, skip_serializing_if = "Option::is_none")]
    pub moved_to_report_id: Option<ReportId>,
    #[serde(rename = "optimisticCreatedReportActionID", default, skip_serializing_if = "Option::is_none")]
    pub moved_created_action_id: Option<ActionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatesPayload {
    #[serde(rename = "transactionID")]
    pub transaction_id: TransactionId,
    #[serde(rename = "transactionIDList")]
    pub transaction_ids: Vec<TransactionId>,
    #[serde(rename = "reportActionID")]
    pub action_id: ActionId,
    /// Hold entries created for the kept-but-held duplicates.
    #[serde(rename = "holdReportActionIDs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hold_action_ids: BTreeMap<TransactionId, ActionId>,
    /// Field values chosen for the kept transaction.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changes: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "params")]
pub enum Command {
    CreateRequest(RequestPayload),
    TrackExpense(RequestPayload),
    ConvertTrackedExpense(RequestPayload),
    SplitBill(SplitPayload),
    SplitShare(RequestPayload),
    UpdateRequest(EditPayload),
    DeleteRequest(DeletePayload),
    HoldRequest(HoldPayload),
    UnholdRequest(HoldPayload),
    SubmitReport(WorkflowPayload),
    ApproveReport(WorkflowPayload),
    UnapproveReport(WorkflowPayload),
    PayReport(WorkflowPayload),
    CancelPayment(WorkflowPayload),
    RetractReport(WorkflowPayload),
    ReopenReport(WorkflowPayload),
    MergeDuplicates(DuplicatesPayload),
    ResolveDuplicates(DuplicatesPayload),
}

impl Command {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRequest(_) => "CreateRequest",
            Self::TrackExpense(_) => "TrackExpense",
            Self::ConvertTrackedExpense(_) => "ConvertTrackedExpense",
            Self::SplitBill(_) => "SplitBill",
            Self::SplitShare(_) => "SplitShare",
            Self::UpdateRequest(_) => "UpdateRequest",
            Self::DeleteRequest(_) => "DeleteRequest",
            Self::HoldRequest(_) => "HoldRequest",
            Self::UnholdRequest(_) => "UnholdRequest",
            Self::SubmitReport(_) => "SubmitReport",
            Self::ApproveReport(_) => "ApproveReport",
            Self::UnapproveReport(_) => "UnapproveReport",
            Self::PayReport(_) => "PayReport",
            Self::CancelPayment(_) => "CancelPayment",
            Self::RetractReport(_) => "RetractReport",
            Self::ReopenReport(_) => "ReopenReport",
            Self::MergeDuplicates(_) => "MergeDuplicates",
            Self::ResolveDuplicates(_) => "ResolveDuplicates",
        }
    }

    /// Localizable message key shown beside the entity when this command fails.
    #[must_use]
    pub const fn error_message_key(&self) -> &'static str {
        match self {
            Self::CreateRequest(_) | Self::SplitShare(_) => "iou.error.genericCreateFailureMessage",
            Self::TrackExpense(_) | Self::ConvertTrackedExpense(_) => {
                "iou.error.genericTrackFailureMessage"
            }
            Self::SplitBill(_) => "iou.error.genericSplitFailureMessage",
            Self::UpdateRequest(_) | Self::MergeDuplicates(_) | Self::ResolveDuplicates(_) => {
                "iou.error.genericEditFailureMessage"
            }
            Self::DeleteRequest(_) => "iou.error.genericDeleteFailureMessage",
            Self::HoldRequest(_) | Self::UnholdRequest(_) => "iou.error.genericHoldFailureMessage",
            Self::PayReport(_) | Self::CancelPayment(_) => "iou.error.genericPayFailureMessage",
            Self::SubmitReport(_)
            | Self::ApproveReport(_)
            | Self::UnapproveReport(_)
            | Self::RetractReport(_)
            | Self::ReopenReport(_) => "iou.error.genericWorkflowFailureMessage",
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Handle of one dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A command in flight, with the phases still to be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub id: RequestId,
    pub command: Command,
    pub updates: UpdateSet,
}

/// Why the remote did not accept a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Failure {
    Transport,
    Rejected(String),
    Timeout,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => f.write_str("transport failure"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
            Self::Timeout => f.write_str("timed out"),
        }
    }
}

/// Outcome of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteResult {
    Success,
    Failure(Failure),
}

/// The remote command transport as seen by orchestrators.
pub trait Dispatcher {
    /// The cache the dispatcher writes to.
    fn repository(&self) -> &dyn Repository;

    /// Apply `updates.optimistic` now and queue the command with the
    /// remaining phases.
    fn dispatch(&mut self, command: Command, updates: UpdateSet) -> RequestId;

    /// Apply client-only bookkeeping that needs no remote round trip.
    fn apply_local(&mut self, updates: &[Update]);
}

/// Error returned when settling a request that is not in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no request {0} is in flight")]
pub struct UnknownRequest(pub RequestId);

impl UnknownRequest {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::UnknownRequest
    }
}

/// In-process dispatcher: writes to a [`Store`] and holds commands until
/// told how the remote answered.
#[derive(Debug, Clone, Default)]
pub struct Outbox<S> {
    store: S,
    queue: VecDeque<RemoteRequest>,
    next_id: u64,
}

impl<S: Store> Outbox<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            queue: VecDeque::new(),
            next_id: 1,
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Writes that arrive from outside the engine, such as server pushes.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Requests still awaiting a result, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &RemoteRequest> {
        self.queue.iter()
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Apply the phase matching `result` for request `id`.
    pub fn settle(&mut self, id: RequestId, result: &RemoteResult) -> Result<(), UnknownRequest> {
        let index = self
            .queue
            .iter()
            .position(|r| r.id == id)
            .ok_or(UnknownRequest(id))?;
        let Some(request) = self.queue.remove(index) else {
            return Err(UnknownRequest(id));
        };
        match result {
            RemoteResult::Success => {
                info!(request = %id, command = request.command.name(), "remote accepted");
                self.store.apply_all(&request.updates.success);
            }
            RemoteResult::Failure(failure) => {
                warn!(request = %id, command = request.command.name(), %failure, "remote failed; rolling back");
                self.store.apply_all(&request.updates.failure);
            }
        }
        Ok(())
    }

    /// Settle the oldest request in flight, if any.
    pub fn settle_next(&mut self, result: &RemoteResult) -> Option<RequestId> {
        let id = self.queue.front()?.id;
        self.settle(id, result).ok()?;
        Some(id)
    }

    /// Settle every request in flight, oldest first, asking `decide` for
    /// each result.
    pub fn settle_all(&mut self, mut decide: impl FnMut(&RemoteRequest) -> RemoteResult) -> usize {
        let mut settled = 0;
        while let Some(request) = self.queue.front() {
            let id = request.id;
            let result = decide(request);
            if self.settle(id, &result).is_err() {
                break;
            }
            settled += 1;
        }
        settled
    }
}

impl<S: Store> Dispatcher for Outbox<S> {
    fn repository(&self) -> &dyn Repository {
        &self.store
    }

    fn dispatch(&mut self, command: Command, updates: UpdateSet) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.store.apply_all(&updates.optimistic);
        info!(
            request = %id,
            command = command.name(),
            keys = updates.touched_keys().len(),
            "dispatched"
        );
        self.queue.push_back(RemoteRequest {
            id,
            command,
            updates,
        });
        id
    }

    fn apply_local(&mut self, updates: &[Update]) {
        self.store.apply_all(updates);
    }
}
