//! Retry envelopes.
//!
//! When a command fails, the engine leaves an error annotation on the entity
//! the command was about. The annotation carries a [`RetryEnvelope`]: the
//! operation's input, the client ids it minted, and the instant it first
//! ran. Re-invoking the envelope replays the same ids in the same order, so
//! the remote sees the same entity ids it saw the first time.
//!
//! The envelope is fingerprinted with blake3 over its canonical JSON form.
//! Annotations live in the cache, which other writers share; a fingerprint
//! mismatch means the envelope was edited and must not be replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::assemble::encode;
use crate::error::MutationError;
use crate::model::ClientId;
use crate::orchestrate::convert::{ConvertTrackedExpense, convert_tracked_expense};
use crate::orchestrate::delete::{DeleteRequest, delete_request};
use crate::orchestrate::duplicates::{
    MergeDuplicates, ResolveDuplicates, merge_duplicates, resolve_duplicates,
};
use crate::orchestrate::edit::{EditTransaction, edit_transaction};
use crate::orchestrate::hold::{HoldRequest, UnholdRequest, hold_request, unhold_request};
use crate::orchestrate::request::{CreateRequest, TrackExpense, create_request, track_expense};
use crate::orchestrate::split::{SplitBill, split_bill};
use crate::orchestrate::workflow::{self, ApproveReport, PayReport, ReportRef};
use crate::orchestrate::{Context, Decision};
use crate::store::{CacheKey, Collection, Repository};

/// Every user-facing operation, with its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateRequest(CreateRequest),
    TrackExpense(TrackExpense),
    ConvertTrackedExpense(ConvertTrackedExpense),
    SplitBill(SplitBill),
    EditTransaction(EditTransaction),
    DeleteRequest(DeleteRequest),
    HoldRequest(HoldRequest),
    UnholdRequest(UnholdRequest),
    SubmitReport(ReportRef),
    ApproveReport(ApproveReport),
    UnapproveReport(ReportRef),
    PayReport(PayReport),
    CancelPayment(ReportRef),
    RetractReport(ReportRef),
    ReopenReport(ReportRef),
    MergeDuplicates(MergeDuplicates),
    ResolveDuplicates(ResolveDuplicates),
}

impl Operation {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateRequest(_) => "create_request",
            Self::TrackExpense(_) => "track_expense",
            Self::ConvertTrackedExpense(_) => "convert_tracked_expense",
            Self::SplitBill(_) => "split_bill",
            Self::EditTransaction(_) => "edit_transaction",
            Self::DeleteRequest(_) => "delete_request",
            Self::HoldRequest(_) => "hold_request",
            Self::UnholdRequest(_) => "unhold_request",
            Self::SubmitReport(_) => "submit_report",
            Self::ApproveReport(_) => "approve_report",
            Self::UnapproveReport(_) => "unapprove_report",
            Self::PayReport(_) => "pay_report",
            Self::CancelPayment(_) => "cancel_payment",
            Self::RetractReport(_) => "retract_report",
            Self::ReopenReport(_) => "reopen_report",
            Self::MergeDuplicates(_) => "merge_duplicates",
            Self::ResolveDuplicates(_) => "resolve_duplicates",
        }
    }

    /// Run the matching orchestrator.
    pub fn plan(&self, ctx: &mut Context<'_>) -> Result<Decision, MutationError> {
        match self {
            Self::CreateRequest(p) => create_request(ctx, p),
            Self::TrackExpense(p) => track_expense(ctx, p),
            Self::ConvertTrackedExpense(p) => convert_tracked_expense(ctx, p),
            Self::SplitBill(p) => split_bill(ctx, p),
            Self::EditTransaction(p) => edit_transaction(ctx, p),
            Self::DeleteRequest(p) => delete_request(ctx, p),
            Self::HoldRequest(p) => hold_request(ctx, p),
            Self::UnholdRequest(p) => unhold_request(ctx, p),
            Self::SubmitReport(p) => workflow::submit_report(ctx, p),
            Self::ApproveReport(p) => workflow::approve_report(ctx, p),
            Self::UnapproveReport(p) => workflow::unapprove_report(ctx, p),
            Self::PayReport(p) => workflow::pay_report(ctx, p),
            Self::CancelPayment(p) => workflow::cancel_payment(ctx, p),
            Self::RetractReport(p) => workflow::retract_report(ctx, p),
            Self::ReopenReport(p) => workflow::reopen_report(ctx, p),
            Self::MergeDuplicates(p) => merge_duplicates(ctx, p),
            Self::ResolveDuplicates(p) => resolve_duplicates(ctx, p),
        }
    }
}

/// Everything needed to run an operation again exactly as it first ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEnvelope {
    pub operation: Operation,
    #[serde(rename = "reservedIDs")]
    pub reserved_ids: Vec<ClientId>,
    pub issued_at: DateTime<Utc>,
    pub fingerprint: String,
}

#[derive(Serialize)]
struct Fingerprinted<'a> {
    operation: &'a Operation,
    reserved_ids: &'a [ClientId],
    issued_at: DateTime<Utc>,
}

fn fingerprint(
    operation: &Operation,
    reserved_ids: &[ClientId],
    issued_at: DateTime<Utc>,
) -> Result<String, MutationError> {
    let canonical = encode(
        "retry envelope",
        &Fingerprinted {
            operation,
            reserved_ids,
            issued_at,
        },
    )?;
    Ok(blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string())
}

impl RetryEnvelope {
    pub fn issue(
        operation: Operation,
        reserved_ids: Vec<ClientId>,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, MutationError> {
        let fingerprint = fingerprint(&operation, &reserved_ids, issued_at)?;
        Ok(Self {
            operation,
            reserved_ids,
            issued_at,
            fingerprint,
        })
    }

    /// Fail unless the fingerprint still matches the contents.
    pub fn verify(&self) -> Result<(), MutationError> {
        let actual = fingerprint(&self.operation, &self.reserved_ids, self.issued_at)?;
        if actual == self.fingerprint {
            Ok(())
        } else {
            Err(MutationError::FingerprintMismatch {
                expected: self.fingerprint.clone(),
                actual,
            })
        }
    }
}

/// An error annotation as stored under `transactionErrors:<id>` or
/// `reportErrors:<id>`, keyed by millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAnnotation {
    /// Localizable message key.
    pub message: String,
    pub retry: RetryEnvelope,
}

/// One failed operation waiting for the user to retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    /// Annotation key the failure was recorded under.
    pub key: CacheKey,
    /// Millisecond stamp of the annotation within `key`.
    pub stamp: String,
    pub annotation: ErrorAnnotation,
}

/// Every error annotation in `repo`, oldest first.
///
/// Annotations that do not decode are skipped with a warning; they cannot
/// be retried.
pub fn pending_retries(repo: &dyn Repository) -> Vec<PendingRetry> {
    let mut pending = Vec::new();
    for collection in [Collection::TransactionErrors, Collection::ReportErrors] {
        for (key, value) in repo.collection(collection) {
            let annotations: BTreeMap<String, serde_json::Value> = match serde_json::from_value(value) {
                Ok(map) => map,
                Err(error) => {
                    tracing::warn!(%key, %error, "unreadable error annotation");
                    continue;
                }
            };
            for (stamp, raw) in annotations {
                match serde_json::from_value::<ErrorAnnotation>(raw) {
                    Ok(annotation) => pending.push(PendingRetry {
                        key: key.clone(),
                        stamp,
                        annotation,
                    }),
                    Err(error) => tracing::warn!(%key, %stamp, %error, "unreadable error annotation"),
                }
            }
        }
    }
    pending.sort_by(|a, b| {
        a.annotation
            .retry
            .issued_at
            .cmp(&b.annotation.retry.issued_at)
            .then_with(|| a.key.cmp(&b.key))
    });
    pending
}
