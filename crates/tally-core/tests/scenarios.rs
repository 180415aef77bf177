//! End-to-end scenarios through the engine and an in-process outbox.
//!
//! Each test drives operations the way a client would: run, look at the
//! optimistic cache, then settle the remote and look again.

use tally_core::command::{Command, Failure, RemoteResult};
use tally_core::model::violation::{Severity, ViolationData};
use tally_core::model::{
    ActionPayload, ChatType, IouType, ReportKind, TransactionId, Violation, ViolationName,
    WorkflowStage,
};
use tally_core::orchestrate::duplicates::MergeDuplicates;
use tally_core::orchestrate::edit::TransactionEdit;
use tally_core::orchestrate::hold::HoldRequest;
use tally_core::orchestrate::request::{CreateRequest, TrackExpense};
use tally_core::orchestrate::workflow::{ApproveReport, PayReport, ReportRef};
use tally_core::retry::pending_retries;
use tally_core::store::{CacheKey, Entities, MemoryStore, Repository};
use tally_core::{Ineligible, Outcome};

use world::*;

fn violations(store: &MemoryStore, id: &TransactionId) -> Vec<Violation> {
    let stored: Option<Vec<Violation>> = store
        .load(&CacheKey::TransactionViolations(id.clone()))
        .expect("read");
    stored.unwrap_or_default()
}

#[test]
fn workspace_request_builds_chat_report_and_audit_trail() {
    let mut world = World::new();
    let policy = world.workspace();
    let before = world.store().clone();

    world
        .engine
        .create_request(CreateRequest {
            recipient: workspace(&policy),
            details: World::details(4250),
        })
        .expect("create request");
    let Some(Command::CreateRequest(payload)) = world.in_flight().pop() else {
        panic!("expected a create request in flight");
    };

    let store = world.store();
    let chat = store
        .report(&payload.chat_report_id)
        .expect("read")
        .expect("chat");
    assert!(chat.is_chat_of(ChatType::PolicyExpenseChat));
    assert_eq!(chat.policy_id.as_ref(), Some(&policy.id));
    assert_eq!(chat.iou_report_id.as_ref(), Some(&payload.report_id));

    let report = store.ledger(&payload.report_id).expect("ledger");
    assert_eq!(report.kind, ReportKind::Expense);
    assert_eq!(report.total, -4250);
    let txn = store
        .transaction(&payload.transaction_id)
        .expect("read")
        .expect("transaction");
    assert_eq!(txn.amount, -4250);

    let log = store.actions(&payload.report_id).expect("log");
    let created = log
        .values()
        .find(|e| matches!(e.original_message, ActionPayload::Created))
        .expect("created entry");
    let iou = log
        .values()
        .find(|e| e.is_request_for(&payload.transaction_id))
        .expect("request entry");
    assert!(matches!(
        iou.original_message,
        ActionPayload::Iou {
            iou_type: IouType::Create,
            amount: 4250,
            ..
        }
    ));
    assert!(created.created < iou.created);
    assert!(
        store
            .actions(&payload.chat_report_id)
            .expect("chat log")
            .values()
            .any(|e| e.is_preview_of(&payload.report_id))
    );

    assert_eq!(world.reject_all(), 1);
    let after = world.store();
    assert_eq!(after.without_annotations(), before.without_annotations());
    let pending = pending_retries(after);
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].key,
        CacheKey::TransactionErrors(payload.transaction_id.clone())
    );
}

#[test]
fn partial_approval_leaves_held_money_on_a_new_report() {
    let mut world = World::new();
    let policy = world.workspace();
    let kept = world.request(workspace(&policy), 10_000 - 3000);
    let disputed = world.request(workspace(&policy), 3000);
    assert_eq!(kept.report_id, disputed.report_id);

    world
        .engine
        .hold_request(HoldRequest {
            transaction_id: disputed.transaction_id.clone(),
            reason: "which client?".into(),
        })
        .expect("hold");
    world
        .engine
        .submit_report(ReportRef {
            report_id: kept.report_id.clone(),
        })
        .expect("submit");
    assert_eq!(world.accept_all(), 2);
    world.tick();

    world.act_as(ADMIN, "admin@example.com");
    world
        .engine
        .approve_report(ApproveReport {
            report_id: kept.report_id.clone(),
            full: false,
        })
        .expect("approve");
    let Some(Command::ApproveReport(payload)) = world.in_flight().pop() else {
        panic!("expected an approval in flight");
    };
    let sibling_id = payload.moved_to_report_id.clone().expect("new report");
    assert_eq!(payload.amount, 7000);
    world.accept_all();

    let store = world.store();
    let original = store.ledger(&kept.report_id).expect("ledger");
    assert_eq!(original.stage, WorkflowStage::Approved);
    assert_eq!((original.total, original.unheld_total), (-7000, -7000));
    let sibling = store.ledger(&sibling_id).expect("ledger");
    assert_eq!(sibling.stage, WorkflowStage::Open);
    assert_eq!(sibling.total, -3000);
    assert_eq!(world.transaction(&disputed.transaction_id).report_id, sibling_id);
    assert!(pending_retries(store).is_empty());
}

#[test]
fn merging_three_duplicates_keeps_one() {
    let mut world = World::new();
    let policy = world.workspace();
    let group: Vec<_> = (0..3)
        .map(|_| world.request(workspace(&policy), 2000))
        .collect();
    assert_eq!(world.report_of(&group[0]).total, -6000);

    world
        .engine
        .track_expense(TrackExpense {
            details: World::details(2000),
        })
        .expect("track");
    let Some(Command::TrackExpense(tracked)) = world.in_flight().pop() else {
        panic!("expected a tracked expense in flight");
    };
    world.accept_all();
    let stray = world.transaction(&tracked.transaction_id);

    let ids: Vec<TransactionId> = group.iter().map(|t| t.transaction_id.clone()).collect();
    for txn in group.iter().chain([&stray]) {
        let mut flagged = world.transaction(&txn.transaction_id);
        flagged.duplicates = if txn.transaction_id == stray.transaction_id {
            vec![ids[0].clone()]
        } else {
            ids.iter()
                .filter(|id| **id != txn.transaction_id)
                .cloned()
                .collect()
        };
        let marker = Violation {
            name: ViolationName::DuplicatedTransaction,
            severity: Severity::Warning,
            data: ViolationData {
                duplicates: flagged.duplicates.clone(),
                limit: None,
            },
        };
        world.seed(CacheKey::Transaction(txn.transaction_id.clone()), &flagged);
        world.seed(
            CacheKey::TransactionViolations(txn.transaction_id.clone()),
            &vec![marker],
        );
    }

    let outcome = world
        .engine
        .merge_duplicates(MergeDuplicates {
            transaction_id: ids[0].clone(),
            transaction_ids: ids[1..].to_vec(),
            edit: TransactionEdit::default(),
        })
        .expect("merge");
    assert_eq!(outcome.requests().len(), 1);
    world.accept_all();

    let store = world.store();
    assert_eq!(store.ledger(&group[0].report_id).expect("ledger").total, -2000);
    for id in &ids[1..] {
        assert!(store.transaction(id).expect("read").is_none());
    }
    assert!(world.transaction(&ids[0]).duplicates.is_empty());
    assert!(world.transaction(&stray.transaction_id).duplicates.is_empty());
    for id in ids.iter().chain([&stray.transaction_id]) {
        assert!(
            violations(store, id)
                .iter()
                .all(|v| v.name != ViolationName::DuplicatedTransaction),
            "duplicate marker left on {id}"
        );
    }
}

#[test]
fn a_rejected_hold_can_be_retried() {
    let mut world = World::new();
    let txn = world.request(bob(), 2500);
    world
        .engine
        .hold_request(HoldRequest {
            transaction_id: txn.transaction_id.clone(),
            reason: "receipt?".into(),
        })
        .expect("hold");
    world
        .engine
        .dispatcher_mut()
        .settle_next(&RemoteResult::Failure(Failure::Rejected("busy".into())))
        .expect("settled");
    assert!(!world.transaction(&txn.transaction_id).is_held());

    let pending = pending_retries(world.store());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].annotation.retry.operation.name(), "hold_request");
    world.tick();
    world.engine.retry(&pending[0]).expect("retry");
    world.accept_all();

    assert!(world.transaction(&txn.transaction_id).is_held());
    let repo: &dyn Repository = world.store();
    assert!(pending_retries(repo).is_empty());
}

#[test]
fn paying_settles_and_blocks_further_edits() {
    let mut world = World::new();
    let txn = world.request(bob(), 2500);
    world.act_as(BOB, "bob@example.com");
    world
        .engine
        .pay_report(PayReport {
            report_id: txn.report_id.clone(),
            payment_type: tally_core::model::PaymentType::Elsewhere,
            full: true,
        })
        .expect("pay");
    world.accept_all();
    world.tick();
    assert_eq!(world.report_of(&txn).stage, WorkflowStage::Reimbursed);

    world.act_as(ALICE, "alice@example.com");
    let outcome = world
        .engine
        .hold_request(HoldRequest {
            transaction_id: txn.transaction_id.clone(),
            reason: "late".into(),
        })
        .expect("hold");
    assert!(matches!(
        outcome,
        Outcome::Skipped {
            reason: Ineligible::WrongStage { .. }
        }
    ));
    assert_eq!(world.engine.dispatcher().in_flight(), 0);
}
