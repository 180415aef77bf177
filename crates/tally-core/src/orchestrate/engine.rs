//! The engine: runs orchestrators and hands their plans to a dispatcher.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, info_span};

use super::convert::ConvertTrackedExpense;
use super::delete::DeleteRequest;
use super::duplicates::{MergeDuplicates, ResolveDuplicates};
use super::edit::EditTransaction;
use super::hold::{HoldRequest, UnholdRequest};
use super::request::{CreateRequest, TrackExpense};
use super::split::SplitBill;
use super::workflow::{ApproveReport, PayReport, ReportRef};
use super::{Context, Decision, Ineligible, Outcome, Plan};
use crate::assemble::encode;
use crate::clock::{Clock, SystemClock};
use crate::command::Dispatcher;
use crate::config::EngineConfig;
use crate::error::MutationError;
use crate::model::ids::{RandomIds, RecordingIds, ReplayIds};
use crate::model::{ClientId, IdSource, Session};
use crate::retry::{ErrorAnnotation, Operation, PendingRetry, RetryEnvelope};
use crate::store::{CacheKey, Update};

/// Runs operations for one signed-in user against one dispatcher.
pub struct Engine<D> {
    dispatcher: D,
    session: Session,
    config: EngineConfig,
    ids: Box<dyn IdSource>,
    clock: Box<dyn Clock>,
}

macro_rules! operations {
    ($($(#[$meta:meta])* $method:ident($params:ty) => $variant:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $method(&mut self, params: $params) -> Result<Outcome, MutationError> {
                self.run(Operation::$variant(params))
            }
        )*
    };
}

impl<D: Dispatcher> Engine<D> {
    /// Random ids, the system clock and default configuration.
    pub fn new(dispatcher: D, session: Session) -> Self {
        Self {
            dispatcher,
            session,
            config: EngineConfig::default(),
            ids: Box::new(RandomIds::from_entropy()),
            clock: Box::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_ids(mut self, ids: impl IdSource + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub const fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    pub fn into_dispatcher(self) -> D {
        self.dispatcher
    }

    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Switch the signed-in user.
    pub fn sign_in(&mut self, session: Session) {
        self.session = session;
    }

    /// Plan `operation` and dispatch every resulting command.
    pub fn run(&mut self, operation: Operation) -> Result<Outcome, MutationError> {
        let now = self.clock.now();
        self.execute(operation, Vec::new(), now, None)
    }

    /// Re-invoke a failed operation from its error annotation.
    ///
    /// The reserved ids and the original instant are replayed, so entities
    /// recreated by the retry carry the same ids and timestamps as the first
    /// attempt. Plans whose transaction already reached the cache are not
    /// sent again.
    pub fn retry(&mut self, pending: &PendingRetry) -> Result<Outcome, MutationError> {
        let envelope = &pending.annotation.retry;
        envelope.verify()?;
        self.execute(
            envelope.operation.clone(),
            envelope.reserved_ids.clone(),
            envelope.issued_at,
            Some(pending),
        )
    }

    fn execute(
        &mut self,
        operation: Operation,
        reserved: Vec<ClientId>,
        at: DateTime<Utc>,
        retrying: Option<&PendingRetry>,
    ) -> Result<Outcome, MutationError> {
        let span = info_span!("mutation", op = operation.name(), retry = retrying.is_some());
        let _guard = span.enter();

        let (decision, minted) = {
            let mut replay = ReplayIds::new(reserved, self.ids.as_mut());
            let mut recording = RecordingIds::new(&mut replay);
            let mut ctx = Context::new(
                self.dispatcher.repository(),
                &self.session,
                &self.config,
                &mut recording,
                at,
            );
            let decision = operation.plan(&mut ctx)?;
            (decision, recording.into_minted())
        };

        let mut plans = match decision {
            Decision::Go(plans) => plans,
            Decision::Skip(reason) => {
                info!(%reason, "skipped");
                return Ok(Outcome::Skipped { reason });
            }
        };
        debug!(plans = plans.len(), ids = minted.len(), "planned");

        if retrying.is_some() {
            let repo = self.dispatcher.repository();
            plans.retain(|plan| {
                plan.target
                    .created_transaction()
                    .is_none_or(|id| repo.get(&CacheKey::Transaction(id.clone())).is_none())
            });
        }
        let clear_old = retrying.map(|p| Update::merge(p.key.clone(), stamped(&p.stamp, Value::Null)));
        if plans.is_empty() {
            if let Some(update) = clear_old {
                self.dispatcher.apply_local(&[update]);
            }
            info!("every plan already applied");
            return Ok(Outcome::Skipped {
                reason: Ineligible::AlreadyApplied,
            });
        }

        let envelope = RetryEnvelope::issue(operation, minted, at)?;
        let stamp = at.timestamp_millis().to_string();
        let mut requests = Vec::with_capacity(plans.len());
        for (index, plan) in plans.into_iter().enumerate() {
            let Plan {
                command,
                mut updates,
                target,
            } = plan;
            let annotation = ErrorAnnotation {
                message: command.error_message_key().to_string(),
                retry: envelope.clone(),
            };
            updates.on_failure(target.key(), stamped(&stamp, encode("error annotation", &annotation)?));
            if index == 0 {
                if let Some(update) = &clear_old {
                    updates.optimistic.insert(0, update.clone());
                }
            }
            requests.push(self.dispatcher.dispatch(command, updates));
        }
        info!(requests = requests.len(), "dispatched");
        Ok(Outcome::Dispatched { requests })
    }

    operations! {
        /// Request money from a person or a workspace.
        create_request(CreateRequest) => CreateRequest;
        track_expense(TrackExpense) => TrackExpense;
        convert_tracked_expense(ConvertTrackedExpense) => ConvertTrackedExpense;
        split_bill(SplitBill) => SplitBill;
        edit_transaction(EditTransaction) => EditTransaction;
        delete_request(DeleteRequest) => DeleteRequest;
        hold_request(HoldRequest) => HoldRequest;
        unhold_request(UnholdRequest) => UnholdRequest;
        submit_report(ReportRef) => SubmitReport;
        approve_report(ApproveReport) => ApproveReport;
        unapprove_report(ReportRef) => UnapproveReport;
        pay_report(PayReport) => PayReport;
        cancel_payment(ReportRef) => CancelPayment;
        retract_report(ReportRef) => RetractReport;
        reopen_report(ReportRef) => ReopenReport;
        merge_duplicates(MergeDuplicates) => MergeDuplicates;
        resolve_duplicates(ResolveDuplicates) => ResolveDuplicates;
    }
}

/// `{ "<stamp>": value }`
fn stamped(stamp: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(stamp.to_string(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::command::{Command, Failure, Outbox, RemoteResult};
    use crate::model::ids::SequentialIds;
    use crate::model::{AccountId, Currency, PersonalDetails};
    use crate::orchestrate::request::Recipient;
    use crate::retry::pending_retries;
    use crate::store::{Entities, MemoryStore, Repository};
    use crate::synth::ExpenseDetails;
    use chrono::NaiveDate;

    fn engine() -> Engine<Outbox<MemoryStore>> {
        let mut store = MemoryStore::new();
        for (account, login) in [(1, "alice@example.com"), (2, "bob@example.com")] {
            let details = PersonalDetails {
                account_id: AccountId(account),
                login: login.to_string(),
                display_name: String::new(),
                is_optimistic: false,
            };
            store.seed(
                CacheKey::PersonalDetails(AccountId(account)),
                serde_json::to_value(details).expect("encode"),
            );
        }
        Engine::new(Outbox::new(store), Session::new(AccountId(1), "alice@example.com"))
            .with_ids(SequentialIds::new("id"))
            .with_clock(ManualClock::at_millis(1_714_521_600_000))
    }

    fn lunch() -> CreateRequest {
        CreateRequest {
            recipient: Recipient::Person {
                login: "bob@example.com".into(),
                account_id: None,
            },
            details: ExpenseDetails::new(
                4250,
                Currency::usd(),
                NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"),
            ),
        }
    }

    #[test]
    fn failure_restores_the_cache_and_leaves_an_annotation() {
        let mut engine = engine();
        let before = engine.dispatcher().store().clone();
        let outcome = engine.create_request(lunch()).expect("run");
        assert_eq!(outcome.requests().len(), 1);

        engine
            .dispatcher_mut()
            .settle_next(&RemoteResult::Failure(Failure::Transport))
            .expect("settled");
        let after = engine.dispatcher().store();
        assert_eq!(after.without_annotations(), before.without_annotations());

        let pending = pending_retries(after);
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0].key, CacheKey::TransactionErrors(_)));
        assert_eq!(pending[0].annotation.message, "iou.error.genericCreateFailureMessage");
    }

    #[test]
    fn retry_replays_the_same_ids() {
        let mut engine = engine();
        engine.create_request(lunch()).expect("run");
        let first = engine.dispatcher().pending().next().expect("in flight").command.clone();
        engine
            .dispatcher_mut()
            .settle_next(&RemoteResult::Failure(Failure::Timeout))
            .expect("settled");

        let pending = pending_retries(engine.dispatcher().store());
        engine.retry(&pending[0]).expect("retry");
        let second = engine.dispatcher().pending().next().expect("in flight").command.clone();
        assert_eq!(first, second);
        engine.dispatcher_mut().settle_next(&RemoteResult::Success).expect("settled");

        let store = engine.dispatcher().store();
        assert!(pending_retries(store).is_empty());
        let Command::CreateRequest(payload) = second else {
            panic!("expected a create request");
        };
        assert!(store.transaction(&payload.transaction_id).expect("read").is_some());
    }

    #[test]
    fn tampered_annotations_are_not_replayed() {
        let mut engine = engine();
        engine.create_request(lunch()).expect("run");
        engine
            .dispatcher_mut()
            .settle_next(&RemoteResult::Failure(Failure::Transport))
            .expect("settled");
        let mut pending = pending_retries(engine.dispatcher().store()).remove(0);
        pending.annotation.retry.reserved_ids.reverse();
        assert!(matches!(
            engine.retry(&pending),
            Err(MutationError::FingerprintMismatch { .. })
        ));
        assert_eq!(engine.dispatcher().in_flight(), 0);
    }

    #[test]
    fn skipped_operations_dispatch_nothing() {
        let mut engine = engine();
        engine.create_request(lunch()).expect("run");
        engine.dispatcher_mut().settle_next(&RemoteResult::Success).expect("settled");
        let txn = engine
            .dispatcher()
            .store()
            .live_transactions()
            .expect("read")
            .remove(0);
        let outcome = engine.unhold_request(UnholdRequest {
            transaction_id: txn.transaction_id,
        });
        assert_eq!(
            outcome.expect("run"),
            Outcome::Skipped {
                reason: Ineligible::NotHeld
            }
        );
        assert_eq!(engine.dispatcher().in_flight(), 0);
    }

    #[test]
    fn retrying_an_applied_create_is_a_no_op() {
        let mut engine = engine();
        engine.create_request(lunch()).expect("run");
        engine
            .dispatcher_mut()
            .settle_next(&RemoteResult::Failure(Failure::Transport))
            .expect("settled");
        let pending = pending_retries(engine.dispatcher().store()).remove(0);
        engine.retry(&pending).expect("retry");
        engine.dispatcher_mut().settle_next(&RemoteResult::Success).expect("settled");

        let again = engine.retry(&pending).expect("retry");
        assert_eq!(
            again,
            Outcome::Skipped {
                reason: Ineligible::AlreadyApplied
            }
        );
        let repo: &dyn Repository = engine.dispatcher().store();
        assert!(pending_retries(repo).is_empty());
    }
}
