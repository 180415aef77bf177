//! In-memory fixture shared by the orchestrator unit tests.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use super::request::{CreateRequest, Recipient, create_request};
use super::{Context, Decision, Ineligible, Plan};
use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::MutationError;
use crate::model::ids::SequentialIds;
use crate::model::{
    AccountId, Amount, ApprovalMode, Currency, LedgerReport, PersonalDetails, Policy, PolicyId, PolicyTier,
    Session, Transaction,
};
use crate::store::{CacheKey, Entities, MemoryStore, Store};
use crate::synth::ExpenseDetails;

pub const ALICE: AccountId = AccountId(1);
pub const BOB: AccountId = AccountId(2);
pub const ADMIN: AccountId = AccountId(9);

pub struct Fixture {
    pub store: MemoryStore,
    pub session: Session,
    pub config: EngineConfig,
    ids: SequentialIds,
    now: DateTime<Utc>,
}

impl Fixture {
    pub fn new() -> Self {
        let mut fx = Self {
            store: MemoryStore::new(),
            session: Session::new(ALICE, "alice@example.com"),
            config: EngineConfig::default(),
            ids: SequentialIds::new("id"),
            now: DateTime::from_timestamp_millis(1_714_521_600_000).unwrap_or_default(),
        };
        for (account, login) in [
            (ALICE, "alice@example.com"),
            (BOB, "bob@example.com"),
            (ADMIN, "admin@example.com"),
        ] {
            let details = PersonalDetails {
                account_id: account,
                login: login.to_string(),
                display_name: String::new(),
                is_optimistic: false,
            };
            fx.seed(CacheKey::PersonalDetails(account), &details);
        }
        fx
    }

    /// Act as somebody else from now on.
    pub fn act_as(&mut self, account: AccountId, login: &str) {
        self.session = Session::new(account, login);
    }

    pub fn details(&self, amount: i64) -> ExpenseDetails {
        ExpenseDetails::new(
            amount,
            Currency::usd(),
            NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"),
        )
        .with_merchant("Cafe")
    }

    /// Seed workspace `p1`, owned and administered by [`ADMIN`].
    pub fn workspace(&mut self, tier: PolicyTier) -> Policy {
        let policy = Policy::new(PolicyId::new("p1"), "Acme", ADMIN, tier);
        self.seed(CacheKey::Policy(policy.id.clone()), &policy);
        policy
    }

    /// Workspace `p1` where [`ADMIN`] approves submitted reports.
    pub fn approving_workspace(&mut self, tier: PolicyTier) -> Policy {
        let mut policy = self.workspace(tier);
        policy.approval_mode = ApprovalMode::Basic;
        self.seed(CacheKey::Policy(policy.id.clone()), &policy);
        policy
    }

    pub fn seed<T: Serialize>(&mut self, key: CacheKey, value: &T) {
        self.store
            .seed(key, serde_json::to_value(value).expect("encode"));
    }

    pub fn try_plan(
        &mut self,
        plan: impl FnOnce(&mut Context<'_>) -> Result<Decision, MutationError>,
    ) -> Result<Decision, MutationError> {
        let mut ctx = Context::new(&self.store, &self.session, &self.config, &mut self.ids, self.now);
        let decision = plan(&mut ctx);
        self.now += Duration::seconds(1);
        decision
    }

    pub fn plans(
        &mut self,
        plan: impl FnOnce(&mut Context<'_>) -> Result<Decision, MutationError>,
    ) -> Vec<Plan> {
        match self.try_plan(plan).expect("plan") {
            Decision::Go(plans) => plans,
            Decision::Skip(reason) => panic!("unexpectedly skipped: {reason}"),
        }
    }

    pub fn skipped(
        &mut self,
        plan: impl FnOnce(&mut Context<'_>) -> Result<Decision, MutationError>,
    ) -> Ineligible {
        match self.try_plan(plan).expect("plan") {
            Decision::Skip(reason) => reason,
            Decision::Go(_) => panic!("expected the operation to be skipped"),
        }
    }

    pub fn optimistic(&self, plans: &[Plan]) -> MemoryStore {
        let mut store = self.store.clone();
        for plan in plans {
            store.apply_all(&plan.updates.optimistic);
        }
        store
    }

    pub fn confirmed(&self, plans: &[Plan]) -> MemoryStore {
        let mut store = self.optimistic(plans);
        for plan in plans {
            store.apply_all(&plan.updates.success);
        }
        store
    }

    pub fn rolled_back(&self, plans: &[Plan]) -> MemoryStore {
        let mut store = self.optimistic(plans);
        for plan in plans {
            store.apply_all(&plan.updates.failure);
        }
        store
    }

    /// Apply the plans as if the remote accepted them.
    pub fn confirm(&mut self, plans: &[Plan]) {
        self.store = self.confirmed(plans);
    }

    pub fn assert_rollback_closure(&self, plans: &[Plan]) {
        assert_eq!(
            self.rolled_back(plans).without_annotations(),
            self.store.without_annotations()
        );
    }

    /// Create and confirm a request, returning the stored transaction.
    pub fn request(&mut self, recipient: Recipient, amount: Amount) -> Transaction {
        let params = CreateRequest {
            recipient,
            details: self.details(amount),
        };
        let plans = self.plans(|ctx| create_request(ctx, &params));
        self.confirm(&plans);
        let Command::CreateRequest(payload) = &plans[0].command else {
            panic!("expected a create request");
        };
        self.transaction(&payload.transaction_id)
    }

    pub fn transaction(&self, id: &crate::model::TransactionId) -> Transaction {
        self.store.transaction(id).expect("read").expect("transaction")
    }

    pub fn report_of(&self, txn: &Transaction) -> LedgerReport {
        self.store.ledger(&txn.report_id).expect("ledger")
    }

    /// The single live transaction in `store`.
    pub fn only_transaction(&self, store: &MemoryStore) -> Transaction {
        let mut all = store.live_transactions().expect("read");
        assert_eq!(all.len(), 1, "expected exactly one live transaction");
        all.remove(0)
    }
}

pub fn bob() -> Recipient {
    Recipient::Person {
        login: "bob@example.com".into(),
        account_id: None,
    }
}

pub fn workspace(policy: &Policy) -> Recipient {
    Recipient::Workspace {
        policy_id: policy.id.clone(),
    }
}
