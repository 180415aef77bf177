//! One seeded run: random operations through an engine and an outbox whose
//! remote accepts or rejects each command by a coin flip.

use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Context as _, Result, bail};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::clock::ManualClock;
use tally_core::command::{Failure, Outbox, RemoteResult};
use tally_core::model::ids::RandomIds;
use tally_core::model::{ApprovalMode, Policy, PolicyTier, Session};
use tally_core::store::{CacheKey, MemoryStore};
use tally_core::{Engine, ErrorCode, MutationError, Outcome};
use tracing::{debug, info};

use crate::oracle::{OracleResult, check_aggregates, check_rollback};
use crate::rng::DeterministicRng;
use crate::workload::{Action, Cast, next_action};

const START_MILLIS: i64 = 1_714_521_600_000;

/// Parameters of one seeded run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Operations attempted.
    pub steps: u64,
    /// Members besides the workspace administrator.
    pub members: usize,
    /// Chance that the remote rejects a command (percent, 0-100).
    pub failure_percent: u8,
    /// Commands allowed in flight before the remote answers.
    pub max_in_flight: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            steps: 60,
            members: 3,
            failure_percent: 20,
            max_in_flight: 1,
        }
    }
}

impl SimulationConfig {
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            bail!("steps must be > 0");
        }
        if self.members < 2 {
            bail!("members must be >= 2");
        }
        if self.max_in_flight == 0 {
            bail!("max_in_flight must be > 0");
        }
        if self.failure_percent > 100 {
            bail!("failure_percent must be <= 100");
        }
        // A rollback restores the pre-operation values of the keys it
        // touched, which overwrites any later in-flight writes to them.
        if self.failure_percent > 0 && self.max_in_flight > 1 {
            bail!("failure_percent > 0 requires max_in_flight = 1");
        }
        Ok(())
    }
}

/// What happened at one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceOutcome {
    Dispatched { requests: usize },
    Skipped { reason: String },
    Invalid { code: &'static str, error: String },
    Settled { accepted: usize, rejected: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEvent {
    pub step: u64,
    pub actor: u64,
    pub operation: &'static str,
    pub outcome: TraceOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub dispatched: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Operations whose every command failed, so closure was checked.
    pub rollbacks_checked: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationResult {
    pub seed: u64,
    pub trace: Vec<TraceEvent>,
    pub counters: Counters,
    pub oracle: OracleResult,
    /// The cache after the final drain, in wire form.
    pub final_state: BTreeMap<String, Value>,
}

pub struct Simulator {
    config: SimulationConfig,
    rng: DeterministicRng,
    cast: Cast,
    clock: Rc<ManualClock>,
    engine: Engine<Outbox<MemoryStore>>,
}

/// Cache corruption means the engine broke, not the operation.
const fn is_internal(error: &MutationError) -> bool {
    matches!(
        error.code(),
        ErrorCode::CorruptCacheValue | ErrorCode::EncodeFailed | ErrorCode::UnknownCacheKey
    )
}

fn seeded_store(cast: &Cast) -> Result<MemoryStore> {
    let mut store = MemoryStore::new();
    for person in cast.everyone() {
        store.seed(
            CacheKey::PersonalDetails(person.account_id),
            serde_json::to_value(person.details()).context("encode personal details")?,
        );
    }
    let mut policy = Policy::new(cast.policy_id.clone(), "Simulated", cast.admin.account_id, PolicyTier::Collect);
    policy.approval_mode = ApprovalMode::Basic;
    store.seed(
        CacheKey::Policy(policy.id.clone()),
        serde_json::to_value(&policy).context("encode policy")?,
    );
    Ok(store)
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let cast = Cast::new(config.members);
        let clock = Rc::new(ManualClock::at_millis(START_MILLIS));
        let store = seeded_store(&cast)?;
        let first = cast.members.first().cloned().context("no members")?;
        let engine = Engine::new(Outbox::new(store), first)
            .with_ids(RandomIds::seeded(config.seed))
            .with_clock(Rc::clone(&clock));
        Ok(Self {
            rng: DeterministicRng::new(config.seed),
            config,
            cast,
            clock,
            engine,
        })
    }

    fn pick_actor(&mut self) -> Session {
        let everyone: Vec<&Session> = self.cast.everyone().collect();
        self.rng
            .pick(&everyone)
            .map_or_else(|| self.cast.admin.clone(), |s| (*s).clone())
    }

    /// Answer every command in flight. Returns (accepted, rejected).
    fn settle(&mut self, failure_percent: u8) -> (usize, usize) {
        let rng = &mut self.rng;
        let mut accepted = 0;
        let mut rejected = 0;
        self.engine.dispatcher_mut().settle_all(|_| {
            if rng.hit_rate_percent(failure_percent) {
                rejected += 1;
                RemoteResult::Failure(Failure::Transport)
            } else {
                accepted += 1;
                RemoteResult::Success
            }
        });
        (accepted, rejected)
    }

    /// Run every step, drain the outbox, and report.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine reports a corrupt cache.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let mut trace = Vec::new();
        let mut counters = Counters::default();
        let mut oracle = OracleResult::pass();

        for step in 0..self.config.steps {
            self.clock.advance(Duration::seconds(1));
            let actor = self.pick_actor();
            self.engine.sign_in(actor.clone());

            let idle = self.engine.dispatcher().in_flight() == 0;
            let before = idle.then(|| self.engine.dispatcher().store().clone());
            let action = next_action(&mut self.rng, self.engine.dispatcher().store(), &self.cast, &actor)
                .with_context(|| format!("step {step}: choosing an action"))?;
            let operation = action.name();
            let result = match &action {
                Action::Run(op) => self.engine.run(op.clone()),
                Action::Retry(pending) => self.engine.retry(pending),
            };
            let outcome = match result {
                Ok(Outcome::Dispatched { requests }) => {
                    counters.dispatched += 1;
                    TraceOutcome::Dispatched {
                        requests: requests.len(),
                    }
                }
                Ok(Outcome::Skipped { reason }) => {
                    counters.skipped += 1;
                    TraceOutcome::Skipped {
                        reason: reason.to_string(),
                    }
                }
                Err(error) if is_internal(&error) => {
                    return Err(error).with_context(|| format!("step {step}: {operation}"));
                }
                Err(error) => {
                    counters.invalid += 1;
                    TraceOutcome::Invalid {
                        code: error.code().code(),
                        error: error.to_string(),
                    }
                }
            };
            debug!(step, operation, ?outcome, "step");
            trace.push(TraceEvent {
                step,
                actor: actor.account_id.0,
                operation,
                outcome,
            });

            if self.engine.dispatcher().in_flight() >= self.config.max_in_flight {
                let (accepted, rejected) = self.settle(self.config.failure_percent);
                counters.accepted += accepted;
                counters.rejected += rejected;
                trace.push(TraceEvent {
                    step,
                    actor: actor.account_id.0,
                    operation,
                    outcome: TraceOutcome::Settled { accepted, rejected },
                });
                if let Some(before) = before.filter(|_| accepted == 0 && rejected > 0) {
                    counters.rollbacks_checked += 1;
                    oracle.absorb(check_rollback(
                        step,
                        operation,
                        &before,
                        self.engine.dispatcher().store(),
                    ));
                }
            }
            if self.engine.dispatcher().in_flight() == 0 {
                oracle.absorb(check_aggregates(step, self.engine.dispatcher().store())?);
            }
        }

        let (accepted, rejected) = self.settle(self.config.failure_percent);
        counters.accepted += accepted;
        counters.rejected += rejected;
        oracle.absorb(check_aggregates(self.config.steps, self.engine.dispatcher().store())?);

        info!(
            seed = self.config.seed,
            dispatched = counters.dispatched,
            rejected = counters.rejected,
            passed = oracle.passed,
            "simulation finished"
        );
        Ok(SimulationResult {
            seed: self.config.seed,
            trace,
            counters,
            oracle,
            final_state: self.engine.dispatcher().store().to_wire(),
        })
    }
}
