//! `tl run`: play a scenario file through the engine against an in-memory
//! cache and print what it did.
//!
//! A scenario names the signed-in user, seeds the cache, and lists steps.
//! Operation steps go through the engine; `accept` and `reject` answer
//! every command in flight, as the remote would.
//!
//! ```json
//! {
//!   "actor": { "accountID": 1, "login": "alice@example.com" },
//!   "people": [{ "accountID": 2, "login": "bob@example.com" }],
//!   "steps": [
//!     { "step": "run", "operation": { "op": "create_request", ... } },
//!     { "step": "reject", "reason": "card declined" },
//!     { "step": "retry_all" },
//!     { "step": "accept" }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tally_core::clock::{Clock, ManualClock};
use tally_core::command::{Failure, Outbox, RemoteResult, RequestId};
use tally_core::config::load_engine_config;
use tally_core::model::ids::SequentialIds;
use tally_core::model::{AccountId, Policy, Session};
use tally_core::retry::{Operation, pending_retries};
use tally_core::store::{CacheKey, MemoryStore};
use tally_core::{Engine, MutationError, Outcome};
use tracing::{debug, info, warn};

use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

/// Arguments for `tl run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Scenario file (JSON).
    pub scenario: PathBuf,

    /// Stop at the first operation the engine refuses.
    #[arg(long)]
    pub strict: bool,

    /// Accept whatever is still in flight after the last step.
    #[arg(long)]
    pub drain: bool,

    /// Only print cache entries whose key starts with this prefix.
    #[arg(long, value_name = "PREFIX")]
    pub keys: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Signed in when the scenario starts.
    pub actor: Session,
    #[serde(default)]
    pub people: Vec<Session>,
    #[serde(default)]
    pub policies: Vec<Policy>,
    /// Raw entries in wire form, `<collection>:<id>` → value.
    #[serde(default)]
    pub cache: BTreeMap<String, Value>,
    #[serde(default = "default_start")]
    pub start: DateTime<Utc>,
    pub steps: Vec<Step>,
}

fn default_start() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_714_521_600_000).unwrap_or_default()
}

const fn one_second() -> i64 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Run one operation, optionally as someone else.
    Run {
        #[serde(default, rename = "as")]
        actor: Option<AccountId>,
        operation: Operation,
    },
    /// The remote confirms every command in flight.
    Accept,
    /// The remote refuses every command in flight.
    Reject {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Retry every failed operation still annotated in the cache.
    RetryAll,
    Tick {
        #[serde(default = "one_second")]
        seconds: i64,
    },
}

impl Step {
    const fn name(&self) -> &'static str {
        match self {
            Self::Run { .. } => "run",
            Self::Accept => "accept",
            Self::Reject { .. } => "reject",
            Self::RetryAll => "retry_all",
            Self::Tick { .. } => "tick",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum StepResult {
    Dispatched {
        operation: &'static str,
        requests: Vec<RequestId>,
    },
    Skipped {
        operation: &'static str,
        reason: String,
    },
    Failed {
        operation: &'static str,
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<&'static str>,
    },
    Settled {
        accepted: usize,
        rejected: usize,
    },
    Retried {
        attempted: usize,
        dispatched: usize,
    },
    Ticked {
        now: DateTime<Utc>,
    },
}

#[derive(Debug, Serialize)]
struct StepReport {
    index: usize,
    step: &'static str,
    #[serde(flatten)]
    result: StepResult,
}

#[derive(Debug, Serialize)]
struct RetryOutput {
    key: String,
    stamp: String,
    message: String,
    operation: &'static str,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    steps: Vec<StepReport>,
    in_flight: usize,
    pending_retries: Vec<RetryOutput>,
    cache: BTreeMap<String, Value>,
}

/// Build the starting cache from a scenario's people, policies and raw
/// entries. Raw entries go last so they can override the rest.
fn seed_store(scenario: &Scenario) -> Result<MemoryStore> {
    let mut store = MemoryStore::new();
    for person in std::iter::once(&scenario.actor).chain(&scenario.people) {
        store.seed(
            CacheKey::PersonalDetails(person.account_id),
            serde_json::to_value(person.details()).context("encode personal details")?,
        );
    }
    for policy in &scenario.policies {
        store.seed(
            CacheKey::Policy(policy.id.clone()),
            serde_json::to_value(policy).context("encode policy")?,
        );
    }
    for (raw, value) in &scenario.cache {
        let key: CacheKey = raw.parse()?;
        store.seed(key, value.clone());
    }
    Ok(store)
}

fn find_person(scenario: &Scenario, account: AccountId) -> Result<Session> {
    std::iter::once(&scenario.actor)
        .chain(&scenario.people)
        .find(|s| s.account_id == account)
        .cloned()
        .with_context(|| format!("account {account} is not in the scenario's people"))
}

fn outcome_result(operation: &'static str, result: Result<Outcome, MutationError>) -> StepResult {
    match result {
        Ok(Outcome::Dispatched { requests }) => StepResult::Dispatched { operation, requests },
        Ok(Outcome::Skipped { reason }) => StepResult::Skipped {
            operation,
            reason: reason.to_string(),
        },
        Err(error) => {
            let code = error.code();
            StepResult::Failed {
                operation,
                code: code.code(),
                message: error.to_string(),
                hint: code.hint(),
            }
        }
    }
}

fn settle(engine: &mut Engine<Outbox<MemoryStore>>, result: &RemoteResult) -> StepResult {
    let settled = engine.dispatcher_mut().settle_all(|_| result.clone());
    let (accepted, rejected) = match result {
        RemoteResult::Success => (settled, 0),
        RemoteResult::Failure(_) => (0, settled),
    };
    StepResult::Settled { accepted, rejected }
}

fn play(scenario: &Scenario, args: &RunArgs, project_root: &Path) -> Result<RunOutput> {
    let config = load_engine_config(project_root)?;
    let clock = Rc::new(ManualClock::new(scenario.start));
    let mut engine = Engine::new(Outbox::new(seed_store(scenario)?), scenario.actor.clone())
        .with_config(config)
        .with_ids(SequentialIds::new("local"))
        .with_clock(Rc::clone(&clock));

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let result = match step {
            Step::Run { actor, operation } => {
                let session = match actor {
                    Some(account) => find_person(scenario, *account)?,
                    None => scenario.actor.clone(),
                };
                engine.sign_in(session);
                let result = outcome_result(operation.name(), engine.run(operation.clone()));
                if let StepResult::Failed { operation, message, .. } = &result {
                    if args.strict {
                        bail!("step {index} ({operation}) failed: {message}");
                    }
                    warn!(index, operation, %message, "operation refused");
                }
                result
            }
            Step::Accept => settle(&mut engine, &RemoteResult::Success),
            Step::Reject { reason } => {
                let failure = reason
                    .clone()
                    .map_or(Failure::Transport, Failure::Rejected);
                settle(&mut engine, &RemoteResult::Failure(failure))
            }
            Step::RetryAll => {
                let pending = pending_retries(engine.dispatcher().store());
                let mut dispatched = 0;
                for retry in &pending {
                    let outcome = engine.retry(retry)?;
                    if matches!(outcome, Outcome::Dispatched { .. }) {
                        dispatched += 1;
                    }
                }
                StepResult::Retried {
                    attempted: pending.len(),
                    dispatched,
                }
            }
            Step::Tick { seconds } => {
                clock.advance(Duration::seconds(*seconds));
                StepResult::Ticked { now: clock.now() }
            }
        };
        debug!(index, step = step.name(), ?result, "step");
        steps.push(StepReport {
            index,
            step: step.name(),
            result,
        });
    }

    if args.drain {
        engine
            .dispatcher_mut()
            .settle_all(|_| RemoteResult::Success);
    }

    let store = engine.dispatcher().store();
    let pending_retries = pending_retries(store)
        .into_iter()
        .map(|p| RetryOutput {
            key: p.key.to_string(),
            stamp: p.stamp,
            operation: p.annotation.retry.operation.name(),
            message: p.annotation.message,
        })
        .collect();
    let cache = store
        .to_wire()
        .into_iter()
        .filter(|(key, _)| args.keys.as_deref().is_none_or(|prefix| key.starts_with(prefix)))
        .collect();

    Ok(RunOutput {
        steps,
        in_flight: engine.dispatcher().in_flight(),
        pending_retries,
        cache,
    })
}

/// Load a scenario file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid scenario.
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn step_line(report: &StepReport) -> String {
    let head = format!("step={} kind={}", report.index, report.step);
    match &report.result {
        StepResult::Dispatched { operation, requests } => {
            format!("{head} op={operation} result=dispatched requests={}", requests.len())
        }
        StepResult::Skipped { operation, reason } => {
            format!("{head} op={operation} result=skipped reason=\"{reason}\"")
        }
        StepResult::Failed { operation, code, message, .. } => {
            format!("{head} op={operation} result=failed code={code} message=\"{message}\"")
        }
        StepResult::Settled { accepted, rejected } => {
            format!("{head} accepted={accepted} rejected={rejected}")
        }
        StepResult::Retried { attempted, dispatched } => {
            format!("{head} attempted={attempted} dispatched={dispatched}")
        }
        StepResult::Ticked { now } => format!("{head} now={}", now.to_rfc3339()),
    }
}

fn render_text(out: &RunOutput, w: &mut dyn Write) -> std::io::Result<()> {
    for step in &out.steps {
        writeln!(w, "{}", step_line(step))?;
    }
    writeln!(
        w,
        "in_flight={} pending_retries={} keys={}",
        out.in_flight,
        out.pending_retries.len(),
        out.cache.len()
    )?;
    for retry in &out.pending_retries {
        writeln!(
            w,
            "retry key={} op={} message={}",
            retry.key, retry.operation, retry.message
        )?;
    }
    for (key, value) in &out.cache {
        writeln!(w, "{key} {value}")?;
    }
    Ok(())
}

fn render_pretty(out: &RunOutput, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, "Steps")?;
    for step in &out.steps {
        writeln!(w, "  {}", step_line(step))?;
    }
    writeln!(w)?;
    pretty_section(w, "Outbox")?;
    pretty_kv(w, "In flight", out.in_flight.to_string())?;
    pretty_kv(w, "Retries", out.pending_retries.len().to_string())?;
    for retry in &out.pending_retries {
        writeln!(w, "  {} {} ({})", retry.key, retry.operation, retry.message)?;
    }
    writeln!(w)?;
    pretty_section(w, "Cache")?;
    for (key, value) in &out.cache {
        let body = serde_json::to_string_pretty(value).unwrap_or_default();
        writeln!(w, "{key}")?;
        for line in body.lines() {
            writeln!(w, "  {line}")?;
        }
    }
    Ok(())
}

/// Execute `tl run`.
///
/// # Errors
///
/// Returns an error if the scenario cannot be loaded, the project config is
/// invalid, or `--strict` is set and an operation is refused.
pub fn run_scenario(args: &RunArgs, output: OutputMode, project_root: &Path) -> Result<()> {
    let scenario = load_scenario(&args.scenario)?;
    info!(
        path = %args.scenario.display(),
        steps = scenario.steps.len(),
        "running scenario"
    );
    let out = play(&scenario, args, project_root)?;
    render_mode(output, &out, render_text, render_pretty)
}
