//! `tl sim`: deterministic simulation campaigns.
//!
//! `tl sim run` executes many seeds; `tl sim replay` reruns one seed with its
//! full trace.

use std::io::Write;
use std::process;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use tally_sim::campaign::{CampaignConfig, replay_seed, run_campaign};
use tally_sim::simulator::{Counters, TraceEvent, TraceOutcome};

use crate::output::{OutputMode, pretty_kv, pretty_section};

/// Failures listed before the output is truncated.
const FAILURE_SAMPLES: usize = 5;

#[derive(Args, Debug)]
pub struct SimArgs {
    #[command(subcommand)]
    pub command: SimCommand,
}

#[derive(Subcommand, Debug)]
pub enum SimCommand {
    #[command(
        about = "Run a simulation campaign across many seeds",
        long_about = "Drive random operations through the engine against a remote that\n\
                      rejects a share of commands. Checks rollback closure and aggregate\n\
                      conservation for every seed and names the first failing seed.",
        after_help = "EXAMPLES:\n    # Run 100 seeds with defaults\n    tl sim run --seeds 100\n\n\
                      # Heavier workload, more rejections\n    tl sim run --seeds 200 --steps 120 --failure-percent 40\n\n\
                      # Batch commands with a reliable remote\n    tl sim run --failure-percent 0 --max-in-flight 4\n\n\
                      # Machine-readable output\n    tl sim run --seeds 100 --format json"
    )]
    Run(SimRunArgs),

    #[command(
        about = "Replay a single seed with its trace",
        long_about = "Rerun one seed with the same parameters and print every step,\n\
                      oracle result and violation. Use after a campaign failure.",
        after_help = "EXAMPLES:\n    # Replay seed 42\n    tl sim replay 42\n\n\
                      # Replay with the campaign's parameters\n    tl sim replay 42 --steps 120 --failure-percent 40\n\n\
                      # Machine-readable output\n    tl sim replay 42 --format json"
    )]
    Replay(SimReplayArgs),
}

/// Parameters every seed shares.
#[derive(Args, Debug, Clone)]
pub struct SimParams {
    /// Operations attempted per seed.
    #[arg(long, default_value = "60")]
    pub steps: u64,

    /// Simulated members besides the workspace admin.
    #[arg(long, default_value = "3")]
    pub members: usize,

    /// Chance that the remote rejects a command, in percent.
    #[arg(long, default_value = "20")]
    pub failure_percent: u8,

    /// Commands in flight before the remote answers. Above 1 needs
    /// `--failure-percent 0`.
    #[arg(long, default_value = "1")]
    pub max_in_flight: usize,
}

#[derive(Args, Debug)]
pub struct SimRunArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    pub seeds: u64,

    #[arg(long, default_value = "0")]
    pub seed_start: u64,

    #[command(flatten)]
    pub params: SimParams,
}

#[derive(Args, Debug)]
pub struct SimReplayArgs {
    /// Seed to replay.
    pub seed: u64,

    #[command(flatten)]
    pub params: SimParams,
}

#[derive(Debug, Serialize)]
struct RunOutput {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    first_failure: Option<u64>,
    operations_dispatched: usize,
    commands_rejected: usize,
    rollbacks_checked: usize,
    all_passed: bool,
    failures: Vec<FailureOutput>,
}

#[derive(Debug, Serialize)]
struct FailureOutput {
    seed: u64,
    violations: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    seed: u64,
    oracle_passed: bool,
    violations: Vec<String>,
    counters: Counters,
    final_keys: usize,
    trace: &'a [TraceEvent],
}

fn campaign_config(seed_start: u64, seeds: u64, params: &SimParams) -> CampaignConfig {
    CampaignConfig {
        seed_range: seed_start..seed_start.saturating_add(seeds),
        steps: params.steps,
        members: params.members,
        failure_percent: params.failure_percent,
        max_in_flight: params.max_in_flight,
    }
}

fn replay_hint(seed: u64, params: &SimParams) -> String {
    format!(
        "tl sim replay {seed} --steps {} --members {} --failure-percent {} --max-in-flight {}",
        params.steps, params.members, params.failure_percent, params.max_in_flight
    )
}

fn outcome_text(outcome: &TraceOutcome) -> String {
    match outcome {
        TraceOutcome::Dispatched { requests } => format!("dispatched requests={requests}"),
        TraceOutcome::Skipped { reason } => format!("skipped reason=\"{reason}\""),
        TraceOutcome::Invalid { code, error } => format!("invalid code={code} error=\"{error}\""),
        TraceOutcome::Settled { accepted, rejected } => {
            format!("settled accepted={accepted} rejected={rejected}")
        }
    }
}

/// Execute `tl sim run`. Exits with status 1 when any seed fails.
///
/// # Errors
///
/// Returns an error if the parameters are invalid or a seed hits an internal
/// engine error.
pub fn run_sim_run(args: &SimRunArgs, output: OutputMode) -> Result<()> {
    let config = campaign_config(args.seed_start, args.seeds, &args.params);
    let report = run_campaign(&config)?;

    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        first_failure: report.first_failure,
        operations_dispatched: report.operations_dispatched,
        commands_rejected: report.commands_rejected,
        rollbacks_checked: report.rollbacks_checked,
        all_passed: report.all_passed(),
        failures: report
            .failures
            .iter()
            .map(|f| FailureOutput {
                seed: f.seed,
                violations: f.violations.clone(),
            })
            .collect(),
    };

    let stdout = std::io::stdout();
    let mut w = stdout.lock();
    match output {
        OutputMode::Json => {
            writeln!(w, "{}", serde_json::to_string_pretty(&out)?)?;
        }
        OutputMode::Text => {
            writeln!(
                w,
                "campaign seeds_run={} steps={} members={} failure_pct={} max_in_flight={}",
                out.seeds_run,
                args.params.steps,
                args.params.members,
                args.params.failure_percent,
                args.params.max_in_flight
            )?;
            writeln!(
                w,
                "results passed={} failed={} dispatched={} rejected={} rollbacks_checked={} all_passed={}",
                out.seeds_passed,
                out.seeds_failed,
                out.operations_dispatched,
                out.commands_rejected,
                out.rollbacks_checked,
                out.all_passed
            )?;
            for failure in out.failures.iter().take(FAILURE_SAMPLES) {
                writeln!(
                    w,
                    "failure seed={} violations={}",
                    failure.seed,
                    failure.violations.len()
                )?;
            }
            if out.failures.len() > FAILURE_SAMPLES {
                writeln!(w, "failures_truncated count={}", out.failures.len() - FAILURE_SAMPLES)?;
            }
            if let Some(seed) = out.first_failure {
                writeln!(w, "hint replay_seed={seed}")?;
            }
        }
        OutputMode::Pretty => {
            pretty_section(&mut w, "Simulation Campaign")?;
            pretty_kv(&mut w, "Seeds", out.seeds_run.to_string())?;
            pretty_kv(&mut w, "Steps", args.params.steps.to_string())?;
            pretty_kv(&mut w, "Members", args.params.members.to_string())?;
            pretty_kv(&mut w, "Rejections", format!("{}%", args.params.failure_percent))?;
            pretty_kv(&mut w, "In flight", args.params.max_in_flight.to_string())?;
            pretty_kv(
                &mut w,
                "Results",
                format!("{} passed / {} failed", out.seeds_passed, out.seeds_failed),
            )?;
            pretty_kv(
                &mut w,
                "Exercised",
                format!(
                    "{} dispatched, {} rejected, {} rollbacks checked",
                    out.operations_dispatched, out.commands_rejected, out.rollbacks_checked
                ),
            )?;

            if let Some(seed) = out.first_failure {
                pretty_kv(
                    &mut w,
                    "Status",
                    format!("{} failures (first at seed {seed})", out.seeds_failed),
                )?;
                writeln!(w)?;
                pretty_section(&mut w, "Failure Samples")?;
                for failure in out.failures.iter().take(FAILURE_SAMPLES) {
                    writeln!(w, "seed {:<8} violations={}", failure.seed, failure.violations.len())?;
                    for violation in &failure.violations {
                        writeln!(w, "  - {violation}")?;
                    }
                }
                if out.failures.len() > FAILURE_SAMPLES {
                    writeln!(w, "... and {} more failures", out.failures.len() - FAILURE_SAMPLES)?;
                }
                writeln!(w)?;
                pretty_kv(&mut w, "Replay", replay_hint(seed, &args.params))?;
            } else {
                pretty_kv(&mut w, "Status", "all seeds passed")?;
            }
        }
    }
    w.flush()?;
    drop(w);

    if !out.all_passed {
        process::exit(1);
    }
    Ok(())
}

/// Execute `tl sim replay`. Exits with status 1 when an oracle fails.
///
/// # Errors
///
/// Returns an error if the parameters are invalid or the run hits an
/// internal engine error.
pub fn run_sim_replay(args: &SimReplayArgs, output: OutputMode) -> Result<()> {
    let config = campaign_config(args.seed, 1, &args.params);
    let result = replay_seed(args.seed, &config)?;

    let out = ReplayOutput {
        seed: result.seed,
        oracle_passed: result.oracle.passed,
        violations: result.oracle.violations.iter().map(ToString::to_string).collect(),
        counters: result.counters,
        final_keys: result.final_state.len(),
        trace: &result.trace,
    };

    let stdout = std::io::stdout();
    let mut w = stdout.lock();
    match output {
        OutputMode::Json => {
            writeln!(w, "{}", serde_json::to_string_pretty(&out)?)?;
        }
        OutputMode::Text => {
            writeln!(
                w,
                "replay seed={} oracle_passed={} dispatched={} skipped={} invalid={} accepted={} rejected={} final_keys={}",
                out.seed,
                out.oracle_passed,
                out.counters.dispatched,
                out.counters.skipped,
                out.counters.invalid,
                out.counters.accepted,
                out.counters.rejected,
                out.final_keys
            )?;
            for event in out.trace {
                writeln!(
                    w,
                    "step={} actor={} op={} {}",
                    event.step,
                    event.actor,
                    event.operation,
                    outcome_text(&event.outcome)
                )?;
            }
            for violation in &out.violations {
                writeln!(w, "violation={violation}")?;
            }
        }
        OutputMode::Pretty => {
            pretty_section(&mut w, &format!("Replay Seed {}", out.seed))?;
            pretty_kv(&mut w, "Dispatched", out.counters.dispatched.to_string())?;
            pretty_kv(&mut w, "Skipped", out.counters.skipped.to_string())?;
            pretty_kv(&mut w, "Invalid", out.counters.invalid.to_string())?;
            pretty_kv(
                &mut w,
                "Settled",
                format!("{} accepted / {} rejected", out.counters.accepted, out.counters.rejected),
            )?;
            pretty_kv(&mut w, "Rollbacks", out.counters.rollbacks_checked.to_string())?;
            pretty_kv(&mut w, "Final keys", out.final_keys.to_string())?;
            pretty_kv(&mut w, "Oracle", out.oracle_passed.to_string())?;
            writeln!(w)?;
            pretty_section(&mut w, "Trace")?;
            for event in out.trace {
                writeln!(
                    w,
                    "{:>4}  user {:<5} {:<24} {}",
                    event.step,
                    event.actor,
                    event.operation,
                    outcome_text(&event.outcome)
                )?;
            }
            if !out.oracle_passed {
                writeln!(w)?;
                pretty_section(&mut w, "Violations")?;
                for violation in &out.violations {
                    writeln!(w, "  - {violation}")?;
                }
            }
        }
    }
    w.flush()?;
    drop(w);

    if !out.oracle_passed {
        process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SimParams {
        SimParams {
            steps: 30,
            members: 3,
            failure_percent: 20,
            max_in_flight: 1,
        }
    }

    #[test]
    fn seed_range_starts_at_the_offset() {
        let config = campaign_config(10, 5, &params());
        assert_eq!(config.seed_range, 10..15);
        assert_eq!(config.steps, 30);
    }

    #[test]
    fn seed_range_saturates() {
        let config = campaign_config(u64::MAX - 1, 5, &params());
        assert_eq!(config.seed_range.end, u64::MAX);
    }

    #[test]
    fn replay_hint_repeats_the_parameters() {
        let hint = replay_hint(7, &params());
        assert!(hint.starts_with("tl sim replay 7"));
        assert!(hint.contains("--failure-percent 20"));
    }

    #[test]
    fn outcomes_render_as_key_values() {
        let text = outcome_text(&TraceOutcome::Settled {
            accepted: 1,
            rejected: 2,
        });
        assert_eq!(text, "settled accepted=1 rejected=2");
    }
}
