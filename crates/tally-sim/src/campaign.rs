//! Campaign runner: many seeds, one report.
//!
//! Each seed is an independent [`Simulator`] run. The report names the first
//! failing seed so it can be replayed in isolation.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::simulator::{SimulationConfig, SimulationResult, Simulator};

/// Seeds to run and the parameters every seed shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Range of seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    pub steps: u64,
    pub members: usize,
    pub failure_percent: u8,
    pub max_in_flight: usize,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..50,
            steps: sim.steps,
            members: sim.members,
            failure_percent: sim.failure_percent,
            max_in_flight: sim.max_in_flight,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            steps: self.steps,
            members: self.members,
            failure_percent: self.failure_percent,
            max_in_flight: self.max_in_flight,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the seed range is empty or the per-seed
    /// parameters are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        self.sim_config_for_seed(self.seed_range.start).validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    pub operations_dispatched: usize,
    pub commands_rejected: usize,
    pub rollbacks_checked: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run every seed in `config.seed_range`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a run hits an
/// internal engine error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        operations_dispatched: 0,
        commands_rejected: 0,
        rollbacks_checked: 0,
    };
    for seed in config.seed_range.clone() {
        let result = run_single_seed(seed, config)?;
        report.seeds_run += 1;
        report.operations_dispatched += result.counters.dispatched;
        report.commands_rejected += result.counters.rejected;
        report.rollbacks_checked += result.counters.rollbacks_checked;
        if result.oracle.passed {
            report.seeds_passed += 1;
        } else {
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: result.oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }
    Ok(report)
}

/// Run one seed of a campaign.
///
/// # Errors
///
/// Returns an error if the simulation hits an internal engine error.
pub fn run_single_seed(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    Simulator::new(config.sim_config_for_seed(seed))?.run()
}

/// Replay one seed with its full trace.
///
/// # Errors
///
/// Returns an error when validation or the simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    config.validate()?;
    run_single_seed(seed, config)
}
