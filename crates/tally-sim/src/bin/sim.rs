#![forbid(unsafe_code)]

use anyhow::Result;
use tally_sim::{CampaignConfig, run_campaign};

fn main() -> Result<()> {
    let report = run_campaign(&CampaignConfig::default())?;

    println!(
        "campaign complete: seeds={} passed={} dispatched={} rollbacks_checked={}",
        report.seeds_run, report.seeds_passed, report.operations_dispatched, report.rollbacks_checked
    );
    if let Some(seed) = report.first_failure {
        anyhow::bail!("seed {seed} violated an invariant; replay it with `tl sim replay {seed}`");
    }
    Ok(())
}
