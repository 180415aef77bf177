//! tally-sim: deterministic simulation campaigns for the tally engine.
//!
//! A [`Simulator`] drives a seeded stream of random operations through an
//! engine whose remote accepts or rejects each command by a weighted coin.
//! Oracles check rollback closure after fully rejected operations and
//! aggregate conservation whenever nothing is in flight.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for return types.
//! - **Logging**: `tracing` macros.

pub mod campaign;
pub mod oracle;
pub mod rng;
pub mod simulator;
pub mod workload;

pub use campaign::{CampaignConfig, CampaignReport, run_campaign};
pub use simulator::{SimulationConfig, SimulationResult, Simulator};
