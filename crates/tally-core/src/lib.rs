//! tally-core: optimistic mutations over a client-side expense ledger cache.
//!
//! Every user-facing operation is planned against the current cache and
//! turned into a remote [`Command`](command::Command) plus three update
//! phases: optimistic (applied now), success and failure (one of which is
//! applied when the remote answers). Applying optimistic then failure
//! restores the cache exactly, apart from the error annotation that offers
//! a retry.
//!
//! # Layout
//!
//! - [`model`]: entities, identifiers, workflow lattice, violations
//! - [`store`]: cache keys, the [`Repository`](store::Repository) boundary,
//!   [`UpdateSet`](store::UpdateSet) and the in-memory store
//! - [`synth`]: builders for new entities
//! - [`recalc`]: report aggregate recomputation
//! - [`assemble`]: turns before/after entities into update phases
//! - [`orchestrate`]: one planner per operation, and the [`Engine`]
//! - [`command`]: remote commands and the dispatcher boundary
//! - [`retry`]: retry envelopes and error annotations
//!
//! # Conventions
//!
//! - **Errors**: library code returns [`MutationError`]; ineligibility is an
//!   [`Outcome`], not an error.
//! - **Logging**: `tracing` macros; each operation runs in a `mutation` span.

pub mod assemble;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod model;
pub mod orchestrate;
pub mod recalc;
pub mod retry;
pub mod store;
pub mod synth;

pub use error::{ErrorCode, MutationError};
pub use orchestrate::{Engine, Ineligible, Outcome};
