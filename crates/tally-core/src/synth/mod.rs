//! Entity synthesizers.
//!
//! Pure constructors for entities created on the client. They never read
//! the cache: callers pass in the snapshots and freshly minted ids they
//! need. Every synthesized entity starts with `pendingAction: add`.

pub mod action;
pub mod report;
pub mod transaction;

pub use action::{IouEntry, entry, preview};
pub use transaction::{ExpenseDetails, rehomed, transaction};
