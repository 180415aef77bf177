//! Identifier types.
//!
//! Every entity created by an orchestrator gets its identifier on the client,
//! before the remote service has seen it. The remote side accepts the
//! client-chosen value, so the two never need to be reconciled by rewriting
//! keys. That contract is made explicit here:
//!
//! - [`ClientId`] is a freshly minted identifier that has not been
//!   acknowledged yet.
//! - [`ServerId`] is an identifier the remote service knows about.
//! - [`ClientId::adopt`] is the single place where one becomes the other.
//!
//! Typed entity identifiers ([`ReportId`], [`TransactionId`], [`ActionId`],
//! [`PolicyId`]) can be built from either and are what the rest of the crate
//! passes around. The distinction only matters at the repository boundary.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// ClientId / ServerId
// ---------------------------------------------------------------------------

/// An identifier minted locally for an entity the remote has not confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap a raw identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The remote service accepted this identifier verbatim.
    #[must_use]
    pub fn adopt(self) -> ServerId {
        ServerId(self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An identifier known to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Wrap an identifier read back from the store or the remote.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Typed entity identifiers
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier read from the store.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<ClientId> for $name {
            fn from(id: ClientId) -> Self {
                Self(id.0)
            }
        }

        impl From<ServerId> for $name {
            fn from(id: ServerId) -> Self {
                Self(id.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of any report (chat, IOU, expense, invoice).
    ReportId
);
entity_id!(
    /// Identifier of a transaction.
    TransactionId
);
entity_id!(
    /// Identifier of an audit-log entry.
    ActionId
);
entity_id!(
    /// Identifier of a workspace policy.
    PolicyId
);

/// Report id carried by transactions that do not belong to any report yet.
const UNREPORTED_REPORT_ID: &str = "0";

/// Report id carried by the shared parent transaction of a split.
const SPLIT_REPORT_ID: &str = "-2";

impl ReportId {
    /// Sentinel used by tracked expenses that live outside any ledger report.
    #[must_use]
    pub fn unreported() -> Self {
        Self(UNREPORTED_REPORT_ID.to_string())
    }

    /// Sentinel used by the parent transaction of a split.
    #[must_use]
    pub fn split_parent() -> Self {
        Self(SPLIT_REPORT_ID.to_string())
    }

    /// True for either sentinel: the id points at no real report.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.0 == UNREPORTED_REPORT_ID || self.0 == SPLIT_REPORT_ID
    }
}

/// Numeric account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl AccountId {
    /// Deterministic placeholder account for a login the cache has never seen.
    ///
    /// Derived from the normalized login so that two mutations naming the
    /// same invitee agree on the placeholder without coordination. The top
    /// bit is cleared to stay clear of the signed range used by the remote.
    #[must_use]
    pub fn optimistic_for(login: &str) -> Self {
        let normalized = login.trim().to_ascii_lowercase();
        let digest = blake3::hash(normalized.as_bytes());
        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(&digest.as_bytes()[..8]);
        Self(u64::from_le_bytes(bytes) & 0x7FFF_FFFF_FFFF_FFFF)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifier sources
// ---------------------------------------------------------------------------

/// Source of fresh client identifiers.
pub trait IdSource {
    /// Mint a new, globally unique client identifier.
    fn mint(&mut self) -> ClientId;
}

/// Random 63-bit numeric identifiers, the production source.
#[derive(Debug)]
pub struct RandomIds {
    rng: StdRng,
}

impl RandomIds {
    /// Seed from the operating system.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seed deterministically (simulation and tests).
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl IdSource for RandomIds {
    fn mint(&mut self) -> ClientId {
        let raw: u64 = self.rng.r#gen::<u64>() & 0x7FFF_FFFF_FFFF_FFFF;
        ClientId(raw.to_string())
    }
}

/// Monotonic identifiers with a readable prefix (`t1`, `t2`, ...).
#[derive(Debug, Clone)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl IdSource for SequentialIds {
    fn mint(&mut self) -> ClientId {
        let id = ClientId(format!("{}{}", self.prefix, self.next));
        self.next = self.next.saturating_add(1);
        id
    }
}

/// Hands out previously reserved identifiers first, then falls back.
///
/// Used when re-invoking an operation from a retry envelope: the second
/// attempt reuses the identifiers of the first, which keeps the remote
/// command idempotent.
pub struct ReplayIds<'a> {
    reserved: VecDeque<ClientId>,
    fallback: &'a mut dyn IdSource,
}

impl<'a> ReplayIds<'a> {
    pub fn new(reserved: impl IntoIterator<Item = ClientId>, fallback: &'a mut dyn IdSource) -> Self {
        Self {
            reserved: reserved.into_iter().collect(),
            fallback,
        }
    }
}

impl IdSource for ReplayIds<'_> {
    fn mint(&mut self) -> ClientId {
        self.reserved
            .pop_front()
            .unwrap_or_else(|| self.fallback.mint())
    }
}

/// Records every identifier minted through it.
pub struct RecordingIds<'a> {
    inner: &'a mut dyn IdSource,
    minted: Vec<ClientId>,
}

impl<'a> RecordingIds<'a> {
    pub fn new(inner: &'a mut dyn IdSource) -> Self {
        Self {
            inner,
            minted: Vec::new(),
        }
    }

    /// Identifiers minted so far, in order.
    #[must_use]
    pub fn into_minted(self) -> Vec<ClientId> {
        self.minted
    }
}

impl IdSource for RecordingIds<'_> {
    fn mint(&mut self) -> ClientId {
        let id = self.inner.mint();
        self.minted.push(id.clone());
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_ids_are_prefixed_and_monotonic() {
        let mut ids = SequentialIds::new("t");
        assert_eq!(ids.mint().as_str(), "t1");
        assert_eq!(ids.mint().as_str(), "t2");
    }

    #[test]
    fn seeded_random_ids_are_reproducible() {
        let mut a = RandomIds::seeded(7);
        let mut b = RandomIds::seeded(7);
        assert_eq!(a.mint(), b.mint());
        assert_eq!(a.mint(), b.mint());
    }

    #[test]
    fn replay_serves_reserved_before_fallback() {
        let mut fallback = SequentialIds::new("f");
        let mut replay = ReplayIds::new(
            [ClientId::new("r1"), ClientId::new("r2")],
            &mut fallback,
        );
        assert_eq!(replay.mint().as_str(), "r1");
        assert_eq!(replay.mint().as_str(), "r2");
        assert_eq!(replay.mint().as_str(), "f1");
    }

    #[test]
    fn recording_captures_minted_order() {
        let mut inner = SequentialIds::new("x");
        let mut rec = RecordingIds::new(&mut inner);
        rec.mint();
        rec.mint();
        let minted = rec.into_minted();
        assert_eq!(minted, vec![ClientId::new("x1"), ClientId::new("x2")]);
    }

    #[test]
    fn adopt_keeps_the_raw_value() {
        let client = ClientId::new("12345");
        let server = client.adopt();
        assert_eq!(server.as_str(), "12345");
        assert_eq!(ReportId::from(server).as_str(), "12345");
    }

    #[test]
    fn optimistic_account_is_stable_and_case_insensitive() {
        let a = AccountId::optimistic_for("Bob@Example.com");
        let b = AccountId::optimistic_for(" bob@example.com ");
        assert_eq!(a, b);
        assert!(a.0 <= 0x7FFF_FFFF_FFFF_FFFF);
    }

    #[test]
    fn sentinels_are_recognized() {
        assert!(ReportId::unreported().is_sentinel());
        assert!(ReportId::split_parent().is_sentinel());
        assert!(!ReportId::new("42").is_sentinel());
    }
}
