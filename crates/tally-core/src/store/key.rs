//! Typed cache keys.
//!
//! Keys are a tagged union of collection and entity id. The string form
//! `<collection>:<id>` exists only at the store boundary ([`CacheKey::format`]
//! and [`CacheKey::parse`]); everything else matches on the enum.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::model::{AccountId, PolicyId, ReportId, TransactionId};

/// A family of keys sharing a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Report,
    ReportActions,
    ReportMetadata,
    Transaction,
    TransactionViolations,
    NextStep,
    Policy,
    PersonalDetails,
    TransactionErrors,
    ReportErrors,
}

impl Collection {
    pub const ALL: [Self; 10] = [
        Self::Report,
        Self::ReportActions,
        Self::ReportMetadata,
        Self::Transaction,
        Self::TransactionViolations,
        Self::NextStep,
        Self::Policy,
        Self::PersonalDetails,
        Self::TransactionErrors,
        Self::ReportErrors,
    ];

    /// Prefix used in the string form.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::ReportActions => "reportActions",
            Self::ReportMetadata => "reportMetadata",
            Self::Transaction => "transaction",
            Self::TransactionViolations => "transactionViolations",
            Self::NextStep => "nextStep",
            Self::Policy => "policy",
            Self::PersonalDetails => "personalDetails",
            Self::TransactionErrors => "transactionErrors",
            Self::ReportErrors => "reportErrors",
        }
    }

    /// Collections that hold error annotations rather than domain state.
    #[must_use]
    pub const fn is_annotation(self) -> bool {
        matches!(self, Self::TransactionErrors | Self::ReportErrors)
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.prefix() == prefix)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    Report(ReportId),
    ReportActions(ReportId),
    ReportMetadata(ReportId),
    Transaction(TransactionId),
    TransactionViolations(TransactionId),
    NextStep(ReportId),
    Policy(PolicyId),
    PersonalDetails(AccountId),
    TransactionErrors(TransactionId),
    ReportErrors(ReportId),
}

/// Error returned for a malformed or unknown key string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized cache key '{0}'")]
pub struct UnknownKey(pub String);

impl CacheKey {
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Report(_) => Collection::Report,
            Self::ReportActions(_) => Collection::ReportActions,
            Self::ReportMetadata(_) => Collection::ReportMetadata,
            Self::Transaction(_) => Collection::Transaction,
            Self::TransactionViolations(_) => Collection::TransactionViolations,
            Self::NextStep(_) => Collection::NextStep,
            Self::Policy(_) => Collection::Policy,
            Self::PersonalDetails(_) => Collection::PersonalDetails,
            Self::TransactionErrors(_) => Collection::TransactionErrors,
            Self::ReportErrors(_) => Collection::ReportErrors,
        }
    }

    /// Raw entity id part of the key.
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Report(id)
            | Self::ReportActions(id)
            | Self::ReportMetadata(id)
            | Self::NextStep(id)
            | Self::ReportErrors(id) => id.to_string(),
            Self::Transaction(id)
            | Self::TransactionViolations(id)
            | Self::TransactionErrors(id) => id.to_string(),
            Self::Policy(id) => id.to_string(),
            Self::PersonalDetails(id) => id.to_string(),
        }
    }

    /// Wire form: `<collection>:<id>`.
    #[must_use]
    pub fn format(&self) -> String {
        format!("{}:{}", self.collection().prefix(), self.id())
    }

    /// Inverse of [`CacheKey::format`].
    pub fn parse(raw: &str) -> Result<Self, UnknownKey> {
        let unknown = || UnknownKey(raw.to_string());
        let (prefix, id) = raw.split_once(':').ok_or_else(unknown)?;
        if id.is_empty() {
            return Err(unknown());
        }
        let key = match Collection::from_prefix(prefix).ok_or_else(unknown)? {
            Collection::Report => Self::Report(ReportId::new(id)),
            Collection::ReportActions => Self::ReportActions(ReportId::new(id)),
            Collection::ReportMetadata => Self::ReportMetadata(ReportId::new(id)),
            Collection::Transaction => Self::Transaction(TransactionId::new(id)),
            Collection::TransactionViolations => Self::TransactionViolations(TransactionId::new(id)),
            Collection::NextStep => Self::NextStep(ReportId::new(id)),
            Collection::Policy => Self::Policy(PolicyId::new(id)),
            Collection::PersonalDetails => {
                let account = id.parse::<u64>().map_err(|_| unknown())?;
                Self::PersonalDetails(AccountId(account))
            }
            Collection::TransactionErrors => Self::TransactionErrors(TransactionId::new(id)),
            Collection::ReportErrors => Self::ReportErrors(ReportId::new(id)),
        };
        Ok(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

impl FromStr for CacheKey {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CacheKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for CacheKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
