//! Domain entities.
//!
//! Everything here is plain data plus small pure helpers. Entities are
//! serialized with the remote's camelCase field names because the cache
//! stores exactly what the remote would send back.

pub mod action;
pub mod ids;
pub mod money;
pub mod next_step;
pub mod policy;
pub mod report;
pub mod session;
pub mod split;
pub mod transaction;
pub mod violation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

pub use action::{ActionLog, ActionPayload, AuditLogEntry, FieldChange, IouType, PaymentType};
pub use ids::{AccountId, ActionId, ClientId, IdSource, PolicyId, ReportId, ServerId, TransactionId};
pub use money::{Amount, Currency, MAX_AMOUNT};
pub use next_step::NextStep;
pub use policy::{ApprovalMode, AutoReporting, Policy, PolicyTier};
pub use report::{ChatType, LedgerReport, ReportKind, ReportMetadata, WorkflowStage};
pub use session::{PersonalDetails, Session};
pub use split::Split;
pub use transaction::{Receipt, ReceiptState, Transaction};
pub use violation::{Violation, ViolationName};

/// Unconfirmed change carried by an entity or one of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingAction {
    Add,
    Update,
    Delete,
}

impl PendingAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(ParseEnumError {
                expected: "pending action",
                got: s.to_string(),
            }),
        }
    }
}

/// Field name → pending change. Committed fields are absent.
pub type PendingFields = BTreeMap<String, PendingAction>;

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_action_json_and_text_agree() {
        for value in [PendingAction::Add, PendingAction::Update, PendingAction::Delete] {
            let json = serde_json::to_string(&value).expect("serialize");
            assert_eq!(json, format!("\"{value}\""));
            assert_eq!(value.to_string().parse::<PendingAction>(), Ok(value));
        }
        assert!("remove".parse::<PendingAction>().is_err());
    }

    #[test]
    fn parse_error_names_the_domain() {
        let err = "nope".parse::<PendingAction>().expect_err("should fail");
        assert_eq!(err.to_string(), "invalid pending action: 'nope'");
    }
}
