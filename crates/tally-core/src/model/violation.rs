//! Transaction violations.
//!
//! Violations are derived, never owned: [`compute`] rebuilds the full list
//! for one transaction from its fields and the governing policy, and the
//! caller replaces the stored list wholesale. Two kinds are marker-based and
//! always produced (they reflect state the user set explicitly); the rest
//! are policy rules and only produced when the policy enforces them.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ids::TransactionId;
use super::money::Amount;
use super::policy::Policy;
use super::transaction::Transaction;
use super::{ParseEnumError, normalize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationName {
    Hold,
    DuplicatedTransaction,
    MissingCategory,
    CategoryOutOfPolicy,
    MissingTag,
    TagOutOfPolicy,
    OverLimit,
    ReceiptRequired,
}

impl ViolationName {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::DuplicatedTransaction => "duplicatedTransaction",
            Self::MissingCategory => "missingCategory",
            Self::CategoryOutOfPolicy => "categoryOutOfPolicy",
            Self::MissingTag => "missingTag",
            Self::TagOutOfPolicy => "tagOutOfPolicy",
            Self::OverLimit => "overLimit",
            Self::ReceiptRequired => "receiptRequired",
        }
    }

    /// Produced from markers on the transaction, independent of policy.
    #[must_use]
    pub const fn is_marker(self) -> bool {
        matches!(self, Self::Hold | Self::DuplicatedTransaction)
    }
}

impl fmt::Display for ViolationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationName {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "hold" => Ok(Self::Hold),
            "duplicatedtransaction" => Ok(Self::DuplicatedTransaction),
            "missingcategory" => Ok(Self::MissingCategory),
            "categoryoutofpolicy" => Ok(Self::CategoryOutOfPolicy),
            "missingtag" => Ok(Self::MissingTag),
            "tagoutofpolicy" => Ok(Self::TagOutOfPolicy),
            "overlimit" => Ok(Self::OverLimit),
            "receiptrequired" => Ok(Self::ReceiptRequired),
            _ => Err(ParseEnumError {
                expected: "violation",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Violation,
    Notice,
    Warning,
}

/// Extra data some violations carry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub duplicates: Vec<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<Amount>,
}

impl ViolationData {
    fn is_empty(&self) -> bool {
        self.duplicates.is_empty() && self.limit.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub name: ViolationName,
    #[serde(rename = "type")]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "ViolationData::is_empty")]
    pub data: ViolationData,
}

impl Violation {
    fn plain(name: ViolationName, severity: Severity) -> Self {
        Self {
            name,
            severity,
            data: ViolationData::default(),
        }
    }
}

/// Rebuild the complete violation list for `txn`.
///
/// `enforce_rules` gates the policy-rule violations; marker violations are
/// always included. The result is in [`ViolationName`] declaration order.
#[must_use]
pub fn compute(txn: &Transaction, policy: Option<&Policy>, enforce_rules: bool) -> Vec<Violation> {
    let mut out = Vec::new();

    if txn.is_held() {
        out.push(Violation::plain(ViolationName::Hold, Severity::Violation));
    }
    if !txn.duplicates.is_empty() {
        let mut duplicates = txn.duplicates.clone();
        duplicates.sort();
        out.push(Violation {
            name: ViolationName::DuplicatedTransaction,
            severity: Severity::Warning,
            data: ViolationData {
                duplicates,
                limit: None,
            },
        });
    }

    if let Some(policy) = policy.filter(|_| enforce_rules) {
        rule_violations(txn, policy, &mut out);
    }

    out.sort_by_key(|v| v.name);
    out
}

fn rule_violations(txn: &Transaction, policy: &Policy, out: &mut Vec<Violation>) {
    match txn.category.as_deref() {
        None | Some("") if policy.requires_category => {
            out.push(Violation::plain(ViolationName::MissingCategory, Severity::Violation));
        }
        Some(category) if !policy.allows_category(category) => {
            out.push(Violation::plain(ViolationName::CategoryOutOfPolicy, Severity::Violation));
        }
        _ => {}
    }

    match txn.tag.as_deref() {
        None | Some("") if policy.requires_tag => {
            out.push(Violation::plain(ViolationName::MissingTag, Severity::Violation));
        }
        Some(tag) if !policy.allows_tag(tag) => {
            out.push(Violation::plain(ViolationName::TagOutOfPolicy, Severity::Violation));
        }
        _ => {}
    }

    let magnitude = txn.display_amount();
    if let Some(limit) = policy.max_expense_amount {
        if magnitude > limit {
            out.push(Violation {
                name: ViolationName::OverLimit,
                severity: Severity::Violation,
                data: ViolationData {
                    duplicates: Vec::new(),
                    limit: Some(limit),
                },
            });
        }
    }
    if let Some(threshold) = policy.max_expense_amount_no_receipt {
        if magnitude > threshold && txn.receipt.is_none() {
            out.push(Violation {
                name: ViolationName::ReceiptRequired,
                severity: Severity::Violation,
                data: ViolationData {
                    duplicates: Vec::new(),
                    limit: Some(threshold),
                },
            });
        }
    }
}
