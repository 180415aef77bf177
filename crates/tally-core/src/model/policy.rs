use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::{fmt, str::FromStr};

use super::ids::{AccountId, PolicyId};
use super::money::{Amount, Currency};
use super::{ParseEnumError, normalize};

/// Subscription tier of a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTier {
    /// Free personal workspace.
    Personal,
    /// Paid tier without rule enforcement.
    Collect,
    /// Paid tier with rule enforcement.
    Control,
}

impl PolicyTier {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Collect => "collect",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for PolicyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyTier {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "personal" => Ok(Self::Personal),
            "collect" | "team" => Ok(Self::Collect),
            "control" | "corporate" => Ok(Self::Control),
            _ => Err(ParseEnumError {
                expected: "policy tier",
                got: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Submitted reports close without an approval step.
    #[default]
    Optional,
    /// One approver.
    Basic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoReporting {
    /// New reports are submitted as soon as they are created.
    Instant,
    #[default]
    Manual,
}

/// A workspace and the rules it imposes on its expense reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    #[serde(rename = "ownerAccountID")]
    pub owner: AccountId,
    pub tier: PolicyTier,
    #[serde(default)]
    pub admins: BTreeSet<AccountId>,
    #[serde(default)]
    pub approval_mode: ApprovalMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reimburser: Option<AccountId>,
    #[serde(default)]
    pub auto_reporting: AutoReporting,
    pub output_currency: Currency,
    #[serde(default)]
    pub reimbursement_enabled: bool,
    #[serde(default)]
    pub requires_category: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_categories: Option<BTreeSet<String>>,
    #[serde(default)]
    pub requires_tag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_expense_amount: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_expense_amount_no_receipt: Option<Amount>,
}

impl Policy {
    /// A workspace with permissive defaults; the owner is its only admin.
    #[must_use]
    pub fn new(id: PolicyId, name: impl Into<String>, owner: AccountId, tier: PolicyTier) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            tier,
            admins: BTreeSet::from([owner]),
            approval_mode: ApprovalMode::default(),
            approver: None,
            reimburser: None,
            auto_reporting: AutoReporting::default(),
            output_currency: Currency::usd(),
            reimbursement_enabled: false,
            requires_category: false,
            enabled_categories: None,
            requires_tag: false,
            enabled_tags: None,
            max_expense_amount: None,
            max_expense_amount_no_receipt: None,
        }
    }

    /// Paid tiers get workflow hints.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        matches!(self.tier, PolicyTier::Collect | PolicyTier::Control)
    }

    /// Only the top tier computes rule violations.
    #[must_use]
    pub const fn enforces_violations(&self) -> bool {
        matches!(self.tier, PolicyTier::Control)
    }

    #[must_use]
    pub const fn approvals_enabled(&self) -> bool {
        !matches!(self.approval_mode, ApprovalMode::Optional)
    }

    #[must_use]
    pub const fn is_instant_submit(&self) -> bool {
        matches!(self.auto_reporting, AutoReporting::Instant)
    }

    #[must_use]
    pub fn is_admin(&self, account: AccountId) -> bool {
        account == self.owner || self.admins.contains(&account)
    }

    /// Who approves submitted reports. Falls back to the owner.
    #[must_use]
    pub fn effective_approver(&self) -> AccountId {
        self.approver.unwrap_or(self.owner)
    }

    /// Who pays approved reports. Falls back to the owner.
    #[must_use]
    pub fn effective_reimburser(&self) -> AccountId {
        self.reimburser.unwrap_or(self.owner)
    }

    #[must_use]
    pub fn allows_category(&self, category: &str) -> bool {
        category.is_empty()
            || self
                .enabled_categories
                .as_ref()
                .is_none_or(|set| set.contains(category))
    }

    #[must_use]
    pub fn allows_tag(&self, tag: &str) -> bool {
        tag.is_empty()
            || self
                .enabled_tags
                .as_ref()
                .is_none_or(|set| set.contains(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_gate_features() {
        let personal = Policy::new(PolicyId::new("p"), "Me", AccountId(1), PolicyTier::Personal);
        let collect = Policy::new(PolicyId::new("p"), "Team", AccountId(1), PolicyTier::Collect);
        let control = Policy::new(PolicyId::new("p"), "Corp", AccountId(1), PolicyTier::Control);

        assert!(!personal.is_paid());
        assert!(collect.is_paid() && !collect.enforces_violations());
        assert!(control.is_paid() && control.enforces_violations());
    }

    #[test]
    fn approver_and_reimburser_fall_back_to_owner() {
        let mut policy = Policy::new(PolicyId::new("p"), "Corp", AccountId(1), PolicyTier::Control);
        assert_eq!(policy.effective_approver(), AccountId(1));
        policy.approver = Some(AccountId(2));
        policy.reimburser = Some(AccountId(3));
        assert_eq!(policy.effective_approver(), AccountId(2));
        assert_eq!(policy.effective_reimburser(), AccountId(3));
        assert!(policy.is_admin(AccountId(1)));
        assert!(!policy.is_admin(AccountId(2)));
    }

    #[test]
    fn open_lists_allow_everything() {
        let mut policy = Policy::new(PolicyId::new("p"), "Corp", AccountId(1), PolicyTier::Control);
        assert!(policy.allows_category("Anything"));
        policy.enabled_tags = Some(BTreeSet::from(["Project A".to_string()]));
        assert!(policy.allows_tag("Project A"));
        assert!(!policy.allows_tag("Project B"));
        assert!(policy.allows_tag(""));
    }

    #[test]
    fn tier_parse_accepts_legacy_names() {
        assert_eq!("corporate".parse::<PolicyTier>(), Ok(PolicyTier::Control));
        assert_eq!("team".parse::<PolicyTier>(), Ok(PolicyTier::Collect));
        assert!("gold".parse::<PolicyTier>().is_err());
    }
}
