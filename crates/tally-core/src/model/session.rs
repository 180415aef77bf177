use serde::{Deserialize, Serialize};

use super::ids::AccountId;

/// The signed-in user on whose behalf mutations run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
}

impl Session {
    pub fn new(account_id: AccountId, login: impl Into<String>) -> Self {
        let login = login.into();
        Self {
            account_id,
            display_name: login.clone(),
            login,
        }
    }

    /// Personal details record for the signed-in user.
    #[must_use]
    pub fn details(&self) -> PersonalDetails {
        PersonalDetails {
            account_id: self.account_id,
            login: self.login.clone(),
            display_name: self.display_name.clone(),
            is_optimistic: false,
        }
    }
}

/// Public profile of an account, as cached under `personalDetails:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalDetails {
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    pub login: String,
    #[serde(default)]
    pub display_name: String,
    /// Placeholder synthesized for an invitee the cache never saw.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_optimistic: bool,
}

impl PersonalDetails {
    /// Placeholder for a login without a known account.
    #[must_use]
    pub fn optimistic(login: &str) -> Self {
        let login = login.trim().to_ascii_lowercase();
        Self {
            account_id: AccountId::optimistic_for(&login),
            display_name: login.clone(),
            login,
            is_optimistic: true,
        }
    }

    /// Name to show in messages.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.login
        } else {
            &self.display_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimistic_details_are_marked_and_normalized() {
        let details = PersonalDetails::optimistic(" Ana@Example.com");
        assert!(details.is_optimistic);
        assert_eq!(details.login, "ana@example.com");
        assert_eq!(details.account_id, AccountId::optimistic_for("ana@example.com"));
    }

    #[test]
    fn label_prefers_display_name() {
        let mut details = Session::new(AccountId(1), "me@example.com").details();
        details.display_name = "Me".into();
        assert_eq!(details.label(), "Me");
        details.display_name.clear();
        assert_eq!(details.label(), "me@example.com");
    }
}
