//! Account model for the double-entry ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AccountId = i64;

/// Account types following standard accounting categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    /// Get string representation for database and full names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "ASSET",
            Self::Liability => "LIABILITY",
            Self::Equity => "EQUITY",
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
        }
    }

    /// Parse the stored representation (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ASSET" => Some(Self::Asset),
            "LIABILITY" => Some(Self::Liability),
            "EQUITY" => Some(Self::Equity),
            "INCOME" => Some(Self::Income),
            "EXPENSE" => Some(Self::Expense),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger account. `parent_account_id` is a non-owning reference into the
/// same tenant's account table; display name and depth are derived from it
/// on every read (see `services::hierarchy`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub tenant_id: Uuid,
    pub parent_account_id: Option<AccountId>,
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
    pub description: Option<String>,
    pub is_hidden: bool,
    pub is_active: bool,
    pub last_reconciled: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    pub fn is_root(&self) -> bool {
        self.parent_account_id.is_none()
    }
}

/// Account together with its live-derived hierarchy fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDetails {
    #[serde(flatten)]
    pub account: Account,
    pub full_name: String,
    pub level: usize,
}

/// Input for creating a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    pub account_type: AccountType,
    pub currency: String,
    pub parent_account_id: Option<AccountId>,
    pub description: Option<String>,
    pub is_hidden: bool,
}

impl CreateAccount {
    pub fn new(name: impl Into<String>, account_type: AccountType, currency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_type,
            currency: currency.into(),
            parent_account_id: None,
            description: None,
            is_hidden: false,
        }
    }

    pub fn under(mut self, parent_account_id: AccountId) -> Self {
        self.parent_account_id = Some(parent_account_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
