//! Transaction and split model for double-entry accounting.

use super::{AccountId, PayeeId, TagId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub type TransactionId = i64;
pub type SplitId = i64;

/// Decimal places a stored amount may carry.
pub const AMOUNT_SCALE: u32 = 4;

/// Exclusive bound on the magnitude of a stored amount or balance.
pub fn amount_limit() -> Decimal {
    Decimal::new(1_000_000_000_000_000, 0)
}

/// Reconciliation marker on a split. Has no effect on balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciledState {
    #[default]
    NotReconciled,
    Cleared,
    Reconciled,
}

impl ReconciledState {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotReconciled => "not_reconciled",
            Self::Cleared => "cleared",
            Self::Reconciled => "reconciled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_reconciled" => Some(Self::NotReconciled),
            "cleared" => Some(Self::Cleared),
            "reconciled" => Some(Self::Reconciled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReconciledState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One leg-pair of a transaction: `amount` moves from the credit account to
/// the debit account on the transaction's date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub split_id: SplitId,
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub payee_id: Option<PayeeId>,
    pub memo: Option<String>,
    pub tags: Vec<TagId>,
    pub reconciled_state: ReconciledState,
    pub invoice_split_id: Option<i64>,
}

impl Split {
    /// Signed effect of this split on `account_id`'s balance.
    pub fn effect_on(&self, account_id: AccountId) -> Decimal {
        if self.debit_account_id == account_id {
            self.amount
        } else if self.credit_account_id == account_id {
            -self.amount
        } else {
            Decimal::ZERO
        }
    }

    pub fn touches(&self, account_id: AccountId) -> bool {
        self.debit_account_id == account_id || self.credit_account_id == account_id
    }
}

/// A posted transaction with its splits in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub tenant_id: Uuid,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub is_scheduled: bool,
    pub splits: Vec<Split>,
}

impl Transaction {
    /// Every account appearing on either side of any split.
    pub fn accounts(&self) -> BTreeSet<AccountId> {
        split_accounts(self.splits.iter().map(|s| (s.debit_account_id, s.credit_account_id)))
    }

    /// Sum of split magnitudes (the amount moved, not a net effect).
    pub fn total_amount(&self) -> Decimal {
        self.splits.iter().map(|s| s.amount).sum()
    }

    /// Net effect of the whole transaction on one account.
    pub fn effect_on(&self, account_id: AccountId) -> Decimal {
        self.splits.iter().map(|s| s.effect_on(account_id)).sum()
    }
}

pub(crate) fn split_accounts(
    pairs: impl Iterator<Item = (AccountId, AccountId)>,
) -> BTreeSet<AccountId> {
    pairs.flat_map(|(debit, credit)| [debit, credit]).collect()
}

/// Input for one split of a transaction being posted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSplit {
    pub amount: Decimal,
    pub debit_account_id: AccountId,
    pub credit_account_id: AccountId,
    pub payee_id: Option<PayeeId>,
    pub memo: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagId>,
    #[serde(default)]
    pub reconciled_state: ReconciledState,
    pub invoice_split_id: Option<i64>,
}

impl NewSplit {
    pub fn new(amount: Decimal, debit_account_id: AccountId, credit_account_id: AccountId) -> Self {
        Self {
            amount,
            debit_account_id,
            credit_account_id,
            payee_id: None,
            memo: None,
            tags: Vec::new(),
            reconciled_state: ReconciledState::NotReconciled,
            invoice_split_id: None,
        }
    }

    pub fn with_payee(mut self, payee_id: PayeeId) -> Self {
        self.payee_id = Some(payee_id);
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = TagId>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

/// Input for posting a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub date: NaiveDate,
    pub description: Option<String>,
    #[serde(default)]
    pub is_scheduled: bool,
    pub splits: Vec<NewSplit>,
}

impl NewTransaction {
    pub fn new(date: NaiveDate, description: impl Into<String>) -> Self {
        Self {
            date,
            description: Some(description.into()),
            is_scheduled: false,
            splits: Vec::new(),
        }
    }

    pub fn split(mut self, split: NewSplit) -> Self {
        self.splits.push(split);
        self
    }

    pub fn accounts(&self) -> BTreeSet<AccountId> {
        split_accounts(self.splits.iter().map(|s| (s.debit_account_id, s.credit_account_id)))
    }
}

/// Partial update of a posted transaction. `splits: Some(..)` replaces every
/// split; `None` keeps the existing ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionPatch {
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    pub splits: Option<Vec<NewSplit>>,
}
