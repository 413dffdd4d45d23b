//! Ledger feed rows (running-balance account register).

use super::{AccountId, AccountType, PayeeId, ReconciledState, SplitId, TransactionId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Semantic type of a split, derived from the types of its two accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Withdrawal,
    Invest,
    Payoff,
    Refund,
    Deposit,
    Other,
}

impl TransactionType {
    /// Classify by (credit account type, debit account type).
    pub fn classify(credit: AccountType, debit: AccountType) -> Self {
        use AccountType::*;
        match (credit, debit) {
            (Asset, Asset) => Self::Transfer,
            (Asset, Expense) => Self::Withdrawal,
            (Asset, Equity) => Self::Invest,
            (Asset, Liability) => Self::Payoff,
            (Expense, Asset) => Self::Refund,
            (Income, Asset) => Self::Deposit,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Withdrawal => "withdrawal",
            Self::Invest => "invest",
            Self::Payoff => "payoff",
            Self::Refund => "refund",
            Self::Deposit => "deposit",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLabel {
    pub name: String,
    pub color: String,
}

/// Split details shown on a ledger row. `amount` is signed from the viewed
/// account's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitLine {
    pub split_id: SplitId,
    pub amount: Decimal,
    pub payee_id: Option<PayeeId>,
    pub payee_name: Option<String>,
    pub credit_account_id: AccountId,
    pub credit_account_name: String,
    pub credit_account_type: AccountType,
    pub debit_account_id: AccountId,
    pub debit_account_name: String,
    pub debit_account_type: AccountType,
    pub transaction_type: TransactionType,
    pub reconciled_state: ReconciledState,
    pub invoice_split_id: Option<i64>,
    pub memo: Option<String>,
    pub tags: Vec<TagLabel>,
}

/// One line of an account register.
///
/// Multi-split transactions render as a parent row (total and running
/// balance, no split) followed by one row per split. Single-split
/// transactions render as one parent row carrying the split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub transaction_id: TransactionId,
    pub transaction_date: NaiveDate,
    pub description: Option<String>,
    pub is_scheduled: bool,
    pub is_split_parent: bool,
    pub total: Option<Decimal>,
    pub balance_after: Option<Decimal>,
    pub split: Option<SplitLine>,
}
