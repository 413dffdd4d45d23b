//! Typed failures surfaced by the ledger engine.

use crate::models::{AccountId, PayeeId, ScheduleId, SplitId, TagId, TransactionId};
use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Parent account {0} has not been persisted")]
    ParentNotPersisted(AccountId),

    #[error("Unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("Unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    #[error("Unknown split {0}")]
    UnknownSplit(SplitId),

    #[error("Unknown payee {0}")]
    UnknownPayee(PayeeId),

    #[error("Unknown tag {0}")]
    UnknownTag(TagId),

    #[error("Unknown scheduled transaction {0}")]
    UnknownSchedule(ScheduleId),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Transaction must have at least one split")]
    EmptyTransaction,

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Account '{0}' already exists")]
    DuplicateAccount(String),

    #[error("Tag '{0}' already exists")]
    DuplicateTag(String),

    #[error("Making {parent} the parent of {account} would create a cycle")]
    AccountCycle { account: AccountId, parent: AccountId },

    #[error("Currency mismatch: account {account_id} uses {found}, expected {expected}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: String,
        found: String,
    },

    #[error("Concurrent modification conflict, the operation can be retried")]
    ConcurrentModificationConflict,

    #[error("Propagation for account {account_id} would touch more than {limit} snapshots")]
    PropagationTooLarge { account_id: AccountId, limit: usize },

    #[error("Propagation failed for account {account_id}: {reason}")]
    PropagationFailure { account_id: AccountId, reason: String },

    #[error("Database error: {0}")]
    Database(anyhow::Error),
}

impl LedgerError {
    /// Whether rerunning the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModificationConflict)
    }

    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ParentNotPersisted(_) => "parent_not_persisted",
            Self::UnknownAccount(_) => "unknown_account",
            Self::UnknownTransaction(_) => "unknown_transaction",
            Self::UnknownSplit(_) => "unknown_split",
            Self::UnknownPayee(_) => "unknown_payee",
            Self::UnknownTag(_) => "unknown_tag",
            Self::UnknownSchedule(_) => "unknown_schedule",
            Self::InvalidSchedule(_) => "invalid_schedule",
            Self::InvalidSplit(_) => "invalid_split",
            Self::EmptyTransaction => "empty_transaction",
            Self::InvalidAccount(_) => "invalid_account",
            Self::DuplicateAccount(_) => "duplicate_account",
            Self::DuplicateTag(_) => "duplicate_tag",
            Self::AccountCycle { .. } => "account_cycle",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::ConcurrentModificationConflict => "conflict",
            Self::PropagationTooLarge { .. } => "propagation_too_large",
            Self::PropagationFailure { .. } => "propagation_failure",
            Self::Database(_) => "db_error",
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = anyhow::anyhow!(err.to_string());
        match err {
            LedgerError::UnknownAccount(_)
            | LedgerError::UnknownTransaction(_)
            | LedgerError::UnknownSplit(_)
            | LedgerError::UnknownPayee(_)
            | LedgerError::UnknownTag(_)
            | LedgerError::UnknownSchedule(_) => AppError::NotFound(message),
            LedgerError::ParentNotPersisted(_)
            | LedgerError::InvalidSplit(_)
            | LedgerError::InvalidSchedule(_)
            | LedgerError::EmptyTransaction
            | LedgerError::InvalidAccount(_)
            | LedgerError::AccountCycle { .. }
            | LedgerError::CurrencyMismatch { .. } => AppError::BadRequest(message),
            LedgerError::DuplicateAccount(_)
            | LedgerError::DuplicateTag(_)
            | LedgerError::ConcurrentModificationConflict => AppError::Conflict(message),
            LedgerError::PropagationTooLarge { .. } | LedgerError::PropagationFailure { .. } => {
                AppError::InternalError(message)
            }
            LedgerError::Database(source) => AppError::DatabaseError(source),
        }
    }
}
