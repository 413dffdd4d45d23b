//! Domain models for ledger-engine.

mod account;
mod balance;
mod ledger;
mod payee;
mod schedule;
mod transaction;

pub use account::{Account, AccountDetails, AccountId, AccountType, CreateAccount};
pub use balance::BalanceSnapshot;
pub use ledger::{LedgerRow, SplitLine, TagLabel, TransactionType};
pub use payee::{Payee, PayeeId, Tag, TagId, DEFAULT_TAG_COLOR};
pub use schedule::{
    NewSchedule, ScheduleFrequency, ScheduleId, ScheduleRule, ScheduledTransaction,
    DEFAULT_CREATE_DAYS_BEFORE,
};
pub use transaction::{
    amount_limit, NewSplit, NewTransaction, ReconciledState, Split, SplitId, Transaction,
    TransactionId, TransactionPatch, AMOUNT_SCALE,
};
