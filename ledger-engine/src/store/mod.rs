//! Storage seam for the ledger.
//!
//! A [`LedgerStore`] hands out [`LedgerTx`] handles scoped to one tenant. Every
//! engine service function takes a `&mut impl LedgerTx`, so one posting (split
//! writes plus all snapshot repairs) commits or rolls back as a unit.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgLedgerTx, PgStore};

use crate::error::LedgerError;
use crate::models::{
    Account, AccountId, BalanceSnapshot, CreateAccount, NewSchedule, NewSplit, Payee, PayeeId,
    ReconciledState, ScheduleId, ScheduledTransaction, Split, SplitId, Tag, TagId, Transaction,
    TransactionId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    /// Open a write transaction. Backends must give it serializable semantics.
    async fn begin(&self, tenant_id: Uuid) -> Result<Self::Tx, LedgerError>;

    /// Open a transaction used only for reads.
    async fn begin_read(&self, tenant_id: Uuid) -> Result<Self::Tx, LedgerError>;
}

#[async_trait]
pub trait LedgerTx: Send {
    fn tenant_id(&self) -> Uuid;

    // Accounts
    async fn insert_account(&mut self, input: &CreateAccount) -> Result<Account, LedgerError>;
    async fn get_account(&mut self, account_id: AccountId) -> Result<Option<Account>, LedgerError>;
    async fn list_accounts(&mut self) -> Result<Vec<Account>, LedgerError>;
    /// Persist name, parent, description, flags and `last_reconciled`.
    async fn update_account(&mut self, account: &Account) -> Result<(), LedgerError>;
    /// Block concurrent writers of these accounts until this transaction ends.
    async fn lock_accounts(&mut self, account_ids: &[AccountId]) -> Result<(), LedgerError>;

    // Payees and tags
    async fn insert_payee(&mut self, name: &str) -> Result<Payee, LedgerError>;
    async fn get_payees(&mut self, payee_ids: &[PayeeId]) -> Result<Vec<Payee>, LedgerError>;
    async fn insert_tag(&mut self, name: &str, color: &str) -> Result<Tag, LedgerError>;
    async fn get_tags(&mut self, tag_ids: &[TagId]) -> Result<Vec<Tag>, LedgerError>;

    // Transactions and splits
    async fn insert_transaction(
        &mut self,
        date: NaiveDate,
        description: Option<&str>,
        is_scheduled: bool,
    ) -> Result<TransactionId, LedgerError>;
    async fn update_transaction(
        &mut self,
        transaction_id: TransactionId,
        date: NaiveDate,
        description: Option<&str>,
    ) -> Result<(), LedgerError>;
    async fn insert_split(
        &mut self,
        transaction_id: TransactionId,
        split: &NewSplit,
    ) -> Result<Split, LedgerError>;
    async fn get_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError>;
    async fn delete_splits(&mut self, transaction_id: TransactionId) -> Result<u64, LedgerError>;
    async fn delete_transaction(&mut self, transaction_id: TransactionId)
        -> Result<(), LedgerError>;
    /// Transactions with at least one split touching the account, ascending by (date, id).
    async fn transactions_for_account(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, LedgerError>;
    /// Returns false when the split does not exist.
    async fn set_reconciled_state(
        &mut self,
        split_id: SplitId,
        state: ReconciledState,
    ) -> Result<bool, LedgerError>;
    /// Signed sum of every split effect on the account for transactions dated exactly `date`.
    async fn day_total(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Decimal, LedgerError>;

    // Balance snapshots
    /// Latest snapshot strictly before `date`.
    async fn snapshot_before(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Option<BalanceSnapshot>, LedgerError>;
    /// Latest snapshot on or before `date`.
    async fn snapshot_at_or_before(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Option<BalanceSnapshot>, LedgerError>;
    async fn upsert_snapshot(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<BalanceSnapshot, LedgerError>;
    /// Up to `limit` snapshots strictly after `date`, ascending.
    async fn snapshots_after(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>, LedgerError>;
    async fn list_snapshots(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<BalanceSnapshot>, LedgerError>;

    // Scheduled transactions
    async fn insert_schedule(
        &mut self,
        input: &NewSchedule,
        next_post_date: NaiveDate,
    ) -> Result<ScheduledTransaction, LedgerError>;
    async fn get_schedule(
        &mut self,
        schedule_id: ScheduleId,
    ) -> Result<Option<ScheduledTransaction>, LedgerError>;
    /// Every schedule of the tenant, ascending by id.
    async fn list_schedules(&mut self) -> Result<Vec<ScheduledTransaction>, LedgerError>;
    async fn update_schedule_dates(
        &mut self,
        schedule_id: ScheduleId,
        last_post_date: Option<NaiveDate>,
        next_post_date: NaiveDate,
    ) -> Result<(), LedgerError>;
    /// Returns false when the schedule does not exist.
    async fn delete_schedule(&mut self, schedule_id: ScheduleId) -> Result<bool, LedgerError>;

    async fn commit(self) -> Result<(), LedgerError>;
    async fn rollback(self) -> Result<(), LedgerError>;
}
