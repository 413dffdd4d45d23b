//! In-process ledger store.
//!
//! Tables live in id-keyed maps per tenant. A write transaction holds the
//! writer mutex for its whole lifetime, so writers are fully serialized, and
//! works on a private copy of the tenant's tables that is published on commit.
//! Dropping or rolling back a transaction discards the copy. Read
//! transactions copy the last committed state and never wait for writers.

use super::{LedgerStore, LedgerTx};
use crate::error::LedgerError;
use crate::models::{
    Account, AccountId, BalanceSnapshot, CreateAccount, NewSchedule, NewSplit, Payee, PayeeId,
    ReconciledState, ScheduleId, ScheduledTransaction, Split, SplitId, Tag, TagId, Transaction,
    TransactionId,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TransactionRow {
    date: NaiveDate,
    description: Option<String>,
    is_scheduled: bool,
}

#[derive(Debug, Clone, Default)]
struct TenantTables {
    accounts: BTreeMap<AccountId, Account>,
    payees: BTreeMap<PayeeId, Payee>,
    tags: BTreeMap<TagId, Tag>,
    transactions: BTreeMap<TransactionId, TransactionRow>,
    splits: BTreeMap<SplitId, Split>,
    snapshots: BTreeMap<(AccountId, NaiveDate), Decimal>,
    schedules: BTreeMap<ScheduleId, ScheduledTransaction>,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Shared id sequence, so ids are monotonic across every table.
    last_id: i64,
    tenants: HashMap<Uuid, TenantTables>,
}

/// Ledger store kept entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    writer: Arc<Mutex<()>>,
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn open(
        &self,
        tenant_id: Uuid,
        writer: Option<OwnedMutexGuard<()>>,
    ) -> MemoryLedgerTx {
        let state = self.state.read().await;
        MemoryLedgerTx {
            writer,
            state: self.state.clone(),
            tenant_id,
            tables: state.tenants.get(&tenant_id).cloned().unwrap_or_default(),
            last_id: state.last_id,
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self, tenant_id: Uuid) -> Result<Self::Tx, LedgerError> {
        let writer = self.writer.clone().lock_owned().await;
        Ok(self.open(tenant_id, Some(writer)).await)
    }

    async fn begin_read(&self, tenant_id: Uuid) -> Result<Self::Tx, LedgerError> {
        Ok(self.open(tenant_id, None).await)
    }
}

pub struct MemoryLedgerTx {
    /// Held by write transactions only; read transactions never publish.
    writer: Option<OwnedMutexGuard<()>>,
    state: Arc<RwLock<MemoryState>>,
    tenant_id: Uuid,
    tables: TenantTables,
    last_id: i64,
}

impl MemoryLedgerTx {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn assemble(&self, transaction_id: TransactionId, row: &TransactionRow) -> Transaction {
        Transaction {
            transaction_id,
            tenant_id: self.tenant_id,
            date: row.date,
            description: row.description.clone(),
            is_scheduled: row.is_scheduled,
            splits: self
                .tables
                .splits
                .values()
                .filter(|s| s.transaction_id == transaction_id)
                .cloned()
                .collect(),
        }
    }

    fn snapshot(&self, account_id: AccountId, date: NaiveDate, amount: Decimal) -> BalanceSnapshot {
        BalanceSnapshot {
            account_id,
            snapshot_date: date,
            amount,
        }
    }

    fn latest_snapshot(
        &self,
        account_id: AccountId,
        range: impl std::ops::RangeBounds<(AccountId, NaiveDate)>,
    ) -> Option<BalanceSnapshot> {
        self.tables
            .snapshots
            .range(range)
            .next_back()
            .map(|(&(id, date), &amount)| self.snapshot(id, date, amount))
            .filter(|s| s.account_id == account_id)
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    async fn insert_account(&mut self, input: &CreateAccount) -> Result<Account, LedgerError> {
        let account = Account {
            account_id: self.next_id(),
            tenant_id: self.tenant_id,
            parent_account_id: input.parent_account_id,
            name: input.name.clone(),
            account_type: input.account_type,
            currency: input.currency.clone(),
            description: input.description.clone(),
            is_hidden: input.is_hidden,
            is_active: true,
            last_reconciled: None,
            created_utc: Utc::now(),
        };
        self.tables
            .accounts
            .insert(account.account_id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, account_id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.tables.accounts.get(&account_id).cloned())
    }

    async fn list_accounts(&mut self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.tables.accounts.values().cloned().collect())
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), LedgerError> {
        match self.tables.accounts.get_mut(&account.account_id) {
            Some(stored) => {
                *stored = account.clone();
                Ok(())
            }
            None => Err(LedgerError::UnknownAccount(account.account_id)),
        }
    }

    async fn lock_accounts(&mut self, _account_ids: &[AccountId]) -> Result<(), LedgerError> {
        // Write transactions already hold the writer mutex for their whole life.
        Ok(())
    }

    async fn insert_payee(&mut self, name: &str) -> Result<Payee, LedgerError> {
        let payee = Payee {
            payee_id: self.next_id(),
            tenant_id: self.tenant_id,
            name: name.to_string(),
        };
        self.tables.payees.insert(payee.payee_id, payee.clone());
        Ok(payee)
    }

    async fn get_payees(&mut self, payee_ids: &[PayeeId]) -> Result<Vec<Payee>, LedgerError> {
        Ok(payee_ids
            .iter()
            .filter_map(|id| self.tables.payees.get(id).cloned())
            .collect())
    }

    async fn insert_tag(&mut self, name: &str, color: &str) -> Result<Tag, LedgerError> {
        if self.tables.tags.values().any(|t| t.name == name) {
            return Err(LedgerError::DuplicateTag(name.to_string()));
        }
        let tag = Tag {
            tag_id: self.next_id(),
            tenant_id: self.tenant_id,
            name: name.to_string(),
            color: color.to_string(),
        };
        self.tables.tags.insert(tag.tag_id, tag.clone());
        Ok(tag)
    }

    async fn get_tags(&mut self, tag_ids: &[TagId]) -> Result<Vec<Tag>, LedgerError> {
        Ok(tag_ids
            .iter()
            .filter_map(|id| self.tables.tags.get(id).cloned())
            .collect())
    }

    async fn insert_transaction(
        &mut self,
        date: NaiveDate,
        description: Option<&str>,
        is_scheduled: bool,
    ) -> Result<TransactionId, LedgerError> {
        let transaction_id = self.next_id();
        self.tables.transactions.insert(
            transaction_id,
            TransactionRow {
                date,
                description: description.map(str::to_string),
                is_scheduled,
            },
        );
        Ok(transaction_id)
    }

    async fn update_transaction(
        &mut self,
        transaction_id: TransactionId,
        date: NaiveDate,
        description: Option<&str>,
    ) -> Result<(), LedgerError> {
        let row = self
            .tables
            .transactions
            .get_mut(&transaction_id)
            .ok_or(LedgerError::UnknownTransaction(transaction_id))?;
        row.date = date;
        row.description = description.map(str::to_string);
        Ok(())
    }

    async fn insert_split(
        &mut self,
        transaction_id: TransactionId,
        split: &NewSplit,
    ) -> Result<Split, LedgerError> {
        let split = Split {
            split_id: self.next_id(),
            transaction_id,
            amount: split.amount,
            debit_account_id: split.debit_account_id,
            credit_account_id: split.credit_account_id,
            payee_id: split.payee_id,
            memo: split.memo.clone(),
            tags: split.tags.clone(),
            reconciled_state: split.reconciled_state,
            invoice_split_id: split.invoice_split_id,
        };
        self.tables.splits.insert(split.split_id, split.clone());
        Ok(split)
    }

    async fn get_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self
            .tables
            .transactions
            .get(&transaction_id)
            .map(|row| self.assemble(transaction_id, row)))
    }

    async fn delete_splits(&mut self, transaction_id: TransactionId) -> Result<u64, LedgerError> {
        let before = self.tables.splits.len();
        self.tables
            .splits
            .retain(|_, s| s.transaction_id != transaction_id);
        Ok((before - self.tables.splits.len()) as u64)
    }

    async fn delete_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<(), LedgerError> {
        self.tables
            .transactions
            .remove(&transaction_id)
            .map(|_| ())
            .ok_or(LedgerError::UnknownTransaction(transaction_id))
    }

    async fn transactions_for_account(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut transactions: Vec<Transaction> = self
            .tables
            .transactions
            .iter()
            .filter(|(id, _)| {
                self.tables
                    .splits
                    .values()
                    .any(|s| s.transaction_id == **id && s.touches(account_id))
            })
            .map(|(id, row)| self.assemble(*id, row))
            .collect();
        transactions.sort_by_key(|t| (t.date, t.transaction_id));
        Ok(transactions)
    }

    async fn set_reconciled_state(
        &mut self,
        split_id: SplitId,
        state: ReconciledState,
    ) -> Result<bool, LedgerError> {
        Ok(match self.tables.splits.get_mut(&split_id) {
            Some(split) => {
                split.reconciled_state = state;
                true
            }
            None => false,
        })
    }

    async fn day_total(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Decimal, LedgerError> {
        let transactions = &self.tables.transactions;
        self.tables
            .splits
            .values()
            .filter(|s| {
                transactions
                    .get(&s.transaction_id)
                    .is_some_and(|t| t.date == date)
            })
            .try_fold(Decimal::ZERO, |total, s| {
                total.checked_add(s.effect_on(account_id))
            })
            .ok_or_else(|| LedgerError::PropagationFailure {
                account_id,
                reason: format!("day total for {} overflowed", date),
            })
    }

    async fn snapshot_before(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Option<BalanceSnapshot>, LedgerError> {
        Ok(self.latest_snapshot(account_id, ..(account_id, date)))
    }

    async fn snapshot_at_or_before(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Option<BalanceSnapshot>, LedgerError> {
        Ok(self.latest_snapshot(account_id, ..=(account_id, date)))
    }

    async fn upsert_snapshot(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<BalanceSnapshot, LedgerError> {
        self.tables.snapshots.insert((account_id, date), amount);
        Ok(self.snapshot(account_id, date, amount))
    }

    async fn snapshots_after(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>, LedgerError> {
        use std::ops::Bound::{Excluded, Unbounded};

        Ok(self
            .tables
            .snapshots
            .range((Excluded((account_id, date)), Unbounded))
            .take_while(|((id, _), _)| *id == account_id)
            .take(limit)
            .map(|(&(id, d), &amount)| self.snapshot(id, d, amount))
            .collect())
    }

    async fn list_snapshots(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<BalanceSnapshot>, LedgerError> {
        Ok(self
            .tables
            .snapshots
            .iter()
            .filter(|((id, _), _)| *id == account_id)
            .map(|(&(id, d), &amount)| self.snapshot(id, d, amount))
            .collect())
    }

    async fn insert_schedule(
        &mut self,
        input: &NewSchedule,
        next_post_date: NaiveDate,
    ) -> Result<ScheduledTransaction, LedgerError> {
        let schedule = ScheduledTransaction {
            scheduled_transaction_id: self.next_id(),
            tenant_id: self.tenant_id,
            frequency: input.frequency,
            rule: input.rule,
            start_date: input.start_date,
            last_post_date: None,
            next_post_date,
            create_n_days_before: input.create_n_days_before,
            description: input.description.clone(),
            split_templates: input.split_templates.clone(),
        };
        self.tables
            .schedules
            .insert(schedule.scheduled_transaction_id, schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(
        &mut self,
        schedule_id: ScheduleId,
    ) -> Result<Option<ScheduledTransaction>, LedgerError> {
        Ok(self.tables.schedules.get(&schedule_id).cloned())
    }

    async fn list_schedules(&mut self) -> Result<Vec<ScheduledTransaction>, LedgerError> {
        Ok(self.tables.schedules.values().cloned().collect())
    }

    async fn update_schedule_dates(
        &mut self,
        schedule_id: ScheduleId,
        last_post_date: Option<NaiveDate>,
        next_post_date: NaiveDate,
    ) -> Result<(), LedgerError> {
        let schedule = self
            .tables
            .schedules
            .get_mut(&schedule_id)
            .ok_or(LedgerError::UnknownSchedule(schedule_id))?;
        schedule.last_post_date = last_post_date;
        schedule.next_post_date = next_post_date;
        Ok(())
    }

    async fn delete_schedule(&mut self, schedule_id: ScheduleId) -> Result<bool, LedgerError> {
        Ok(self.tables.schedules.remove(&schedule_id).is_some())
    }

    async fn commit(self) -> Result<(), LedgerError> {
        if self.writer.is_some() {
            let mut state = self.state.write().await;
            state.last_id = self.last_id;
            state.tenants.insert(self.tenant_id, self.tables);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountType;
    use std::time::Duration;
    use tokio::time::timeout;

    fn chk() -> CreateAccount {
        CreateAccount::new("CHK", AccountType::Asset, "USD")
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_open_writer() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let mut writer = store.begin(tenant).await.unwrap();
        let account = writer.insert_account(&chk()).await.unwrap();

        let mut reader = timeout(Duration::from_secs(1), store.begin_read(tenant))
            .await
            .expect("read blocked behind writer")
            .unwrap();
        assert!(reader.get_account(account.account_id).await.unwrap().is_none());
        reader.commit().await.unwrap();

        writer.commit().await.unwrap();
        let mut reader = store.begin_read(tenant).await.unwrap();
        assert!(reader.get_account(account.account_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_writers_are_serialized() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let first = store.begin(tenant).await.unwrap();

        assert!(timeout(Duration::from_millis(50), store.begin(tenant))
            .await
            .is_err());

        first.rollback().await.unwrap();
        assert!(timeout(Duration::from_secs(1), store.begin(tenant))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_read_transaction_never_publishes() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let mut reader = store.begin_read(tenant).await.unwrap();
        reader.insert_account(&chk()).await.unwrap();
        reader.commit().await.unwrap();

        let mut check = store.begin_read(tenant).await.unwrap();
        assert!(check.list_accounts().await.unwrap().is_empty());
    }
}
