//! The ledger facade.
//!
//! Every public operation opens one store transaction, runs the matching
//! service function, and commits on success or rolls back on any error.
//! Write operations are replayed after a concurrent modification conflict
//! according to the configured [`RetryConfig`].

use crate::error::LedgerError;
use crate::models::{
    Account, AccountDetails, AccountId, BalanceSnapshot, CreateAccount, LedgerRow, NewSchedule,
    NewTransaction, Payee, ReconciledState, ScheduleId, ScheduledTransaction, SplitId, Tag,
    Transaction, TransactionId, TransactionPatch, DEFAULT_TAG_COLOR,
};
use crate::services::metrics::{ERRORS_TOTAL, OPERATIONS_TOTAL, OPERATION_DURATION};
use crate::services::{
    hierarchy, ledger_view, posting, propagation, retry_on_conflict, schedule, PropagationLimits,
    RetryConfig,
};
use crate::store::{LedgerStore, LedgerTx};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::future::Future;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Commit on success, roll back on failure. A failed rollback is logged and
/// the original error is returned.
async fn finish<Tx: LedgerTx, T>(tx: Tx, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Record duration, outcome and error kind for one facade call.
async fn observed<T>(
    operation: &'static str,
    fut: impl Future<Output = Result<T, LedgerError>>,
) -> Result<T, LedgerError> {
    let timer = OPERATION_DURATION
        .with_label_values(&[operation])
        .start_timer();
    let result = fut.await;
    timer.observe_duration();

    match &result {
        Ok(_) => OPERATIONS_TOTAL.with_label_values(&[operation, "ok"]).inc(),
        Err(err) => {
            OPERATIONS_TOTAL
                .with_label_values(&[operation, "error"])
                .inc();
            ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
        }
    }
    result
}

/// Ledger operations over a [`LedgerStore`]. Every call is scoped to one
/// tenant; tenants never observe each other's rows.
pub struct Ledger<S: LedgerStore> {
    store: S,
    limits: PropagationLimits,
    retry: RetryConfig,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            limits: PropagationLimits::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_limits(mut self, limits: PropagationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn write<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, LedgerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        observed(operation, retry_on_conflict(&self.retry, operation, f)).await
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_account(
        &self,
        tenant_id: Uuid,
        input: &CreateAccount,
    ) -> Result<Account, LedgerError> {
        let store = &self.store;
        self.write("create_account", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = hierarchy::create_account(&mut tx, input).await;
            finish(tx, result).await
        })
        .await
    }

    /// Account with its live-derived full name and level.
    pub async fn get_account(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
    ) -> Result<AccountDetails, LedgerError> {
        observed("get_account", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result = hierarchy::describe_account(&mut tx, account_id).await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn list_accounts(&self, tenant_id: Uuid) -> Result<Vec<AccountDetails>, LedgerError> {
        observed("list_accounts", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result = hierarchy::list_accounts(&mut tx).await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn rename_account(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
        name: &str,
    ) -> Result<Account, LedgerError> {
        let store = &self.store;
        self.write("rename_account", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = hierarchy::rename_account(&mut tx, account_id, name).await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn move_account(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
        new_parent: Option<AccountId>,
    ) -> Result<Account, LedgerError> {
        let store = &self.store;
        self.write("move_account", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = hierarchy::move_account(&mut tx, account_id, new_parent).await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn mark_account_reconciled(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Account, LedgerError> {
        let store = &self.store;
        self.write("mark_account_reconciled", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = hierarchy::mark_reconciled(&mut tx, account_id, date).await;
            finish(tx, result).await
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Payees and tags
    // -------------------------------------------------------------------------

    pub async fn create_payee(&self, tenant_id: Uuid, name: &str) -> Result<Payee, LedgerError> {
        let store = &self.store;
        self.write("create_payee", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = tx.insert_payee(name.trim()).await;
            finish(tx, result).await
        })
        .await
    }

    /// `color` defaults to [`DEFAULT_TAG_COLOR`].
    pub async fn create_tag(
        &self,
        tenant_id: Uuid,
        name: &str,
        color: Option<&str>,
    ) -> Result<Tag, LedgerError> {
        let store = &self.store;
        let color = color.unwrap_or(DEFAULT_TAG_COLOR);
        self.write("create_tag", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = tx.insert_tag(name.trim(), color).await;
            finish(tx, result).await
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(date = %input.date))]
    pub async fn post_transaction(
        &self,
        tenant_id: Uuid,
        input: &NewTransaction,
    ) -> Result<TransactionId, LedgerError> {
        let store = &self.store;
        let limits = &self.limits;
        let posted = self
            .write("post_transaction", move || async move {
                let mut tx = store.begin(tenant_id).await?;
                let result = posting::post_transaction(&mut tx, limits, input).await;
                finish(tx, result).await
            })
            .await?;
        Ok(posted.transaction_id)
    }

    #[instrument(skip(self, patch))]
    pub async fn edit_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: TransactionId,
        patch: &TransactionPatch,
    ) -> Result<Transaction, LedgerError> {
        let store = &self.store;
        let limits = &self.limits;
        self.write("edit_transaction", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = posting::edit_transaction(&mut tx, limits, transaction_id, patch).await;
            finish(tx, result).await
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: TransactionId,
    ) -> Result<(), LedgerError> {
        let store = &self.store;
        let limits = &self.limits;
        self.write("delete_transaction", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = posting::delete_transaction(&mut tx, limits, transaction_id).await;
            finish(tx, result).await
        })
        .await
        .map(|_| ())
    }

    pub async fn get_transaction(
        &self,
        tenant_id: Uuid,
        transaction_id: TransactionId,
    ) -> Result<Transaction, LedgerError> {
        observed("get_transaction", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result = tx
                .get_transaction(transaction_id)
                .await
                .and_then(|t| t.ok_or(LedgerError::UnknownTransaction(transaction_id)));
            finish(tx, result).await
        })
        .await
    }

    pub async fn set_reconciled_state(
        &self,
        tenant_id: Uuid,
        split_id: SplitId,
        state: ReconciledState,
    ) -> Result<(), LedgerError> {
        let store = &self.store;
        self.write("set_reconciled_state", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = posting::set_reconciled_state(&mut tx, split_id, state).await;
            finish(tx, result).await
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Scheduled transactions
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(start = %input.start_date))]
    pub async fn create_schedule(
        &self,
        tenant_id: Uuid,
        input: &NewSchedule,
    ) -> Result<ScheduledTransaction, LedgerError> {
        let store = &self.store;
        self.write("create_schedule", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = schedule::create_schedule(&mut tx, input).await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn get_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: ScheduleId,
    ) -> Result<ScheduledTransaction, LedgerError> {
        observed("get_schedule", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result = tx
                .get_schedule(schedule_id)
                .await
                .and_then(|s| s.ok_or(LedgerError::UnknownSchedule(schedule_id)));
            finish(tx, result).await
        })
        .await
    }

    pub async fn list_schedules(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<ScheduledTransaction>, LedgerError> {
        observed("list_schedules", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result = tx.list_schedules().await;
            finish(tx, result).await
        })
        .await
    }

    /// Stops future occurrences. Transactions already posted stay.
    pub async fn delete_schedule(
        &self,
        tenant_id: Uuid,
        schedule_id: ScheduleId,
    ) -> Result<(), LedgerError> {
        let store = &self.store;
        self.write("delete_schedule", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result = schedule::delete_schedule(&mut tx, schedule_id).await;
            finish(tx, result).await
        })
        .await
    }

    /// Post every due occurrence as of `as_of` in one store transaction.
    /// Returns the new transaction ids in posting order.
    #[instrument(skip(self))]
    pub async fn post_due_schedules(
        &self,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<TransactionId>, LedgerError> {
        let store = &self.store;
        let limits = &self.limits;
        let posted = self
            .write("post_due_schedules", move || async move {
                let mut tx = store.begin(tenant_id).await?;
                let result = schedule::post_due_schedules(&mut tx, limits, as_of).await;
                finish(tx, result).await
            })
            .await?;
        Ok(posted.into_iter().map(|t| t.transaction_id).collect())
    }

    // -------------------------------------------------------------------------
    // Balances and ledger view
    // -------------------------------------------------------------------------

    /// Latest snapshot amount on or before `as_of`, or zero when there is none.
    pub async fn get_account_balance(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
        as_of: NaiveDate,
    ) -> Result<Decimal, LedgerError> {
        observed("get_account_balance", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result: Result<Decimal, LedgerError> = async {
                require_account(&mut tx, account_id).await?;
                Ok(tx
                    .snapshot_at_or_before(account_id, as_of)
                    .await?
                    .map(|s| s.amount)
                    .unwrap_or(Decimal::ZERO))
            }
            .await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn get_account_ledger(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
    ) -> Result<Vec<LedgerRow>, LedgerError> {
        observed("get_account_ledger", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result = ledger_view::build(&mut tx, account_id).await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn list_snapshots(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
    ) -> Result<Vec<BalanceSnapshot>, LedgerError> {
        observed("list_snapshots", async {
            let mut tx = self.store.begin_read(tenant_id).await?;
            let result: Result<Vec<BalanceSnapshot>, LedgerError> = async {
                require_account(&mut tx, account_id).await?;
                tx.list_snapshots(account_id).await
            }
            .await;
            finish(tx, result).await
        })
        .await
    }

    /// Re-derive every snapshot of one account. Returns how many it visited.
    #[instrument(skip(self))]
    pub async fn rebuild_snapshots(
        &self,
        tenant_id: Uuid,
        account_id: AccountId,
    ) -> Result<usize, LedgerError> {
        let store = &self.store;
        let limits = &self.limits;
        self.write("rebuild_snapshots", move || async move {
            let mut tx = store.begin(tenant_id).await?;
            let result: Result<usize, LedgerError> = async {
                require_account(&mut tx, account_id).await?;
                tx.lock_accounts(&[account_id]).await?;
                propagation::rebuild_snapshots(&mut tx, limits, account_id).await
            }
            .await;
            finish(tx, result).await
        })
        .await
    }
}

async fn require_account<T: LedgerTx>(tx: &mut T, account_id: AccountId) -> Result<(), LedgerError> {
    tx.get_account(account_id)
        .await?
        .map(|_| ())
        .ok_or(LedgerError::UnknownAccount(account_id))
}
