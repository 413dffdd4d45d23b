//! PostgreSQL ledger store.

use super::{LedgerStore, LedgerTx};
use crate::error::LedgerError;
use crate::models::{
    Account, AccountId, AccountType, BalanceSnapshot, CreateAccount, NewSchedule, NewSplit, Payee,
    PayeeId, ReconciledState, ScheduleFrequency, ScheduleId, ScheduleRule, ScheduledTransaction,
    Split, SplitId, Tag, TagId, Transaction, TransactionId,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use prometheus::HistogramTimer;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// SQLSTATE raised when a serializable transaction cannot be ordered.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

const ACCOUNT_COLUMNS: &str = "account_id, tenant_id, parent_account_id, name, account_type, \
     currency, description, is_hidden, is_active, last_reconciled, created_utc";

const SPLIT_SELECT: &str = r#"
    SELECT s.split_id, s.transaction_id, s.amount, s.debit_account_id, s.credit_account_id,
           s.payee_id, s.memo, s.reconciled_state, s.invoice_split_id,
           ARRAY(
               SELECT st.tag_id FROM split_tags st
               WHERE st.split_id = s.split_id
               ORDER BY st.position
           ) AS tags
    FROM splits s
"#;

fn db_error(context: &str, err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(ref db_err) = err {
        if matches!(
            db_err.code().as_deref(),
            Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
        ) {
            return LedgerError::ConcurrentModificationConflict;
        }
    }
    LedgerError::Database(anyhow::anyhow!("{}: {}", context, err))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

fn query_timer(operation: &str) -> HistogramTimer {
    DB_QUERY_DURATION
        .with_label_values(&[operation])
        .start_timer()
}

#[derive(FromRow)]
struct AccountRow {
    account_id: i64,
    tenant_id: Uuid,
    parent_account_id: Option<i64>,
    name: String,
    account_type: String,
    currency: String,
    description: Option<String>,
    is_hidden: bool,
    is_active: bool,
    last_reconciled: Option<NaiveDate>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let account_type = AccountType::parse(&row.account_type).ok_or_else(|| {
            LedgerError::Database(anyhow::anyhow!(
                "Account {} has unknown type '{}'",
                row.account_id,
                row.account_type
            ))
        })?;
        Ok(Account {
            account_id: row.account_id,
            tenant_id: row.tenant_id,
            parent_account_id: row.parent_account_id,
            name: row.name,
            account_type,
            currency: row.currency,
            description: row.description,
            is_hidden: row.is_hidden,
            is_active: row.is_active,
            last_reconciled: row.last_reconciled,
            created_utc: row.created_utc,
        })
    }
}

#[derive(FromRow)]
struct TransactionRow {
    transaction_id: i64,
    transaction_date: NaiveDate,
    description: Option<String>,
    is_scheduled: bool,
}

#[derive(FromRow)]
struct SplitRow {
    split_id: i64,
    transaction_id: i64,
    amount: Decimal,
    debit_account_id: i64,
    credit_account_id: i64,
    payee_id: Option<i64>,
    memo: Option<String>,
    reconciled_state: String,
    invoice_split_id: Option<i64>,
    tags: Vec<i64>,
}

impl TryFrom<SplitRow> for Split {
    type Error = LedgerError;

    fn try_from(row: SplitRow) -> Result<Self, Self::Error> {
        let reconciled_state = ReconciledState::parse(&row.reconciled_state).ok_or_else(|| {
            LedgerError::Database(anyhow::anyhow!(
                "Split {} has unknown reconciled state '{}'",
                row.split_id,
                row.reconciled_state
            ))
        })?;
        Ok(Split {
            split_id: row.split_id,
            transaction_id: row.transaction_id,
            amount: row.amount,
            debit_account_id: row.debit_account_id,
            credit_account_id: row.credit_account_id,
            payee_id: row.payee_id,
            memo: row.memo,
            tags: row.tags,
            reconciled_state,
            invoice_split_id: row.invoice_split_id,
        })
    }
}

#[derive(FromRow)]
struct SnapshotRow {
    account_id: i64,
    snapshot_date: NaiveDate,
    amount: Decimal,
}

impl From<SnapshotRow> for BalanceSnapshot {
    fn from(row: SnapshotRow) -> Self {
        BalanceSnapshot {
            account_id: row.account_id,
            snapshot_date: row.snapshot_date,
            amount: row.amount,
        }
    }
}

const SCHEDULE_COLUMNS: &str = "scheduled_transaction_id, tenant_id, frequency, schedule_rule, \
     start_date, last_post_date, next_post_date, create_n_days_before, description";

#[derive(FromRow)]
struct ScheduleRow {
    scheduled_transaction_id: i64,
    tenant_id: Uuid,
    frequency: String,
    schedule_rule: String,
    start_date: NaiveDate,
    last_post_date: Option<NaiveDate>,
    next_post_date: NaiveDate,
    create_n_days_before: i32,
    description: Option<String>,
}

impl ScheduleRow {
    fn into_schedule(
        self,
        split_templates: Vec<NewSplit>,
    ) -> Result<ScheduledTransaction, LedgerError> {
        let id = self.scheduled_transaction_id;
        let corrupt = |what: &str, value: &str| {
            LedgerError::Database(anyhow::anyhow!(
                "Scheduled transaction {} has unknown {} '{}'",
                id,
                what,
                value
            ))
        };
        let frequency = ScheduleFrequency::parse(&self.frequency)
            .ok_or_else(|| corrupt("frequency", &self.frequency))?;
        let rule = ScheduleRule::parse(&self.schedule_rule)
            .ok_or_else(|| corrupt("rule", &self.schedule_rule))?;
        let create_n_days_before = u32::try_from(self.create_n_days_before)
            .map_err(|_| corrupt("lead time", &self.create_n_days_before.to_string()))?;
        Ok(ScheduledTransaction {
            scheduled_transaction_id: id,
            tenant_id: self.tenant_id,
            frequency,
            rule,
            start_date: self.start_date,
            last_post_date: self.last_post_date,
            next_post_date: self.next_post_date,
            create_n_days_before,
            description: self.description,
            split_templates,
        })
    }
}

#[derive(FromRow)]
struct TemplateRow {
    scheduled_transaction_id: i64,
    amount: Decimal,
    debit_account_id: i64,
    credit_account_id: i64,
    payee_id: Option<i64>,
    memo: Option<String>,
    tags: Vec<i64>,
}

impl From<TemplateRow> for NewSplit {
    fn from(row: TemplateRow) -> Self {
        NewSplit {
            amount: row.amount,
            debit_account_id: row.debit_account_id,
            credit_account_id: row.credit_account_id,
            payee_id: row.payee_id,
            memo: row.memo,
            tags: row.tags,
            reconciled_state: ReconciledState::NotReconciled,
            invoice_split_id: None,
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ledger-engine"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, LedgerError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| LedgerError::Database(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), LedgerError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;
        Ok(())
    }

    /// Apply the bundled schema.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), LedgerError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn open(&self, tenant_id: Uuid, isolation: &str) -> Result<PgLedgerTx, LedgerError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        sqlx::query(isolation)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to set isolation level", e))?;

        Ok(PgLedgerTx { tx, tenant_id })
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    type Tx = PgLedgerTx;

    async fn begin(&self, tenant_id: Uuid) -> Result<Self::Tx, LedgerError> {
        self.open(tenant_id, "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .await
    }

    async fn begin_read(&self, tenant_id: Uuid) -> Result<Self::Tx, LedgerError> {
        self.open(
            tenant_id,
            "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY",
        )
        .await
    }
}

/// One open PostgreSQL transaction scoped to a tenant.
pub struct PgLedgerTx {
    tx: sqlx::Transaction<'static, Postgres>,
    tenant_id: Uuid,
}

impl PgLedgerTx {
    async fn load_splits(
        &mut self,
        transaction_ids: &[TransactionId],
    ) -> Result<HashMap<TransactionId, Vec<Split>>, LedgerError> {
        let rows = sqlx::query_as::<_, SplitRow>(&format!(
            "{} WHERE s.transaction_id = ANY($1) ORDER BY s.split_id",
            SPLIT_SELECT
        ))
        .bind(transaction_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to load splits", e))?;

        let mut by_transaction: HashMap<TransactionId, Vec<Split>> = HashMap::new();
        for row in rows {
            let split = Split::try_from(row)?;
            by_transaction
                .entry(split.transaction_id)
                .or_default()
                .push(split);
        }
        Ok(by_transaction)
    }

    async fn load_templates(
        &mut self,
        schedule_ids: &[ScheduleId],
    ) -> Result<HashMap<ScheduleId, Vec<NewSplit>>, LedgerError> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT scheduled_transaction_id, amount, debit_account_id, credit_account_id,
                   payee_id, memo, tags
            FROM scheduled_transaction_splits
            WHERE scheduled_transaction_id = ANY($1)
            ORDER BY template_id
            "#,
        )
        .bind(schedule_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to load split templates", e))?;

        let mut by_schedule: HashMap<ScheduleId, Vec<NewSplit>> = HashMap::new();
        for row in rows {
            by_schedule
                .entry(row.scheduled_transaction_id)
                .or_default()
                .push(NewSplit::from(row));
        }
        Ok(by_schedule)
    }

    fn assemble(&self, row: TransactionRow, splits: Vec<Split>) -> Transaction {
        Transaction {
            transaction_id: row.transaction_id,
            tenant_id: self.tenant_id,
            date: row.transaction_date,
            description: row.description,
            is_scheduled: row.is_scheduled,
            splits,
        }
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    // -------------------------------------------------------------------------
    // Account Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(tenant_id = %self.tenant_id, name = %input.name))]
    async fn insert_account(&mut self, input: &CreateAccount) -> Result<Account, LedgerError> {
        let _timer = query_timer("insert_account");

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts (tenant_id, parent_account_id, name, account_type, currency, description, is_hidden)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(self.tenant_id)
        .bind(input.parent_account_id)
        .bind(&input.name)
        .bind(input.account_type.as_str())
        .bind(&input.currency)
        .bind(&input.description)
        .bind(input.is_hidden)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to create account", e))?;

        Account::try_from(row)
    }

    async fn get_account(&mut self, account_id: AccountId) -> Result<Option<Account>, LedgerError> {
        let _timer = query_timer("get_account");

        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE tenant_id = $1 AND account_id = $2",
            ACCOUNT_COLUMNS
        ))
        .bind(self.tenant_id)
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get account", e))?;

        row.map(Account::try_from).transpose()
    }

    async fn list_accounts(&mut self) -> Result<Vec<Account>, LedgerError> {
        let _timer = query_timer("list_accounts");

        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE tenant_id = $1 ORDER BY account_id",
            ACCOUNT_COLUMNS
        ))
        .bind(self.tenant_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to list accounts", e))?;

        rows.into_iter().map(Account::try_from).collect()
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), LedgerError> {
        let _timer = query_timer("update_account");

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $3, parent_account_id = $4, description = $5,
                is_hidden = $6, is_active = $7, last_reconciled = $8
            WHERE tenant_id = $1 AND account_id = $2
            "#,
        )
        .bind(self.tenant_id)
        .bind(account.account_id)
        .bind(&account.name)
        .bind(account.parent_account_id)
        .bind(&account.description)
        .bind(account.is_hidden)
        .bind(account.is_active)
        .bind(account.last_reconciled)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to update account", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownAccount(account.account_id));
        }
        Ok(())
    }

    async fn lock_accounts(&mut self, account_ids: &[AccountId]) -> Result<(), LedgerError> {
        let _timer = query_timer("lock_accounts");

        // Ascending id order so concurrent writers acquire locks in the same order.
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT account_id FROM accounts
            WHERE tenant_id = $1 AND account_id = ANY($2)
            ORDER BY account_id
            FOR UPDATE
            "#,
        )
        .bind(self.tenant_id)
        .bind(account_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to lock accounts", e))?;

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Payee and Tag Operations
    // -------------------------------------------------------------------------

    async fn insert_payee(&mut self, name: &str) -> Result<Payee, LedgerError> {
        let payee_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO payees (tenant_id, name) VALUES ($1, $2) RETURNING payee_id",
        )
        .bind(self.tenant_id)
        .bind(name)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to create payee", e))?;

        Ok(Payee {
            payee_id,
            tenant_id: self.tenant_id,
            name: name.to_string(),
        })
    }

    async fn get_payees(&mut self, payee_ids: &[PayeeId]) -> Result<Vec<Payee>, LedgerError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT payee_id, name FROM payees WHERE tenant_id = $1 AND payee_id = ANY($2)",
        )
        .bind(self.tenant_id)
        .bind(payee_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get payees", e))?;

        Ok(rows
            .into_iter()
            .map(|(payee_id, name)| Payee {
                payee_id,
                tenant_id: self.tenant_id,
                name,
            })
            .collect())
    }

    async fn insert_tag(&mut self, name: &str, color: &str) -> Result<Tag, LedgerError> {
        let tag_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO tags (tenant_id, name, color) VALUES ($1, $2, $3) RETURNING tag_id",
        )
        .bind(self.tenant_id)
        .bind(name)
        .bind(color)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::DuplicateTag(name.to_string())
            } else {
                db_error("Failed to create tag", e)
            }
        })?;

        Ok(Tag {
            tag_id,
            tenant_id: self.tenant_id,
            name: name.to_string(),
            color: color.to_string(),
        })
    }

    async fn get_tags(&mut self, tag_ids: &[TagId]) -> Result<Vec<Tag>, LedgerError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT tag_id, name, color FROM tags WHERE tenant_id = $1 AND tag_id = ANY($2)",
        )
        .bind(self.tenant_id)
        .bind(tag_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get tags", e))?;

        Ok(rows
            .into_iter()
            .map(|(tag_id, name, color)| Tag {
                tag_id,
                tenant_id: self.tenant_id,
                name,
                color,
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Transaction Operations
    // -------------------------------------------------------------------------

    async fn insert_transaction(
        &mut self,
        date: NaiveDate,
        description: Option<&str>,
        is_scheduled: bool,
    ) -> Result<TransactionId, LedgerError> {
        let _timer = query_timer("insert_transaction");

        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO transactions (tenant_id, transaction_date, description, is_scheduled)
            VALUES ($1, $2, $3, $4)
            RETURNING transaction_id
            "#,
        )
        .bind(self.tenant_id)
        .bind(date)
        .bind(description)
        .bind(is_scheduled)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert transaction", e))
    }

    async fn update_transaction(
        &mut self,
        transaction_id: TransactionId,
        date: NaiveDate,
        description: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET transaction_date = $3, description = $4
            WHERE tenant_id = $1 AND transaction_id = $2
            "#,
        )
        .bind(self.tenant_id)
        .bind(transaction_id)
        .bind(date)
        .bind(description)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to update transaction", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownTransaction(transaction_id));
        }
        Ok(())
    }

    async fn insert_split(
        &mut self,
        transaction_id: TransactionId,
        split: &NewSplit,
    ) -> Result<Split, LedgerError> {
        let _timer = query_timer("insert_split");

        let split_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO splits (transaction_id, amount, debit_account_id, credit_account_id,
                                payee_id, memo, reconciled_state, invoice_split_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING split_id
            "#,
        )
        .bind(transaction_id)
        .bind(split.amount)
        .bind(split.debit_account_id)
        .bind(split.credit_account_id)
        .bind(split.payee_id)
        .bind(&split.memo)
        .bind(split.reconciled_state.as_str())
        .bind(split.invoice_split_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert split", e))?;

        for (position, tag_id) in split.tags.iter().enumerate() {
            sqlx::query("INSERT INTO split_tags (split_id, tag_id, position) VALUES ($1, $2, $3)")
                .bind(split_id)
                .bind(tag_id)
                .bind(position as i32)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("Failed to tag split", e))?;
        }

        Ok(Split {
            split_id,
            transaction_id,
            amount: split.amount,
            debit_account_id: split.debit_account_id,
            credit_account_id: split.credit_account_id,
            payee_id: split.payee_id,
            memo: split.memo.clone(),
            tags: split.tags.clone(),
            reconciled_state: split.reconciled_state,
            invoice_split_id: split.invoice_split_id,
        })
    }

    async fn get_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let _timer = query_timer("get_transaction");

        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT transaction_id, transaction_date, description, is_scheduled
            FROM transactions
            WHERE tenant_id = $1 AND transaction_id = $2
            "#,
        )
        .bind(self.tenant_id)
        .bind(transaction_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get transaction", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut splits = self.load_splits(&[transaction_id]).await?;
        let splits = splits.remove(&transaction_id).unwrap_or_default();
        Ok(Some(self.assemble(row, splits)))
    }

    async fn delete_splits(&mut self, transaction_id: TransactionId) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM splits s
            USING transactions t
            WHERE s.transaction_id = t.transaction_id
              AND t.tenant_id = $1 AND t.transaction_id = $2
            "#,
        )
        .bind(self.tenant_id)
        .bind(transaction_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to delete splits", e))?;

        Ok(result.rows_affected())
    }

    async fn delete_transaction(
        &mut self,
        transaction_id: TransactionId,
    ) -> Result<(), LedgerError> {
        let result =
            sqlx::query("DELETE FROM transactions WHERE tenant_id = $1 AND transaction_id = $2")
                .bind(self.tenant_id)
                .bind(transaction_id)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("Failed to delete transaction", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownTransaction(transaction_id));
        }
        Ok(())
    }

    async fn transactions_for_account(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let _timer = query_timer("transactions_for_account");

        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT t.transaction_id, t.transaction_date, t.description, t.is_scheduled
            FROM transactions t
            WHERE t.tenant_id = $1
              AND EXISTS (
                  SELECT 1 FROM splits s
                  WHERE s.transaction_id = t.transaction_id
                    AND (s.debit_account_id = $2 OR s.credit_account_id = $2)
              )
            ORDER BY t.transaction_date, t.transaction_id
            "#,
        )
        .bind(self.tenant_id)
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to list account transactions", e))?;

        let ids: Vec<TransactionId> = rows.iter().map(|r| r.transaction_id).collect();
        let mut splits = self.load_splits(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let transaction_splits = splits.remove(&row.transaction_id).unwrap_or_default();
                self.assemble(row, transaction_splits)
            })
            .collect())
    }

    async fn set_reconciled_state(
        &mut self,
        split_id: SplitId,
        state: ReconciledState,
    ) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE splits s SET reconciled_state = $3
            FROM transactions t
            WHERE s.transaction_id = t.transaction_id
              AND t.tenant_id = $1 AND s.split_id = $2
            "#,
        )
        .bind(self.tenant_id)
        .bind(split_id)
        .bind(state.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to set reconciled state", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn day_total(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Decimal, LedgerError> {
        let _timer = query_timer("day_total");

        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(
                SUM(CASE WHEN s.debit_account_id = $2 THEN s.amount ELSE -s.amount END),
                0
            )
            FROM splits s
            JOIN transactions t ON t.transaction_id = s.transaction_id
            WHERE t.tenant_id = $1
              AND t.transaction_date = $3
              AND (s.debit_account_id = $2 OR s.credit_account_id = $2)
            "#,
        )
        .bind(self.tenant_id)
        .bind(account_id)
        .bind(date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to compute day total", e))?;

        Ok(total.unwrap_or(Decimal::ZERO))
    }

    // -------------------------------------------------------------------------
    // Balance Snapshot Operations
    // -------------------------------------------------------------------------

    async fn snapshot_before(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Option<BalanceSnapshot>, LedgerError> {
        let _timer = query_timer("snapshot_before");

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT account_id, snapshot_date, amount FROM balance_snapshots
            WHERE account_id = $1 AND snapshot_date < $2
            ORDER BY snapshot_date DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get previous snapshot", e))?;

        Ok(row.map(BalanceSnapshot::from))
    }

    async fn snapshot_at_or_before(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
    ) -> Result<Option<BalanceSnapshot>, LedgerError> {
        let _timer = query_timer("snapshot_at_or_before");

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT account_id, snapshot_date, amount FROM balance_snapshots
            WHERE account_id = $1 AND snapshot_date <= $2
            ORDER BY snapshot_date DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get snapshot", e))?;

        Ok(row.map(BalanceSnapshot::from))
    }

    async fn upsert_snapshot(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<BalanceSnapshot, LedgerError> {
        let _timer = query_timer("upsert_snapshot");

        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            INSERT INTO balance_snapshots (account_id, snapshot_date, amount)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id, snapshot_date) DO UPDATE SET amount = EXCLUDED.amount
            RETURNING account_id, snapshot_date, amount
            "#,
        )
        .bind(account_id)
        .bind(date)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to upsert snapshot", e))?;

        Ok(row.into())
    }

    async fn snapshots_after(
        &mut self,
        account_id: AccountId,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>, LedgerError> {
        let _timer = query_timer("snapshots_after");

        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT account_id, snapshot_date, amount FROM balance_snapshots
            WHERE account_id = $1 AND snapshot_date > $2
            ORDER BY snapshot_date
            LIMIT $3
            "#,
        )
        .bind(account_id)
        .bind(date)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get later snapshots", e))?;

        Ok(rows.into_iter().map(BalanceSnapshot::from).collect())
    }

    async fn list_snapshots(
        &mut self,
        account_id: AccountId,
    ) -> Result<Vec<BalanceSnapshot>, LedgerError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT account_id, snapshot_date, amount FROM balance_snapshots
            WHERE account_id = $1
            ORDER BY snapshot_date
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to list snapshots", e))?;

        Ok(rows.into_iter().map(BalanceSnapshot::from).collect())
    }

    // -------------------------------------------------------------------------
    // Scheduled Transaction Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, input), fields(tenant_id = %self.tenant_id, start = %input.start_date))]
    async fn insert_schedule(
        &mut self,
        input: &NewSchedule,
        next_post_date: NaiveDate,
    ) -> Result<ScheduledTransaction, LedgerError> {
        let _timer = query_timer("insert_schedule");

        let days_before = i32::try_from(input.create_n_days_before).map_err(|_| {
            LedgerError::InvalidSchedule(format!(
                "lead time of {} days is too large",
                input.create_n_days_before
            ))
        })?;

        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            r#"
            INSERT INTO scheduled_transactions (tenant_id, frequency, schedule_rule, start_date,
                                                next_post_date, create_n_days_before, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(self.tenant_id)
        .bind(input.frequency.as_str())
        .bind(input.rule.as_str())
        .bind(input.start_date)
        .bind(next_post_date)
        .bind(days_before)
        .bind(&input.description)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to insert scheduled transaction", e))?;

        for template in &input.split_templates {
            sqlx::query(
                r#"
                INSERT INTO scheduled_transaction_splits (scheduled_transaction_id, amount,
                    debit_account_id, credit_account_id, payee_id, memo, tags)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(row.scheduled_transaction_id)
            .bind(template.amount)
            .bind(template.debit_account_id)
            .bind(template.credit_account_id)
            .bind(template.payee_id)
            .bind(&template.memo)
            .bind(&template.tags)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("Failed to insert split template", e))?;
        }

        row.into_schedule(input.split_templates.clone())
    }

    async fn get_schedule(
        &mut self,
        schedule_id: ScheduleId,
    ) -> Result<Option<ScheduledTransaction>, LedgerError> {
        let _timer = query_timer("get_schedule");

        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM scheduled_transactions \
             WHERE tenant_id = $1 AND scheduled_transaction_id = $2",
            SCHEDULE_COLUMNS
        ))
        .bind(self.tenant_id)
        .bind(schedule_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to get scheduled transaction", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut templates = self.load_templates(&[schedule_id]).await?;
        let templates = templates.remove(&schedule_id).unwrap_or_default();
        row.into_schedule(templates).map(Some)
    }

    async fn list_schedules(&mut self) -> Result<Vec<ScheduledTransaction>, LedgerError> {
        let _timer = query_timer("list_schedules");

        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM scheduled_transactions WHERE tenant_id = $1 \
             ORDER BY scheduled_transaction_id",
            SCHEDULE_COLUMNS
        ))
        .bind(self.tenant_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to list scheduled transactions", e))?;

        let ids: Vec<ScheduleId> = rows.iter().map(|r| r.scheduled_transaction_id).collect();
        let mut templates = self.load_templates(&ids).await?;

        rows.into_iter()
            .map(|row| {
                let split_templates = templates
                    .remove(&row.scheduled_transaction_id)
                    .unwrap_or_default();
                row.into_schedule(split_templates)
            })
            .collect()
    }

    async fn update_schedule_dates(
        &mut self,
        schedule_id: ScheduleId,
        last_post_date: Option<NaiveDate>,
        next_post_date: NaiveDate,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_transactions SET last_post_date = $3, next_post_date = $4
            WHERE tenant_id = $1 AND scheduled_transaction_id = $2
            "#,
        )
        .bind(self.tenant_id)
        .bind(schedule_id)
        .bind(last_post_date)
        .bind(next_post_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to update scheduled transaction", e))?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::UnknownSchedule(schedule_id));
        }
        Ok(())
    }

    async fn delete_schedule(&mut self, schedule_id: ScheduleId) -> Result<bool, LedgerError> {
        let result = sqlx::query(
            r#"
            DELETE FROM scheduled_transactions
            WHERE tenant_id = $1 AND scheduled_transaction_id = $2
            "#,
        )
        .bind(self.tenant_id)
        .bind(schedule_id)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("Failed to delete scheduled transaction", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| db_error("Failed to roll back transaction", e))
    }
}
