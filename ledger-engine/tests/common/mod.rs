//! Common test utilities for ledger-engine integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use ledger_engine::models::{
    AccountId, AccountType, CreateAccount, NewSplit, NewTransaction, TransactionId,
};
use ledger_engine::services::{PropagationLimits, RetryConfig};
use ledger_engine::store::{LedgerStore, MemoryStore};
use ledger_engine::Ledger;
use rust_decimal::Decimal;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,ledger_engine=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// In-memory ledger with a fresh tenant.
pub fn spawn_ledger() -> (Ledger<MemoryStore>, Uuid) {
    spawn_ledger_with(PropagationLimits::default())
}

pub fn spawn_ledger_with(limits: PropagationLimits) -> (Ledger<MemoryStore>, Uuid) {
    init_tracing();
    let ledger = Ledger::new(MemoryStore::new())
        .with_limits(limits)
        .with_retry(RetryConfig::no_retry());
    (ledger, Uuid::new_v4())
}

pub fn date(s: &str) -> NaiveDate {
    s.parse().expect("test dates are ISO formatted")
}

/// Helper to create a root account for testing.
pub async fn create_test_account(
    ledger: &Ledger<MemoryStore>,
    tenant_id: Uuid,
    name: &str,
    account_type: AccountType,
) -> AccountId {
    ledger
        .create_account(tenant_id, &CreateAccount::new(name, account_type, "USD"))
        .await
        .expect("Failed to create account")
        .account_id
}

/// Helper to post a single-split transaction.
pub async fn post_test_transaction(
    ledger: &Ledger<MemoryStore>,
    tenant_id: Uuid,
    on: &str,
    amount: Decimal,
    debit: AccountId,
    credit: AccountId,
) -> i64 {
    ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(date(on), "test").split(NewSplit::new(amount, debit, credit)),
        )
        .await
        .expect("Failed to post transaction")
}

pub async fn balance(
    ledger: &Ledger<MemoryStore>,
    tenant_id: Uuid,
    account_id: AccountId,
    on: &str,
) -> Decimal {
    ledger
        .get_account_balance(tenant_id, account_id, date(on))
        .await
        .expect("Failed to get balance")
}

/// Assert every snapshot of every account equals the net of the raw splits of
/// `transaction_ids` dated on or before it, and that each active date has one.
pub async fn assert_snapshots_match_splits<S: LedgerStore>(
    ledger: &Ledger<S>,
    tenant_id: Uuid,
    accounts: &[AccountId],
    transaction_ids: &[TransactionId],
) {
    let mut transactions = Vec::new();
    for id in transaction_ids {
        transactions.push(
            ledger
                .get_transaction(tenant_id, *id)
                .await
                .expect("Failed to load transaction"),
        );
    }

    for &account in accounts {
        let snapshots = ledger
            .list_snapshots(tenant_id, account)
            .await
            .expect("Failed to list snapshots");
        for snapshot in &snapshots {
            let expected: Decimal = transactions
                .iter()
                .filter(|t| t.date <= snapshot.snapshot_date)
                .map(|t| t.effect_on(account))
                .sum();
            assert_eq!(
                snapshot.amount, expected,
                "account {} snapshot on {}",
                account, snapshot.snapshot_date
            );
        }
        for transaction in transactions.iter().filter(|t| t.accounts().contains(&account)) {
            assert!(
                snapshots.iter().any(|s| s.snapshot_date == transaction.date),
                "account {} has no snapshot on {}",
                account,
                transaction.date
            );
        }
    }
}
