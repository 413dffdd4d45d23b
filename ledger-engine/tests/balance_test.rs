//! Balance snapshot propagation integration tests.

mod common;

use common::{
    balance, create_test_account, date, post_test_transaction, spawn_ledger, spawn_ledger_with,
};
use ledger_engine::models::{AccountType, NewSplit, NewTransaction, TransactionPatch};
use ledger_engine::services::PropagationLimits;
use ledger_engine::LedgerError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn backdated_insert_repairs_later_snapshots() {
    let (ledger, tenant_id) = spawn_ledger();
    let a = create_test_account(&ledger, tenant_id, "A", AccountType::Asset).await;
    let equity = create_test_account(&ledger, tenant_id, "OPENING", AccountType::Equity).await;

    post_test_transaction(&ledger, tenant_id, "2024-02-01", dec!(100), a, equity).await;
    assert_eq!(balance(&ledger, tenant_id, a, "2024-02-01").await, dec!(100));

    post_test_transaction(&ledger, tenant_id, "2024-01-15", dec!(20), a, equity).await;

    assert_eq!(balance(&ledger, tenant_id, a, "2024-01-15").await, dec!(20));
    assert_eq!(balance(&ledger, tenant_id, a, "2024-02-01").await, dec!(120));
    assert_eq!(balance(&ledger, tenant_id, equity, "2024-02-01").await, dec!(-120));
}

#[tokio::test]
async fn balance_between_snapshots_uses_latest_earlier_one() {
    let (ledger, tenant_id) = spawn_ledger();
    let a = create_test_account(&ledger, tenant_id, "A", AccountType::Asset).await;
    let income = create_test_account(&ledger, tenant_id, "PAY", AccountType::Income).await;

    post_test_transaction(&ledger, tenant_id, "2024-01-10", dec!(10), a, income).await;
    post_test_transaction(&ledger, tenant_id, "2024-01-20", dec!(5), a, income).await;

    assert_eq!(balance(&ledger, tenant_id, a, "2024-01-01").await, Decimal::ZERO);
    assert_eq!(balance(&ledger, tenant_id, a, "2024-01-15").await, dec!(10));
    assert_eq!(balance(&ledger, tenant_id, a, "2024-12-31").await, dec!(15));
}

#[tokio::test]
async fn same_day_postings_are_not_double_counted() {
    let (ledger, tenant_id) = spawn_ledger();
    let a = create_test_account(&ledger, tenant_id, "A", AccountType::Asset).await;
    let income = create_test_account(&ledger, tenant_id, "PAY", AccountType::Income).await;

    for _ in 0..3 {
        post_test_transaction(&ledger, tenant_id, "2024-04-01", dec!(7), a, income).await;
    }

    assert_eq!(balance(&ledger, tenant_id, a, "2024-04-01").await, dec!(21));
    let snapshots = ledger.list_snapshots(tenant_id, a).await.unwrap();
    assert_eq!(snapshots.len(), 1);
}

#[tokio::test]
async fn multi_split_transaction_repairs_every_account() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let rent = create_test_account(&ledger, tenant_id, "RENT", AccountType::Expense).await;
    let food = create_test_account(&ledger, tenant_id, "FOOD", AccountType::Expense).await;

    ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(date("2024-05-01"), "month start")
                .split(NewSplit::new(dec!(900), rent, chk))
                .split(NewSplit::new(dec!(150.25), food, chk)),
        )
        .await
        .unwrap();

    assert_eq!(balance(&ledger, tenant_id, chk, "2024-05-01").await, dec!(-1050.25));
    assert_eq!(balance(&ledger, tenant_id, rent, "2024-05-01").await, dec!(900));
    assert_eq!(balance(&ledger, tenant_id, food, "2024-05-01").await, dec!(150.25));
}

#[tokio::test]
async fn rebuild_is_idempotent() {
    let (ledger, tenant_id) = spawn_ledger();
    let a = create_test_account(&ledger, tenant_id, "A", AccountType::Asset).await;
    let income = create_test_account(&ledger, tenant_id, "PAY", AccountType::Income).await;

    for (on, amount) in [("2024-03-03", dec!(3)), ("2024-03-01", dec!(1)), ("2024-03-02", dec!(2))] {
        post_test_transaction(&ledger, tenant_id, on, amount, a, income).await;
    }
    let before = ledger.list_snapshots(tenant_id, a).await.unwrap();

    assert_eq!(ledger.rebuild_snapshots(tenant_id, a).await.unwrap(), 3);
    assert_eq!(ledger.rebuild_snapshots(tenant_id, a).await.unwrap(), 3);

    let after = ledger.list_snapshots(tenant_id, a).await.unwrap();
    assert_eq!(before, after);
    let amounts: Vec<_> = after.iter().map(|s| s.amount).collect();
    assert_eq!(amounts, vec![dec!(1), dec!(3), dec!(6)]);
}

#[tokio::test]
async fn propagation_too_large_rolls_back_everything() {
    let (ledger, tenant_id) = spawn_ledger_with(PropagationLimits {
        max_forward_snapshots: 2,
        ..Default::default()
    });
    let a = create_test_account(&ledger, tenant_id, "A", AccountType::Asset).await;
    let income = create_test_account(&ledger, tenant_id, "PAY", AccountType::Income).await;

    for on in ["2024-01-02", "2024-01-03", "2024-01-04"] {
        post_test_transaction(&ledger, tenant_id, on, dec!(1), a, income).await;
    }
    let snapshots_before = ledger.list_snapshots(tenant_id, a).await.unwrap();

    let err = ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(date("2024-01-01"), "too far back")
                .split(NewSplit::new(dec!(50), a, income)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::PropagationTooLarge { limit: 2, .. }));
    assert_eq!(ledger.list_snapshots(tenant_id, a).await.unwrap(), snapshots_before);
    assert_eq!(ledger.get_account_ledger(tenant_id, a).await.unwrap().len(), 3);
    assert_eq!(balance(&ledger, tenant_id, a, "2024-01-04").await, dec!(3));
}

#[tokio::test]
async fn edit_moving_transaction_later_repairs_both_dates() {
    let (ledger, tenant_id) = spawn_ledger();
    let a = create_test_account(&ledger, tenant_id, "A", AccountType::Asset).await;
    let income = create_test_account(&ledger, tenant_id, "PAY", AccountType::Income).await;

    let early = post_test_transaction(&ledger, tenant_id, "2024-01-05", dec!(10), a, income).await;
    post_test_transaction(&ledger, tenant_id, "2024-01-10", dec!(1), a, income).await;

    ledger
        .edit_transaction(
            tenant_id,
            early,
            &TransactionPatch {
                date: Some(date("2024-01-20")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(balance(&ledger, tenant_id, a, "2024-01-05").await, Decimal::ZERO);
    assert_eq!(balance(&ledger, tenant_id, a, "2024-01-10").await, dec!(1));
    assert_eq!(balance(&ledger, tenant_id, a, "2024-01-20").await, dec!(11));
}

#[tokio::test]
async fn balance_of_unknown_account_fails() {
    let (ledger, tenant_id) = spawn_ledger();

    let err = ledger
        .get_account_balance(tenant_id, 77, date("2024-01-01"))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::UnknownAccount(77)));
}
