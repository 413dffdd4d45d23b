//! Transaction posting, editing and deletion integration tests.

mod common;

use common::{balance, create_test_account, date, post_test_transaction, spawn_ledger};
use ledger_engine::models::{
    AccountType, NewSplit, NewTransaction, ReconciledState, TransactionPatch, TransactionType,
};
use ledger_engine::LedgerError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn salary_deposit_then_delete() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let salary = create_test_account(&ledger, tenant_id, "SALARY", AccountType::Income).await;

    let transaction_id =
        post_test_transaction(&ledger, tenant_id, "2024-03-01", dec!(1000), chk, salary).await;

    assert_eq!(balance(&ledger, tenant_id, chk, "2024-03-01").await, dec!(1000));
    assert_eq!(balance(&ledger, tenant_id, salary, "2024-03-01").await, dec!(-1000));

    let rows = ledger.get_account_ledger(tenant_id, chk).await.unwrap();
    assert_eq!(rows.len(), 1);
    let line = rows[0].split.as_ref().unwrap();
    assert_eq!(line.transaction_type, TransactionType::Deposit);
    assert_eq!(line.transaction_type.as_str(), "deposit");

    ledger
        .delete_transaction(tenant_id, transaction_id)
        .await
        .unwrap();

    assert_eq!(balance(&ledger, tenant_id, chk, "2024-03-01").await, Decimal::ZERO);
    assert_eq!(balance(&ledger, tenant_id, salary, "2024-03-01").await, Decimal::ZERO);
    assert!(matches!(
        ledger.get_transaction(tenant_id, transaction_id).await,
        Err(LedgerError::UnknownTransaction(_))
    ));
    assert!(ledger
        .get_account_ledger(tenant_id, chk)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn posted_transaction_is_zero_sum() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let rent = create_test_account(&ledger, tenant_id, "RENT", AccountType::Expense).await;
    let food = create_test_account(&ledger, tenant_id, "FOOD", AccountType::Expense).await;

    let id = ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(date("2024-05-01"), "split bill")
                .split(NewSplit::new(dec!(60), rent, chk))
                .split(NewSplit::new(dec!(40), food, chk).with_memo("groceries")),
        )
        .await
        .unwrap();

    let transaction = ledger.get_transaction(tenant_id, id).await.unwrap();
    let net: Decimal = transaction
        .accounts()
        .into_iter()
        .map(|account| transaction.effect_on(account))
        .sum();
    assert_eq!(net, Decimal::ZERO);
    assert_eq!(transaction.total_amount(), dec!(100));
    assert_eq!(transaction.splits[1].memo.as_deref(), Some("groceries"));
}

#[tokio::test]
async fn edit_replacing_splits_repairs_old_and_new_accounts() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let rent = create_test_account(&ledger, tenant_id, "RENT", AccountType::Expense).await;
    let food = create_test_account(&ledger, tenant_id, "FOOD", AccountType::Expense).await;

    let id = post_test_transaction(&ledger, tenant_id, "2024-05-10", dec!(80), rent, chk).await;

    let edited = ledger
        .edit_transaction(
            tenant_id,
            id,
            &TransactionPatch {
                date: Some(date("2024-05-02")),
                description: Some("actually groceries".to_string()),
                splits: Some(vec![NewSplit::new(dec!(75), food, chk)]),
            },
        )
        .await
        .unwrap();

    assert_eq!(edited.date, date("2024-05-02"));
    assert_eq!(edited.splits.len(), 1);
    assert_eq!(balance(&ledger, tenant_id, rent, "2024-05-31").await, Decimal::ZERO);
    assert_eq!(balance(&ledger, tenant_id, food, "2024-05-31").await, dec!(75));
    assert_eq!(balance(&ledger, tenant_id, chk, "2024-05-02").await, dec!(-75));
    assert_eq!(balance(&ledger, tenant_id, chk, "2024-05-31").await, dec!(-75));
}

#[tokio::test]
async fn invalid_postings_are_rejected() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let rent = create_test_account(&ledger, tenant_id, "RENT", AccountType::Expense).await;
    let on = date("2024-01-01");

    let err = ledger
        .post_transaction(tenant_id, &NewTransaction::new(on, "nothing"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::EmptyTransaction));

    let err = ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(on, "zero").split(NewSplit::new(dec!(0), rent, chk)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidSplit(_)));

    let err = ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(on, "self").split(NewSplit::new(dec!(5), chk, chk)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidSplit(_)));

    let err = ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(on, "nowhere").split(NewSplit::new(dec!(5), 999, chk)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownAccount(999)));

    assert_eq!(balance(&ledger, tenant_id, chk, "2024-01-01").await, Decimal::ZERO);
}

#[tokio::test]
async fn amounts_outside_stored_precision_are_rejected() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let pay = create_test_account(&ledger, tenant_id, "PAY", AccountType::Income).await;
    let on = date("2024-01-01");

    let huge = NewTransaction::new(on, "huge")
        .split(NewSplit::new(Decimal::MAX, chk, pay))
        .split(NewSplit::new(Decimal::MAX, chk, pay));
    let err = ledger.post_transaction(tenant_id, &huge).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidSplit(_)));

    let tiny = NewTransaction::new(on, "tiny").split(NewSplit::new(dec!(0.00001), chk, pay));
    let err = ledger.post_transaction(tenant_id, &tiny).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidSplit(_)));

    let fine = NewTransaction::new(on, "fine").split(NewSplit::new(dec!(1.2345), chk, pay));
    let id = ledger.post_transaction(tenant_id, &fine).await.unwrap();

    // Edits go through the same checks.
    let patch = TransactionPatch {
        splits: Some(vec![NewSplit::new(dec!(1.23456), chk, pay)]),
        ..TransactionPatch::default()
    };
    let err = ledger.edit_transaction(tenant_id, id, &patch).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidSplit(_)));

    assert_eq!(balance(&ledger, tenant_id, chk, "2024-01-01").await, dec!(1.2345));
}

#[tokio::test]
async fn balance_out_of_range_rolls_back() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let pay = create_test_account(&ledger, tenant_id, "PAY", AccountType::Income).await;
    let largest = ledger_engine::models::amount_limit() - dec!(0.0001);

    post_test_transaction(&ledger, tenant_id, "2024-01-01", largest, chk, pay).await;

    let result = ledger
        .post_transaction(
            tenant_id,
            &NewTransaction::new(date("2024-01-02"), "one more")
                .split(NewSplit::new(dec!(1), chk, pay)),
        )
        .await;
    assert!(matches!(result, Err(LedgerError::PropagationFailure { .. })));

    assert_eq!(balance(&ledger, tenant_id, chk, "2024-01-31").await, largest);
    assert_eq!(ledger.list_snapshots(tenant_id, chk).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_transactions_are_reported() {
    let (ledger, tenant_id) = spawn_ledger();

    assert!(matches!(
        ledger.delete_transaction(tenant_id, 5).await,
        Err(LedgerError::UnknownTransaction(5))
    ));
    assert!(matches!(
        ledger
            .edit_transaction(tenant_id, 5, &TransactionPatch::default())
            .await,
        Err(LedgerError::UnknownTransaction(5))
    ));
}

#[tokio::test]
async fn reconciled_state_does_not_touch_balances() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let salary = create_test_account(&ledger, tenant_id, "SALARY", AccountType::Income).await;
    let id = post_test_transaction(&ledger, tenant_id, "2024-03-01", dec!(10), chk, salary).await;
    let split_id = ledger.get_transaction(tenant_id, id).await.unwrap().splits[0].split_id;

    ledger
        .set_reconciled_state(tenant_id, split_id, ReconciledState::Cleared)
        .await
        .unwrap();

    let transaction = ledger.get_transaction(tenant_id, id).await.unwrap();
    assert_eq!(transaction.splits[0].reconciled_state, ReconciledState::Cleared);
    assert_eq!(balance(&ledger, tenant_id, chk, "2024-03-01").await, dec!(10));

    assert!(matches!(
        ledger
            .set_reconciled_state(tenant_id, 12_345, ReconciledState::Reconciled)
            .await,
        Err(LedgerError::UnknownSplit(12_345))
    ));
}
