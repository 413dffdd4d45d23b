//! Account hierarchy integration tests.

mod common;

use common::{create_test_account, date, spawn_ledger};
use ledger_engine::models::{AccountType, CreateAccount};
use ledger_engine::LedgerError;

#[tokio::test]
async fn create_account_upper_cases_name_and_currency() {
    let (ledger, tenant_id) = spawn_ledger();

    let account = ledger
        .create_account(
            tenant_id,
            &CreateAccount::new("checking", AccountType::Asset, "usd").with_description("Main"),
        )
        .await
        .unwrap();

    assert_eq!(account.name, "CHECKING");
    assert_eq!(account.currency, "USD");
    assert_eq!(account.description.as_deref(), Some("Main"));
    assert!(account.is_root());
}

#[tokio::test]
async fn full_name_and_level_follow_parent_chain() {
    let (ledger, tenant_id) = spawn_ledger();
    let home = create_test_account(&ledger, tenant_id, "home", AccountType::Expense).await;
    let utilities = ledger
        .create_account(
            tenant_id,
            &CreateAccount::new("utilities", AccountType::Expense, "USD").under(home),
        )
        .await
        .unwrap();
    let water = ledger
        .create_account(
            tenant_id,
            &CreateAccount::new("water", AccountType::Expense, "USD").under(utilities.account_id),
        )
        .await
        .unwrap();

    let details = ledger.get_account(tenant_id, water.account_id).await.unwrap();
    assert_eq!(details.full_name, "EXPENSE.HOME.UTILITIES.WATER");
    assert_eq!(details.level, 2);

    let root = ledger.get_account(tenant_id, home).await.unwrap();
    assert_eq!(root.full_name, "EXPENSE.HOME");
    assert_eq!(root.level, 0);
}

#[tokio::test]
async fn child_of_unpersisted_parent_is_rejected() {
    let (ledger, tenant_id) = spawn_ledger();

    let err = ledger
        .create_account(
            tenant_id,
            &CreateAccount::new("orphan", AccountType::Asset, "USD").under(4242),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::ParentNotPersisted(4242)));
}

#[tokio::test]
async fn invalid_and_duplicate_names_are_rejected() {
    let (ledger, tenant_id) = spawn_ledger();
    create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;

    let err = ledger
        .create_account(tenant_id, &CreateAccount::new("chk", AccountType::Asset, "USD"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateAccount(name) if name == "CHK"));

    // Same name under another type is a different account.
    ledger
        .create_account(tenant_id, &CreateAccount::new("chk", AccountType::Liability, "USD"))
        .await
        .unwrap();

    let err = ledger
        .create_account(tenant_id, &CreateAccount::new("a.b", AccountType::Asset, "USD"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAccount(_)));
}

#[tokio::test]
async fn child_must_share_parent_type() {
    let (ledger, tenant_id) = spawn_ledger();
    let assets = create_test_account(&ledger, tenant_id, "BANK", AccountType::Asset).await;

    let err = ledger
        .create_account(
            tenant_id,
            &CreateAccount::new("rent", AccountType::Expense, "USD").under(assets),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::InvalidAccount(_)));
}

#[tokio::test]
async fn rename_is_visible_on_descendants() {
    let (ledger, tenant_id) = spawn_ledger();
    let bank = create_test_account(&ledger, tenant_id, "BANK", AccountType::Asset).await;
    let savings = ledger
        .create_account(
            tenant_id,
            &CreateAccount::new("savings", AccountType::Asset, "USD").under(bank),
        )
        .await
        .unwrap();

    ledger.rename_account(tenant_id, bank, "credit union").await.unwrap();

    let details = ledger
        .get_account(tenant_id, savings.account_id)
        .await
        .unwrap();
    assert_eq!(details.full_name, "ASSET.CREDIT UNION.SAVINGS");
}

#[tokio::test]
async fn move_rejects_cycles() {
    let (ledger, tenant_id) = spawn_ledger();
    let a = create_test_account(&ledger, tenant_id, "A", AccountType::Asset).await;
    let b = ledger
        .create_account(tenant_id, &CreateAccount::new("B", AccountType::Asset, "USD").under(a))
        .await
        .unwrap()
        .account_id;
    let c = ledger
        .create_account(tenant_id, &CreateAccount::new("C", AccountType::Asset, "USD").under(b))
        .await
        .unwrap()
        .account_id;

    let err = ledger.move_account(tenant_id, a, Some(c)).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountCycle { account, parent } if account == a && parent == c));

    let err = ledger.move_account(tenant_id, a, Some(a)).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountCycle { .. }));

    // Detaching to the root is always allowed.
    let moved = ledger.move_account(tenant_id, c, None).await.unwrap();
    assert!(moved.is_root());
    let details = ledger.get_account(tenant_id, c).await.unwrap();
    assert_eq!(details.full_name, "ASSET.C");
}

#[tokio::test]
async fn list_accounts_orders_by_full_name() {
    let (ledger, tenant_id) = spawn_ledger();
    create_test_account(&ledger, tenant_id, "SALARY", AccountType::Income).await;
    let bank = create_test_account(&ledger, tenant_id, "BANK", AccountType::Asset).await;
    ledger
        .create_account(tenant_id, &CreateAccount::new("CHK", AccountType::Asset, "USD").under(bank))
        .await
        .unwrap();

    let names: Vec<_> = ledger
        .list_accounts(tenant_id)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.full_name)
        .collect();

    assert_eq!(names, vec!["ASSET.BANK", "ASSET.BANK.CHK", "INCOME.SALARY"]);
}

#[tokio::test]
async fn mark_account_reconciled_sets_date() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;

    let account = ledger
        .mark_account_reconciled(tenant_id, chk, date("2024-06-30"))
        .await
        .unwrap();

    assert_eq!(account.last_reconciled, Some(date("2024-06-30")));
}

#[tokio::test]
async fn tags_default_to_yellow_and_are_unique() {
    let (ledger, tenant_id) = spawn_ledger();

    let tag = ledger.create_tag(tenant_id, "travel", None).await.unwrap();
    assert_eq!(tag.color, "yellow");

    let err = ledger
        .create_tag(tenant_id, "travel", Some("blue"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateTag(_)));
}
