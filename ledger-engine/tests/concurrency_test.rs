//! Concurrent writers and readers against one ledger.

mod common;

use chrono::NaiveDate;
use common::{
    assert_snapshots_match_splits, balance, create_test_account, post_test_transaction,
    spawn_ledger,
};
use futures::future::join_all;
use ledger_engine::models::{AccountType, NewSplit, NewTransaction, TransactionPatch};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

/// Distinct days in an order that keeps backdating into existing history.
const DAYS: [u32; 12] = [15, 3, 27, 9, 21, 1, 30, 12, 6, 24, 18, 2];

/// One unit per distinct day means a consistent timeline reads 1, 2, ..., n.
fn is_whole_timeline(amounts: &[Decimal]) -> bool {
    amounts
        .iter()
        .enumerate()
        .all(|(i, amount)| *amount == Decimal::from(i + 1))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_backdated_posts_never_expose_partial_timelines() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let salary = create_test_account(&ledger, tenant_id, "SALARY", AccountType::Income).await;
    let ledger = &ledger;

    let writes = DAYS.iter().map(|&day| async move {
        let input =
            NewTransaction::new(jan(day), "tick").split(NewSplit::new(dec!(1), chk, salary));
        ledger.post_transaction(tenant_id, &input).await
    });
    let reads = (0..DAYS.len()).map(|_| async move {
        tokio::task::yield_now().await;
        ledger.list_snapshots(tenant_id, chk).await
    });

    let (posted, observed) = tokio::join!(join_all(writes), join_all(reads));

    let ids: Vec<_> = posted
        .into_iter()
        .collect::<Result<_, _>>()
        .expect("every post succeeds");
    for snapshots in observed {
        let amounts: Vec<Decimal> = snapshots.unwrap().iter().map(|s| s.amount).collect();
        assert!(is_whole_timeline(&amounts), "partial timeline {:?}", amounts);
    }

    assert_snapshots_match_splits(ledger, tenant_id, &[chk, salary], &ids).await;
    assert_eq!(
        balance(ledger, tenant_id, chk, "2024-01-31").await,
        Decimal::from(DAYS.len())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_edits_and_deletes_keep_snapshots_consistent() {
    let (ledger, tenant_id) = spawn_ledger();
    let chk = create_test_account(&ledger, tenant_id, "CHK", AccountType::Asset).await;
    let savings = create_test_account(&ledger, tenant_id, "SAVINGS", AccountType::Asset).await;
    let rent = create_test_account(&ledger, tenant_id, "RENT", AccountType::Expense).await;
    let accounts = [chk, savings, rent];

    let mut ids = Vec::new();
    for (i, &day) in DAYS.iter().enumerate() {
        let (debit, credit) = if i % 2 == 0 { (rent, chk) } else { (savings, chk) };
        let on = format!("2024-01-{:02}", day);
        let amount = Decimal::from(10 + i);
        ids.push(post_test_transaction(&ledger, tenant_id, &on, amount, debit, credit).await);
    }

    let ledger = &ledger;
    let (to_delete, to_edit) = ids.split_at(ids.len() / 2);
    let deletes = to_delete
        .iter()
        .map(|&id| async move { ledger.delete_transaction(tenant_id, id).await });
    let edits = to_edit.iter().enumerate().map(|(i, &id)| async move {
        let patch = TransactionPatch {
            date: Some(jan(1 + (i as u32 * 5) % 28)),
            splits: Some(vec![NewSplit::new(dec!(7.25), chk, savings)]),
            ..TransactionPatch::default()
        };
        ledger.edit_transaction(tenant_id, id, &patch).await
    });

    let (deleted, edited) = tokio::join!(join_all(deletes), join_all(edits));
    assert!(deleted.iter().all(Result::is_ok));
    assert!(edited.iter().all(Result::is_ok));

    assert_snapshots_match_splits(ledger, tenant_id, &accounts, to_edit).await;
    assert_eq!(
        balance(ledger, tenant_id, chk, "2024-01-31").await,
        dec!(7.25) * Decimal::from(to_edit.len())
    );
    assert_eq!(balance(ledger, tenant_id, rent, "2024-01-31").await, Decimal::ZERO);
}
