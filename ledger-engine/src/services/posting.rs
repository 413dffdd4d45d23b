//! Posting, editing and deleting transactions.
//!
//! Every function here runs inside one caller-owned store transaction: split
//! writes and the balance repairs they trigger commit or roll back together.

use crate::error::LedgerError;
use crate::models::{
    amount_limit, AccountId, NewSplit, NewTransaction, ReconciledState, SplitId, Transaction,
    TransactionId, TransactionPatch, AMOUNT_SCALE,
};
use crate::services::propagation::{repair_from, PropagationLimits};
use crate::store::LedgerTx;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashSet};
use tracing::{info, instrument};

/// Check split shape and that every referenced row exists for this tenant.
pub async fn validate_splits<T: LedgerTx>(
    tx: &mut T,
    splits: &[NewSplit],
) -> Result<(), LedgerError> {
    if splits.is_empty() {
        return Err(LedgerError::EmptyTransaction);
    }

    for split in splits {
        if split.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidSplit(format!(
                "amount must be positive, got {}",
                split.amount
            )));
        }
        if split.amount.normalize().scale() > AMOUNT_SCALE {
            return Err(LedgerError::InvalidSplit(format!(
                "amount {} has more than {} decimal places",
                split.amount, AMOUNT_SCALE
            )));
        }
        if split.amount >= amount_limit() {
            return Err(LedgerError::InvalidSplit(format!(
                "amount {} must be below {}",
                split.amount,
                amount_limit()
            )));
        }
        if split.debit_account_id == split.credit_account_id {
            return Err(LedgerError::InvalidSplit(format!(
                "debit and credit account are both {}",
                split.debit_account_id
            )));
        }
        let mut seen = HashSet::new();
        if let Some(tag_id) = split.tags.iter().find(|t| !seen.insert(**t)) {
            return Err(LedgerError::InvalidSplit(format!(
                "tag {} listed twice",
                tag_id
            )));
        }
    }

    let mut currency: Option<String> = None;
    for account_id in split_account_set(splits) {
        let account = tx
            .get_account(account_id)
            .await?
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        let expected = currency.get_or_insert_with(|| account.currency.clone());
        if *expected != account.currency {
            return Err(LedgerError::CurrencyMismatch {
                account_id,
                expected: expected.clone(),
                found: account.currency,
            });
        }
    }

    let payee_ids: Vec<_> = splits
        .iter()
        .filter_map(|s| s.payee_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !payee_ids.is_empty() {
        let found: HashSet<_> = tx
            .get_payees(&payee_ids)
            .await?
            .into_iter()
            .map(|p| p.payee_id)
            .collect();
        if let Some(missing) = payee_ids.iter().find(|id| !found.contains(id)) {
            return Err(LedgerError::UnknownPayee(*missing));
        }
    }

    let tag_ids: Vec<_> = splits
        .iter()
        .flat_map(|s| s.tags.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if !tag_ids.is_empty() {
        let found: HashSet<_> = tx
            .get_tags(&tag_ids)
            .await?
            .into_iter()
            .map(|t| t.tag_id)
            .collect();
        if let Some(missing) = tag_ids.iter().find(|id| !found.contains(id)) {
            return Err(LedgerError::UnknownTag(*missing));
        }
    }

    Ok(())
}

fn split_account_set(splits: &[NewSplit]) -> BTreeSet<AccountId> {
    splits
        .iter()
        .flat_map(|s| [s.debit_account_id, s.credit_account_id])
        .collect()
}

async fn repair_all<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    targets: &BTreeSet<(NaiveDate, AccountId)>,
) -> Result<(), LedgerError> {
    for &(date, account_id) in targets {
        repair_from(tx, limits, account_id, date).await?;
    }
    Ok(())
}

/// Write a transaction with its splits and repair every touched account.
#[instrument(skip(tx, limits, input), fields(tenant_id = %tx.tenant_id(), date = %input.date))]
pub async fn post_transaction<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    input: &NewTransaction,
) -> Result<Transaction, LedgerError> {
    validate_splits(tx, &input.splits).await?;

    let accounts = input.accounts();
    tx.lock_accounts(&accounts.iter().copied().collect::<Vec<_>>())
        .await?;

    let transaction_id = tx
        .insert_transaction(input.date, input.description.as_deref(), input.is_scheduled)
        .await?;
    let mut splits = Vec::with_capacity(input.splits.len());
    for split in &input.splits {
        splits.push(tx.insert_split(transaction_id, split).await?);
    }

    let targets = accounts.iter().map(|&a| (input.date, a)).collect();
    repair_all(tx, limits, &targets).await?;

    info!(
        transaction_id = transaction_id,
        splits = splits.len(),
        accounts = accounts.len(),
        "Transaction posted"
    );

    Ok(Transaction {
        transaction_id,
        tenant_id: tx.tenant_id(),
        date: input.date,
        description: input.description.clone(),
        is_scheduled: input.is_scheduled,
        splits,
    })
}

/// Apply a patch. Accounts touched before the edit are repaired at the old
/// date and accounts touched after it at the new date, earliest date first.
#[instrument(skip(tx, limits, patch), fields(tenant_id = %tx.tenant_id()))]
pub async fn edit_transaction<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    transaction_id: TransactionId,
    patch: &TransactionPatch,
) -> Result<Transaction, LedgerError> {
    let existing = tx
        .get_transaction(transaction_id)
        .await?
        .ok_or(LedgerError::UnknownTransaction(transaction_id))?;

    if let Some(splits) = &patch.splits {
        validate_splits(tx, splits).await?;
    }

    let new_date = patch.date.unwrap_or(existing.date);
    let description = patch
        .description
        .as_deref()
        .or(existing.description.as_deref());
    let old_accounts = existing.accounts();
    let new_accounts = match &patch.splits {
        Some(splits) => split_account_set(splits),
        None => old_accounts.clone(),
    };

    let locked: Vec<_> = old_accounts.union(&new_accounts).copied().collect();
    tx.lock_accounts(&locked).await?;

    tx.update_transaction(transaction_id, new_date, description)
        .await?;

    if let Some(splits) = &patch.splits {
        tx.delete_splits(transaction_id).await?;
        for split in splits {
            tx.insert_split(transaction_id, split).await?;
        }
    }

    let balances_changed = patch.splits.is_some() || new_date != existing.date;
    if balances_changed {
        let targets: BTreeSet<_> = old_accounts
            .iter()
            .map(|&a| (existing.date, a))
            .chain(new_accounts.iter().map(|&a| (new_date, a)))
            .collect();
        repair_all(tx, limits, &targets).await?;
    }

    info!(
        transaction_id = transaction_id,
        old_date = %existing.date,
        new_date = %new_date,
        splits_replaced = patch.splits.is_some(),
        "Transaction edited"
    );

    tx.get_transaction(transaction_id)
        .await?
        .ok_or(LedgerError::UnknownTransaction(transaction_id))
}

/// Remove a transaction and shrink every touched account back down.
/// Returns the transaction as it was before deletion.
#[instrument(skip(tx, limits), fields(tenant_id = %tx.tenant_id()))]
pub async fn delete_transaction<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    transaction_id: TransactionId,
) -> Result<Transaction, LedgerError> {
    let existing = tx
        .get_transaction(transaction_id)
        .await?
        .ok_or(LedgerError::UnknownTransaction(transaction_id))?;

    let accounts = existing.accounts();
    tx.lock_accounts(&accounts.iter().copied().collect::<Vec<_>>())
        .await?;

    tx.delete_splits(transaction_id).await?;
    let targets = accounts.iter().map(|&a| (existing.date, a)).collect();
    repair_all(tx, limits, &targets).await?;
    tx.delete_transaction(transaction_id).await?;

    info!(
        transaction_id = transaction_id,
        date = %existing.date,
        accounts = accounts.len(),
        "Transaction deleted"
    );

    Ok(existing)
}

/// Reconciliation markers never affect balances, so no repair runs.
pub async fn set_reconciled_state<T: LedgerTx>(
    tx: &mut T,
    split_id: SplitId,
    state: ReconciledState,
) -> Result<(), LedgerError> {
    if !tx.set_reconciled_state(split_id, state).await? {
        return Err(LedgerError::UnknownSplit(split_id));
    }
    Ok(())
}
