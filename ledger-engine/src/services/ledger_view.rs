//! Account register: newest-first rows with running balances.

use crate::error::LedgerError;
use crate::models::{
    AccountId, LedgerRow, PayeeId, Split, SplitId, SplitLine, Tag, TagId, TagLabel, Transaction,
    TransactionId, TransactionType,
};
use crate::services::hierarchy::AccountTree;
use crate::store::LedgerTx;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use tracing::instrument;

/// Position of a row inside its transaction. Sorting keys descending puts
/// the parent first, then split rows by ascending split id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RowRank {
    Split(Reverse<SplitId>),
    Parent,
}

type RowKey = (NaiveDate, TransactionId, RowRank);

/// Names resolved once per build.
struct Lookups {
    accounts: AccountTree,
    payees: HashMap<PayeeId, String>,
    tags: HashMap<TagId, Tag>,
}

impl Lookups {
    fn split_line(&self, split: &Split, signed_amount: Decimal) -> Result<SplitLine, LedgerError> {
        let credit = self
            .accounts
            .get(split.credit_account_id)
            .ok_or(LedgerError::UnknownAccount(split.credit_account_id))?;
        let debit = self
            .accounts
            .get(split.debit_account_id)
            .ok_or(LedgerError::UnknownAccount(split.debit_account_id))?;

        Ok(SplitLine {
            split_id: split.split_id,
            amount: signed_amount,
            payee_id: split.payee_id,
            payee_name: split.payee_id.and_then(|id| self.payees.get(&id).cloned()),
            credit_account_id: credit.account_id,
            credit_account_name: self.accounts.full_name(credit.account_id)?,
            credit_account_type: credit.account_type,
            debit_account_id: debit.account_id,
            debit_account_name: self.accounts.full_name(debit.account_id)?,
            debit_account_type: debit.account_type,
            transaction_type: TransactionType::classify(credit.account_type, debit.account_type),
            reconciled_state: split.reconciled_state,
            invoice_split_id: split.invoice_split_id,
            memo: split.memo.clone(),
            tags: split
                .tags
                .iter()
                .filter_map(|id| self.tags.get(id))
                .map(|t| TagLabel {
                    name: t.name.clone(),
                    color: t.color.clone(),
                })
                .collect(),
        })
    }
}

/// Rows for one transaction as seen from `account_id`.
///
/// A single-split transaction is one parent row carrying its split. A
/// multi-split transaction is a parent row with the total followed by one
/// row per split.
fn flatten(
    transaction: &Transaction,
    account_id: AccountId,
    lookups: &Lookups,
) -> Result<Vec<(RowKey, LedgerRow)>, LedgerError> {
    let total = transaction.effect_on(account_id);
    let header = |split: Option<SplitLine>, total: Option<Decimal>, is_parent: bool| LedgerRow {
        transaction_id: transaction.transaction_id,
        transaction_date: transaction.date,
        description: transaction.description.clone(),
        is_scheduled: transaction.is_scheduled,
        is_split_parent: is_parent,
        total,
        balance_after: None,
        split,
    };
    let key = |rank| (transaction.date, transaction.transaction_id, rank);

    if let [split] = transaction.splits.as_slice() {
        let line = lookups.split_line(split, split.effect_on(account_id))?;
        return Ok(vec![(key(RowRank::Parent), header(Some(line), Some(total), true))]);
    }

    let mut rows = Vec::with_capacity(transaction.splits.len() + 1);
    rows.push((key(RowRank::Parent), header(None, Some(total), true)));
    for split in &transaction.splits {
        let line = lookups.split_line(split, split.effect_on(account_id))?;
        rows.push((
            key(RowRank::Split(Reverse(split.split_id))),
            header(Some(line), None, false),
        ));
    }
    Ok(rows)
}

/// Newest first by (date, transaction id, row rank).
fn sort_rows(mut keyed: Vec<(RowKey, LedgerRow)>) -> Vec<LedgerRow> {
    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    keyed.into_iter().map(|(_, row)| row).collect()
}

/// Walk newest-first rows from the oldest end, threading a running balance
/// through every row that carries a transaction total.
fn attach_balances(rows: &mut [LedgerRow], opening: Decimal) {
    let mut running = opening;
    for row in rows.iter_mut().rev() {
        if let Some(total) = row.total {
            running += total;
            row.balance_after = Some(running);
        }
    }
}

/// Build the register for one account.
#[instrument(skip(tx), fields(tenant_id = %tx.tenant_id()))]
pub async fn build<T: LedgerTx>(
    tx: &mut T,
    account_id: AccountId,
) -> Result<Vec<LedgerRow>, LedgerError> {
    let accounts = AccountTree::new(tx.list_accounts().await?);
    if accounts.get(account_id).is_none() {
        return Err(LedgerError::UnknownAccount(account_id));
    }

    let transactions = tx.transactions_for_account(account_id).await?;
    let Some(earliest) = transactions.iter().map(|t| t.date).min() else {
        return Ok(Vec::new());
    };

    let splits = transactions.iter().flat_map(|t| t.splits.iter());
    let payee_ids: Vec<_> = splits
        .clone()
        .filter_map(|s| s.payee_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let tag_ids: Vec<_> = splits
        .flat_map(|s| s.tags.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let lookups = Lookups {
        accounts,
        payees: tx
            .get_payees(&payee_ids)
            .await?
            .into_iter()
            .map(|p| (p.payee_id, p.name))
            .collect(),
        tags: tx
            .get_tags(&tag_ids)
            .await?
            .into_iter()
            .map(|t| (t.tag_id, t))
            .collect(),
    };

    let mut keyed = Vec::new();
    for transaction in &transactions {
        keyed.extend(flatten(transaction, account_id, &lookups)?);
    }
    let mut rows = sort_rows(keyed);

    let opening = tx
        .snapshot_before(account_id, earliest)
        .await?
        .map(|s| s.amount)
        .unwrap_or(Decimal::ZERO);
    attach_balances(&mut rows, opening);

    Ok(rows)
}
