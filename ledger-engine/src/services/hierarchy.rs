//! Account hierarchy.
//!
//! Accounts reference their parent by id only. `full_name` and `level` are
//! never stored: they are derived by walking the parent chain on every read,
//! so renaming or moving an account is immediately visible on all of its
//! descendants.

use crate::error::LedgerError;
use crate::models::{Account, AccountDetails, AccountId, AccountType, CreateAccount};
use crate::services::metrics::ACCOUNTS_CREATED;
use crate::store::LedgerTx;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};

/// Id-keyed view of every account of one tenant.
pub struct AccountTree {
    accounts: HashMap<AccountId, Account>,
}

impl AccountTree {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.account_id, a)).collect(),
        }
    }

    pub fn get(&self, account_id: AccountId) -> Option<&Account> {
        self.accounts.get(&account_id)
    }

    /// Ancestors of an account, nearest first. Fails on a parent cycle.
    pub fn ancestors(&self, account_id: AccountId) -> Result<Vec<&Account>, LedgerError> {
        let account = self
            .get(account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;

        let mut chain = Vec::new();
        let mut seen = HashSet::from([account_id]);
        let mut next = account.parent_account_id;
        while let Some(parent_id) = next {
            if !seen.insert(parent_id) {
                return Err(LedgerError::AccountCycle {
                    account: account_id,
                    parent: parent_id,
                });
            }
            let parent = self
                .get(parent_id)
                .ok_or(LedgerError::UnknownAccount(parent_id))?;
            chain.push(parent);
            next = parent.parent_account_id;
        }
        Ok(chain)
    }

    pub fn full_name(&self, account_id: AccountId) -> Result<String, LedgerError> {
        let account = self
            .get(account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        let ancestors = self.ancestors(account_id)?;
        Ok(format_full_name(
            account.account_type,
            ancestors.iter().rev().map(|a| a.name.as_str()),
            &account.name,
        ))
    }

    pub fn level(&self, account_id: AccountId) -> Result<usize, LedgerError> {
        Ok(self.ancestors(account_id)?.len())
    }

    pub fn details(&self, account_id: AccountId) -> Result<AccountDetails, LedgerError> {
        let account = self
            .get(account_id)
            .ok_or(LedgerError::UnknownAccount(account_id))?;
        Ok(AccountDetails {
            account: account.clone(),
            full_name: self.full_name(account_id)?,
            level: self.level(account_id)?,
        })
    }

    /// True when `candidate` is `account_id` itself or one of its descendants.
    fn is_within(&self, candidate: AccountId, account_id: AccountId) -> Result<bool, LedgerError> {
        if candidate == account_id {
            return Ok(true);
        }
        Ok(self
            .ancestors(candidate)?
            .iter()
            .any(|a| a.account_id == account_id))
    }

    fn has_sibling_named(
        &self,
        account_type: AccountType,
        parent_account_id: Option<AccountId>,
        name: &str,
        except: Option<AccountId>,
    ) -> bool {
        self.accounts.values().any(|a| {
            a.account_type == account_type
                && a.parent_account_id == parent_account_id
                && a.name == name
                && Some(a.account_id) != except
        })
    }
}

/// `TYPE.ANCESTOR...LEAF`, upper-cased.
fn format_full_name<'a>(
    account_type: AccountType,
    ancestors_oldest_first: impl Iterator<Item = &'a str>,
    name: &str,
) -> String {
    let mut parts = vec![account_type.as_str().to_string()];
    parts.extend(ancestors_oldest_first.map(str::to_uppercase));
    parts.push(name.to_uppercase());
    parts.join(".")
}

fn normalize_name(name: &str) -> Result<String, LedgerError> {
    let name = name.trim().to_uppercase();
    if name.is_empty() {
        return Err(LedgerError::InvalidAccount(
            "account name must not be empty".to_string(),
        ));
    }
    if name.contains('.') {
        return Err(LedgerError::InvalidAccount(format!(
            "account name '{}' must not contain '.'",
            name
        )));
    }
    Ok(name)
}

async fn load_tree<T: LedgerTx>(tx: &mut T) -> Result<AccountTree, LedgerError> {
    Ok(AccountTree::new(tx.list_accounts().await?))
}

/// Create an account, optionally under an already stored parent.
#[instrument(skip(tx, input), fields(tenant_id = %tx.tenant_id(), name = %input.name))]
pub async fn create_account<T: LedgerTx>(
    tx: &mut T,
    input: &CreateAccount,
) -> Result<Account, LedgerError> {
    let name = normalize_name(&input.name)?;
    let currency = input.currency.trim().to_uppercase();
    if currency.is_empty() {
        return Err(LedgerError::InvalidAccount(
            "currency must not be empty".to_string(),
        ));
    }

    let tree = load_tree(tx).await?;
    if let Some(parent_id) = input.parent_account_id {
        let parent = tree
            .get(parent_id)
            .ok_or(LedgerError::ParentNotPersisted(parent_id))?;
        if parent.account_type != input.account_type {
            return Err(LedgerError::InvalidAccount(format!(
                "child of a {} account must also be {}",
                parent.account_type, parent.account_type
            )));
        }
    }
    if tree.has_sibling_named(input.account_type, input.parent_account_id, &name, None) {
        return Err(LedgerError::DuplicateAccount(name));
    }

    let account = tx
        .insert_account(&CreateAccount {
            name,
            currency,
            ..input.clone()
        })
        .await?;

    ACCOUNTS_CREATED
        .with_label_values(&[account.account_type.as_str()])
        .inc();
    info!(
        account_id = account.account_id,
        account_type = %account.account_type,
        "Account created"
    );

    Ok(account)
}

/// Account plus its live-derived full name and level.
///
/// Walks the parent chain one lookup per ancestor.
pub async fn describe_account<T: LedgerTx>(
    tx: &mut T,
    account_id: AccountId,
) -> Result<AccountDetails, LedgerError> {
    let account = tx
        .get_account(account_id)
        .await?
        .ok_or(LedgerError::UnknownAccount(account_id))?;

    let mut names = Vec::new();
    let mut seen = HashSet::from([account_id]);
    let mut next = account.parent_account_id;
    while let Some(parent_id) = next {
        if !seen.insert(parent_id) {
            return Err(LedgerError::AccountCycle {
                account: account_id,
                parent: parent_id,
            });
        }
        let parent = tx
            .get_account(parent_id)
            .await?
            .ok_or(LedgerError::UnknownAccount(parent_id))?;
        names.push(parent.name);
        next = parent.parent_account_id;
    }

    let full_name = format_full_name(
        account.account_type,
        names.iter().rev().map(String::as_str),
        &account.name,
    );
    Ok(AccountDetails {
        level: names.len(),
        full_name,
        account,
    })
}

/// Every account of the tenant, ordered by full name.
pub async fn list_accounts<T: LedgerTx>(tx: &mut T) -> Result<Vec<AccountDetails>, LedgerError> {
    let tree = load_tree(tx).await?;
    let mut details = tree
        .accounts
        .keys()
        .map(|&id| tree.details(id))
        .collect::<Result<Vec<_>, _>>()?;
    details.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    Ok(details)
}

#[instrument(skip(tx), fields(tenant_id = %tx.tenant_id()))]
pub async fn rename_account<T: LedgerTx>(
    tx: &mut T,
    account_id: AccountId,
    name: &str,
) -> Result<Account, LedgerError> {
    let name = normalize_name(name)?;
    let tree = load_tree(tx).await?;
    let mut account = tree
        .get(account_id)
        .cloned()
        .ok_or(LedgerError::UnknownAccount(account_id))?;

    if tree.has_sibling_named(
        account.account_type,
        account.parent_account_id,
        &name,
        Some(account_id),
    ) {
        return Err(LedgerError::DuplicateAccount(name));
    }

    account.name = name;
    tx.update_account(&account).await?;
    info!(account_id = account_id, name = %account.name, "Account renamed");
    Ok(account)
}

/// Re-parent an account. `None` makes it a root.
#[instrument(skip(tx), fields(tenant_id = %tx.tenant_id()))]
pub async fn move_account<T: LedgerTx>(
    tx: &mut T,
    account_id: AccountId,
    new_parent: Option<AccountId>,
) -> Result<Account, LedgerError> {
    let tree = load_tree(tx).await?;
    let mut account = tree
        .get(account_id)
        .cloned()
        .ok_or(LedgerError::UnknownAccount(account_id))?;

    if let Some(parent_id) = new_parent {
        let parent = tree
            .get(parent_id)
            .ok_or(LedgerError::ParentNotPersisted(parent_id))?;
        if parent.account_type != account.account_type {
            return Err(LedgerError::InvalidAccount(format!(
                "cannot move a {} account under a {} account",
                account.account_type, parent.account_type
            )));
        }
        if tree.is_within(parent_id, account_id)? {
            return Err(LedgerError::AccountCycle {
                account: account_id,
                parent: parent_id,
            });
        }
    }
    if tree.has_sibling_named(
        account.account_type,
        new_parent,
        &account.name,
        Some(account_id),
    ) {
        return Err(LedgerError::DuplicateAccount(account.name));
    }

    account.parent_account_id = new_parent;
    tx.update_account(&account).await?;
    info!(account_id = account_id, parent_account_id = ?new_parent, "Account moved");
    Ok(account)
}

pub async fn mark_reconciled<T: LedgerTx>(
    tx: &mut T,
    account_id: AccountId,
    date: NaiveDate,
) -> Result<Account, LedgerError> {
    let mut account = tx
        .get_account(account_id)
        .await?
        .ok_or(LedgerError::UnknownAccount(account_id))?;
    account.last_reconciled = Some(date);
    tx.update_account(&account).await?;
    Ok(account)
}
