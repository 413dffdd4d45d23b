//! Balance snapshot propagation.
//!
//! Snapshots are sparse cumulative balances, one per (account, date). After
//! any write that changes an account's splits on date `D`, [`repair_from`]
//! rewrites the snapshot at `D` from the nearest earlier snapshot and then
//! re-derives every later snapshot of that account in date order. Day totals
//! are always re-read from the split table, so repeated repairs of the same
//! day never double count.

use crate::error::LedgerError;
use crate::models::{amount_limit, AccountId, BalanceSnapshot};
use crate::services::metrics::SNAPSHOTS_REPAIRED;
use crate::store::LedgerTx;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Bounds on a single forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationLimits {
    /// Most snapshots after the repaired date a single repair may rewrite.
    pub max_forward_snapshots: usize,
    /// Wall-clock budget for one forward pass.
    pub deadline: Duration,
}

impl Default for PropagationLimits {
    fn default() -> Self {
        Self {
            max_forward_snapshots: 10_000,
            deadline: Duration::from_millis(5_000),
        }
    }
}

/// What one [`repair_from`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// The snapshot written at the repaired date.
    pub anchor: BalanceSnapshot,
    /// Later snapshots visited by the forward pass.
    pub forward_scanned: usize,
    /// Later snapshots whose amount actually changed.
    pub forward_updated: usize,
}

/// Recompute `account_id`'s snapshot at `date` and every snapshot after it.
///
/// Runs inside the caller's transaction; on error the caller must roll back,
/// which discards the anchor write as well as any forward writes.
#[instrument(skip(tx, limits), fields(tenant_id = %tx.tenant_id()))]
pub async fn repair_from<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    account_id: AccountId,
    date: NaiveDate,
) -> Result<RepairOutcome, LedgerError> {
    let day_total = tx.day_total(account_id, date).await?;
    let base = tx
        .snapshot_before(account_id, date)
        .await?
        .map(|s| s.amount)
        .unwrap_or(Decimal::ZERO);

    let anchor = tx
        .upsert_snapshot(account_id, date, add_to_balance(account_id, base, day_total)?)
        .await?;
    SNAPSHOTS_REPAIRED.with_label_values(&["anchor"]).inc();

    let (forward_scanned, forward_updated) =
        forward_pass(tx, limits, account_id, date, anchor.amount)
            .await
            .map_err(|err| match err {
                LedgerError::ConcurrentModificationConflict
                | LedgerError::PropagationTooLarge { .. }
                | LedgerError::PropagationFailure { .. } => err,
                other => LedgerError::PropagationFailure {
                    account_id,
                    reason: other.to_string(),
                },
            })?;

    debug!(
        account_id = account_id,
        date = %date,
        balance = %anchor.amount,
        forward_scanned = forward_scanned,
        forward_updated = forward_updated,
        "Balance snapshots repaired"
    );

    Ok(RepairOutcome {
        anchor,
        forward_scanned,
        forward_updated,
    })
}

/// Balances must stay representable by the snapshot column on every backend.
fn add_to_balance(
    account_id: AccountId,
    balance: Decimal,
    day_total: Decimal,
) -> Result<Decimal, LedgerError> {
    balance
        .checked_add(day_total)
        .filter(|sum| sum.abs() < amount_limit())
        .ok_or_else(|| LedgerError::PropagationFailure {
            account_id,
            reason: format!("balance {} plus {} is out of range", balance, day_total),
        })
}

async fn forward_pass<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    account_id: AccountId,
    date: NaiveDate,
    mut running: Decimal,
) -> Result<(usize, usize), LedgerError> {
    let started = Instant::now();

    // One extra row tells "exactly at the limit" apart from "over it".
    let later = tx
        .snapshots_after(account_id, date, limits.max_forward_snapshots.saturating_add(1))
        .await?;
    if later.len() > limits.max_forward_snapshots {
        warn!(
            account_id = account_id,
            date = %date,
            limit = limits.max_forward_snapshots,
            "Forward repair exceeds snapshot limit"
        );
        return Err(LedgerError::PropagationTooLarge {
            account_id,
            limit: limits.max_forward_snapshots,
        });
    }

    let mut updated = 0;
    for snapshot in &later {
        if started.elapsed() >= limits.deadline {
            return Err(LedgerError::PropagationFailure {
                account_id,
                reason: format!(
                    "forward pass exceeded its {}ms deadline",
                    limits.deadline.as_millis()
                ),
            });
        }

        let day_total = tx.day_total(account_id, snapshot.snapshot_date).await?;
        running = add_to_balance(account_id, running, day_total)?;
        if running != snapshot.amount {
            tx.upsert_snapshot(account_id, snapshot.snapshot_date, running)
                .await?;
            updated += 1;
        }
    }

    if updated > 0 {
        SNAPSHOTS_REPAIRED
            .with_label_values(&["forward"])
            .inc_by(updated as f64);
    }

    Ok((later.len(), updated))
}

/// Re-derive every snapshot of an account from its earliest activity.
///
/// Returns the number of snapshots the repair visited.
#[instrument(skip(tx, limits), fields(tenant_id = %tx.tenant_id()))]
pub async fn rebuild_snapshots<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    account_id: AccountId,
) -> Result<usize, LedgerError> {
    let first_snapshot = tx
        .list_snapshots(account_id)
        .await?
        .first()
        .map(|s| s.snapshot_date);
    let first_transaction = tx
        .transactions_for_account(account_id)
        .await?
        .first()
        .map(|t| t.date);

    let start = match (first_snapshot, first_transaction) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return Ok(0),
    };

    let outcome = repair_from(tx, limits, account_id, start).await?;
    Ok(1 + outcome.forward_scanned)
}
