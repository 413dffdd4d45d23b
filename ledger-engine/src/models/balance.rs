//! Balance snapshot model.

use super::AccountId;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cumulative balance of one account at the end of one date. Unique per
/// (account, date); only dates that had a balance recorded have a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account_id: AccountId,
    pub snapshot_date: NaiveDate,
    pub amount: Decimal,
}
