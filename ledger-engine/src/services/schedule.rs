//! Recurring transactions.
//!
//! A schedule owns split templates and a `next_post_date`. Posting due
//! schedules turns each occurrence whose lead window has opened into an
//! ordinary transaction flagged `is_scheduled`, so balances are repaired by
//! the same path as any other posting.

use crate::error::LedgerError;
use crate::models::{
    NewSchedule, NewTransaction, ReconciledState, ScheduleFrequency, ScheduleId, ScheduleRule,
    ScheduledTransaction, Transaction,
};
use crate::services::posting::{self, validate_splits};
use crate::services::propagation::PropagationLimits;
use crate::store::LedgerTx;
use chrono::{Datelike, Days, Months, NaiveDate};
use tracing::{info, instrument};

fn period_start(frequency: ScheduleFrequency, date: NaiveDate) -> NaiveDate {
    let first_of =
        |month0: u32| NaiveDate::from_ymd_opt(date.year(), month0 + 1, 1).unwrap_or(date);
    match frequency {
        ScheduleFrequency::Weekly => date
            .checked_sub_days(Days::new(date.weekday().num_days_from_monday().into()))
            .unwrap_or(date),
        ScheduleFrequency::Monthly => first_of(date.month0()),
        ScheduleFrequency::Quarterly => first_of(date.month0() / 3 * 3),
        ScheduleFrequency::Annually => first_of(0),
    }
}

fn next_period(frequency: ScheduleFrequency, start: NaiveDate) -> Option<NaiveDate> {
    match frequency {
        ScheduleFrequency::Weekly => start.checked_add_days(Days::new(7)),
        ScheduleFrequency::Monthly => start.checked_add_months(Months::new(1)),
        ScheduleFrequency::Quarterly => start.checked_add_months(Months::new(3)),
        ScheduleFrequency::Annually => start.checked_add_months(Months::new(12)),
    }
}

/// `day` of the month, or the month's last day when it is shorter.
fn clamped(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    (1..=day)
        .rev()
        .find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
}

/// The occurrence inside the period beginning at `period`.
fn occurrence_in(
    frequency: ScheduleFrequency,
    rule: ScheduleRule,
    start_date: NaiveDate,
    period: NaiveDate,
) -> Option<NaiveDate> {
    let period_end = next_period(frequency, period)?.pred_opt()?;
    match rule {
        ScheduleRule::Begin => Some(period),
        ScheduleRule::End => Some(period_end),
        ScheduleRule::NthDay => {
            let offset = (start_date - period_start(frequency, start_date)).num_days();
            let day = period.checked_add_days(Days::new(offset.try_into().ok()?))?;
            Some(day.min(period_end))
        }
        ScheduleRule::Date => clamped(period.year(), start_date.month(), start_date.day()),
    }
}

fn out_of_range(after: NaiveDate) -> LedgerError {
    LedgerError::InvalidSchedule(format!("no occurrence after {}", after))
}

/// First occurrence on or after `start_date`.
pub fn first_occurrence(
    frequency: ScheduleFrequency,
    rule: ScheduleRule,
    start_date: NaiveDate,
) -> Result<NaiveDate, LedgerError> {
    let period = period_start(frequency, start_date);
    match occurrence_in(frequency, rule, start_date, period) {
        Some(day) if day >= start_date => Ok(day),
        _ => next_period(frequency, period)
            .and_then(|next| occurrence_in(frequency, rule, start_date, next))
            .ok_or_else(|| out_of_range(start_date)),
    }
}

/// Occurrence in the period following the one containing `after`.
pub fn next_occurrence(
    frequency: ScheduleFrequency,
    rule: ScheduleRule,
    start_date: NaiveDate,
    after: NaiveDate,
) -> Result<NaiveDate, LedgerError> {
    next_period(frequency, period_start(frequency, after))
        .and_then(|next| occurrence_in(frequency, rule, start_date, next))
        .ok_or_else(|| out_of_range(after))
}

/// Whether an occurrence on `next` should be posted on `as_of`.
pub fn is_due(next: NaiveDate, create_n_days_before: u32, as_of: NaiveDate) -> bool {
    next.checked_sub_days(Days::new(create_n_days_before.into()))
        .map_or(true, |opens| opens <= as_of)
}

/// Validate a schedule and its templates, then store it with its first occurrence.
#[instrument(skip(tx, input), fields(tenant_id = %tx.tenant_id(), start = %input.start_date))]
pub async fn create_schedule<T: LedgerTx>(
    tx: &mut T,
    input: &NewSchedule,
) -> Result<ScheduledTransaction, LedgerError> {
    if input.rule == ScheduleRule::Date && input.frequency != ScheduleFrequency::Annually {
        return Err(LedgerError::InvalidSchedule(format!(
            "the date rule needs an annual schedule, got {}",
            input.frequency.as_str()
        )));
    }
    validate_splits(tx, &input.split_templates).await?;

    // Templates describe fresh splits; reconciliation and invoice links are per posting.
    let mut stored = input.clone();
    for template in &mut stored.split_templates {
        template.reconciled_state = ReconciledState::NotReconciled;
        template.invoice_split_id = None;
    }

    let next_post_date = first_occurrence(input.frequency, input.rule, input.start_date)?;
    let schedule = tx.insert_schedule(&stored, next_post_date).await?;

    info!(
        scheduled_transaction_id = schedule.scheduled_transaction_id,
        frequency = schedule.frequency.as_str(),
        rule = schedule.rule.as_str(),
        next_post_date = %next_post_date,
        "Scheduled transaction created"
    );
    Ok(schedule)
}

pub async fn delete_schedule<T: LedgerTx>(
    tx: &mut T,
    schedule_id: ScheduleId,
) -> Result<(), LedgerError> {
    if tx.delete_schedule(schedule_id).await? {
        Ok(())
    } else {
        Err(LedgerError::UnknownSchedule(schedule_id))
    }
}

/// Post every occurrence that is due on `as_of`, oldest first per schedule,
/// and advance each schedule past what it posted.
#[instrument(skip(tx, limits), fields(tenant_id = %tx.tenant_id()))]
pub async fn post_due_schedules<T: LedgerTx>(
    tx: &mut T,
    limits: &PropagationLimits,
    as_of: NaiveDate,
) -> Result<Vec<Transaction>, LedgerError> {
    let mut posted = Vec::new();

    for schedule in tx.list_schedules().await? {
        let mut last_post_date = schedule.last_post_date;
        let mut next_post_date = schedule.next_post_date;

        while is_due(next_post_date, schedule.create_n_days_before, as_of) {
            let input = NewTransaction {
                date: next_post_date,
                description: schedule.description.clone(),
                is_scheduled: true,
                splits: schedule.split_templates.clone(),
            };
            posted.push(posting::post_transaction(tx, limits, &input).await?);
            last_post_date = Some(next_post_date);
            next_post_date = next_occurrence(
                schedule.frequency,
                schedule.rule,
                schedule.start_date,
                next_post_date,
            )?;
        }

        if last_post_date != schedule.last_post_date {
            tx.update_schedule_dates(
                schedule.scheduled_transaction_id,
                last_post_date,
                next_post_date,
            )
            .await?;
            info!(
                scheduled_transaction_id = schedule.scheduled_transaction_id,
                next_post_date = %next_post_date,
                "Scheduled transaction advanced"
            );
        }
    }

    Ok(posted)
}
