//! Usage ledger: spend accounting and the monthly budget gate
//!
//! Every paid provider call is appended here; the planner asks the ledger
//! whether generation may proceed before each call. All month windows are
//! computed in the configured fixed calendar offset, never the host UTC
//! clock: a record one minute after local midnight on the 1st belongs to
//! the new month even when the UTC date has not rolled over yet.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::db::Database;
use crate::error::{CadenceError, Result};
use crate::types::{AlertTier, BudgetSettings, UsageRecord};

/// Monthly spend snapshot at a point in time.
#[derive(Debug, Clone)]
pub struct MonthlyStatus {
    pub total_cost: f64,
    pub monthly_budget: f64,
    pub used_percent: f64,
    pub tier: AlertTier,
    /// Unix-seconds window [month_start, month_end) the total covers.
    pub month_start: i64,
    pub month_end: i64,
}

#[derive(Clone)]
pub struct UsageLedger {
    db: Database,
    offset: FixedOffset,
}

impl UsageLedger {
    pub fn new(db: Database, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    /// Append one usage record. Single atomic insert, never partial.
    pub async fn record(&self, record: &UsageRecord) -> Result<()> {
        self.db.append_usage(record).await
    }

    /// Spend, budget, percent and alert tier for the month containing `now`.
    pub async fn monthly_status(&self, now: DateTime<Utc>) -> Result<MonthlyStatus> {
        let (month_start, month_end) = month_window(now, self.offset)?;
        let total_cost = self.db.sum_usage_cost(month_start, month_end).await?;
        let settings = self
            .db
            .get_budget_settings()
            .await?
            .unwrap_or_else(BudgetSettings::default);

        // A zero or unset budget means gating is off.
        let used_percent = if settings.monthly_budget > 0.0 {
            total_cost / settings.monthly_budget * 100.0
        } else {
            0.0
        };

        Ok(MonthlyStatus {
            total_cost,
            monthly_budget: settings.monthly_budget,
            used_percent,
            tier: AlertTier::from_percent(used_percent),
            month_start,
            month_end,
        })
    }

    /// True iff the budget is fully consumed and pause-on-exhausted is set.
    pub async fn should_pause_generation(&self, now: DateTime<Utc>) -> Result<bool> {
        let settings = match self.db.get_budget_settings().await? {
            Some(s) => s,
            None => return Ok(false),
        };
        if !settings.pause_on_exhausted || settings.monthly_budget <= 0.0 {
            return Ok(false);
        }
        let status = self.monthly_status(now).await?;
        Ok(status.tier == AlertTier::Critical)
    }
}

/// [start, end) Unix-seconds window of the calendar month containing `now`,
/// where month boundaries are midnight in the given fixed offset.
pub fn month_window(now: DateTime<Utc>, offset: FixedOffset) -> Result<(i64, i64)> {
    let local = now.with_timezone(&offset);
    let start = local_month_start(local.year(), local.month(), offset)?;
    let (next_year, next_month) = if local.month() == 12 {
        (local.year() + 1, 1)
    } else {
        (local.year(), local.month() + 1)
    };
    let end = local_month_start(next_year, next_month, offset)?;
    Ok((start, end))
}

fn local_month_start(year: i32, month: u32, offset: FixedOffset) -> Result<i64> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| CadenceError::InvalidInput(format!("Invalid month {}-{}", year, month)))?;
    offset
        .from_local_datetime(&first)
        .single()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| CadenceError::InvalidInput("Ambiguous month start".to_string()))
}
