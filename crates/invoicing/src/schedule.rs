//! Recurrence arithmetic for recurring invoices.
//!
//! A schedule's occurrences are computed from the month of its start date
//! plus whole steps of months, always landing on the anchor day clamped to
//! the month length. Each occurrence is derived from its own month rather
//! than from the previous clamped date, so a 31st anchor never drifts to the
//! 28th after February.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use keel_core::calendar::{add_months_clamped, day_before, days_inclusive, first_day_of_month};
use keel_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
}

impl Frequency {
    pub fn months(self) -> u32 {
        match self {
            Frequency::Monthly => 1,
            Frequency::Quarterly => 3,
            Frequency::Yearly => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    /// Every `interval` periods of `frequency`.
    pub interval: u32,
    /// Day of month the invoice is raised on (1..=31, clamped per month).
    pub anchor_day: u32,
}

impl RecurrenceRule {
    pub fn monthly_on(anchor_day: u32) -> Self {
        Self {
            frequency: Frequency::Monthly,
            interval: 1,
            anchor_day,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.interval == 0 {
            return Err(DomainError::validation("recurrence interval must be at least 1"));
        }
        if !(1..=31).contains(&self.anchor_day) {
            return Err(DomainError::validation("anchor_day must be between 1 and 31"));
        }
        if self.frequency.months().checked_mul(self.interval).is_none() {
            return Err(DomainError::validation("recurrence interval is too large"));
        }
        Ok(())
    }

    pub fn step_months(&self) -> u32 {
        self.frequency.months().saturating_mul(self.interval)
    }

    /// Occurrence in the month of `date`.
    fn occurrence_in_month_of(&self, date: NaiveDate) -> Option<NaiveDate> {
        add_months_clamped(first_day_of_month(date), 0, self.anchor_day)
    }

    /// The occurrence one step after `occurrence`.
    fn following(&self, occurrence: NaiveDate) -> Option<NaiveDate> {
        add_months_clamped(first_day_of_month(occurrence), self.step_months(), self.anchor_day)
    }

    /// Whether `date` belongs to the series whose runs fall in the month of
    /// `series_date`, stepping whole `step_months` from there.
    pub fn is_occurrence(&self, series_date: NaiveDate, date: NaiveDate) -> bool {
        let step = i64::from(self.step_months());
        let offset = month_index(date) - month_index(series_date);
        step > 0 && offset.rem_euclid(step) == 0 && self.occurrence_in_month_of(date) == Some(date)
    }
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

/// Fraction of a full billing period that a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proration {
    pub billed_days: u32,
    pub period_days: u32,
}

/// One invoice the schedule raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRun {
    pub run_date: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub proration: Option<Proration>,
}

impl BillingRun {
    pub fn is_prorated(&self) -> bool {
        self.proration.is_some()
    }
}

/// Build the run starting on an occurrence, clipping its period to `end`.
fn run_at_occurrence(
    rule: &RecurrenceRule,
    occurrence: NaiveDate,
    end: Option<NaiveDate>,
    prorate: bool,
) -> Option<BillingRun> {
    if end.is_some_and(|end| occurrence > end) {
        return None;
    }
    let next = rule.following(occurrence)?;
    let full_end = day_before(next);
    match end {
        Some(end) if end < full_end => Some(BillingRun {
            run_date: occurrence,
            period_start: occurrence,
            period_end: end,
            proration: prorate.then(|| Proration {
                billed_days: days_inclusive(occurrence, end),
                period_days: days_inclusive(occurrence, full_end),
            }),
        }),
        _ => Some(BillingRun {
            run_date: occurrence,
            period_start: occurrence,
            period_end: full_end,
            proration: None,
        }),
    }
}

/// First run of a schedule starting on `start`.
///
/// A start between occurrences either bills the stub up to the next
/// occurrence (with `prorate`) or waits for that occurrence (without).
/// Returns `None` when the schedule ends before it ever runs.
pub fn plan_first_run(
    rule: &RecurrenceRule,
    start: NaiveDate,
    end: Option<NaiveDate>,
    prorate: bool,
) -> Option<BillingRun> {
    if end.is_some_and(|end| end < start) {
        return None;
    }
    let in_start_month = rule.occurrence_in_month_of(start)?;
    if in_start_month == start {
        return run_at_occurrence(rule, start, end, prorate);
    }

    // The series is anchored on the start month, so an anchor earlier in the
    // month than `start` puts the next occurrence one whole step later.
    let (previous, next) = if in_start_month > start {
        let step = rule.step_months();
        let previous = first_day_of_month(in_start_month)
            .checked_sub_months(Months::new(step))
            .and_then(|m| add_months_clamped(m, 0, rule.anchor_day))?;
        (previous, in_start_month)
    } else {
        (in_start_month, rule.following(in_start_month)?)
    };

    if !prorate {
        return run_at_occurrence(rule, next, end, prorate);
    }

    let full_end = day_before(next);
    let period_end = match end {
        Some(end) if end < full_end => end,
        _ => full_end,
    };
    Some(BillingRun {
        run_date: start,
        period_start: start,
        period_end,
        proration: Some(Proration {
            billed_days: days_inclusive(start, period_end),
            period_days: days_inclusive(previous, full_end),
        }),
    })
}

/// Run following `previous`, or `None` once the schedule is past `end`.
pub fn plan_next_run(
    rule: &RecurrenceRule,
    previous: &BillingRun,
    end: Option<NaiveDate>,
    prorate: bool,
) -> Option<BillingRun> {
    let next_date = previous.period_end.checked_add_signed(Duration::days(1))?;
    // A stub run is dated in the start month, which anchors the series.
    if !rule.is_occurrence(previous.run_date, next_date) {
        // The previous period was clipped by the end date.
        return None;
    }
    run_at_occurrence(rule, next_date, end, prorate)
}

/// Day-of-month a rule would use for a schedule starting on `start`.
pub fn default_anchor(start: NaiveDate) -> u32 {
    start.day()
}
