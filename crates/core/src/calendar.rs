//! Calendar arithmetic on `chrono::NaiveDate`.
//!
//! Month stepping keeps a separate anchor day so that a month-end anchor
//! rolls 31 Jan -> 28/29 Feb -> 31 Mar instead of sticking to the 28th.

use chrono::{Datelike, Duration, NaiveDate};

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in `month` (1-based) of `year`.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

pub fn first_day_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let last = days_in_month(date.year(), date.month());
    date.with_day(last).unwrap_or(date)
}

/// Move `months` calendar months forward from `base`, landing on
/// `min(anchor_day, days in target month)`.
///
/// Returns `None` if the result leaves chrono's supported range or the
/// anchor is not in `1..=31`.
pub fn add_months_clamped(base: NaiveDate, months: u32, anchor_day: u32) -> Option<NaiveDate> {
    if !(1..=31).contains(&anchor_day) {
        return None;
    }
    let zero_based = i64::from(base.month0()) + i64::from(months);
    let year = i64::from(base.year()) + zero_based.div_euclid(12);
    let month = u32::try_from(zero_based.rem_euclid(12)).ok()? + 1;
    let year = i32::try_from(year).ok()?;
    let day = anchor_day.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Days in `[start, end]`, both ends included. Zero when `end < start`.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> u32 {
    if end < start {
        return 0;
    }
    u32::try_from((end - start).num_days() + 1).unwrap_or(u32::MAX)
}

/// Intersection of two inclusive date ranges.
pub fn overlap(
    a: (NaiveDate, NaiveDate),
    b: (NaiveDate, NaiveDate),
) -> Option<(NaiveDate, NaiveDate)> {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    (start <= end).then_some((start, end))
}

pub fn day_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(1)
}
