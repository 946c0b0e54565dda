//! Local-time date arithmetic shared by daemon retention and client preset
//! ranges. All functions take an explicit reference instant so callers pass
//! `Local::now().naive_local()` and tests pass fixed points.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

/// First day of a month, normalizing out-of-range month numbers (month 0 is
/// December of the previous year, month 13 is January of the next).
fn month_start(year: i32, month: i32) -> NaiveDate {
    let y = year + (month - 1).div_euclid(12);
    let m = ((month - 1).rem_euclid(12) + 1) as u32;
    NaiveDate::from_ymd_opt(y, m, 1).expect("normalized month start")
}

/// Day `day` of a month, where day 0 names the last day of the previous
/// month. `day` never exceeds 28 here so no forward overflow is possible.
fn month_day(year: i32, month: i32, day: u32) -> NaiveDate {
    if day == 0 {
        month_start(year, month)
            .pred_opt()
            .expect("date within supported range")
    } else {
        month_start(year, month) + Duration::days(day as i64 - 1)
    }
}

fn at_midnight(d: NaiveDate) -> NaiveDateTime {
    d.and_hms_opt(0, 0, 0).expect("valid time")
}

fn at_day_end(d: NaiveDate) -> NaiveDateTime {
    d.and_hms_opt(23, 59, 59).expect("valid time")
}

/// `[today 00:00:00, reference]`.
pub fn today(reference: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    (at_midnight(reference.date()), reference)
}

/// `[yesterday 00:00:00, yesterday 23:59:59]`.
pub fn yesterday(reference: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let d = reference.date() - Duration::days(1);
    (at_midnight(d), at_day_end(d))
}

/// The last `n` days inclusive of today: `[midnight n-1 days ago, reference]`.
pub fn last_n_days(n: u32, reference: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let start = reference.date() - Duration::days(n as i64 - 1);
    (at_midnight(start), reference)
}

/// `[1st of the current month 00:00:00, reference]`.
pub fn this_month(reference: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let start = month_start(reference.year(), reference.month() as i32);
    (at_midnight(start), reference)
}

/// The full previous month.
pub fn last_month(reference: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let (y, m) = (reference.year(), reference.month() as i32);
    (
        at_midnight(month_start(y, m - 1)),
        at_day_end(month_day(y, m, 0)),
    )
}

/// One billing-cycle month anchored at `cycle_day` (1-28; anything else is
/// clamped to 1, i.e. a calendar month). If the reference day has reached the
/// anchor the cycle started this month, otherwise last month; either way it
/// ends the day before the next anchor.
pub fn billing_cycle(cycle_day: u32, reference: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let day = if (1..=28).contains(&cycle_day) {
        cycle_day
    } else {
        1
    };

    let (y, m) = (reference.year(), reference.month() as i32);
    if reference.day() >= day {
        (
            at_midnight(month_day(y, m, day)),
            at_day_end(month_day(y, m + 1, day - 1)),
        )
    } else {
        (
            at_midnight(month_day(y, m - 1, day)),
            at_day_end(month_day(y, m, day - 1)),
        )
    }
}

/// Render a range as the `YYYY-MM-DD` strings the store is keyed by.
pub fn format_range(start: NaiveDateTime, end: NaiveDateTime) -> (String, String) {
    (
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    )
}
