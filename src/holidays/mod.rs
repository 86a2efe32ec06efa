//! US holiday calendar
//!
//! Holidays are computed per year and never stored. Fixed-date holidays that
//! fall on a weekend are observed on the nearest weekday (Saturday moves to
//! Friday, Sunday moves to Monday).

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Serialize;

/// How a holiday's date is derived for a given year
#[derive(Debug, Clone, Copy)]
enum Rule {
    /// Fixed month/day, shifted off weekends
    Fixed { month: u32, day: u32 },
    /// The n-th given weekday of a month (1-based)
    NthWeekday { month: u32, weekday: Weekday, n: u32 },
    /// The last given weekday of a month
    LastWeekday { month: u32, weekday: Weekday },
    /// A number of days after another rule
    After { base: &'static Rule, days: i64 },
}

const THANKSGIVING: Rule = Rule::NthWeekday {
    month: 11,
    weekday: Weekday::Thu,
    n: 4,
};

/// Holiday table. When two entries resolve to the same date the earlier one wins.
const HOLIDAYS: &[(&str, &str, Rule)] = &[
    ("new_years_day", "New Year's Day", Rule::Fixed { month: 1, day: 1 }),
    (
        "martin_luther_king_jr_day",
        "Martin Luther King Jr. Day",
        Rule::NthWeekday {
            month: 1,
            weekday: Weekday::Mon,
            n: 3,
        },
    ),
    (
        "presidents_day",
        "Presidents' Day",
        Rule::NthWeekday {
            month: 2,
            weekday: Weekday::Mon,
            n: 3,
        },
    ),
    (
        "memorial_day",
        "Memorial Day",
        Rule::LastWeekday {
            month: 5,
            weekday: Weekday::Mon,
        },
    ),
    ("juneteenth", "Juneteenth", Rule::Fixed { month: 6, day: 19 }),
    (
        "independence_day",
        "Independence Day",
        Rule::Fixed { month: 7, day: 4 },
    ),
    (
        "labor_day",
        "Labor Day",
        Rule::NthWeekday {
            month: 9,
            weekday: Weekday::Mon,
            n: 1,
        },
    ),
    (
        "columbus_day",
        "Columbus Day",
        Rule::NthWeekday {
            month: 10,
            weekday: Weekday::Mon,
            n: 2,
        },
    ),
    ("veterans_day", "Veterans Day", Rule::Fixed { month: 11, day: 11 }),
    ("thanksgiving_day", "Thanksgiving Day", THANKSGIVING),
    (
        "day_after_thanksgiving",
        "Day After Thanksgiving",
        Rule::After {
            base: &THANKSGIVING,
            days: 1,
        },
    ),
    ("christmas_eve", "Christmas Eve", Rule::Fixed { month: 12, day: 24 }),
    ("christmas_day", "Christmas Day", Rule::Fixed { month: 12, day: 25 }),
];

/// A holiday resolved for a specific year
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holiday {
    pub key: &'static str,
    pub label: &'static str,
    pub date: NaiveDate,
}

/// All known holiday keys, in calendar order
pub fn all_holiday_keys() -> impl Iterator<Item = &'static str> {
    HOLIDAYS.iter().map(|(key, _, _)| *key)
}

/// Whether `key` names a known holiday
pub fn is_known_holiday(key: &str) -> bool {
    all_holiday_keys().any(|k| k == key)
}

/// Compute every holiday observed for `year`
///
/// A fixed-date holiday can be observed in the previous calendar year
/// (January 1st on a Saturday is observed on December 31st).
pub fn holidays_for_year(year: i32) -> Vec<Holiday> {
    HOLIDAYS
        .iter()
        .filter_map(|&(key, label, rule)| {
            resolve(&rule, year).map(|date| Holiday { key, label, date })
        })
        .collect()
}

/// Return the holiday key observed on `date`, if any
pub fn holiday_key_for_date(date: NaiveDate) -> Option<&'static str> {
    // Next year's New Year's Day may be observed on this year's Dec 31
    [date.year(), date.year() + 1]
        .into_iter()
        .flat_map(holidays_for_year)
        .find(|h| h.date == date)
        .map(|h| h.key)
}

fn resolve(rule: &Rule, year: i32) -> Option<NaiveDate> {
    match *rule {
        Rule::Fixed { month, day } => NaiveDate::from_ymd_opt(year, month, day).map(observed),
        Rule::NthWeekday { month, weekday, n } => {
            NaiveDate::from_weekday_of_month_opt(year, month, weekday, n as u8)
        }
        Rule::LastWeekday { month, weekday } => last_weekday_of_month(year, month, weekday),
        Rule::After { base, days } => resolve(base, year).map(|d| d + Duration::days(days)),
    }
}

fn observed(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Duration::days(1),
        Weekday::Sun => date + Duration::days(1),
        _ => date,
    }
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = first_of_next - Duration::days(1);
    let back = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    Some(last - Duration::days(i64::from(back)))
}
