//! Local wall-clock <-> UTC conversion
//!
//! Conversions always build the wall-clock time inside the timezone database
//! instead of adding a fixed offset, so DST transitions resolve correctly.

use chrono::{Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone};
use chrono_tz::Tz;

/// Interpret a local wall-clock instant in `tz` and return it as naive UTC
///
/// Ambiguous times (clocks falling back) take the earlier instant. Times in
/// a spring-forward gap use the offset in force before the gap, which moves
/// them forward by the size of the gap.
pub fn local_to_utc(tz: Tz, local: NaiveDateTime) -> NaiveDateTime {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.naive_utc(),
        LocalResult::Ambiguous(earliest, _) => earliest.naive_utc(),
        LocalResult::None => {
            let before = tz.from_local_datetime(&(local - Duration::hours(3))).earliest();
            match before {
                Some(before) => {
                    let offset = before.offset().fix().local_minus_utc();
                    local - Duration::seconds(i64::from(offset))
                }
                None => local,
            }
        }
    }
}

pub fn utc_to_local(tz: Tz, utc: NaiveDateTime) -> NaiveDateTime {
    tz.from_utc_datetime(&utc).naive_local()
}

/// Split helpers for the separate date/time columns
pub fn to_utc_parts(tz: Tz, date: NaiveDate, time: NaiveTime) -> (NaiveDate, NaiveTime) {
    let utc = local_to_utc(tz, date.and_time(time));
    (utc.date(), utc.time())
}

pub fn to_local_parts(tz: Tz, date: NaiveDate, time: NaiveTime) -> (NaiveDate, NaiveTime) {
    let local = utc_to_local(tz, date.and_time(time));
    (local.date(), local.time())
}

/// UTC range `[start, end)` covering the local calendar day `date`
pub fn local_day_bounds(tz: Tz, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = local_to_utc(tz, date.and_time(NaiveTime::default()));
    let next = date.succ_opt().unwrap_or(date);
    let end = local_to_utc(tz, next.and_time(NaiveTime::default()));
    (start, end)
}
