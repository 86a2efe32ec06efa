//! Availability queries: open start times, days and months
//!
//! Every query takes the candidate users it should consider. A single user
//! query passes one candidate; an "anyone" query passes every enabled user
//! qualified for the service, and a result is available when any of them is.

use std::collections::BTreeSet;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime};
use rand::seq::SliceRandom;
use uuid::Uuid;

use super::engine::{is_range_open, SlotStore};
use super::grid;
use crate::availability::AvailabilityProfile;
use crate::error::ScheduleError;
use crate::models::{DayOption, MonthOption, TimeOption};

/// Number of months offered by `available_months`, the current one included
pub const MONTHS_AHEAD: u32 = 12;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub user_id: Uuid,
    pub profile: AvailabilityProfile,
}

/// Whether the profile opens any grid slot on `date` at all
///
/// Lets the queries skip loading the day's schedule for closed days.
fn may_open(profile: &AvailabilityProfile, date: NaiveDate) -> bool {
    !profile.is_holiday_closed(date)
        && grid::business_hours().any(|t| profile.scheduled_open(date, t))
}

/// Start times open for one candidate, with past times of today removed
async fn open_starts<S: SlotStore>(
    store: &S,
    candidate: &Candidate,
    date: NaiveDate,
    duration_seconds: i64,
    now: NaiveDateTime,
) -> Result<Vec<NaiveTime>, ScheduleError> {
    if date < now.date() || !may_open(&candidate.profile, date) {
        return Ok(Vec::new());
    }
    let day = store.day_schedule(candidate.user_id, date).await?;
    let needed = grid::slots_needed(duration_seconds);
    Ok(grid::business_hours()
        .filter(|t| date > now.date() || *t > now.time())
        .filter(|t| is_range_open(&candidate.profile, &day, date, *t, needed))
        .collect())
}

/// Open start times on a local date
pub async fn available_times<S: SlotStore>(
    store: &S,
    candidates: &[Candidate],
    date: NaiveDate,
    duration_seconds: i64,
    now: NaiveDateTime,
) -> Result<Vec<NaiveTime>, ScheduleError> {
    let mut times = BTreeSet::new();
    for candidate in candidates {
        times.extend(open_starts(store, candidate, date, duration_seconds, now).await?);
    }
    Ok(times.into_iter().collect())
}

/// Whether any candidate has any open start on `date`
pub async fn has_availability<S: SlotStore>(
    store: &S,
    candidates: &[Candidate],
    date: NaiveDate,
    duration_seconds: i64,
    now: NaiveDateTime,
) -> Result<bool, ScheduleError> {
    for candidate in candidates {
        if !open_starts(store, candidate, date, duration_seconds, now)
            .await?
            .is_empty()
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Days of the month starting at `month` (its first day) with an open start
pub async fn available_days<S: SlotStore>(
    store: &S,
    candidates: &[Candidate],
    month: NaiveDate,
    duration_seconds: i64,
    now: NaiveDateTime,
) -> Result<Vec<NaiveDate>, ScheduleError> {
    let mut days = Vec::new();
    for date in days_of_month(month).filter(|d| *d >= now.date()) {
        if has_availability(store, candidates, date, duration_seconds, now).await? {
            days.push(date);
        }
    }
    Ok(days)
}

/// First days of the upcoming months that have at least one open start
pub async fn available_months<S: SlotStore>(
    store: &S,
    candidates: &[Candidate],
    duration_seconds: i64,
    now: NaiveDateTime,
) -> Result<Vec<NaiveDate>, ScheduleError> {
    let current = first_of_month(now.date());
    let mut months = Vec::new();
    for offset in 0..MONTHS_AHEAD {
        let Some(month) = current.checked_add_months(Months::new(offset)) else {
            break;
        };
        for date in days_of_month(month).filter(|d| *d >= now.date()) {
            if has_availability(store, candidates, date, duration_seconds, now).await? {
                months.push(month);
                break;
            }
        }
    }
    Ok(months)
}

/// Pick the user an "anyone" booking goes to
///
/// Chooses uniformly at random among the candidates whose range is open at
/// the exact date and start, so repeated calls may pick different users.
pub async fn resolve_anyone<S: SlotStore>(
    store: &S,
    candidates: &[Candidate],
    date: NaiveDate,
    start: NaiveTime,
    duration_seconds: i64,
) -> Result<Option<Uuid>, ScheduleError> {
    let needed = grid::slots_needed(duration_seconds);
    let mut open = Vec::new();
    for candidate in candidates {
        if candidate.profile.is_holiday_closed(date) {
            continue;
        }
        let day = store.day_schedule(candidate.user_id, date).await?;
        if is_range_open(&candidate.profile, &day, date, start, needed) {
            open.push(candidate.user_id);
        }
    }
    Ok(open.choose(&mut rand::thread_rng()).copied())
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn days_of_month(first: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let month = first.month();
    first.iter_days().take_while(move |d| d.month() == month)
}

/// `Monday, March 11`
pub fn day_label(date: NaiveDate) -> String {
    date.format("%A, %B %-d").to_string()
}

/// `March 2024`
pub fn month_label(month: NaiveDate) -> String {
    month.format("%B %Y").to_string()
}

pub fn time_options(times: &[NaiveTime]) -> Vec<TimeOption> {
    times
        .iter()
        .map(|t| TimeOption {
            time: grid::format_time(*t),
            label: grid::display_label(*t),
        })
        .collect()
}

pub fn day_options(days: &[NaiveDate]) -> Vec<DayOption> {
    days.iter()
        .map(|d| DayOption {
            day: d.format("%Y-%m-%d").to_string(),
            label: day_label(*d),
        })
        .collect()
}

pub fn month_options(months: &[NaiveDate]) -> Vec<MonthOption> {
    months
        .iter()
        .map(|m| MonthOption {
            month: m.format("%Y-%m").to_string(),
            label: month_label(*m),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::{OverrideChange, WeeklyAvailability};
    use crate::scheduling::grid::at;
    use crate::scheduling::memory::MemorySlotStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monday() -> NaiveDate {
        date(2024, 3, 11)
    }

    /// A moment well before every date under test
    fn long_ago() -> NaiveDateTime {
        date(2024, 1, 1).and_time(at(0, 0))
    }

    fn monday_morning_only() -> AvailabilityProfile {
        AvailabilityProfile {
            weekly: WeeklyAvailability::from_entries(vec![(1, vec![at(9, 0), at(9, 30)])])
                .unwrap(),
            ..Default::default()
        }
    }

    fn candidate(profile: AvailabilityProfile) -> Candidate {
        Candidate {
            user_id: Uuid::new_v4(),
            profile,
        }
    }

    #[tokio::test]
    async fn test_monday_two_slots() {
        let store = MemorySlotStore::default();
        let user = candidate(monday_morning_only());
        let times = available_times(&store, &[user], monday(), 1800, long_ago())
            .await
            .unwrap();
        assert_eq!(times, vec![at(9, 0), at(9, 30)]);

        let options = time_options(&times);
        assert_eq!(options[0].time, "09:00");
        assert_eq!(options[0].label, "9:00 AM");
    }

    #[tokio::test]
    async fn test_longer_duration_needs_contiguous_slots() {
        let store = MemorySlotStore::default();
        let user = candidate(monday_morning_only());
        let times = available_times(&store, &[user.clone()], monday(), 3600, long_ago())
            .await
            .unwrap();
        assert_eq!(times, vec![at(9, 0)]);

        store.add_booking(user.user_id, monday(), Uuid::new_v4(), at(9, 30), 1800);
        let times = available_times(&store, &[user], monday(), 3600, long_ago())
            .await
            .unwrap();
        assert!(times.is_empty());
    }

    #[tokio::test]
    async fn test_today_excludes_past_starts() {
        let store = MemorySlotStore::default();
        let user = candidate(AvailabilityProfile::default());
        let now = monday().and_time(at(12, 0));
        let times = available_times(&store, &[user.clone()], monday(), 1800, now)
            .await
            .unwrap();
        assert_eq!(times.first(), Some(&at(12, 30)));
        assert_eq!(times.last(), Some(&at(16, 30)));

        // Yesterday yields nothing
        let past = available_times(&store, &[user], date(2024, 3, 8), 1800, now)
            .await
            .unwrap();
        assert!(past.is_empty());
    }

    #[tokio::test]
    async fn test_anyone_is_union_of_candidates() {
        let store = MemorySlotStore::default();
        let morning = candidate(monday_morning_only());
        let mut afternoon_profile = monday_morning_only();
        afternoon_profile.weekly =
            WeeklyAvailability::from_entries(vec![(1, vec![at(14, 0)])]).unwrap();
        let afternoon = candidate(afternoon_profile);

        let times = available_times(
            &store,
            &[morning.clone(), afternoon.clone()],
            monday(),
            1800,
            long_ago(),
        )
        .await
        .unwrap();
        assert_eq!(times, vec![at(9, 0), at(9, 30), at(14, 0)]);

        let chosen = resolve_anyone(&store, &[morning.clone(), afternoon.clone()], monday(), at(14, 0), 1800)
            .await
            .unwrap();
        assert_eq!(chosen, Some(afternoon.user_id));

        let nobody = resolve_anyone(&store, &[morning, afternoon], monday(), at(11, 0), 1800)
            .await
            .unwrap();
        assert_eq!(nobody, None);
    }

    #[tokio::test]
    async fn test_resolve_anyone_only_picks_open_users() {
        let store = MemorySlotStore::default();
        let a = candidate(AvailabilityProfile::default());
        let b = candidate(AvailabilityProfile::default());
        store.add_booking(a.user_id, monday(), Uuid::new_v4(), at(10, 0), 1800);

        for _ in 0..20 {
            let chosen = resolve_anyone(&store, &[a.clone(), b.clone()], monday(), at(10, 0), 1800)
                .await
                .unwrap();
            assert_eq!(chosen, Some(b.user_id));
        }
    }

    #[tokio::test]
    async fn test_available_days_in_month() {
        let store = MemorySlotStore::default();
        let user = candidate(monday_morning_only());
        let days = available_days(&store, &[user.clone()], date(2024, 3, 1), 1800, long_ago())
            .await
            .unwrap();
        // Mondays of March 2024
        assert_eq!(
            days,
            vec![date(2024, 3, 4), date(2024, 3, 11), date(2024, 3, 18), date(2024, 3, 25)]
        );

        let now = date(2024, 3, 12).and_time(at(8, 0));
        let days = available_days(&store, &[user], date(2024, 3, 1), 1800, now)
            .await
            .unwrap();
        assert_eq!(days, vec![date(2024, 3, 18), date(2024, 3, 25)]);

        let options = day_options(&days);
        assert_eq!(options[0].day, "2024-03-18");
        assert_eq!(options[0].label, "Monday, March 18");
    }

    #[tokio::test]
    async fn test_available_months_skips_fully_closed_months() {
        let store = MemorySlotStore::default();
        let mut profile = AvailabilityProfile {
            weekly: WeeklyAvailability::empty(),
            ..Default::default()
        };
        profile.overrides.apply(date(2024, 5, 14), at(9, 0), OverrideChange::Allow);
        let user = candidate(profile);

        let now = date(2024, 3, 11).and_time(at(8, 0));
        let months = available_months(&store, &[user], 1800, now).await.unwrap();
        assert_eq!(months, vec![date(2024, 5, 1)]);
        assert_eq!(month_options(&months)[0].label, "May 2024");
        assert_eq!(month_options(&months)[0].month, "2024-05");
    }

    #[tokio::test]
    async fn test_holiday_closes_day_in_queries() {
        let store = MemorySlotStore::default();
        let user = candidate(AvailabilityProfile::default());
        // Thanksgiving 2024 and the day after are closed by default
        let days = available_days(&store, &[user], date(2024, 11, 1), 1800, long_ago())
            .await
            .unwrap();
        assert!(!days.contains(&date(2024, 11, 28)));
        assert!(!days.contains(&date(2024, 11, 29)));
        assert!(days.contains(&date(2024, 11, 27)));
    }
}
