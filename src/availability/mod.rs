//! Per-user availability settings
//!
//! Weekly recurring hours, enabled holidays and manual date/time overrides.
//! Everything here is expressed in the configured local timezone.

pub mod store;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::holidays;
use crate::scheduling::grid;
use crate::validation::{parse_date, parse_time, ValidationError};

pub use store::*;

// =============================================================================
// Weekly availability
// =============================================================================

/// Weekday (0 = Sunday .. 6 = Saturday) to the grid times open by default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<u8, Vec<String>>",
    into = "BTreeMap<u8, Vec<String>>"
)]
pub struct WeeklyAvailability(BTreeMap<u8, BTreeSet<NaiveTime>>);

impl WeeklyAvailability {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Build from raw entries, dropping times that are not on the grid
    pub fn from_entries(
        entries: impl IntoIterator<Item = (u8, Vec<NaiveTime>)>,
    ) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for (weekday, times) in entries {
            if weekday > 6 {
                return Err(ValidationError::InvalidWeekday(weekday));
            }
            let times: BTreeSet<NaiveTime> =
                times.into_iter().filter(|t| grid::is_grid_time(*t)).collect();
            if !times.is_empty() {
                map.insert(weekday, times);
            }
        }
        Ok(Self(map))
    }

    pub fn contains(&self, date: NaiveDate, time: NaiveTime) -> bool {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        self.0
            .get(&weekday)
            .map(|times| times.contains(&time))
            .unwrap_or(false)
    }

    pub fn times_for(&self, weekday: u8) -> impl Iterator<Item = NaiveTime> + '_ {
        self.0.get(&weekday).into_iter().flatten().copied()
    }
}

impl Default for WeeklyAvailability {
    /// Monday to Friday, 09:00 through the 16:30 slot
    fn default() -> Self {
        let day: BTreeSet<NaiveTime> = grid::business_hours()
            .filter(|t| *t >= grid::at(9, 0) && *t < grid::at(17, 0))
            .collect();
        Self((1..=5).map(|weekday| (weekday, day.clone())).collect())
    }
}

impl TryFrom<BTreeMap<u8, Vec<String>>> for WeeklyAvailability {
    type Error = ValidationError;

    fn try_from(raw: BTreeMap<u8, Vec<String>>) -> Result<Self, Self::Error> {
        let mut entries = Vec::with_capacity(raw.len());
        for (weekday, times) in raw {
            let times = times
                .iter()
                .map(|t| parse_time(t))
                .collect::<Result<Vec<_>, _>>()?;
            entries.push((weekday, times));
        }
        Self::from_entries(entries)
    }
}

impl From<WeeklyAvailability> for BTreeMap<u8, Vec<String>> {
    fn from(weekly: WeeklyAvailability) -> Self {
        weekly
            .0
            .into_iter()
            .map(|(weekday, times)| (weekday, times.into_iter().map(grid::format_time).collect()))
            .collect()
    }
}

// =============================================================================
// Holidays
// =============================================================================

/// Holiday keys a user works on. Every other holiday closes the whole day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnabledHolidays(BTreeSet<String>);

impl EnabledHolidays {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Result<Self, ValidationError> {
        let mut set = BTreeSet::new();
        for key in keys {
            let key = key.trim().to_string();
            if !holidays::is_known_holiday(&key) {
                return Err(ValidationError::UnknownHoliday(key));
            }
            set.insert(key);
        }
        Ok(Self(set))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

// =============================================================================
// Overrides
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideAction {
    Allow,
    Block,
}

/// Requested change to a single override entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideChange {
    Allow,
    Block,
    Remove,
}

impl std::str::FromStr for OverrideChange {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "block" => Ok(Self::Block),
            "remove" => Ok(Self::Remove),
            other => Err(ValidationError::InvalidOverrideAction(other.to_string())),
        }
    }
}

type RawOverrides = BTreeMap<String, BTreeMap<String, OverrideAction>>;

/// Date to time to forced state, taking precedence over weekly hours
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOverrides", into = "RawOverrides")]
pub struct Overrides(BTreeMap<NaiveDate, BTreeMap<NaiveTime, OverrideAction>>);

impl Overrides {
    pub fn get(&self, date: NaiveDate, time: NaiveTime) -> Option<OverrideAction> {
        self.0.get(&date).and_then(|times| times.get(&time)).copied()
    }

    /// Apply a change; `Remove` prunes the entry and any emptied date
    pub fn apply(&mut self, date: NaiveDate, time: NaiveTime, change: OverrideChange) {
        let action = match change {
            OverrideChange::Allow => OverrideAction::Allow,
            OverrideChange::Block => OverrideAction::Block,
            OverrideChange::Remove => {
                if let Some(times) = self.0.get_mut(&date) {
                    times.remove(&time);
                    if times.is_empty() {
                        self.0.remove(&date);
                    }
                }
                return;
            }
        };
        self.0.entry(date).or_default().insert(time, action);
    }

    /// Drop every entry dated before `today`
    pub fn prune_before(&mut self, today: NaiveDate) {
        self.0.retain(|date, _| *date >= today);
    }

    pub fn for_date(&self, date: NaiveDate) -> impl Iterator<Item = (NaiveTime, OverrideAction)> + '_ {
        self.0
            .get(&date)
            .into_iter()
            .flat_map(|times| times.iter().map(|(t, a)| (*t, *a)))
    }
}

impl TryFrom<RawOverrides> for Overrides {
    type Error = ValidationError;

    fn try_from(raw: RawOverrides) -> Result<Self, Self::Error> {
        let mut map = BTreeMap::new();
        for (date, times) in raw {
            let date = parse_date(&date)?;
            let mut parsed = BTreeMap::new();
            for (time, action) in times {
                parsed.insert(parse_time(&time)?, action);
            }
            if !parsed.is_empty() {
                map.insert(date, parsed);
            }
        }
        Ok(Self(map))
    }
}

impl From<Overrides> for RawOverrides {
    fn from(overrides: Overrides) -> Self {
        overrides
            .0
            .into_iter()
            .map(|(date, times)| {
                (
                    date.format("%Y-%m-%d").to_string(),
                    times
                        .into_iter()
                        .map(|(t, a)| (grid::format_time(t), a))
                        .collect(),
                )
            })
            .collect()
    }
}

// =============================================================================
// Profile
// =============================================================================

/// Everything the reservation engine needs to know about a user's hours
#[derive(Debug, Clone, Default)]
pub struct AvailabilityProfile {
    pub weekly: WeeklyAvailability,
    pub holidays: EnabledHolidays,
    pub overrides: Overrides,
}

impl AvailabilityProfile {
    /// A date observed as a holiday the user has not enabled is fully closed
    pub fn is_holiday_closed(&self, date: NaiveDate) -> bool {
        holidays::holiday_key_for_date(date)
            .map(|key| !self.holidays.contains(key))
            .unwrap_or(false)
    }

    /// Weekly hours with overrides applied; holiday closure is not consulted
    pub fn scheduled_open(&self, date: NaiveDate, time: NaiveTime) -> bool {
        match self.overrides.get(date, time) {
            Some(OverrideAction::Allow) => true,
            Some(OverrideAction::Block) => false,
            None => self.weekly.contains(date, time),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_default_weekly_is_weekdays() {
        let weekly = WeeklyAvailability::default();
        // 2024-03-11 is a Monday, 2024-03-16 a Saturday
        assert!(weekly.contains(date(2024, 3, 11), grid::at(9, 0)));
        assert!(weekly.contains(date(2024, 3, 11), grid::at(16, 30)));
        assert!(!weekly.contains(date(2024, 3, 11), grid::at(17, 0)));
        assert!(!weekly.contains(date(2024, 3, 11), grid::at(8, 30)));
        assert!(!weekly.contains(date(2024, 3, 16), grid::at(10, 0)));
        assert_eq!(weekly.times_for(3).count(), 16);
    }

    #[test]
    fn test_weekly_json_shape() {
        let weekly: WeeklyAvailability =
            serde_json::from_str(r#"{"1": ["09:00", "09:30"], "3": []}"#).unwrap();
        assert!(weekly.contains(date(2024, 3, 11), grid::at(9, 30)));
        let json = serde_json::to_value(&weekly).unwrap();
        assert_eq!(json, serde_json::json!({"1": ["09:00", "09:30"]}));
    }

    #[test]
    fn test_weekly_drops_off_grid_times() {
        let weekly: WeeklyAvailability =
            serde_json::from_str(r#"{"2": ["09:15", "05:00", "10:00"]}"#).unwrap();
        assert_eq!(weekly.times_for(2).collect::<Vec<_>>(), vec![grid::at(10, 0)]);
    }

    #[test]
    fn test_weekly_rejects_bad_weekday() {
        let result: Result<WeeklyAvailability, _> =
            serde_json::from_str(r#"{"7": ["09:00"]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_enabled_holidays_validation() {
        assert!(EnabledHolidays::new(vec!["labor_day".to_string()]).is_ok());
        assert!(matches!(
            EnabledHolidays::new(vec!["festivus".to_string()]),
            Err(ValidationError::UnknownHoliday(_))
        ));
    }

    #[test]
    fn test_override_apply_and_remove_prunes() {
        let mut overrides = Overrides::default();
        let day = date(2024, 3, 12);
        overrides.apply(day, grid::at(7, 0), OverrideChange::Allow);
        overrides.apply(day, grid::at(9, 0), OverrideChange::Block);
        assert_eq!(overrides.get(day, grid::at(7, 0)), Some(OverrideAction::Allow));

        overrides.apply(day, grid::at(7, 0), OverrideChange::Remove);
        overrides.apply(day, grid::at(9, 0), OverrideChange::Remove);
        assert_eq!(overrides, Overrides::default());
    }

    #[test]
    fn test_override_prune_before() {
        let mut overrides = Overrides::default();
        overrides.apply(date(2024, 3, 1), grid::at(9, 0), OverrideChange::Block);
        overrides.apply(date(2024, 3, 20), grid::at(9, 0), OverrideChange::Block);
        overrides.prune_before(date(2024, 3, 10));
        assert!(overrides.get(date(2024, 3, 1), grid::at(9, 0)).is_none());
        assert!(overrides.get(date(2024, 3, 20), grid::at(9, 0)).is_some());
    }

    #[test]
    fn test_overrides_json_round_trip_shape() {
        let json = r#"{"2024-03-12": {"07:00": "allow", "09:00": "block"}}"#;
        let overrides: Overrides = serde_json::from_str(json).unwrap();
        assert_eq!(
            serde_json::to_value(&overrides).unwrap(),
            serde_json::from_str::<serde_json::Value>(json).unwrap()
        );
    }

    #[test]
    fn test_override_change_parse() {
        assert_eq!("Allow".parse::<OverrideChange>().unwrap(), OverrideChange::Allow);
        assert_eq!("remove".parse::<OverrideChange>().unwrap(), OverrideChange::Remove);
        assert!("maybe".parse::<OverrideChange>().is_err());
    }

    #[test]
    fn test_profile_scheduled_open_with_overrides() {
        let mut profile = AvailabilityProfile::default();
        let monday = date(2024, 3, 11);
        profile.overrides.apply(monday, grid::at(7, 0), OverrideChange::Allow);
        profile.overrides.apply(monday, grid::at(10, 0), OverrideChange::Block);

        assert!(profile.scheduled_open(monday, grid::at(7, 0)));
        assert!(!profile.scheduled_open(monday, grid::at(10, 0)));
        assert!(profile.scheduled_open(monday, grid::at(11, 0)));
    }

    #[test]
    fn test_profile_holiday_closure() {
        let thanksgiving = date(2024, 11, 28);
        let mut profile = AvailabilityProfile::default();
        assert!(profile.is_holiday_closed(thanksgiving));
        assert!(!profile.is_holiday_closed(date(2024, 11, 27)));

        profile.holidays = EnabledHolidays::new(vec!["thanksgiving_day".to_string()]).unwrap();
        assert!(!profile.is_holiday_closed(thanksgiving));
    }
}
