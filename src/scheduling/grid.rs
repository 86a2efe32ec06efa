//! The fixed 30-minute business-hours grid

use chrono::{NaiveTime, Timelike};

pub const SLOT_SECONDS: i64 = 1800;

const FIRST_SLOT_SECONDS: u32 = 6 * 3600;
const SLOTS_PER_DAY: u32 = 24;
const DAY_SECONDS: u32 = 24 * 3600;

/// Wall-clock time from hours and minutes (midnight for invalid input)
pub fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

/// Every bookable start time, 06:00 through 17:30
pub fn business_hours() -> impl Iterator<Item = NaiveTime> + Clone {
    (0..SLOTS_PER_DAY).filter_map(|i| {
        NaiveTime::from_num_seconds_from_midnight_opt(FIRST_SLOT_SECONDS + i * SLOT_SECONDS as u32, 0)
    })
}

pub fn is_grid_time(time: NaiveTime) -> bool {
    let secs = time.num_seconds_from_midnight();
    time.nanosecond() == 0
        && secs >= FIRST_SLOT_SECONDS
        && secs < FIRST_SLOT_SECONDS + SLOTS_PER_DAY * SLOT_SECONDS as u32
        && (secs - FIRST_SLOT_SECONDS) % SLOT_SECONDS as u32 == 0
}

/// Number of contiguous slots a duration occupies (at least one)
pub fn slots_needed(duration_seconds: i64) -> usize {
    if duration_seconds <= 0 {
        return 1;
    }
    ((duration_seconds + SLOT_SECONDS - 1) / SLOT_SECONDS) as usize
}

/// The `count` slot times starting at `start`, or `None` past midnight
pub fn slot_run(start: NaiveTime, count: usize) -> Option<Vec<NaiveTime>> {
    let start = start.num_seconds_from_midnight();
    (0..count)
        .map(|i| {
            let secs = start + (i as u32) * SLOT_SECONDS as u32;
            if secs >= DAY_SECONDS {
                None
            } else {
                NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
            }
        })
        .collect()
}

/// Slot times covered by an appointment
///
/// The start is floored to the 30-minute boundary so an off-grid legacy
/// appointment still blocks the slot it begins in.
pub fn occupied_slots(start: NaiveTime, duration_seconds: i64) -> Vec<NaiveTime> {
    let secs = start.num_seconds_from_midnight();
    let floored = secs - secs % SLOT_SECONDS as u32;
    let end = i64::from(secs) + duration_seconds.max(1);
    let count = slots_needed(end - i64::from(floored));
    NaiveTime::from_num_seconds_from_midnight_opt(floored, 0)
        .map(|first| {
            (0..count)
                .filter_map(|i| {
                    let s = first.num_seconds_from_midnight() + (i as u32) * SLOT_SECONDS as u32;
                    (s < DAY_SECONDS)
                        .then(|| NaiveTime::from_num_seconds_from_midnight_opt(s, 0))
                        .flatten()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// `HH:MM`
pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// `9:00 AM`
pub fn display_label(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_hours_grid() {
        let hours: Vec<_> = business_hours().collect();
        assert_eq!(hours.len(), 24);
        assert_eq!(hours[0], at(6, 0));
        assert_eq!(hours[1], at(6, 30));
        assert_eq!(hours[23], at(17, 30));
    }

    #[test]
    fn test_is_grid_time() {
        assert!(is_grid_time(at(6, 0)));
        assert!(is_grid_time(at(17, 30)));
        assert!(!is_grid_time(at(18, 0)));
        assert!(!is_grid_time(at(5, 30)));
        assert!(!is_grid_time(at(9, 15)));
        assert!(!is_grid_time(NaiveTime::from_hms_opt(9, 0, 1).unwrap()));
    }

    #[test]
    fn test_slots_needed_rounds_up() {
        assert_eq!(slots_needed(0), 1);
        assert_eq!(slots_needed(900), 1);
        assert_eq!(slots_needed(1800), 1);
        assert_eq!(slots_needed(1801), 2);
        assert_eq!(slots_needed(5400), 3);
        assert_eq!(slots_needed(7200), 4);
        assert_eq!(slots_needed(14400), 8);
    }

    #[test]
    fn test_slot_run() {
        assert_eq!(
            slot_run(at(9, 0), 3).unwrap(),
            vec![at(9, 0), at(9, 30), at(10, 0)]
        );
        assert!(slot_run(at(23, 30), 2).is_none());
        assert_eq!(slot_run(at(23, 30), 1).unwrap(), vec![at(23, 30)]);
    }

    #[test]
    fn test_occupied_slots() {
        assert_eq!(occupied_slots(at(9, 0), 3600), vec![at(9, 0), at(9, 30)]);
        assert_eq!(occupied_slots(at(9, 0), 900), vec![at(9, 0)]);
        // Off-grid start spills into the slot containing its end
        assert_eq!(
            occupied_slots(at(9, 15), 1800),
            vec![at(9, 0), at(9, 30)]
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(format_time(at(9, 0)), "09:00");
        assert_eq!(display_label(at(9, 0)), "9:00 AM");
        assert_eq!(display_label(at(13, 30)), "1:30 PM");
    }
}
