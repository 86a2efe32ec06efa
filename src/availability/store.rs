//! Loading and saving per-user availability

use chrono::{NaiveDate, NaiveTime};
use sqlx::{types::Json, PgPool};

use super::{AvailabilityProfile, EnabledHolidays, OverrideChange, Overrides, WeeklyAvailability};
use crate::db::{settings, users};
use crate::models::StaffUser;

/// Resolve a user's profile
///
/// Weekly hours come from the user's own value, then the legacy global
/// schedule, then the built-in weekday default.
pub fn profile_for(user: &StaffUser, legacy: Option<&WeeklyAvailability>) -> AvailabilityProfile {
    let weekly = match (&user.weekly_availability, legacy) {
        (Some(Json(own)), _) => own.clone(),
        (None, Some(legacy)) => legacy.clone(),
        (None, None) => WeeklyAvailability::default(),
    };
    AvailabilityProfile {
        weekly,
        holidays: user
            .enabled_holidays
            .as_ref()
            .map(|Json(h)| h.clone())
            .unwrap_or_default(),
        overrides: user.overrides.0.clone(),
    }
}

pub async fn load_legacy_weekly(pool: &PgPool) -> Result<Option<WeeklyAvailability>, sqlx::Error> {
    settings::get(pool, settings::LEGACY_WEEKLY_AVAILABILITY).await
}

/// Load the profile for a user straight from the database
pub async fn load_profile(pool: &PgPool, user: &StaffUser) -> Result<AvailabilityProfile, sqlx::Error> {
    let legacy = if user.weekly_availability.is_none() {
        load_legacy_weekly(pool).await?
    } else {
        None
    };
    Ok(profile_for(user, legacy.as_ref()))
}

pub async fn save_weekly(
    pool: &PgPool,
    user: &StaffUser,
    weekly: &WeeklyAvailability,
) -> Result<(), sqlx::Error> {
    users::save_weekly(pool, user.id, weekly).await?;
    tracing::info!(user = %user.username, "Weekly availability saved");
    Ok(())
}

pub async fn save_holidays(
    pool: &PgPool,
    user: &StaffUser,
    holidays: &EnabledHolidays,
) -> Result<(), sqlx::Error> {
    users::save_holidays(pool, user.id, holidays).await?;
    tracing::info!(user = %user.username, "Holiday availability saved");
    Ok(())
}

/// Apply a batch of changes in order, then drop dates before `today`
pub fn apply_changes(
    overrides: &mut Overrides,
    today: NaiveDate,
    changes: &[(NaiveDate, NaiveTime, OverrideChange)],
) {
    for (date, time, change) in changes {
        overrides.apply(*date, *time, *change);
    }
    overrides.prune_before(today);
}

/// Apply override changes to a user's stored overrides, pruning past dates
///
/// The changes are applied to the row as currently stored, not to the
/// snapshot in `user`.
pub async fn update_overrides(
    pool: &PgPool,
    user: &StaffUser,
    today: NaiveDate,
    changes: &[(NaiveDate, NaiveTime, OverrideChange)],
) -> Result<Overrides, sqlx::Error> {
    let overrides = users::modify_overrides(pool, user.id, |overrides| {
        apply_changes(overrides, today, changes)
    })
    .await?
    .ok_or(sqlx::Error::RowNotFound)?;

    tracing::info!(
        user = %user.username,
        changes = changes.len(),
        "Availability overrides saved"
    );
    Ok(overrides)
}

/// Apply a single override change
pub async fn set_override(
    pool: &PgPool,
    user: &StaffUser,
    today: NaiveDate,
    date: NaiveDate,
    time: NaiveTime,
    change: OverrideChange,
) -> Result<Overrides, sqlx::Error> {
    update_overrides(pool, user, today, &[(date, time, change)]).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::OverrideAction;
    use crate::scheduling::grid;
    use chrono::Utc;
    use uuid::Uuid;

    fn user(weekly: Option<WeeklyAvailability>) -> StaffUser {
        StaffUser {
            id: Uuid::new_v4(),
            username: "sam".to_string(),
            display_name: None,
            email: "sam@example.com".to_string(),
            password_hash: String::new(),
            is_admin: false,
            booking_enabled: true,
            allowed_services: None,
            weekly_availability: weekly.map(Json),
            enabled_holidays: None,
            overrides: Json(Overrides::default()),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    fn monday_nine() -> WeeklyAvailability {
        WeeklyAvailability::from_entries(vec![(1, vec![grid::at(9, 0)])]).unwrap()
    }

    #[test]
    fn test_own_weekly_wins_over_legacy() {
        let own = monday_nine();
        let legacy = WeeklyAvailability::empty();
        let profile = profile_for(&user(Some(own.clone())), Some(&legacy));
        assert_eq!(profile.weekly, own);
    }

    #[test]
    fn test_legacy_weekly_is_migration_fallback() {
        let legacy = monday_nine();
        let profile = profile_for(&user(None), Some(&legacy));
        assert_eq!(profile.weekly, legacy);
    }

    #[test]
    fn test_default_weekly_when_nothing_stored() {
        let profile = profile_for(&user(None), None);
        assert_eq!(profile.weekly, WeeklyAvailability::default());
        assert_eq!(profile.holidays, EnabledHolidays::default());
    }

    #[test]
    fn test_apply_changes_keeps_stored_entries() {
        let monday = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 12).unwrap();
        let friday_before = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();

        // Stored row already holds another editor's change and a stale date
        let mut stored = Overrides::default();
        stored.apply(tuesday, grid::at(10, 0), OverrideChange::Block);
        stored.apply(friday_before, grid::at(9, 0), OverrideChange::Allow);

        apply_changes(
            &mut stored,
            monday,
            &[
                (monday, grid::at(7, 0), OverrideChange::Allow),
                (monday, grid::at(9, 0), OverrideChange::Block),
                (monday, grid::at(9, 0), OverrideChange::Remove),
            ],
        );

        assert_eq!(stored.get(tuesday, grid::at(10, 0)), Some(OverrideAction::Block));
        assert_eq!(stored.get(monday, grid::at(7, 0)), Some(OverrideAction::Allow));
        assert_eq!(stored.get(monday, grid::at(9, 0)), None);
        assert_eq!(stored.get(friday_before, grid::at(9, 0)), None);
    }
}
