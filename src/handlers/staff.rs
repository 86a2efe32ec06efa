//! Staff self-service: availability, blocked slots and own appointments
//!
//! Administrators may act on another user by passing `?user=<username>`.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{auth::record_audit, respond, AppState, Reply};
use crate::availability::{
    self, EnabledHolidays, OverrideChange, Overrides, WeeklyAvailability,
};
use crate::db::users;
use crate::error::ScheduleError;
use crate::holidays;
use crate::ledger::AppointmentResponse;
use crate::models::StaffUser;
use crate::scheduling::grid;
use crate::validation::{parse_date, parse_time, ValidationError};

/// Longest appointment listing range, in days
const MAX_LISTING_DAYS: i64 = 366;

#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityView {
    pub username: String,
    pub weekly: WeeklyAvailability,
    pub holidays: EnabledHolidays,
    pub overrides: Overrides,
    /// Every holiday key a user may enable
    pub known_holidays: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct HolidaysUpdate {
    pub holidays: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OverrideEntry {
    pub date: String,
    pub time: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct OverridesUpdate {
    pub changes: Vec<OverrideEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub date: String,
    pub time: String,
    /// Number of grid slots; wins over `duration_seconds`
    pub slots: Option<usize>,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    pub date: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct BlocksQuery {
    pub date: String,
    pub user: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BlockedSlots {
    pub date: String,
    pub times: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentsQuery {
    pub from: String,
    pub to: String,
    pub user: Option<String>,
}

// =============================================================================
// Helpers
// =============================================================================

/// Whether `staff` acts on someone other than themself
fn acts_on_other(staff: &StaffUser, requested: Option<&str>) -> Result<Option<String>, ScheduleError> {
    match requested.map(str::trim).filter(|u| !u.is_empty()) {
        None => Ok(None),
        Some(name) if name == staff.username => Ok(None),
        Some(_) if !staff.is_admin => Err(ScheduleError::Forbidden(
            "Only administrators can manage other users".to_string(),
        )),
        Some(name) => Ok(Some(name.to_string())),
    }
}

async fn target_user(
    state: &AppState,
    staff: &StaffUser,
    requested: Option<&str>,
) -> Result<StaffUser, ScheduleError> {
    match acts_on_other(staff, requested)? {
        None => Ok(staff.clone()),
        Some(name) => users::find_by_username(&state.pool, &name)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("User '{}'", name))),
    }
}

fn parse_changes(
    entries: &[OverrideEntry],
) -> Result<Vec<(NaiveDate, NaiveTime, OverrideChange)>, ValidationError> {
    entries
        .iter()
        .map(|entry| {
            let date = parse_date(&entry.date)?;
            let time = parse_time(&entry.time)?;
            if !grid::is_grid_time(time) {
                return Err(ValidationError::OffGrid(grid::format_time(time)));
            }
            Ok((date, time, entry.action.parse()?))
        })
        .collect()
}

fn block_count(request: &BlockRequest) -> Result<usize, ValidationError> {
    match (request.slots, request.duration_seconds) {
        (Some(0), _) => Err(ValidationError::InvalidDuration),
        (Some(slots), _) => Ok(slots),
        (None, Some(seconds)) => Ok(grid::slots_needed(crate::validation::validate_duration(seconds)?)),
        (None, None) => Ok(1),
    }
}

fn listing_range(from: &str, to: &str) -> Result<(NaiveDate, NaiveDate), ValidationError> {
    let from = parse_date(from)?;
    let to = parse_date(to)?;
    if to < from || (to - from).num_days() > MAX_LISTING_DAYS {
        return Err(ValidationError::InvalidDate(format!("{} to {}", from, to)));
    }
    Ok((from, to))
}

// =============================================================================
// Availability
// =============================================================================

async fn load_view(state: &AppState, user: StaffUser) -> Result<AvailabilityView, ScheduleError> {
    let profile = availability::load_profile(&state.pool, &user).await?;
    Ok(AvailabilityView {
        username: user.username,
        weekly: profile.weekly,
        holidays: profile.holidays,
        overrides: profile.overrides,
        known_holidays: holidays::all_holiday_keys().collect(),
    })
}

/// Current availability settings
pub async fn get_availability(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
) -> Reply<AvailabilityView> {
    let result = async {
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        load_view(&state, user).await
    }
    .await;
    respond(&state, result)
}

async fn target_profile(
    state: &AppState,
    staff: &StaffUser,
    requested: Option<&str>,
) -> Result<availability::AvailabilityProfile, ScheduleError> {
    let user = target_user(state, staff, requested).await?;
    Ok(availability::load_profile(&state.pool, &user).await?)
}

pub async fn get_weekly(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
) -> Reply<WeeklyAvailability> {
    let result = target_profile(&state, &staff, query.user.as_deref())
        .await
        .map(|profile| profile.weekly);
    respond(&state, result)
}

pub async fn get_holidays(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
) -> Reply<EnabledHolidays> {
    let result = target_profile(&state, &staff, query.user.as_deref())
        .await
        .map(|profile| profile.holidays);
    respond(&state, result)
}

pub async fn get_overrides(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
) -> Reply<Overrides> {
    let result = target_profile(&state, &staff, query.user.as_deref())
        .await
        .map(|profile| profile.overrides);
    respond(&state, result)
}

/// Replace the weekly recurring hours
pub async fn update_weekly(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
    Json(weekly): Json<WeeklyAvailability>,
) -> Reply<WeeklyAvailability> {
    let result = async {
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        availability::save_weekly(&state.pool, &user, &weekly).await?;
        record_audit(
            &state.pool,
            "availability.weekly",
            "staff_user",
            Some(user.id),
            &staff.username,
            None,
        )
        .await;
        Ok::<_, ScheduleError>(weekly)
    }
    .await;
    respond(&state, result)
}

/// Replace the set of holidays the user works on
pub async fn update_holidays(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<HolidaysUpdate>,
) -> Reply<EnabledHolidays> {
    let result = async {
        let enabled = EnabledHolidays::new(body.holidays)?;
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        availability::save_holidays(&state.pool, &user, &enabled).await?;
        record_audit(
            &state.pool,
            "availability.holidays",
            "staff_user",
            Some(user.id),
            &staff.username,
            Some(json!({ "holidays": enabled.keys().collect::<Vec<_>>() })),
        )
        .await;
        Ok::<_, ScheduleError>(enabled)
    }
    .await;
    respond(&state, result)
}

/// Allow, block or clear individual date/time slots
pub async fn update_overrides(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<OverridesUpdate>,
) -> Reply<Overrides> {
    let result = async {
        let changes = parse_changes(&body.changes)?;
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        let scheduler = state.scheduler().await?;
        let today = scheduler.now_local().date();
        let overrides =
            availability::update_overrides(&state.pool, &user, today, &changes).await?;
        record_audit(
            &state.pool,
            "availability.overrides",
            "staff_user",
            Some(user.id),
            &staff.username,
            Some(json!({ "changes": changes.len() })),
        )
        .await;
        Ok::<_, ScheduleError>(overrides)
    }
    .await;
    respond(&state, result)
}

/// Allow, block or clear one date/time slot
pub async fn set_override(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<OverrideEntry>,
) -> Reply<Overrides> {
    let result = async {
        let (date, time, change) = parse_changes(std::slice::from_ref(&body))?
            .pop()
            .ok_or(ValidationError::Required {
                field: "changes".to_string(),
            })?;
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        let scheduler = state.scheduler().await?;
        let today = scheduler.now_local().date();
        let overrides =
            availability::set_override(&state.pool, &user, today, date, time, change).await?;
        record_audit(
            &state.pool,
            "availability.override",
            "staff_user",
            Some(user.id),
            &staff.username,
            Some(json!({ "date": body.date, "time": body.time, "action": body.action })),
        )
        .await;
        Ok::<_, ScheduleError>(overrides)
    }
    .await;
    respond(&state, result)
}

// =============================================================================
// Blocked slots
// =============================================================================

/// Slots blocked on a date
pub async fn list_blocks(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<BlocksQuery>,
) -> Reply<BlockedSlots> {
    let result = async {
        let date = parse_date(&query.date)?;
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        let scheduler = state.scheduler().await?;
        let times = scheduler.engine().store().blocked_on(user.id, date).await?;
        Ok::<_, ScheduleError>(BlockedSlots {
            date: date.format("%Y-%m-%d").to_string(),
            times: times.into_iter().map(grid::format_time).collect(),
        })
    }
    .await;
    respond(&state, result)
}

/// Block a run of slots directly
pub async fn block_slots(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<BlockRequest>,
) -> Reply<BlockedSlots> {
    let result = async {
        let date = parse_date(&body.date)?;
        let start = parse_time(&body.time)?;
        if !grid::is_grid_time(start) {
            return Err(ScheduleError::from(ValidationError::OffGrid(
                grid::format_time(start),
            )));
        }
        let count = block_count(&body)?;
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        let scheduler = state.scheduler().await?;
        let blocked = scheduler
            .engine()
            .block_slots(user.id, date, start, count)
            .await?;
        record_audit(
            &state.pool,
            "slots.block",
            "staff_user",
            Some(user.id),
            &staff.username,
            Some(json!({ "date": body.date, "time": body.time, "slots": blocked.len() })),
        )
        .await;
        Ok::<_, ScheduleError>(BlockedSlots {
            date: date.format("%Y-%m-%d").to_string(),
            times: blocked.into_iter().map(grid::format_time).collect(),
        })
    }
    .await;
    respond(&state, result)
}

/// Remove a single blocked slot
pub async fn unblock_slot(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<UnblockRequest>,
) -> Reply<()> {
    let result = async {
        let date = parse_date(&body.date)?;
        let time = parse_time(&body.time)?;
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        let scheduler = state.scheduler().await?;
        scheduler.engine().unblock_slot(user.id, date, time).await?;
        record_audit(
            &state.pool,
            "slots.unblock",
            "staff_user",
            Some(user.id),
            &staff.username,
            Some(json!({ "date": body.date, "time": body.time })),
        )
        .await;
        Ok::<_, ScheduleError>(())
    }
    .await;
    respond(&state, result)
}

// =============================================================================
// Appointments
// =============================================================================

/// Appointments between two local dates (inclusive)
pub async fn list_appointments(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Query(query): Query<AppointmentsQuery>,
) -> Reply<Vec<AppointmentResponse>> {
    let result = async {
        let (from, to) = listing_range(&query.from, &query.to)?;
        let user = target_user(&state, &staff, query.user.as_deref()).await?;
        let scheduler = state.scheduler().await?;
        let appointments = scheduler
            .ledger()
            .list_for_user_between(user.id, from, to)
            .await?;
        Ok::<_, ScheduleError>(appointments
            .into_iter()
            .map(|a| AppointmentResponse::new(a, scheduler.catalog()))
            .collect())
    }
    .await;
    respond(&state, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json as SqlJson;
    use uuid::Uuid;

    fn staff(is_admin: bool) -> StaffUser {
        StaffUser {
            id: Uuid::new_v4(),
            username: "kim".to_string(),
            display_name: None,
            email: "kim@example.com".to_string(),
            password_hash: String::new(),
            is_admin,
            booking_enabled: true,
            allowed_services: None,
            weekly_availability: None,
            enabled_holidays: None,
            overrides: SqlJson(Overrides::default()),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    fn block(slots: Option<usize>, duration_seconds: Option<i64>) -> BlockRequest {
        BlockRequest {
            date: "2024-03-11".to_string(),
            time: "10:00".to_string(),
            slots,
            duration_seconds,
        }
    }

    #[test]
    fn test_staff_manage_themselves() {
        let user = staff(false);
        assert_eq!(acts_on_other(&user, None).unwrap(), None);
        assert_eq!(acts_on_other(&user, Some("kim")).unwrap(), None);
        assert_eq!(acts_on_other(&user, Some("  ")).unwrap(), None);
    }

    #[test]
    fn test_only_admins_manage_others() {
        assert!(matches!(
            acts_on_other(&staff(false), Some("lee")),
            Err(ScheduleError::Forbidden(_))
        ));
        assert_eq!(
            acts_on_other(&staff(true), Some("lee")).unwrap(),
            Some("lee".to_string())
        );
    }

    #[test]
    fn test_parse_changes() {
        let changes = parse_changes(&[
            OverrideEntry {
                date: "2024-03-11".to_string(),
                time: "09:30".to_string(),
                action: "block".to_string(),
            },
            OverrideEntry {
                date: "2024-03-12".to_string(),
                time: "10:00".to_string(),
                action: "Remove".to_string(),
            },
        ])
        .unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].2, OverrideChange::Block);
        assert_eq!(changes[1].2, OverrideChange::Remove);
    }

    #[test]
    fn test_parse_changes_rejects_bad_entries() {
        let entry = |time: &str, action: &str| OverrideEntry {
            date: "2024-03-11".to_string(),
            time: time.to_string(),
            action: action.to_string(),
        };
        assert!(matches!(
            parse_changes(&[entry("09:10", "block")]),
            Err(ValidationError::OffGrid(_))
        ));
        assert!(matches!(
            parse_changes(&[entry("09:00", "close")]),
            Err(ValidationError::InvalidOverrideAction(_))
        ));
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(&block(None, None)).unwrap(), 1);
        assert_eq!(block_count(&block(Some(3), Some(900))).unwrap(), 3);
        assert_eq!(block_count(&block(None, Some(5400))).unwrap(), 3);
        assert!(block_count(&block(Some(0), None)).is_err());
    }

    #[test]
    fn test_listing_range() {
        assert!(listing_range("2024-03-01", "2024-03-31").is_ok());
        assert!(listing_range("2024-03-31", "2024-03-01").is_err());
        assert!(listing_range("2024-01-01", "2025-06-01").is_err());
    }
}
