//! Admin portal handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::{auth::hash_password, auth::record_audit, failure, ok, reject, respond, AppState, Reply};
use crate::booking::{AppointmentKey, CustomAppointment};
use crate::db::{settings, users};
use crate::error::ScheduleError;
use crate::ledger::AppointmentResponse;
use crate::models::{CreateStaffUser, StaffUser, StaffUserResponse, UpdateStaffBooking};
use crate::services::{Service, ServiceCatalog};
use crate::validation::{
    self, is_valid_email, parse_date, parse_time, validate_password, validate_timezone,
    validate_username, ValidationError,
};

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub timezone: String,
    pub services: Vec<Service>,
}

#[derive(Debug, Deserialize)]
pub struct TimezoneUpdate {
    pub timezone: String,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub date: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionKeyQuery {
    pub submission_id: String,
    pub date: String,
    pub time: String,
}

// =============================================================================
// Settings
// =============================================================================

/// Timezone and service catalog
pub async fn get_settings(State(state): State<AppState>) -> Reply<SettingsView> {
    let result = state.scheduler().await.map(|scheduler| SettingsView {
        timezone: scheduler.timezone().name().to_string(),
        services: scheduler.catalog().services().to_vec(),
    });
    respond(&state, result)
}

/// Change the timezone appointments are presented in
pub async fn update_timezone(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Json(body): Json<TimezoneUpdate>,
) -> Reply<String> {
    let tz = match validate_timezone(&body.timezone) {
        Ok(tz) => tz,
        Err(e) => return failure(&state, e.into()),
    };
    if let Err(e) = settings::save_timezone(&state.pool, tz).await {
        return failure(&state, e.into());
    }
    record_audit(
        &state.pool,
        "settings.timezone",
        "settings",
        None,
        &admin.username,
        Some(json!({ "timezone": tz.name() })),
    )
    .await;
    ok(tz.name().to_string())
}

/// Replace the service catalog
pub async fn update_services(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Json(services): Json<Vec<Service>>,
) -> Reply<Vec<Service>> {
    let catalog = match ServiceCatalog::new(services) {
        Ok(catalog) => catalog,
        Err(e) => return failure(&state, e.into()),
    };
    if let Err(e) = settings::put(&state.pool, settings::SERVICES, &catalog).await {
        return failure(&state, e.into());
    }
    record_audit(
        &state.pool,
        "settings.services",
        "settings",
        None,
        &admin.username,
        Some(json!({ "count": catalog.services().len() })),
    )
    .await;
    ok(catalog.services().to_vec())
}

// =============================================================================
// Appointments
// =============================================================================

/// Book a custom appointment with an explicit title and duration
pub async fn create_appointment(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Json(body): Json<CustomAppointment>,
) -> Reply<AppointmentResponse> {
    let result = async {
        let scheduler = state.scheduler().await?;
        let appointment = scheduler.book_custom(&body, &admin.username).await?;
        Ok::<_, ScheduleError>(AppointmentResponse::new(appointment, scheduler.catalog()))
    }
    .await;
    respond(&state, result)
}

/// Move an appointment to a new date and time
pub async fn reschedule_appointment(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<RescheduleRequest>,
) -> Reply<AppointmentResponse> {
    let result = async {
        let scheduler = state.scheduler().await?;
        let moved = scheduler
            .reschedule(id, &body.date, &body.time, &admin.username)
            .await?;
        Ok::<_, ScheduleError>(AppointmentResponse::new(moved, scheduler.catalog()))
    }
    .await;
    respond(&state, result)
}

async fn delete_by_key(
    state: &AppState,
    key: AppointmentKey,
    admin: &StaffUser,
) -> Result<Vec<Uuid>, ScheduleError> {
    let scheduler = state.scheduler().await?;
    let deleted = scheduler.delete(&key, &admin.username).await?;
    Ok(deleted.into_iter().map(|a| a.id).collect())
}

/// Delete an appointment by id
pub async fn delete_appointment(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Path(id): Path<Uuid>,
) -> Reply<Vec<Uuid>> {
    let result = delete_by_key(&state, AppointmentKey::Id(id), &admin).await;
    respond(&state, result)
}

/// Delete appointments created from an external submission
pub async fn delete_submission_appointment(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Query(query): Query<SubmissionKeyQuery>,
) -> Reply<Vec<Uuid>> {
    let key = match (parse_date(&query.date), parse_time(&query.time)) {
        (Ok(date), Ok(time)) if !query.submission_id.trim().is_empty() => {
            AppointmentKey::Submission {
                submission_id: query.submission_id.trim().to_string(),
                date,
                time,
            }
        }
        (Err(e), _) | (_, Err(e)) => return failure(&state, e.into()),
        _ => {
            return failure(
                &state,
                ValidationError::Required {
                    field: "submission_id".to_string(),
                }
                .into(),
            )
        }
    };
    let result = delete_by_key(&state, key, &admin).await;
    respond(&state, result)
}

// =============================================================================
// Staff users
// =============================================================================

/// List all staff users
pub async fn list_users(State(state): State<AppState>) -> Reply<Vec<StaffUserResponse>> {
    let result = users::list_all(&state.pool)
        .await
        .map(|all| all.into_iter().map(StaffUserResponse::from).collect())
        .map_err(ScheduleError::from);
    respond(&state, result)
}

/// Create a staff user
pub async fn create_user(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Json(body): Json<CreateStaffUser>,
) -> Reply<StaffUserResponse> {
    let username = body.username.trim().to_lowercase();
    let email = body.email.trim().to_lowercase();

    if let Err(e) = validate_username(&username).and_then(|_| validate_password(&body.password)) {
        return failure(&state, e.into());
    }
    if !is_valid_email(&email) {
        return failure(&state, ValidationError::InvalidEmail.into());
    }
    if let Err(e) = validation::validate_text("display_name", body.display_name.as_deref(), 100) {
        return failure(&state, e.into());
    }

    match users::find_by_username(&state.pool, &username).await {
        Ok(Some(_)) => return reject(StatusCode::CONFLICT, "Username already exists"),
        Ok(None) => {}
        Err(e) => return failure(&state, e.into()),
    }

    let password_hash = match hash_password(&body.password) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("Password hashing failed: {}", e);
            return reject(StatusCode::INTERNAL_SERVER_ERROR, "Could not create user");
        }
    };

    let display_name = body
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    let user = match users::insert(
        &state.pool,
        &username,
        &email,
        &password_hash,
        display_name,
        body.is_admin,
    )
    .await
    {
        Ok(user) => user,
        Err(e) => return failure(&state, e.into()),
    };

    record_audit(
        &state.pool,
        "user.create",
        "staff_user",
        Some(user.id),
        &admin.username,
        Some(json!({ "username": user.username, "is_admin": user.is_admin })),
    )
    .await;
    tracing::info!(user = %user.username, admin = %admin.username, "Staff user created");

    (StatusCode::CREATED, Json(crate::models::ApiResponse::success(user.into())))
}

/// Allowed-service slugs must name configured services
fn check_slugs(catalog: &ServiceCatalog, slugs: &[String]) -> Result<Vec<String>, ValidationError> {
    slugs
        .iter()
        .map(|slug| {
            catalog
                .find_by_slug(slug.trim())
                .map(|service| service.slug())
                .ok_or_else(|| ValidationError::UnknownService(slug.clone()))
        })
        .collect()
}

/// Enable or disable bookings and restrict the services a user performs
pub async fn update_user_booking(
    State(state): State<AppState>,
    Extension(admin): Extension<StaffUser>,
    Path(username): Path<String>,
    Json(body): Json<UpdateStaffBooking>,
) -> Reply<StaffUserResponse> {
    let result = async {
        let user = users::find_by_username(&state.pool, &username)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("User '{}'", username)))?;

        let allowed = match &body.allowed_services {
            // Field absent: keep the current list
            None => user.allowed_services.as_ref().map(|list| list.0.clone()),
            Some(None) => None,
            Some(Some(slugs)) => {
                let scheduler = state.scheduler().await?;
                Some(check_slugs(scheduler.catalog(), slugs)?)
            }
        };
        let enabled = body.booking_enabled.unwrap_or(user.booking_enabled);

        let updated = users::update_booking(&state.pool, user.id, enabled, allowed.as_deref())
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("User '{}'", username)))?;

        record_audit(
            &state.pool,
            "user.booking",
            "staff_user",
            Some(updated.id),
            &admin.username,
            Some(json!({ "booking_enabled": enabled, "allowed_services": allowed })),
        )
        .await;
        Ok::<_, ScheduleError>(StaffUserResponse::from(updated))
    }
    .await;
    respond(&state, result)
}
