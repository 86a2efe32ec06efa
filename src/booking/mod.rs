//! Booking orchestration
//!
//! Validates a booking, resolves the staff user, reserves the slot range and
//! writes the appointment. Any failure after the reservation releases the
//! claimed slots again.

pub mod events;
pub mod fields;

use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::availability::{self, AvailabilityProfile, WeeklyAvailability};
use crate::db::{settings, users};
use crate::error::ScheduleError;
use crate::ledger::{Appointment, Ledger, NewAppointment};
use crate::models::StaffUser;
use crate::scheduling::query::{self, Candidate};
use crate::scheduling::{grid, PgSlotStore, SlotEngine};
use crate::services::{Service, ServiceCatalog};
use crate::validation::{self, ValidationError};

pub use events::{AppointmentEvent, EventBus};
pub use fields::SubmissionFields;

const MAX_NOTES_LENGTH: usize = 2000;
const MAX_TITLE_LENGTH: usize = 200;

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingRequest {
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    /// Username, or `anyone` / absent for any qualified user
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub submission_id: Option<String>,
    /// Remaining submitted fields, stored with the appointment
    #[serde(default)]
    pub submission_data: Map<String, Value>,
}

impl BookingRequest {
    /// Build a request from a raw form submission
    pub fn from_submission(submission: Map<String, Value>) -> Self {
        let fields = SubmissionFields::from_fields(&submission);
        Self {
            date: fields.date.unwrap_or_default(),
            time: fields.time.unwrap_or_default(),
            service: fields.service,
            duration_seconds: fields.duration_seconds,
            user: fields.user,
            notes: fields.notes,
            title: fields.title,
            submission_id: fields.submission_id,
            submission_data: submission,
        }
    }
}

/// Admin-entered appointment with an explicit duration
#[derive(Debug, Clone, Deserialize)]
pub struct CustomAppointment {
    pub user: String,
    pub date: String,
    pub time: String,
    pub duration_seconds: i64,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserChoice {
    Anyone,
    Named(String),
}

impl UserChoice {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Anyone,
            Some(name) if name.eq_ignore_ascii_case("anyone") => Self::Anyone,
            Some(name) => Self::Named(name.to_string()),
        }
    }
}

/// Key identifying an appointment to delete
#[derive(Debug, Clone)]
pub enum AppointmentKey {
    Id(Uuid),
    /// External submission id plus its local date and time
    Submission {
        submission_id: String,
        date: NaiveDate,
        time: NaiveTime,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub appointment_id: Uuid,
    pub user: String,
    pub date: String,
    pub time: String,
    pub duration_seconds: i64,
    pub service: Option<String>,
}

// =============================================================================
// Validation
// =============================================================================

#[derive(Debug, Clone)]
pub struct ValidatedBooking {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_seconds: i64,
    pub service: Option<Service>,
    pub user: UserChoice,
}

/// Duration for a request: a known service wins, then explicit seconds
pub fn resolve_duration(
    catalog: &ServiceCatalog,
    service: Option<&str>,
    explicit: Option<i64>,
) -> Result<(i64, Option<Service>), ValidationError> {
    let label = service.map(str::trim).filter(|s| !s.is_empty());
    if let Some(found) = label.and_then(|l| catalog.find(l)) {
        return Ok((found.duration_seconds, Some(found.clone())));
    }
    match (explicit, label) {
        (Some(seconds), _) => Ok((validation::validate_duration(seconds)?, None)),
        (None, Some(label)) => Err(ValidationError::UnknownService(label.to_string())),
        (None, None) => Err(ValidationError::MissingDuration),
    }
}

/// A bookable start: on the grid and strictly after `now`
pub fn validate_start(
    date: &str,
    time: &str,
    now: NaiveDateTime,
) -> Result<(NaiveDate, NaiveTime), ValidationError> {
    let date = validation::parse_date(date)?;
    let time = validation::parse_time(time)?;
    if !grid::is_grid_time(time) {
        return Err(ValidationError::OffGrid(grid::format_time(time)));
    }
    if date.and_time(time) <= now {
        return Err(ValidationError::InPast);
    }
    Ok((date, time))
}

pub fn validate_request(
    request: &BookingRequest,
    catalog: &ServiceCatalog,
    now: NaiveDateTime,
) -> Result<ValidatedBooking, ValidationError> {
    let (date, time) = validate_start(&request.date, &request.time, now)?;
    let (duration_seconds, service) =
        resolve_duration(catalog, request.service.as_deref(), request.duration_seconds)?;
    validation::validate_text("notes", request.notes.as_deref(), MAX_NOTES_LENGTH)?;
    validation::validate_text("title", request.title.as_deref(), MAX_TITLE_LENGTH)?;
    validation::validate_text("submission_id", request.submission_id.as_deref(), 100)?;
    Ok(ValidatedBooking {
        date,
        time,
        duration_seconds,
        service,
        user: UserChoice::parse(request.user.as_deref()),
    })
}

/// A user may take a booking when enabled and allowed the service
pub fn authorize_service(user: &StaffUser, service: Option<&Service>) -> Result<(), ScheduleError> {
    if !user.booking_enabled {
        return Err(ScheduleError::Forbidden(format!(
            "{} is not accepting bookings",
            user.label()
        )));
    }
    if !user.performs(service) {
        return Err(ScheduleError::Forbidden(format!(
            "{} does not offer this service",
            user.label()
        )));
    }
    Ok(())
}

/// Form data stored with an appointment
fn build_form_data(
    request: &BookingRequest,
    booking: &ValidatedBooking,
    user: &StaffUser,
) -> Value {
    let mut data = request.submission_data.clone();
    match &booking.service {
        Some(service) => {
            data.insert("service".to_string(), Value::from(service.title.clone()));
            data.remove("duration_seconds");
        }
        None => {
            data.insert(
                "duration_seconds".to_string(),
                Value::from(booking.duration_seconds),
            );
        }
    }
    if let Some(notes) = &request.notes {
        data.insert("notes".to_string(), Value::from(notes.clone()));
    }
    if let Some(title) = &request.title {
        data.insert("title".to_string(), Value::from(title.clone()));
    }
    data.insert("user".to_string(), Value::from(user.username.clone()));
    Value::Object(data)
}

// =============================================================================
// Scheduler
// =============================================================================

/// Per-request booking context
///
/// Loads the runtime settings (timezone, services, legacy weekly hours) once
/// and wires the ledger and reservation engine on top of them.
pub struct Scheduler {
    pool: PgPool,
    tz: Tz,
    catalog: ServiceCatalog,
    ledger: Ledger,
    engine: SlotEngine<PgSlotStore>,
    legacy_weekly: Option<WeeklyAvailability>,
    events: EventBus,
}

impl Scheduler {
    pub async fn load(
        pool: &PgPool,
        lock_wait: Duration,
        events: EventBus,
    ) -> Result<Self, ScheduleError> {
        let tz = settings::load_timezone(pool).await?;
        let catalog: ServiceCatalog = settings::get(pool, settings::SERVICES)
            .await?
            .unwrap_or_default();
        let legacy_weekly = availability::load_legacy_weekly(pool).await?;
        let ledger = Ledger::new(pool.clone(), tz);
        let store = PgSlotStore::new(pool.clone(), ledger.clone(), catalog.clone());
        Ok(Self {
            pool: pool.clone(),
            tz,
            catalog,
            ledger,
            engine: SlotEngine::new(store, lock_wait),
            legacy_weekly,
            events,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn engine(&self) -> &SlotEngine<PgSlotStore> {
        &self.engine
    }

    /// Current wall-clock time in the configured timezone
    pub fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }

    pub fn profile(&self, user: &StaffUser) -> AvailabilityProfile {
        availability::profile_for(user, self.legacy_weekly.as_ref())
    }

    pub fn candidate(&self, user: &StaffUser) -> Candidate {
        Candidate {
            user_id: user.id,
            profile: self.profile(user),
        }
    }

    async fn find_user(&self, username: &str) -> Result<StaffUser, ScheduleError> {
        users::find_by_username(&self.pool, username)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(format!("User '{}'", username)))
    }

    /// Users a request may be booked with
    ///
    /// A named user must be enabled and allowed the service; "anyone" is
    /// every enabled user allowed the service.
    pub async fn eligible_users(
        &self,
        choice: &UserChoice,
        service: Option<&Service>,
    ) -> Result<Vec<StaffUser>, ScheduleError> {
        match choice {
            UserChoice::Named(username) => {
                let user = self.find_user(username).await?;
                authorize_service(&user, service)?;
                Ok(vec![user])
            }
            UserChoice::Anyone => Ok(users::list_booking_enabled(&self.pool)
                .await?
                .into_iter()
                .filter(|u| u.performs(service))
                .collect()),
        }
    }

    pub async fn candidates(
        &self,
        choice: &UserChoice,
        service: Option<&Service>,
    ) -> Result<Vec<Candidate>, ScheduleError> {
        Ok(self
            .eligible_users(choice, service)
            .await?
            .iter()
            .map(|u| self.candidate(u))
            .collect())
    }

    /// Book an appointment from a public request
    pub async fn book(
        &self,
        request: &BookingRequest,
        actor: Option<&str>,
    ) -> Result<BookingConfirmation, ScheduleError> {
        let booking = validate_request(request, &self.catalog, self.now_local())?;
        let users = self
            .eligible_users(&booking.user, booking.service.as_ref())
            .await?;

        let user = match &booking.user {
            UserChoice::Named(_) => users.into_iter().next(),
            UserChoice::Anyone => {
                let candidates: Vec<Candidate> = users.iter().map(|u| self.candidate(u)).collect();
                let chosen = query::resolve_anyone(
                    self.engine.store(),
                    &candidates,
                    booking.date,
                    booking.time,
                    booking.duration_seconds,
                )
                .await?;
                chosen.and_then(|id| users.into_iter().find(|u| u.id == id))
            }
        }
        .ok_or(ScheduleError::Unavailable)?;

        let form_data = build_form_data(request, &booking, &user);
        let appointment = self
            .reserve_and_insert(
                &user,
                booking.date,
                booking.time,
                booking.duration_seconds,
                request.submission_id.clone(),
                form_data,
            )
            .await?;

        self.events.publish(AppointmentEvent::Booked {
            id: appointment.id,
            user_id: user.id,
            date: appointment.date,
            time: appointment.time,
            actor: actor.map(str::to_string),
        });
        tracing::info!(
            id = %appointment.id,
            user = %user.username,
            date = %appointment.date,
            time = %appointment.time,
            "Appointment booked"
        );

        Ok(BookingConfirmation {
            appointment_id: appointment.id,
            user: user.username,
            date: appointment.date.format("%Y-%m-%d").to_string(),
            time: grid::format_time(appointment.time),
            duration_seconds: booking.duration_seconds,
            service: booking.service.map(|s| s.title),
        })
    }

    /// Admin booking with an explicit title and duration
    pub async fn book_custom(
        &self,
        request: &CustomAppointment,
        actor: &str,
    ) -> Result<Appointment, ScheduleError> {
        let (date, time) = validate_start(&request.date, &request.time, self.now_local())?;
        let duration_seconds = validation::validate_duration(request.duration_seconds)?;
        if request.title.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "title".to_string(),
            }
            .into());
        }
        validation::validate_text("title", Some(&request.title), MAX_TITLE_LENGTH)?;
        validation::validate_text("notes", request.notes.as_deref(), MAX_NOTES_LENGTH)?;

        let user = self.find_user(request.user.trim()).await?;

        let mut data = Map::new();
        data.insert("title".to_string(), Value::from(request.title.trim()));
        data.insert("duration_seconds".to_string(), Value::from(duration_seconds));
        data.insert("user".to_string(), Value::from(user.username.clone()));
        data.insert("custom".to_string(), Value::Bool(true));
        if let Some(notes) = &request.notes {
            data.insert("notes".to_string(), Value::from(notes.clone()));
        }

        let appointment = self
            .reserve_and_insert(&user, date, time, duration_seconds, None, Value::Object(data))
            .await?;

        self.events.publish(AppointmentEvent::Booked {
            id: appointment.id,
            user_id: user.id,
            date,
            time,
            actor: Some(actor.to_string()),
        });
        tracing::info!(id = %appointment.id, user = %user.username, %date, %time, "Custom appointment booked");
        Ok(appointment)
    }

    async fn reserve_and_insert(
        &self,
        user: &StaffUser,
        date: NaiveDate,
        time: NaiveTime,
        duration_seconds: i64,
        submission_id: Option<String>,
        form_data: Value,
    ) -> Result<Appointment, ScheduleError> {
        let profile = self.profile(user);
        let reservation = self
            .engine
            .reserve(&profile, user.id, date, time, duration_seconds)
            .await?;

        let new = NewAppointment {
            submission_id,
            user_id: user.id,
            date,
            time,
            form_data,
        };
        self.engine
            .commit(reservation, async {
                self.ledger.insert(new).await.map_err(|e| {
                    tracing::error!(user = %user.username, %date, %time, "Failed to store appointment: {}", e);
                    ScheduleError::Unavailable
                })
            })
            .await
    }

    /// Move an appointment to a new local date and time
    pub async fn reschedule(
        &self,
        id: Uuid,
        new_date: &str,
        new_time: &str,
        actor: &str,
    ) -> Result<Appointment, ScheduleError> {
        let (date, time) = validate_start(new_date, new_time, self.now_local())?;
        let current = self
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound("Appointment".to_string()))?;
        let user = users::find_by_id(&self.pool, current.user_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound("Appointment owner".to_string()))?;

        let duration_seconds = current.duration_seconds(&self.catalog);
        let profile = self.profile(&user);
        let reservation = self
            .engine
            .reserve_excluding(&profile, user.id, date, time, duration_seconds, Some(id))
            .await?;

        let moved = self
            .engine
            .commit(reservation, async {
                match self.ledger.update_datetime(id, date, time).await {
                    Ok(Some(moved)) => Ok(moved),
                    Ok(None) => Err(ScheduleError::NotFound("Appointment".to_string())),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        self.events.publish(AppointmentEvent::Rescheduled {
            id,
            user_id: user.id,
            old_date: current.date,
            old_time: current.time,
            new_date: moved.date,
            new_time: moved.time,
            actor: Some(actor.to_string()),
        });
        tracing::info!(
            %id,
            user = %user.username,
            from = %current.date.and_time(current.time),
            to = %moved.date.and_time(moved.time),
            "Appointment rescheduled"
        );
        Ok(moved)
    }

    /// Delete by internal id or by external submission key
    pub async fn delete(
        &self,
        key: &AppointmentKey,
        actor: &str,
    ) -> Result<Vec<Appointment>, ScheduleError> {
        let deleted: Vec<Appointment> = match key {
            AppointmentKey::Id(id) => self.ledger.delete_by_id(*id).await?.into_iter().collect(),
            AppointmentKey::Submission {
                submission_id,
                date,
                time,
            } => {
                self.ledger
                    .delete_by_submission(submission_id, *date, *time)
                    .await?
            }
        };
        if deleted.is_empty() {
            return Err(ScheduleError::NotFound("Appointment".to_string()));
        }

        for appointment in &deleted {
            self.events.publish(AppointmentEvent::Deleted {
                id: appointment.id,
                user_id: appointment.user_id,
                date: appointment.date,
                time: appointment.time,
                actor: Some(actor.to_string()),
            });
            tracing::info!(id = %appointment.id, "Appointment deleted");
        }
        Ok(deleted)
    }
}
