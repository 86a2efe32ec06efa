//! Appointment ledger
//!
//! Appointments are stored with UTC date/time columns. Every value entering
//! or leaving this module is local to the configured timezone.

pub mod cleanup;
pub mod tz;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use sqlx::{types::Json, FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::db::settings;
use crate::scheduling::{grid, Occupancy};
use crate::services::ServiceCatalog;

/// Raw row as stored (UTC)
#[derive(Debug, Clone, FromRow)]
struct AppointmentRow {
    id: Uuid,
    submission_id: Option<String>,
    user_id: Uuid,
    appt_date: NaiveDate,
    appt_time: NaiveTime,
    form_data: Value,
    created_at: DateTime<Utc>,
}

/// An appointment in local time
#[derive(Debug, Clone, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub submission_id: Option<String>,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub form_data: Value,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    fn from_row(row: AppointmentRow, tz: Tz) -> Self {
        let (date, time) = tz::to_local_parts(tz, row.appt_date, row.appt_time);
        Self {
            id: row.id,
            submission_id: row.submission_id,
            user_id: row.user_id,
            date,
            time,
            form_data: row.form_data,
            created_at: row.created_at,
        }
    }

    /// Service title recorded with the booking
    pub fn service(&self) -> Option<&str> {
        self.form_data.get("service").and_then(Value::as_str)
    }

    /// Duration derived at read time
    ///
    /// An explicit `duration_seconds` (custom bookings) wins, then the
    /// service title looked up in the catalog, then a single slot.
    pub fn duration_seconds(&self, catalog: &ServiceCatalog) -> i64 {
        duration_from_form(&self.form_data, catalog)
    }

    pub fn occupancy(&self, catalog: &ServiceCatalog) -> Occupancy {
        Occupancy {
            appointment_id: self.id,
            start: self.time,
            duration_seconds: self.duration_seconds(catalog),
        }
    }
}

pub fn duration_from_form(form_data: &Value, catalog: &ServiceCatalog) -> i64 {
    let explicit = form_data.get("duration_seconds").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    });
    if let Some(seconds) = explicit.filter(|s| *s > 0) {
        return seconds;
    }
    form_data
        .get("service")
        .and_then(Value::as_str)
        .and_then(|title| catalog.duration_for(title))
        .unwrap_or(grid::SLOT_SECONDS)
}

/// API view of an appointment
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub submission_id: Option<String>,
    pub user_id: Uuid,
    pub date: String,
    pub time: String,
    pub duration_seconds: i64,
    pub service: Option<String>,
    pub form_data: Value,
    pub created_at: DateTime<Utc>,
}

impl AppointmentResponse {
    pub fn new(appointment: Appointment, catalog: &ServiceCatalog) -> Self {
        let duration_seconds = appointment.duration_seconds(catalog);
        Self {
            id: appointment.id,
            service: appointment.service().map(str::to_string),
            submission_id: appointment.submission_id,
            user_id: appointment.user_id,
            date: appointment.date.format("%Y-%m-%d").to_string(),
            time: grid::format_time(appointment.time),
            duration_seconds,
            form_data: appointment.form_data,
            created_at: appointment.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub submission_id: Option<String>,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub form_data: Value,
}

#[derive(Clone)]
pub struct Ledger {
    pool: PgPool,
    tz: Tz,
}

impl Ledger {
    pub fn new(pool: PgPool, tz: Tz) -> Self {
        Self { pool, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub async fn insert(&self, new: NewAppointment) -> Result<Appointment, sqlx::Error> {
        let (date, time) = tz::to_utc_parts(self.tz, new.date, new.time);
        let row = sqlx::query_as::<_, AppointmentRow>(
            r#"
            INSERT INTO appointments (submission_id, user_id, appt_date, appt_time, form_data)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&new.submission_id)
        .bind(new.user_id)
        .bind(date)
        .bind(time)
        .bind(&new.form_data)
        .fetch_one(&self.pool)
        .await?;
        Ok(Appointment::from_row(row, self.tz))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Appointment>, sqlx::Error> {
        let row = sqlx::query_as::<_, AppointmentRow>("SELECT * FROM appointments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Appointment::from_row(r, self.tz)))
    }

    /// Appointments of a user between two local dates (inclusive)
    pub async fn list_for_user_between(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, sqlx::Error> {
        self.fetch_between(&self.pool, user_id, from, to).await
    }

    async fn fetch_between<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, sqlx::Error> {
        let (start, _) = tz::local_day_bounds(self.tz, from);
        let (_, end) = tz::local_day_bounds(self.tz, to);
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r#"
            SELECT * FROM appointments
            WHERE user_id = $1
              AND (appt_date + appt_time) >= $2
              AND (appt_date + appt_time) < $3
            ORDER BY appt_date, appt_time
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(executor)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Appointment::from_row(r, self.tz))
            .collect())
    }

    pub async fn update_datetime(
        &self,
        id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Option<Appointment>, sqlx::Error> {
        let (utc_date, utc_time) = tz::to_utc_parts(self.tz, date, time);
        let row = sqlx::query_as::<_, AppointmentRow>(
            "UPDATE appointments SET appt_date = $2, appt_time = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(utc_date)
        .bind(utc_time)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Appointment::from_row(r, self.tz)))
    }

    pub async fn delete_by_id(&self, id: Uuid) -> Result<Option<Appointment>, sqlx::Error> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            "DELETE FROM appointments WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Appointment::from_row(r, self.tz)))
    }

    /// Delete by the external submission id plus its local date and time
    pub async fn delete_by_submission(
        &self,
        submission_id: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<Vec<Appointment>, sqlx::Error> {
        let (utc_date, utc_time) = tz::to_utc_parts(self.tz, date, time);
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r#"
            DELETE FROM appointments
            WHERE submission_id = $1 AND appt_date = $2 AND appt_time = $3
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(utc_date)
        .bind(utc_time)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Appointment::from_row(r, self.tz))
            .collect())
    }

    /// Slots occupied by a user's appointments on a local date
    ///
    /// Takes the executor so a caller holding a reservation lock can read on
    /// the locked connection.
    pub async fn occupancy_on<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        user_id: Uuid,
        date: NaiveDate,
        catalog: &ServiceCatalog,
    ) -> Result<Vec<Occupancy>, sqlx::Error> {
        let appointments = self.fetch_between(executor, user_id, date, date).await?;
        Ok(appointments
            .iter()
            .filter(|a| a.date == date)
            .map(|a| a.occupancy(catalog))
            .collect())
    }
}

/// Delete appointments whose UTC start is before `cutoff`
pub async fn purge_older_than(pool: &PgPool, cutoff: NaiveDateTime) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM appointments WHERE (appt_date + appt_time) < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[derive(FromRow)]
struct LegacyBlockedRow {
    user_id: Uuid,
    slot_date: NaiveDate,
    slot_time: NaiveTime,
}

#[derive(FromRow)]
struct LegacyAppointmentRow {
    id: Uuid,
    appt_date: NaiveDate,
    appt_time: NaiveTime,
}

/// One-time conversion of rows written in local time to UTC
///
/// Runs in a single transaction under a transaction-scoped advisory lock, so
/// concurrent start-ups cannot convert twice. Returns `false` when the flag
/// was already set.
pub async fn migrate_local_to_utc(pool: &PgPool, tz: Tz) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended('utc_migration', 0))")
        .execute(&mut *tx)
        .await?;

    let done: Option<Json<bool>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
        .bind(settings::UTC_MIGRATION_DONE)
        .fetch_optional(&mut *tx)
        .await?;
    if matches!(done, Some(Json(true))) {
        tx.rollback().await?;
        return Ok(false);
    }

    let blocked = sqlx::query_as::<_, LegacyBlockedRow>(
        "SELECT user_id, slot_date, slot_time FROM blocked_slots",
    )
    .fetch_all(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM blocked_slots")
        .execute(&mut *tx)
        .await?;
    for row in &blocked {
        let (date, time) = tz::to_utc_parts(tz, row.slot_date, row.slot_time);
        sqlx::query(
            r#"
            INSERT INTO blocked_slots (user_id, slot_date, slot_time)
            VALUES ($1, $2, $3)
            ON CONFLICT (slot_date, slot_time, user_id) DO NOTHING
            "#,
        )
        .bind(row.user_id)
        .bind(date)
        .bind(time)
        .execute(&mut *tx)
        .await?;
    }

    let appointments = sqlx::query_as::<_, LegacyAppointmentRow>(
        "SELECT id, appt_date, appt_time FROM appointments",
    )
    .fetch_all(&mut *tx)
    .await?;
    for row in &appointments {
        let (date, time) = tz::to_utc_parts(tz, row.appt_date, row.appt_time);
        sqlx::query("UPDATE appointments SET appt_date = $2, appt_time = $3 WHERE id = $1")
            .bind(row.id)
            .bind(date)
            .bind(time)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        "#,
    )
    .bind(settings::UTC_MIGRATION_DONE)
    .bind(Json(true))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        timezone = %tz,
        blocked_slots = blocked.len(),
        appointments = appointments.len(),
        "Converted stored slots and appointments to UTC"
    );
    Ok(true)
}

/// Mark a fresh database as already storing UTC
pub async fn mark_utc_if_empty(pool: &PgPool) -> Result<(), sqlx::Error> {
    let existing: i64 = sqlx::query_scalar(
        "SELECT (SELECT COUNT(*) FROM appointments) + (SELECT COUNT(*) FROM blocked_slots)",
    )
    .fetch_one(pool)
    .await?;
    if existing == 0 {
        settings::put(pool, settings::UTC_MIGRATION_DONE, &true).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Service;
    use serde_json::json;

    fn catalog() -> ServiceCatalog {
        ServiceCatalog::new(vec![Service {
            title: "Consultation".to_string(),
            sub_heading: None,
            duration_seconds: 5400,
            description: None,
        }])
        .unwrap()
    }

    #[test]
    fn test_duration_from_service_title() {
        let form = json!({"service": "  consultation "});
        assert_eq!(duration_from_form(&form, &catalog()), 5400);
    }

    #[test]
    fn test_explicit_duration_wins() {
        let form = json!({"service": "Consultation", "duration_seconds": 1800});
        assert_eq!(duration_from_form(&form, &catalog()), 1800);
        let form = json!({"duration_seconds": "2700"});
        assert_eq!(duration_from_form(&form, &catalog()), 2700);
    }

    #[test]
    fn test_unknown_service_falls_back_to_one_slot() {
        let form = json!({"service": "Retired service", "duration_seconds": 0});
        assert_eq!(duration_from_form(&form, &catalog()), grid::SLOT_SECONDS);
        assert_eq!(duration_from_form(&json!({}), &catalog()), grid::SLOT_SECONDS);
    }

    #[test]
    fn test_occupancy_and_response() {
        let appointment = Appointment {
            id: Uuid::new_v4(),
            submission_id: Some("form-42".to_string()),
            user_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 3, 11).unwrap(),
            time: grid::at(9, 0),
            form_data: json!({"service": "Consultation"}),
            created_at: Utc::now(),
        };
        let occupancy = appointment.occupancy(&catalog());
        assert_eq!(occupancy.duration_seconds, 5400);
        assert_eq!(
            grid::occupied_slots(occupancy.start, occupancy.duration_seconds).len(),
            3
        );

        let response = AppointmentResponse::new(appointment, &catalog());
        assert_eq!(response.date, "2024-03-11");
        assert_eq!(response.time, "09:00");
        assert_eq!(response.service.as_deref(), Some("Consultation"));
    }
}
