//! Staff user repository

use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::availability::{EnabledHolidays, Overrides, WeeklyAvailability};
use crate::models::StaffUser;

pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<StaffUser>, sqlx::Error> {
    sqlx::query_as::<_, StaffUser>("SELECT * FROM staff_users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<StaffUser>, sqlx::Error> {
    sqlx::query_as::<_, StaffUser>("SELECT * FROM staff_users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Users that take bookings, in a stable order
pub async fn list_booking_enabled(pool: &PgPool) -> Result<Vec<StaffUser>, sqlx::Error> {
    sqlx::query_as::<_, StaffUser>(
        "SELECT * FROM staff_users WHERE booking_enabled = true ORDER BY username",
    )
    .fetch_all(pool)
    .await
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<StaffUser>, sqlx::Error> {
    sqlx::query_as::<_, StaffUser>("SELECT * FROM staff_users ORDER BY username")
        .fetch_all(pool)
        .await
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM staff_users")
        .fetch_one(pool)
        .await
}

pub async fn insert(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: &str,
    display_name: Option<&str>,
    is_admin: bool,
) -> Result<StaffUser, sqlx::Error> {
    sqlx::query_as::<_, StaffUser>(
        r#"
        INSERT INTO staff_users (username, email, password_hash, display_name, is_admin)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(display_name)
    .bind(is_admin)
    .fetch_one(pool)
    .await
}

pub async fn update_booking(
    pool: &PgPool,
    id: Uuid,
    booking_enabled: bool,
    allowed_services: Option<&[String]>,
) -> Result<Option<StaffUser>, sqlx::Error> {
    sqlx::query_as::<_, StaffUser>(
        r#"
        UPDATE staff_users
        SET booking_enabled = $2, allowed_services = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(booking_enabled)
    .bind(allowed_services.map(Json))
    .fetch_optional(pool)
    .await
}

pub async fn save_weekly(
    pool: &PgPool,
    id: Uuid,
    weekly: &WeeklyAvailability,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE staff_users SET weekly_availability = $2 WHERE id = $1")
        .bind(id)
        .bind(Json(weekly))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn save_holidays(
    pool: &PgPool,
    id: Uuid,
    holidays: &EnabledHolidays,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE staff_users SET enabled_holidays = $2 WHERE id = $1")
        .bind(id)
        .bind(Json(holidays))
        .execute(pool)
        .await?;
    Ok(())
}

/// Read-modify-write of a user's overrides under a row lock
///
/// Concurrent edits of the same user serialize on the row, so neither
/// overwrites the other. `None` when the user does not exist.
pub async fn modify_overrides<F>(
    pool: &PgPool,
    id: Uuid,
    modify: F,
) -> Result<Option<Overrides>, sqlx::Error>
where
    F: FnOnce(&mut Overrides),
{
    let mut tx = pool.begin().await?;
    let current: Option<Json<Overrides>> =
        sqlx::query_scalar("SELECT overrides FROM staff_users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some(Json(mut overrides)) = current else {
        return Ok(None);
    };

    modify(&mut overrides);
    sqlx::query("UPDATE staff_users SET overrides = $2 WHERE id = $1")
        .bind(id)
        .bind(Json(&overrides))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(Some(overrides))
}

pub async fn touch_last_login(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE staff_users SET last_login_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
