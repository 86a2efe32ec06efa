//! Key/value settings stored as JSONB

use chrono_tz::Tz;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{types::Json, PgPool};

pub const TIMEZONE: &str = "timezone";
pub const SERVICES: &str = "services";
/// Single global weekly schedule used before availability became per user
pub const LEGACY_WEEKLY_AVAILABILITY: &str = "weekly_availability";
pub const UTC_MIGRATION_DONE: &str = "utc_migration_done";

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::New_York;

/// Read a setting, `None` when it was never written
pub async fn get<T: DeserializeOwned + Send + Unpin + 'static>(
    pool: &PgPool,
    key: &str,
) -> Result<Option<T>, sqlx::Error> {
    let value: Option<Json<T>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value.map(|Json(v)| v))
}

/// Insert or replace a setting
pub async fn put<T: Serialize + Send + Sync>(
    pool: &PgPool,
    key: &str,
    value: &T,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        "#,
    )
    .bind(key)
    .bind(Json(value))
    .execute(pool)
    .await?;
    Ok(())
}

/// Configured timezone, falling back to the default for unknown names
pub async fn load_timezone(pool: &PgPool) -> Result<Tz, sqlx::Error> {
    let name: Option<String> = get(pool, TIMEZONE).await?;
    Ok(match name {
        Some(name) => name.parse().unwrap_or_else(|_| {
            tracing::warn!("Stored timezone '{}' is unknown, using default", name);
            DEFAULT_TIMEZONE
        }),
        None => DEFAULT_TIMEZONE,
    })
}

pub async fn save_timezone(pool: &PgPool, tz: Tz) -> Result<(), sqlx::Error> {
    put(pool, TIMEZONE, &tz.name()).await?;
    tracing::info!(timezone = %tz.name(), "Timezone saved");
    Ok(())
}
