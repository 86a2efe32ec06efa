//! Periodic retention purge

use std::time::Duration;

use chrono::{Months, NaiveDateTime, Utc};
use sqlx::PgPool;

/// Appointments are kept for this many calendar months after they start
pub const RETENTION_MONTHS: u32 = 3;

/// UTC instant before which appointments are purged
pub fn retention_cutoff(now: NaiveDateTime) -> NaiveDateTime {
    now.checked_sub_months(Months::new(RETENTION_MONTHS))
        .unwrap_or(now)
}

/// Run one purge pass: old appointments, expired sessions, stale rate-limit rows
pub async fn run_once(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let cutoff = retention_cutoff(Utc::now().naive_utc());
    let purged = super::purge_older_than(pool, cutoff).await?;
    sqlx::query("SELECT purge_expired_sessions()")
        .execute(pool)
        .await?;
    Ok(purged)
}

/// Spawn the cleanup loop; the first pass runs immediately
pub fn spawn(pool: PgPool, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match run_once(&pool).await {
                Ok(purged) => tracing::info!(purged, "Appointment retention cleanup finished"),
                Err(e) => tracing::error!("Appointment retention cleanup failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_cutoff_is_three_calendar_months() {
        assert_eq!(retention_cutoff(at(2024, 6, 15)), at(2024, 3, 15));
        assert_eq!(retention_cutoff(at(2024, 2, 10)), at(2023, 11, 10));
    }

    #[test]
    fn test_cutoff_clamps_to_month_end() {
        // May 31 minus three months lands on the last day of February
        assert_eq!(retention_cutoff(at(2024, 5, 31)), at(2024, 2, 29));
    }
}
