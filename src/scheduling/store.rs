//! PostgreSQL slot store
//!
//! Advisory locks are session scoped in Postgres, so each lock pins one
//! pooled connection until it is released on that same connection. Reads and
//! claims made under a lock run on that pinned connection too; a burst of
//! waiters holding the rest of the pool cannot starve the lock holder.

use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, FromRow, PgConnection, PgExecutor, PgPool, Postgres};
use uuid::Uuid;

use super::engine::{DaySchedule, LockKey, SlotStore};
use crate::error::ScheduleError;
use crate::ledger::{tz, Ledger};
use crate::services::ServiceCatalog;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct PgLock {
    conn: PoolConnection<Postgres>,
    key: String,
}

#[derive(FromRow)]
struct BlockedRow {
    slot_date: NaiveDate,
    slot_time: NaiveTime,
}

#[derive(Clone)]
pub struct PgSlotStore {
    pool: PgPool,
    tz: Tz,
    ledger: Ledger,
    catalog: ServiceCatalog,
}

impl PgSlotStore {
    pub fn new(pool: PgPool, ledger: Ledger, catalog: ServiceCatalog) -> Self {
        Self {
            tz: ledger.timezone(),
            pool,
            ledger,
            catalog,
        }
    }

    /// Blocked slot times of a user on a local date
    pub async fn blocked_on(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, sqlx::Error> {
        self.blocked_with(&self.pool, user_id, date).await
    }

    async fn blocked_with<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, sqlx::Error> {
        let (start, end) = tz::local_day_bounds(self.tz, date);
        let rows = sqlx::query_as::<_, BlockedRow>(
            r#"
            SELECT slot_date, slot_time FROM blocked_slots
            WHERE user_id = $1
              AND (slot_date + slot_time) >= $2
              AND (slot_date + slot_time) < $3
            ORDER BY slot_date, slot_time
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(executor)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| tz::to_local_parts(self.tz, r.slot_date, r.slot_time))
            .filter(|(d, _)| *d == date)
            .map(|(_, t)| t)
            .collect())
    }

    async fn read_day(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<DaySchedule, ScheduleError> {
        let blocked = self.blocked_with(&mut *conn, user_id, date).await?;
        let bookings = self
            .ledger
            .occupancy_on(&mut *conn, user_id, date, &self.catalog)
            .await?;
        Ok(DaySchedule {
            blocked: blocked.into_iter().collect(),
            bookings,
        })
    }

    async fn delete_slot<'e, E: PgExecutor<'e>>(
        &self,
        executor: E,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), sqlx::Error> {
        let (utc_date, utc_time) = tz::to_utc_parts(self.tz, date, time);
        sqlx::query(
            "DELETE FROM blocked_slots WHERE user_id = $1 AND slot_date = $2 AND slot_time = $3",
        )
        .bind(user_id)
        .bind(utc_date)
        .bind(utc_time)
        .execute(executor)
        .await?;
        Ok(())
    }
}

impl SlotStore for PgSlotStore {
    type Lock = PgLock;

    async fn try_lock(
        &self,
        key: &LockKey,
        wait: Duration,
    ) -> Result<Option<PgLock>, ScheduleError> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut conn = self.pool.acquire().await?;
        loop {
            let acquired: bool =
                sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
                    .bind(key.as_str())
                    .fetch_one(&mut *conn)
                    .await?;
            if acquired {
                return Ok(Some(PgLock {
                    conn,
                    key: key.as_str().to_string(),
                }));
            }
            if tokio::time::Instant::now() + LOCK_POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn unlock(&self, lock: PgLock) -> Result<(), ScheduleError> {
        let PgLock { mut conn, key } = lock;
        let released = sqlx::query_scalar::<_, bool>(
            "SELECT pg_advisory_unlock(hashtextextended($1, 0))",
        )
        .bind(&key)
        .fetch_one(&mut *conn)
        .await;

        match released {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(lock = %key, "Advisory lock was not held at release");
                Ok(())
            }
            Err(e) => {
                // Closing the session drops every lock it still holds
                let _ = conn.detach().close().await;
                Err(e.into())
            }
        }
    }

    async fn day_schedule(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<DaySchedule, ScheduleError> {
        let mut conn = self.pool.acquire().await?;
        self.read_day(&mut conn, user_id, date).await
    }

    async fn locked_day_schedule(
        &self,
        lock: &mut PgLock,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<DaySchedule, ScheduleError> {
        self.read_day(&mut lock.conn, user_id, date).await
    }

    async fn claim_slot(
        &self,
        lock: &mut PgLock,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, ScheduleError> {
        let (utc_date, utc_time) = tz::to_utc_parts(self.tz, date, time);
        let result = sqlx::query(
            r#"
            INSERT INTO blocked_slots (user_id, slot_date, slot_time)
            VALUES ($1, $2, $3)
            ON CONFLICT (slot_date, slot_time, user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(utc_date)
        .bind(utc_time)
        .execute(&mut *lock.conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unclaim_slot(
        &self,
        lock: &mut PgLock,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), ScheduleError> {
        self.delete_slot(&mut *lock.conn, user_id, date, time).await?;
        Ok(())
    }

    async fn free_slot(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), ScheduleError> {
        self.delete_slot(&self.pool, user_id, date, time).await?;
        Ok(())
    }
}
