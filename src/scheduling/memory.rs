//! In-memory slot store for engine tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use super::engine::{DaySchedule, LockKey, Occupancy, SlotStore};
use crate::error::ScheduleError;

#[derive(Default)]
struct Inner {
    locks: HashSet<String>,
    blocked: HashSet<(Uuid, NaiveDate, NaiveTime)>,
    /// Rows invisible to reads that still make a claim fail
    poisoned: HashSet<(Uuid, NaiveDate, NaiveTime)>,
    /// Rows whose insert reports a storage error
    broken: HashSet<(Uuid, NaiveDate, NaiveTime)>,
    bookings: HashMap<(Uuid, NaiveDate), Vec<Occupancy>>,
}

#[derive(Clone, Default)]
pub struct MemorySlotStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySlotStore {
    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn blocked_count(&self, user_id: Uuid, date: NaiveDate) -> usize {
        self.with(|inner| {
            inner
                .blocked
                .iter()
                .filter(|(u, d, _)| *u == user_id && *d == date)
                .count()
        })
    }

    pub fn fail_claim_at(&self, user_id: Uuid, date: NaiveDate, time: NaiveTime) {
        self.with(|inner| inner.poisoned.insert((user_id, date, time)));
    }

    pub fn break_claim_at(&self, user_id: Uuid, date: NaiveDate, time: NaiveTime) {
        self.with(|inner| inner.broken.insert((user_id, date, time)));
    }

    pub fn add_booking(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        appointment_id: Uuid,
        start: NaiveTime,
        duration_seconds: i64,
    ) {
        self.with(|inner| {
            inner.bookings.entry((user_id, date)).or_default().push(Occupancy {
                appointment_id,
                start,
                duration_seconds,
            })
        });
    }
}

impl SlotStore for MemorySlotStore {
    type Lock = String;

    async fn try_lock(
        &self,
        key: &LockKey,
        wait: Duration,
    ) -> Result<Option<Self::Lock>, ScheduleError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if self.with(|inner| inner.locks.insert(key.as_str().to_string())) {
                return Ok(Some(key.as_str().to_string()));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    async fn unlock(&self, lock: Self::Lock) -> Result<(), ScheduleError> {
        self.with(|inner| inner.locks.remove(&lock));
        Ok(())
    }

    async fn day_schedule(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<DaySchedule, ScheduleError> {
        tokio::task::yield_now().await;
        Ok(self.with(|inner| DaySchedule {
            blocked: inner
                .blocked
                .iter()
                .filter(|(u, d, _)| *u == user_id && *d == date)
                .map(|(_, _, t)| *t)
                .collect(),
            bookings: inner
                .bookings
                .get(&(user_id, date))
                .cloned()
                .unwrap_or_default(),
        }))
    }

    async fn locked_day_schedule(
        &self,
        _lock: &mut Self::Lock,
        user_id: Uuid,
        date: NaiveDate,
    ) -> Result<DaySchedule, ScheduleError> {
        self.day_schedule(user_id, date).await
    }

    async fn claim_slot(
        &self,
        _lock: &mut Self::Lock,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, ScheduleError> {
        tokio::task::yield_now().await;
        let row = (user_id, date, time);
        if self.with(|inner| inner.broken.contains(&row)) {
            return Err(ScheduleError::Storage(sqlx::Error::PoolTimedOut));
        }
        Ok(self.with(|inner| !inner.poisoned.contains(&row) && inner.blocked.insert(row)))
    }

    async fn unclaim_slot(
        &self,
        _lock: &mut Self::Lock,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), ScheduleError> {
        self.free_slot(user_id, date, time).await
    }

    async fn free_slot(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), ScheduleError> {
        self.with(|inner| inner.blocked.remove(&(user_id, date, time)));
        Ok(())
    }
}
