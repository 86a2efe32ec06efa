//! Slot reservation engine
//!
//! Openness of a slot is derived from the user's availability profile, the
//! explicit blocked-slot rows and existing appointments. Reserving claims one
//! blocked-slot row per slot of the range under a bounded advisory lock, so
//! two concurrent requests can never both hold the same slot.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use super::grid;
use crate::availability::AvailabilityProfile;
use crate::error::ScheduleError;

/// An existing appointment on a given local date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    pub appointment_id: Uuid,
    pub start: NaiveTime,
    pub duration_seconds: i64,
}

/// Blocked slots and appointments of one user on one local date
#[derive(Debug, Clone, Default)]
pub struct DaySchedule {
    pub blocked: BTreeSet<NaiveTime>,
    pub bookings: Vec<Occupancy>,
}

impl DaySchedule {
    /// The same day as seen by the appointment being moved
    pub fn without_appointment(mut self, appointment_id: Uuid) -> Self {
        self.bookings.retain(|b| b.appointment_id != appointment_id);
        self
    }

    pub fn is_booked(&self, time: NaiveTime) -> bool {
        self.bookings
            .iter()
            .any(|b| grid::occupied_slots(b.start, b.duration_seconds).contains(&time))
    }
}

/// Whether a single slot is open for booking
///
/// Holiday closure is checked first and wins over every override, including
/// `allow`. Then weekly hours with overrides, grid membership, explicit
/// blocks and existing appointments.
pub fn is_open(
    profile: &AvailabilityProfile,
    day: &DaySchedule,
    date: NaiveDate,
    time: NaiveTime,
) -> bool {
    if profile.is_holiday_closed(date) {
        return false;
    }
    if !profile.scheduled_open(date, time) {
        return false;
    }
    if !grid::is_grid_time(time) {
        return false;
    }
    if day.blocked.contains(&time) {
        return false;
    }
    !day.is_booked(time)
}

/// Whether `slots_needed` contiguous slots starting at `start` are all open
pub fn is_range_open(
    profile: &AvailabilityProfile,
    day: &DaySchedule,
    date: NaiveDate,
    start: NaiveTime,
    slots_needed: usize,
) -> bool {
    match grid::slot_run(start, slots_needed.max(1)) {
        Some(run) => run.into_iter().all(|t| is_open(profile, day, date, t)),
        None => false,
    }
}

/// Identity of a reservation attempt, used to name the advisory lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKey(String);

impl LockKey {
    pub fn new(date: NaiveDate, start: NaiveTime, duration_seconds: i64, user_id: Uuid) -> Self {
        Self(format!(
            "appointment_slot|{}|{}|{}|{}",
            date.format("%Y-%m-%d"),
            grid::format_time(start),
            duration_seconds,
            user_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Storage seam of the engine
///
/// Dates and times crossing this trait are local wall-clock values; the
/// implementation owns any timezone conversion. Every call made while a
/// reservation lock is held goes through that lock, so the critical section
/// never needs a second storage session.
pub trait SlotStore: Send + Sync {
    type Lock: Send;

    /// Wait up to `wait` for the named lock, `None` on timeout
    fn try_lock(
        &self,
        key: &LockKey,
        wait: Duration,
    ) -> impl Future<Output = Result<Option<Self::Lock>, ScheduleError>> + Send;

    fn unlock(&self, lock: Self::Lock) -> impl Future<Output = Result<(), ScheduleError>> + Send;

    /// Read without holding a lock, for availability queries
    fn day_schedule(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> impl Future<Output = Result<DaySchedule, ScheduleError>> + Send;

    fn locked_day_schedule(
        &self,
        lock: &mut Self::Lock,
        user_id: Uuid,
        date: NaiveDate,
    ) -> impl Future<Output = Result<DaySchedule, ScheduleError>> + Send;

    /// Insert a blocked-slot row; `false` when the slot is already claimed
    fn claim_slot(
        &self,
        lock: &mut Self::Lock,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> impl Future<Output = Result<bool, ScheduleError>> + Send;

    /// Delete a blocked-slot row inside the critical section
    fn unclaim_slot(
        &self,
        lock: &mut Self::Lock,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> impl Future<Output = Result<(), ScheduleError>> + Send;

    /// Delete a blocked-slot row once no lock is held
    fn free_slot(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> impl Future<Output = Result<(), ScheduleError>> + Send;
}

/// Blocked-slot rows claimed by one successful reservation
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a reservation must be finalized or released"]
pub struct Reservation {
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_seconds: i64,
    pub slots: Vec<NaiveTime>,
}

pub struct SlotEngine<S> {
    store: S,
    lock_wait: Duration,
}

impl<S: SlotStore> SlotEngine<S> {
    pub fn new(store: S, lock_wait: Duration) -> Self {
        Self { store, lock_wait }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn acquire(&self, key: &LockKey) -> Result<S::Lock, ScheduleError> {
        match self.store.try_lock(key, self.lock_wait).await? {
            Some(lock) => Ok(lock),
            None => {
                tracing::warn!(lock = key.as_str(), "Timed out waiting for reservation lock");
                Err(ScheduleError::Busy)
            }
        }
    }

    async fn release_lock(&self, key: &LockKey, lock: S::Lock) {
        if let Err(e) = self.store.unlock(lock).await {
            tracing::error!(lock = key.as_str(), "Failed to release reservation lock: {}", e);
        }
    }

    /// Reserve the slot range for a new appointment
    pub async fn reserve(
        &self,
        profile: &AvailabilityProfile,
        user_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        duration_seconds: i64,
    ) -> Result<Reservation, ScheduleError> {
        self.reserve_excluding(profile, user_id, date, start, duration_seconds, None)
            .await
    }

    /// Reserve a range, ignoring the occupancy of `exclude` when checking it
    ///
    /// Rescheduling passes the moved appointment so its current slots do not
    /// collide with its new position on the same day.
    pub async fn reserve_excluding(
        &self,
        profile: &AvailabilityProfile,
        user_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        duration_seconds: i64,
        exclude: Option<Uuid>,
    ) -> Result<Reservation, ScheduleError> {
        let key = LockKey::new(date, start, duration_seconds, user_id);
        let mut lock = self.acquire(&key).await?;

        let result = self
            .claim_range(&mut lock, profile, user_id, date, start, duration_seconds, exclude)
            .await;

        self.release_lock(&key, lock).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn claim_range(
        &self,
        lock: &mut S::Lock,
        profile: &AvailabilityProfile,
        user_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        duration_seconds: i64,
        exclude: Option<Uuid>,
    ) -> Result<Reservation, ScheduleError> {
        let needed = grid::slots_needed(duration_seconds);

        let day = self.read_day(lock, user_id, date, exclude).await?;
        if !is_range_open(profile, &day, date, start, needed) {
            tracing::warn!(%user_id, %date, %start, "Requested range is not open");
            return Err(ScheduleError::Unavailable);
        }

        let run = grid::slot_run(start, needed).ok_or(ScheduleError::Unavailable)?;
        let mut reservation = Reservation {
            user_id,
            date,
            start,
            duration_seconds,
            slots: Vec::with_capacity(run.len()),
        };

        for time in &run {
            let claimed = match self.store.claim_slot(lock, user_id, date, *time).await {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(%user_id, %date, %time, "Failed to claim slot: {}", e);
                    self.unclaim(lock, reservation).await;
                    return Err(ScheduleError::Unavailable);
                }
            };
            if !claimed {
                tracing::warn!(%user_id, %date, %time, "Slot claimed concurrently, rolling back");
                self.unclaim(lock, reservation).await;
                return Err(ScheduleError::Unavailable);
            }
            reservation.slots.push(*time);
        }

        // An overlapping range under a different lock key may have committed
        // and dropped its claim rows between the first read and our claims
        let day = match self.read_day(lock, user_id, date, exclude).await {
            Ok(day) => day,
            Err(e) => {
                self.unclaim(lock, reservation).await;
                return Err(e);
            }
        };
        if let Some(time) = run.iter().find(|t| day.is_booked(**t)) {
            tracing::warn!(%user_id, %date, %time, "Range booked concurrently, rolling back");
            self.unclaim(lock, reservation).await;
            return Err(ScheduleError::Unavailable);
        }

        tracing::debug!(%user_id, %date, %start, slots = reservation.slots.len(), "Slots reserved");
        Ok(reservation)
    }

    async fn read_day(
        &self,
        lock: &mut S::Lock,
        user_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<DaySchedule, ScheduleError> {
        let day = self.store.locked_day_schedule(lock, user_id, date).await?;
        Ok(match exclude {
            Some(id) => day.without_appointment(id),
            None => day,
        })
    }

    /// Roll back a partial reservation while the lock is still held
    async fn unclaim(&self, lock: &mut S::Lock, reservation: Reservation) {
        for time in &reservation.slots {
            if let Err(e) = self
                .store
                .unclaim_slot(lock, reservation.user_id, reservation.date, *time)
                .await
            {
                tracing::error!(
                    user_id = %reservation.user_id,
                    date = %reservation.date,
                    time = %time,
                    "Failed to roll back claimed slot: {}",
                    e
                );
            }
        }
    }

    /// Compensating action: delete exactly the rows a reservation inserted
    ///
    /// Best effort; a failure is logged and the remaining rows are still tried.
    pub async fn release_reservation(&self, reservation: Reservation) {
        for time in &reservation.slots {
            if let Err(e) = self
                .store
                .free_slot(reservation.user_id, reservation.date, *time)
                .await
            {
                tracing::error!(
                    user_id = %reservation.user_id,
                    date = %reservation.date,
                    time = %time,
                    "Failed to release claimed slot: {}",
                    e
                );
            }
        }
    }

    /// Drop the claim rows once a durable appointment covers the range
    pub async fn finalize(&self, reservation: Reservation) {
        self.release_reservation(reservation).await;
    }

    /// Run the durable write for a reservation
    ///
    /// On success the claim rows are finalized; on failure they are released
    /// and the write error is returned.
    pub async fn commit<T, Fut>(&self, reservation: Reservation, write: Fut) -> Result<T, ScheduleError>
    where
        Fut: Future<Output = Result<T, ScheduleError>>,
    {
        match write.await {
            Ok(value) => {
                self.finalize(reservation).await;
                Ok(value)
            }
            Err(e) => {
                tracing::error!("Appointment write failed, releasing reservation: {}", e);
                self.release_reservation(reservation).await;
                Err(e)
            }
        }
    }

    /// Directly block a run of slots; rows stay until explicitly unblocked
    ///
    /// Returns the slots newly blocked (already-blocked slots are skipped).
    /// Takes the same lock a reservation of that run would.
    pub async fn block_slots(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        count: usize,
    ) -> Result<Vec<NaiveTime>, ScheduleError> {
        let count = count.max(1);
        let run = grid::slot_run(start, count).ok_or(ScheduleError::Unavailable)?;
        let key = LockKey::new(date, start, count as i64 * grid::SLOT_SECONDS, user_id);
        let mut lock = self.acquire(&key).await?;

        let mut blocked = Vec::new();
        let mut result = Ok(());
        for time in run {
            if !grid::is_grid_time(time) {
                continue;
            }
            match self.store.claim_slot(&mut lock, user_id, date, time).await {
                Ok(true) => blocked.push(time),
                Ok(false) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.release_lock(&key, lock).await;
        result?;

        tracing::info!(%user_id, %date, count = blocked.len(), "Slots blocked");
        Ok(blocked)
    }

    pub async fn unblock_slot(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<(), ScheduleError> {
        self.store.free_slot(user_id, date, time).await?;
        tracing::info!(%user_id, %date, %time, "Slot unblocked");
        Ok(())
    }
}
