//! Appointment lifecycle events
//!
//! Booking publishes every change on a broadcast bus. Listeners run as their
//! own tasks; the audit listener below records each event in `audit_log`.

use chrono::{NaiveDate, NaiveTime};
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::scheduling::grid;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum AppointmentEvent {
    Booked {
        id: Uuid,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        actor: Option<String>,
    },
    Rescheduled {
        id: Uuid,
        user_id: Uuid,
        old_date: NaiveDate,
        old_time: NaiveTime,
        new_date: NaiveDate,
        new_time: NaiveTime,
        actor: Option<String>,
    },
    Deleted {
        id: Uuid,
        user_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        actor: Option<String>,
    },
}

impl AppointmentEvent {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Booked { .. } => "appointment_booked",
            Self::Rescheduled { .. } => "appointment_rescheduled",
            Self::Deleted { .. } => "appointment_deleted",
        }
    }

    pub fn appointment_id(&self) -> Uuid {
        match self {
            Self::Booked { id, .. } | Self::Rescheduled { id, .. } | Self::Deleted { id, .. } => *id,
        }
    }

    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::Booked { actor, .. }
            | Self::Rescheduled { actor, .. }
            | Self::Deleted { actor, .. } => actor.as_deref(),
        }
    }

    /// Audit details; dates and times are local
    pub fn details(&self) -> serde_json::Value {
        let day = |d: &NaiveDate| d.format("%Y-%m-%d").to_string();
        match self {
            Self::Booked {
                user_id, date, time, ..
            }
            | Self::Deleted {
                user_id, date, time, ..
            } => json!({
                "user_id": user_id,
                "date": day(date),
                "time": grid::format_time(*time),
            }),
            Self::Rescheduled {
                user_id,
                old_date,
                old_time,
                new_date,
                new_time,
                ..
            } => json!({
                "user_id": user_id,
                "old_date": day(old_date),
                "old_time": grid::format_time(*old_time),
                "new_date": day(new_date),
                "new_time": grid::format_time(*new_time),
            }),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppointmentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: AppointmentEvent) {
        tracing::debug!(action = event.action(), id = %event.appointment_id(), "Appointment event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppointmentEvent> {
        self.sender.subscribe()
    }
}

async fn record(pool: &PgPool, event: &AppointmentEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (action, entity_type, entity_id, actor, details)
        VALUES ($1, 'appointment', $2, $3, $4)
        "#,
    )
    .bind(event.action())
    .bind(event.appointment_id())
    .bind(event.actor())
    .bind(event.details())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record every published event in the audit log
pub fn spawn_audit_listener(pool: PgPool, bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = record(&pool, &event).await {
                        tracing::error!(action = event.action(), "Failed to write audit entry: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Audit listener fell behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
