//! Master-side endpoints serving child sites
//!
//! Mounted only in master mode, behind the shared sync key.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use super::availability::{local_days, local_months, local_services, local_times, AvailabilityQuery};
use super::{respond, AppState, Reply};
use crate::booking::{BookingConfirmation, BookingRequest};
use crate::models::{DayOption, MonthOption, TimeOption};
use crate::services::Service;

/// Actor recorded for bookings placed through a child site
const SYNC_ACTOR: &str = "sync";

#[derive(Debug, Deserialize)]
pub struct SyncBooking {
    #[serde(flatten)]
    pub booking: BookingRequest,
    #[allow(dead_code)]
    pub key: String,
}

pub async fn services(State(state): State<AppState>) -> Reply<Vec<Service>> {
    let result = local_services(&state).await;
    respond(&state, result)
}

pub async fn available_times(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityQuery>,
) -> Reply<Vec<TimeOption>> {
    let result = local_times(&state, &params).await;
    respond(&state, result)
}

pub async fn available_days(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityQuery>,
) -> Reply<Vec<DayOption>> {
    let result = local_days(&state, &params).await;
    respond(&state, result)
}

pub async fn available_months(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityQuery>,
) -> Reply<Vec<MonthOption>> {
    let result = local_months(&state, &params).await;
    respond(&state, result)
}

/// Book on behalf of a child site
pub async fn book(
    State(state): State<AppState>,
    Json(body): Json<SyncBooking>,
) -> Reply<BookingConfirmation> {
    let result = match state.scheduler().await {
        Ok(scheduler) => scheduler.book(&body.booking, Some(SYNC_ACTOR)).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_booking_body_carries_key_beside_request() {
        let body: SyncBooking = serde_json::from_str(
            r#"{"date":"2024-03-11","time":"10:00","service":"Consultation","key":"secret"}"#,
        )
        .unwrap();
        assert_eq!(body.key, "secret");
        assert_eq!(body.booking.date, "2024-03-11");
        assert_eq!(body.booking.service.as_deref(), Some("Consultation"));
        assert!(body.booking.user.is_none());
    }
}
