//! Public booking endpoint

use axum::{extract::State, Json};
use serde_json::{Map, Value};

use super::{failure, ok, AppState, Reply};
use crate::booking::{BookingConfirmation, BookingRequest};

/// Book an appointment
///
/// Accepts either the typed request or a raw form submission; field names
/// are resolved the same way in both cases.
pub async fn create_booking(
    State(state): State<AppState>,
    Json(submission): Json<Map<String, Value>>,
) -> Reply<BookingConfirmation> {
    let request = BookingRequest::from_submission(submission);

    let result = match state.master() {
        Some(master) => master.book(&request).await,
        None => match state.scheduler().await {
            Ok(scheduler) => scheduler.book(&request, None).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(confirmation) => ok(confirmation),
        Err(e) => {
            if e.is_retryable() {
                tracing::info!(date = %request.date, time = %request.time, "Booking not placed: {}", e);
            }
            failure(&state, e)
        }
    }
}
