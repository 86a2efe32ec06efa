//! HTTP request handlers

pub mod admin;
pub mod auth;
pub mod availability;
pub mod bookings;
pub mod middleware;
pub mod staff;
pub mod sync;

use std::time::Duration;

use axum::{http::StatusCode, Json};
use sqlx::PgPool;

use crate::booking::{EventBus, Scheduler};
use crate::error::ScheduleError;
use crate::models::ApiResponse;
use crate::sync::{SyncClient, SyncMode};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub is_production: bool,
    /// Trusted proxy IP prefixes for X-Forwarded-For validation
    pub trusted_proxies: Vec<String>,
    pub session_expiry_hours: u64,
    pub debug_errors: bool,
    pub lock_wait: Duration,
    pub sync_mode: SyncMode,
    pub sync_key: String,
    /// Present in child mode
    pub sync_client: Option<SyncClient>,
    pub events: EventBus,
}

impl AppState {
    /// Booking context with the current runtime settings
    pub async fn scheduler(&self) -> Result<Scheduler, ScheduleError> {
        Scheduler::load(&self.pool, self.lock_wait, self.events.clone()).await
    }

    /// The master site client when this site delegates bookings
    pub fn master(&self) -> Option<&SyncClient> {
        match self.sync_mode {
            SyncMode::Child => self.sync_client.as_ref(),
            _ => None,
        }
    }
}

pub type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

pub fn ok<T>(data: T) -> Reply<T> {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

pub fn reject<T>(status: StatusCode, message: impl Into<String>) -> Reply<T> {
    (status, Json(ApiResponse::error(message)))
}

/// Translate a scheduling error into a response
pub fn failure<T>(state: &AppState, err: ScheduleError) -> Reply<T> {
    match &err {
        ScheduleError::Storage(e) => tracing::error!("Database error: {}", e),
        ScheduleError::Config(e) => tracing::error!("Configuration error: {}", e),
        other => tracing::debug!("Request rejected: {}", other),
    }
    reject(err.status(), err.public_message(state.debug_errors))
}

pub fn respond<T>(state: &AppState, result: Result<T, ScheduleError>) -> Reply<T> {
    match result {
        Ok(data) => ok(data),
        Err(e) => failure(state, e),
    }
}
