//! Scheduling error taxonomy

use axum::http::StatusCode;
use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Malformed input, rejected before touching storage
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The user or service combination is not permitted
    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The reservation lock could not be acquired in time
    #[error("The booking system is busy, please try again")]
    Busy,

    /// The requested slot range is not (or no longer) open
    #[error("The selected time is no longer available, please select another slot")]
    Unavailable,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The master site could not be reached or answered badly
    #[error("remote booking service error: {0}")]
    Remote(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ScheduleError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Invalid(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Busy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unavailable => StatusCode::CONFLICT,
            Self::Storage(_) | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Remote(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Contention failures a client may simply retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::Unavailable)
    }

    /// Short message for end users; `debug` appends internal detail
    pub fn public_message(&self, debug: bool) -> String {
        let message = match self {
            Self::Invalid(e) => return e.to_string(),
            Self::Forbidden(reason) => return reason.clone(),
            Self::NotFound(_) | Self::Busy | Self::Unavailable => return self.to_string(),
            Self::Storage(_) => "Could not complete the request, please try again",
            Self::Remote(_) => "The booking service is currently unavailable",
            Self::Config(_) => "The booking service is not configured correctly",
        };
        if debug {
            format!("{} ({})", message, self)
        } else {
            message.to_string()
        }
    }
}
