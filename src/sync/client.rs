//! HTTP client a child site uses to reach its master

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use super::SYNC_KEY_HEADER;
use crate::booking::{BookingConfirmation, BookingRequest};
use crate::error::ScheduleError;
use crate::models::{ApiResponse, DayOption, MonthOption, TimeOption};
use crate::services::Service;

/// Availability filter forwarded to the master
#[derive(Debug, Clone, Default)]
pub struct RemoteQuery {
    pub duration_seconds: Option<i64>,
    pub service: Option<String>,
    pub user: Option<String>,
}

impl RemoteQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(seconds) = self.duration_seconds {
            params.push(("duration_seconds", seconds.to_string()));
        }
        if let Some(service) = &self.service {
            params.push(("service", service.clone()));
        }
        if let Some(user) = &self.user {
            params.push(("user", user.clone()));
        }
        params
    }
}

#[derive(Serialize)]
struct RemoteBooking<'a> {
    #[serde(flatten)]
    booking: &'a BookingRequest,
    key: &'a str,
}

#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
    base_url: String,
    key: String,
}

impl SyncClient {
    pub fn new(base_url: &str, key: &str, timeout: Duration) -> Result<Self, ScheduleError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScheduleError::Config(format!("sync client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/sync/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<T, ScheduleError> {
        params.push(("key", self.key.clone()));
        let response = self
            .http
            .get(self.url(path))
            .header(SYNC_KEY_HEADER, &self.key)
            .query(&params)
            .send()
            .await
            .map_err(|e| remote(path, e))?;
        decode(path, response).await
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ScheduleError> {
        let response = self
            .http
            .post(self.url(path))
            .header(SYNC_KEY_HEADER, &self.key)
            .json(body)
            .send()
            .await
            .map_err(|e| remote(path, e))?;
        decode(path, response).await
    }

    pub async fn services(&self) -> Result<Vec<Service>, ScheduleError> {
        self.get("services", Vec::new()).await
    }

    pub async fn available_times(
        &self,
        date: &str,
        query: &RemoteQuery,
    ) -> Result<Vec<TimeOption>, ScheduleError> {
        let mut params = query.params();
        params.push(("date", date.to_string()));
        self.get("available-times", params).await
    }

    pub async fn available_days(
        &self,
        month: &str,
        query: &RemoteQuery,
    ) -> Result<Vec<DayOption>, ScheduleError> {
        let mut params = query.params();
        params.push(("month", month.to_string()));
        self.get("available-days", params).await
    }

    pub async fn available_months(
        &self,
        query: &RemoteQuery,
    ) -> Result<Vec<MonthOption>, ScheduleError> {
        self.get("available-months", query.params()).await
    }

    pub async fn book(&self, booking: &BookingRequest) -> Result<BookingConfirmation, ScheduleError> {
        let confirmation: BookingConfirmation = self
            .post(
                "book",
                &RemoteBooking {
                    booking,
                    key: &self.key,
                },
            )
            .await?;
        tracing::info!(
            id = %confirmation.appointment_id,
            user = %confirmation.user,
            "Booking accepted by master site"
        );
        Ok(confirmation)
    }
}

fn remote(path: &str, e: reqwest::Error) -> ScheduleError {
    tracing::error!(path, "Master site request failed: {}", e);
    ScheduleError::Remote(e.to_string())
}

/// Unwrap the master's envelope; non-2xx, `success = false` or bad JSON fail
async fn decode<T: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<T, ScheduleError> {
    let status = response.status();
    let body: ApiResponse<T> = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(path, %status, "Undecodable answer from master site: {}", e);
            return Err(ScheduleError::Remote(format!("invalid response ({})", status)));
        }
    };

    if !status.is_success() || !body.success {
        let reason = body.error.unwrap_or_else(|| status.to_string());
        tracing::warn!(path, %status, "Master site rejected request: {}", reason);
        return Err(ScheduleError::Remote(reason));
    }

    body.data
        .ok_or_else(|| ScheduleError::Remote("empty response".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = SyncClient::new("https://master.example.com/", "k", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url("available-times"),
            "https://master.example.com/api/sync/available-times"
        );
    }

    #[test]
    fn test_query_params() {
        let query = RemoteQuery {
            duration_seconds: Some(1800),
            service: None,
            user: Some("anyone".to_string()),
        };
        assert_eq!(
            query.params(),
            vec![
                ("duration_seconds", "1800".to_string()),
                ("user", "anyone".to_string())
            ]
        );
    }

    #[test]
    fn test_booking_body_carries_key() {
        let booking = BookingRequest {
            date: "2024-03-11".to_string(),
            time: "09:00".to_string(),
            service: Some("Consultation".to_string()),
            ..Default::default()
        };
        let body = serde_json::to_value(RemoteBooking {
            booking: &booking,
            key: "secret",
        })
        .unwrap();
        assert_eq!(body["key"], "secret");
        assert_eq!(body["date"], "2024-03-11");
        assert_eq!(body["service"], "Consultation");
    }
}
