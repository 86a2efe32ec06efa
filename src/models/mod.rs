//! Data models for the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use crate::availability::{EnabledHolidays, Overrides, WeeklyAvailability};
use crate::services::Service;

// =============================================================================
// Staff User
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct StaffUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub booking_enabled: bool,
    /// Service slugs this user performs; `None` means every service
    pub allowed_services: Option<Json<Vec<String>>>,
    pub weekly_availability: Option<Json<WeeklyAvailability>>,
    pub enabled_holidays: Option<Json<EnabledHolidays>>,
    pub overrides: Json<Overrides>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl StaffUser {
    /// Whether this user may perform `service` (no service means custom work)
    pub fn performs(&self, service: Option<&Service>) -> bool {
        match (&self.allowed_services, service) {
            (None, _) | (_, None) => true,
            (Some(Json(slugs)), Some(service)) => {
                let slug = service.slug();
                slugs.iter().any(|s| *s == slug)
            }
        }
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StaffUserResponse {
    pub id: Uuid,
    pub username: String,
    pub display_name: Option<String>,
    pub email: String,
    pub is_admin: bool,
    pub booking_enabled: bool,
    pub allowed_services: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<StaffUser> for StaffUserResponse {
    fn from(user: StaffUser) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            email: user.email,
            is_admin: user.is_admin,
            booking_enabled: user.booking_enabled,
            allowed_services: user.allowed_services.map(|Json(s)| s),
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStaffUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStaffBooking {
    pub booking_enabled: Option<bool>,
    /// `Some(None)` resets to "all services"
    #[serde(default, deserialize_with = "double_option")]
    pub allowed_services: Option<Option<Vec<String>>>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// =============================================================================
// Staff Session
// =============================================================================

#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct StaffSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

// =============================================================================
// Availability query results
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOption {
    /// `HH:MM` in the configured timezone
    pub time: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayOption {
    /// `YYYY-MM-DD`
    pub day: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthOption {
    /// `YYYY-MM`
    pub month: String,
    pub label: String,
}

// =============================================================================
// API Responses
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(allowed: Option<Vec<&str>>) -> StaffUser {
        StaffUser {
            id: Uuid::new_v4(),
            username: "jane".to_string(),
            display_name: None,
            email: "jane@example.com".to_string(),
            password_hash: String::new(),
            is_admin: false,
            booking_enabled: true,
            allowed_services: allowed
                .map(|list| Json(list.into_iter().map(str::to_string).collect())),
            weekly_availability: None,
            enabled_holidays: None,
            overrides: Json(Overrides::default()),
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    fn massage() -> Service {
        Service {
            title: "Deep Tissue Massage".to_string(),
            sub_heading: None,
            duration_seconds: 3600,
            description: None,
        }
    }

    #[test]
    fn test_performs_defaults_to_all_services() {
        assert!(user(None).performs(Some(&massage())));
    }

    #[test]
    fn test_performs_respects_allow_list() {
        assert!(user(Some(vec!["deep-tissue-massage"])).performs(Some(&massage())));
        assert!(!user(Some(vec!["haircut"])).performs(Some(&massage())));
        assert!(user(Some(vec![])).performs(None));
    }

    #[test]
    fn test_update_staff_booking_distinguishes_null() {
        let reset: UpdateStaffBooking =
            serde_json::from_str(r#"{"allowed_services": null}"#).unwrap();
        assert_eq!(reset.allowed_services, Some(None));

        let untouched: UpdateStaffBooking =
            serde_json::from_str(r#"{"booking_enabled": false}"#).unwrap();
        assert_eq!(untouched.allowed_services, None);
        assert_eq!(untouched.booking_enabled, Some(false));
    }

    #[test]
    fn test_user_response_hides_hash_and_keeps_dates() {
        let user = user(Some(vec!["deep-tissue-massage"]));
        let created_at = user.created_at;
        let response = StaffUserResponse::from(user);
        assert_eq!(response.created_at, created_at);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["allowed_services"][0], "deep-tissue-massage");
    }
}
