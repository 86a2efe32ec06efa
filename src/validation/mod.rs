//! Input validation module

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' is too long (max {max} characters)")]
    TooLong { field: String, max: usize },

    #[error("Field '{field}' is too short (min {min} characters)")]
    TooShort { field: String, min: usize },

    #[error("Invalid email format")]
    InvalidEmail,

    #[error("Invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("Invalid month '{0}' (expected YYYY-MM)")]
    InvalidMonth(String),

    #[error("Invalid time '{0}' (expected HH:MM)")]
    InvalidTime(String),

    #[error("Time {0} is outside of business hours")]
    OffGrid(String),

    #[error("Duration must be a positive number of seconds")]
    InvalidDuration,

    #[error("Duration {0} is not one of the supported service durations")]
    UnsupportedDuration(i64),

    #[error("A duration or a known service is required")]
    MissingDuration,

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Duplicate service title: {0}")]
    DuplicateService(String),

    #[error("Invalid username format (must be lowercase alphanumeric with hyphens, dots or underscores)")]
    InvalidUsername,

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("Unknown holiday: {0}")]
    UnknownHoliday(String),

    #[error("Invalid override action '{0}' (expected allow, block or remove)")]
    InvalidOverrideAction(String),

    #[error("Weekday {0} is out of range (0 = Sunday .. 6 = Saturday)")]
    InvalidWeekday(u8),

    #[error("The selected date is in the past")]
    InPast,
}

/// Parse a `YYYY-MM-DD` calendar date
pub fn parse_date(input: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "date".to_string(),
        });
    }
    if trimmed.len() != 10 {
        return Err(ValidationError::InvalidDate(trimmed.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(trimmed.to_string()))
}

/// Parse a `YYYY-MM` month into the first day of that month
pub fn parse_month(input: &str) -> Result<NaiveDate, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "month".to_string(),
        });
    }
    let invalid = || ValidationError::InvalidMonth(trimmed.to_string());

    let (year, month) = trimmed.split_once('-').ok_or_else(invalid)?;
    if year.len() != 4 || month.len() != 2 {
        return Err(invalid());
    }
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)
}

/// Parse an `HH:MM` wall-clock time
pub fn parse_time(input: &str) -> Result<NaiveTime, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "time".to_string(),
        });
    }
    // Accept a trailing ":SS" as sent by some form widgets
    let hhmm = match trimmed.len() {
        5 => trimmed,
        8 if trimmed.ends_with(":00") => &trimmed[..5],
        _ => return Err(ValidationError::InvalidTime(trimmed.to_string())),
    };
    NaiveTime::parse_from_str(hhmm, "%H:%M")
        .map_err(|_| ValidationError::InvalidTime(trimmed.to_string()))
}

/// Validate a requested duration in seconds
pub fn validate_duration(seconds: i64) -> Result<i64, ValidationError> {
    if seconds <= 0 {
        return Err(ValidationError::InvalidDuration);
    }
    // Nothing longer than a full day can fit the grid
    if seconds > 24 * 3600 {
        return Err(ValidationError::InvalidDuration);
    }
    Ok(seconds)
}

/// Validate username format
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.is_empty() || username.len() > 60 {
        return Err(ValidationError::InvalidUsername);
    }

    let is_valid = username.chars().all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' || c == '.'
    });

    if !is_valid || username.starts_with('-') || username.ends_with('-') {
        return Err(ValidationError::InvalidUsername);
    }

    Ok(())
}

/// Validate an IANA timezone name
pub fn validate_timezone(name: &str) -> Result<Tz, ValidationError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ValidationError::InvalidTimezone(name.to_string()))
}

/// Validate a staff password
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < 10 {
        return Err(ValidationError::TooShort {
            field: "password".to_string(),
            min: 10,
        });
    }
    if password.len() > 1024 {
        return Err(ValidationError::TooLong {
            field: "password".to_string(),
            max: 1024,
        });
    }
    Ok(())
}

/// Validate an optional free-text field
pub fn validate_text(field: &str, value: Option<&str>, max: usize) -> Result<(), ValidationError> {
    if let Some(value) = value {
        if value.chars().count() > max {
            return Err(ValidationError::TooLong {
                field: field.to_string(),
                max,
            });
        }
    }
    Ok(())
}

/// Simple email validation
pub fn is_valid_email(email: &str) -> bool {
    // Basic check: contains @ and at least one .
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }
    let (local, domain) = (parts[0], parts[1]);

    !local.is_empty() && !domain.is_empty() && domain.contains('.') && domain.len() > 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("test@example.com"));
        assert!(is_valid_email("user.name@domain.nl"));
        assert!(!is_valid_email("invalid"));
        assert!(!is_valid_email("@domain.com"));
        assert!(!is_valid_email("user@"));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-03-11").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        assert!(matches!(
            parse_date("2024-3-11"),
            Err(ValidationError::InvalidDate(_))
        ));
        assert!(matches!(
            parse_date("2024-02-30"),
            Err(ValidationError::InvalidDate(_))
        ));
        assert!(matches!(parse_date(" "), Err(ValidationError::Required { .. })));
    }

    #[test]
    fn test_parse_month() {
        assert_eq!(
            parse_month("2024-11").unwrap(),
            NaiveDate::from_ymd_opt(2024, 11, 1).unwrap()
        );
        assert!(parse_month("2024-13").is_err());
        assert!(parse_month("2024-1").is_err());
        assert!(parse_month("november").is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(
            parse_time("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert_eq!(
            parse_time("17:00:00").unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap()
        );
        assert!(matches!(
            parse_time("9:30"),
            Err(ValidationError::InvalidTime(_))
        ));
        assert!(parse_time("25:00").is_err());
    }

    #[test]
    fn test_validate_duration() {
        assert_eq!(validate_duration(1800).unwrap(), 1800);
        assert!(matches!(
            validate_duration(0),
            Err(ValidationError::InvalidDuration)
        ));
        assert!(validate_duration(-60).is_err());
        assert!(validate_duration(2 * 24 * 3600).is_err());
    }

    #[test]
    fn test_username_validation() {
        assert!(validate_username("jane.doe").is_ok());
        assert!(validate_username("front-desk_2").is_ok());
        assert!(validate_username("-invalid").is_err());
        assert!(validate_username("UPPERCASE").is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn test_validate_timezone() {
        assert_eq!(
            validate_timezone("America/New_York").unwrap(),
            chrono_tz::America::New_York
        );
        assert!(matches!(
            validate_timezone("Mars/Olympus_Mons"),
            Err(ValidationError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_validate_password_length() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough password").is_ok());
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_text("notes", None, 10).is_ok());
        assert!(validate_text("notes", Some("fine"), 10).is_ok());
        assert!(matches!(
            validate_text("notes", Some("far too long for this"), 10),
            Err(ValidationError::TooLong { .. })
        ));
    }
}
