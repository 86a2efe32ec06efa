//! Normalizes loosely shaped form submissions into named fields
//!
//! Form builders name their fields freely, so each value is looked up under
//! a few accepted keys. Select fields may submit `"Shown label --> value"`;
//! for those the part after the arrow is the value.

use serde_json::{Map, Value};

const DATE_KEYS: &[&str] = &["date", "appointment_date", "booking_date"];
const TIME_KEYS: &[&str] = &["time", "appointment_time", "booking_time"];
const SERVICE_KEYS: &[&str] = &["service", "service_title", "services"];
const USER_KEYS: &[&str] = &["user", "staff", "provider", "username"];
const DURATION_KEYS: &[&str] = &["duration_seconds", "duration"];
const NOTES_KEYS: &[&str] = &["notes", "message", "comments"];
const TITLE_KEYS: &[&str] = &["title", "appointment_title"];
const SUBMISSION_KEYS: &[&str] = &["submission_id", "entry_id"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionFields {
    pub date: Option<String>,
    pub time: Option<String>,
    /// Kept verbatim; the service catalog understands composite labels
    pub service: Option<String>,
    pub user: Option<String>,
    pub duration_seconds: Option<i64>,
    pub notes: Option<String>,
    pub title: Option<String>,
    pub submission_id: Option<String>,
}

impl SubmissionFields {
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            date: lookup(fields, DATE_KEYS).map(|v| arrow_value(&v).to_string()),
            time: lookup(fields, TIME_KEYS).map(|v| arrow_value(&v).to_string()),
            service: lookup(fields, SERVICE_KEYS),
            user: lookup(fields, USER_KEYS).map(|v| arrow_value(&v).to_string()),
            duration_seconds: lookup(fields, DURATION_KEYS)
                .and_then(|v| arrow_value(&v).parse().ok()),
            notes: lookup(fields, NOTES_KEYS),
            title: lookup(fields, TITLE_KEYS),
            submission_id: lookup(fields, SUBMISSION_KEYS),
        }
    }
}

/// First non-empty value under any of `keys`, numbers rendered as text
fn lookup(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let text = match fields.get(*key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(items) => items
                .iter()
                .find_map(|v| v.as_str().map(|s| s.trim().to_string()))?,
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

/// `"Label --> value"` yields `value`; anything else is returned trimmed
pub fn arrow_value(raw: &str) -> &str {
    match raw.rsplit_once("-->") {
        Some((_, value)) => value.trim(),
        None => raw.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_primary_keys() {
        let f = SubmissionFields::from_fields(&fields(json!({
            "date": "2024-03-11",
            "time": "09:00",
            "service": "Consultation",
            "user": "sam",
            "notes": "first visit"
        })));
        assert_eq!(f.date.as_deref(), Some("2024-03-11"));
        assert_eq!(f.time.as_deref(), Some("09:00"));
        assert_eq!(f.service.as_deref(), Some("Consultation"));
        assert_eq!(f.user.as_deref(), Some("sam"));
        assert_eq!(f.notes.as_deref(), Some("first visit"));
        assert_eq!(f.duration_seconds, None);
    }

    #[test]
    fn test_fallback_keys_and_empty_values() {
        let f = SubmissionFields::from_fields(&fields(json!({
            "date": "",
            "appointment_date": "2024-03-12",
            "booking_time": "10:30",
            "service_title": "Consultation",
            "provider": "alex",
            "duration": 5400
        })));
        assert_eq!(f.date.as_deref(), Some("2024-03-12"));
        assert_eq!(f.time.as_deref(), Some("10:30"));
        assert_eq!(f.service.as_deref(), Some("Consultation"));
        assert_eq!(f.user.as_deref(), Some("alex"));
        assert_eq!(f.duration_seconds, Some(5400));
    }

    #[test]
    fn test_arrow_values() {
        let f = SubmissionFields::from_fields(&fields(json!({
            "date": "Monday, March 11 --> 2024-03-11",
            "time": "9:00 AM --> 09:00",
            "staff": "Sam Jones --> sam",
            "services": ["Consultation --> 5400"]
        })));
        assert_eq!(f.date.as_deref(), Some("2024-03-11"));
        assert_eq!(f.time.as_deref(), Some("09:00"));
        assert_eq!(f.user.as_deref(), Some("sam"));
        assert_eq!(f.service.as_deref(), Some("Consultation --> 5400"));
    }

    #[test]
    fn test_arrow_value_passthrough() {
        assert_eq!(arrow_value("  anyone "), "anyone");
        assert_eq!(arrow_value("a --> b --> c"), "c");
    }
}
