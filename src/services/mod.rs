//! Service catalog
//!
//! Services are configured by an administrator and stored as a JSON list in
//! the settings table. Durations are restricted to fixed 15 minute buckets.

use serde::{Deserialize, Serialize};

use crate::validation::ValidationError;

/// Allowed service durations in seconds (15 minutes up to 4 hours)
pub const DURATION_BUCKETS: [i64; 16] = [
    900, 1800, 2700, 3600, 4500, 5400, 6300, 7200, 8100, 9000, 9900, 10800, 11700, 12600, 13500,
    14400,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub title: String,
    #[serde(default)]
    pub sub_heading: Option<String>,
    pub duration_seconds: i64,
    #[serde(default)]
    pub description: Option<String>,
}

impl Service {
    /// Stable identifier used in per-user allow-lists
    pub fn slug(&self) -> String {
        slugify(&self.title)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "title".to_string(),
            });
        }
        if self.title.len() > 200 {
            return Err(ValidationError::TooLong {
                field: "title".to_string(),
                max: 200,
            });
        }
        if !DURATION_BUCKETS.contains(&self.duration_seconds) {
            return Err(ValidationError::UnsupportedDuration(self.duration_seconds));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceCatalog {
    services: Vec<Service>,
}

impl ServiceCatalog {
    /// Build a catalog, rejecting invalid entries and duplicate titles
    pub fn new(services: Vec<Service>) -> Result<Self, ValidationError> {
        let mut seen = std::collections::HashSet::new();
        for service in &services {
            service.validate()?;
            if !seen.insert(normalize(&service.title)) {
                return Err(ValidationError::DuplicateService(service.title.clone()));
            }
        }
        Ok(Self { services })
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Find a service from a submitted label
    ///
    /// Matching is case-insensitive with collapsed whitespace. Legacy labels
    /// of the form `"Title --> anything"` and `"Title - Sub heading"` resolve
    /// to their title.
    pub fn find(&self, label: &str) -> Option<&Service> {
        let wanted = normalize(label);
        if wanted.is_empty() {
            return None;
        }

        let by_title = |needle: &str| {
            self.services
                .iter()
                .find(|s| normalize(&s.title) == needle)
        };

        if let Some(service) = by_title(&wanted) {
            return Some(service);
        }

        if let Some((head, _)) = wanted.split_once("-->") {
            if let Some(service) = by_title(head.trim()) {
                return Some(service);
            }
        }

        self.services.iter().find(|s| {
            s.sub_heading
                .as_deref()
                .map(|sub| wanted == format!("{} - {}", normalize(&s.title), normalize(sub)))
                .unwrap_or(false)
        })
    }

    /// Duration in seconds for a submitted service label
    pub fn duration_for(&self, label: &str) -> Option<i64> {
        self.find(label).map(|s| s.duration_seconds)
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.slug() == slug)
    }
}

/// Lowercase and collapse runs of whitespace
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lowercase ASCII alphanumerics separated by single hyphens
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(title: &str, sub: Option<&str>, seconds: i64) -> Service {
        Service {
            title: title.to_string(),
            sub_heading: sub.map(str::to_string),
            duration_seconds: seconds,
            description: None,
        }
    }

    fn catalog() -> ServiceCatalog {
        ServiceCatalog::new(vec![
            service("Initial Consultation", Some("First visit"), 3600),
            service("Follow-up  Visit", None, 1800),
            service("Deep Tissue Massage", Some("90 minutes"), 5400),
        ])
        .unwrap()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Follow-up \t Visit "), "follow-up visit");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Initial Consultation"), "initial-consultation");
        assert_eq!(slugify("Follow-up  Visit!"), "follow-up-visit");
        assert_eq!(slugify("  Cut & Color "), "cut-color");
    }

    #[test]
    fn test_duration_lookup_by_title() {
        let catalog = catalog();
        assert_eq!(catalog.duration_for("initial consultation"), Some(3600));
        assert_eq!(catalog.duration_for("FOLLOW-UP VISIT"), Some(1800));
        assert_eq!(catalog.duration_for("Haircut"), None);
        assert_eq!(catalog.duration_for("   "), None);
    }

    #[test]
    fn test_duration_lookup_legacy_labels() {
        let catalog = catalog();
        assert_eq!(
            catalog.duration_for("Deep Tissue Massage --> 90 minutes"),
            Some(5400)
        );
        assert_eq!(
            catalog.duration_for("Initial Consultation - First visit"),
            Some(3600)
        );
    }

    #[test]
    fn test_find_by_slug() {
        let catalog = catalog();
        assert_eq!(
            catalog.find_by_slug("deep-tissue-massage").map(|s| s.duration_seconds),
            Some(5400)
        );
        assert!(catalog.find_by_slug("unknown").is_none());
    }

    #[test]
    fn test_rejects_unsupported_duration() {
        let result = ServiceCatalog::new(vec![service("Odd", None, 1000)]);
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedDuration(1000))
        ));
    }

    #[test]
    fn test_rejects_duplicate_titles() {
        let result = ServiceCatalog::new(vec![
            service("Massage", None, 3600),
            service("  massage", None, 1800),
        ]);
        match result {
            Err(e @ ValidationError::DuplicateService(_)) => {
                assert!(e.to_string().starts_with("Duplicate service title"));
            }
            other => panic!("expected a duplicate title error, got {:?}", other.map(|_| ())),
        }
    }
}
