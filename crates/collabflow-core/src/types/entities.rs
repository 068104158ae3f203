//! Extraction results produced by providers.

use serde::{Deserialize, Serialize};

use super::confidence::ConfidenceScores;

/// Number of fields tracked for completeness.
pub const TRACKED_FIELD_COUNT: usize = 5;

/// Entities extracted from one collaboration-update email.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedEntities {
    /// Person in charge of the collaboration.
    pub person_in_charge: Option<String>,
    /// Name of the startup.
    pub startup_name: Option<String>,
    /// Partner organisation.
    pub partner_org: Option<String>,
    /// Free-form collaboration details.
    pub details: Option<String>,
    /// Collaboration date as written by the provider.
    pub date: Option<String>,
    /// Generated one-paragraph summary. Not a tracked field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Per-field confidence.
    pub confidence: ConfidenceScores,
    /// Source email identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    /// Provider that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl ExtractedEntities {
    /// Create an empty result with the given confidence.
    pub fn new(confidence: ConfidenceScores) -> Self {
        Self {
            confidence,
            ..Default::default()
        }
    }

    /// Builder: set person in charge.
    pub fn with_person(mut self, person: impl Into<String>) -> Self {
        self.person_in_charge = Some(person.into());
        self
    }

    /// Builder: set startup name.
    pub fn with_startup(mut self, startup: impl Into<String>) -> Self {
        self.startup_name = Some(startup.into());
        self
    }

    /// Builder: set partner organisation.
    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner_org = Some(partner.into());
        self
    }

    /// Builder: set details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Builder: set date.
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Builder: set summary.
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Copy annotated with the producing provider and, when known, the email id.
    pub fn annotated(&self, provider_name: &str, email_id: Option<&str>) -> Self {
        let mut entities = self.clone();
        entities.provider_name = Some(provider_name.to_string());
        if let Some(id) = email_id {
            entities.email_id = Some(id.to_string());
        }
        entities
    }

    /// Number of tracked fields with a non-blank value.
    pub fn fields_extracted(&self) -> usize {
        [
            &self.person_in_charge,
            &self.startup_name,
            &self.partner_org,
            &self.details,
            &self.date,
        ]
        .into_iter()
        .filter(|v| present(v))
        .count()
    }

    /// Percentage (0-100) of tracked fields with a value.
    pub fn completeness(&self) -> f64 {
        self.fields_extracted() as f64 / TRACKED_FIELD_COUNT as f64 * 100.0
    }

    /// Reasons this result is unusable for a project-tracking record.
    ///
    /// An empty list means the result passed validation.
    pub fn validate(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if !present(&self.startup_name) {
            reasons.push("missing startup name".to_string());
        }
        if !present(&self.partner_org) {
            reasons.push("missing partner organisation".to_string());
        }
        if self.confidence.validate().is_err() {
            reasons.push("confidence out of range".to_string());
        }
        reasons
    }
}
