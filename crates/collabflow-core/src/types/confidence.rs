//! Per-field confidence scores and the weights used to aggregate them.

use serde::{Deserialize, Serialize};

use crate::error::{CollabError, CollabResult};

/// Confidence reported by a provider for each tracked field, all in 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceScores {
    /// Confidence in the person in charge.
    pub person: f64,
    /// Confidence in the startup name.
    pub startup: f64,
    /// Confidence in the partner organisation.
    pub partner: f64,
    /// Confidence in the collaboration details.
    pub details: f64,
    /// Confidence in the collaboration date.
    pub date: f64,
}

impl ConfidenceScores {
    /// Create validated scores. Every value must be finite and within 0-1.
    pub fn new(person: f64, startup: f64, partner: f64, details: f64, date: f64) -> CollabResult<Self> {
        let scores = Self {
            person,
            startup,
            partner,
            details,
            date,
        };
        scores.validate()?;
        Ok(scores)
    }

    /// The same score for every field.
    pub fn uniform(value: f64) -> CollabResult<Self> {
        Self::new(value, value, value, value, value)
    }

    /// Check that every score lies within 0-1.
    pub fn validate(&self) -> CollabResult<()> {
        for (field, value) in self.fields() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(CollabError::out_of_range(
                    format!("confidence for '{}' is {}, outside 0.0-1.0", field, value),
                    "Providers must report confidence scores between 0.0 and 1.0",
                ));
            }
        }
        Ok(())
    }

    /// Field name and value pairs, in a fixed order.
    pub fn fields(&self) -> [(&'static str, f64); 5] {
        [
            ("person", self.person),
            ("startup", self.startup),
            ("partner", self.partner),
            ("details", self.details),
            ("date", self.date),
        ]
    }

    /// Simple (unweighted) mean of the five scores.
    pub fn mean(&self) -> f64 {
        (self.person + self.startup + self.partner + self.details + self.date) / 5.0
    }
}

/// Relative importance of each field when ranking competing results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub person: f64,
    pub startup: f64,
    pub partner: f64,
    pub details: f64,
    pub date: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        // Identity fields matter most; the date is often implicit in the email.
        Self {
            person: 1.5,
            startup: 1.5,
            partner: 1.0,
            details: 0.8,
            date: 0.5,
        }
    }
}

impl FieldWeights {
    /// Equal weight for every field.
    pub fn equal() -> Self {
        Self {
            person: 1.0,
            startup: 1.0,
            partner: 1.0,
            details: 1.0,
            date: 1.0,
        }
    }

    fn values(&self) -> [(&'static str, f64); 5] {
        [
            ("person", self.person),
            ("startup", self.startup),
            ("partner", self.partner),
            ("details", self.details),
            ("date", self.date),
        ]
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.values().iter().map(|(_, w)| w).sum()
    }

    /// Weights must be finite, non-negative and sum to a positive value.
    pub fn validate(&self) -> CollabResult<()> {
        for (field, weight) in self.values() {
            if !weight.is_finite() {
                return Err(CollabError::configuration(format!(
                    "weight for '{}' is not a finite number",
                    field
                )));
            }
            if weight < 0.0 {
                return Err(CollabError::configuration(format!(
                    "weight for '{}' is negative ({})",
                    field, weight
                )));
            }
        }
        if self.total() <= 0.0 {
            return Err(CollabError::configuration(
                "field weights must sum to a positive value",
            ));
        }
        Ok(())
    }

    /// Weighted mean of `scores`, clamped to 0-1.
    ///
    /// Returns a configuration error for invalid weight sets.
    pub fn aggregate(&self, scores: &ConfidenceScores) -> CollabResult<f64> {
        self.validate()?;
        let weighted: f64 = scores
            .fields()
            .iter()
            .zip(self.values().iter())
            .map(|((_, score), (_, weight))| score * weight)
            .sum();
        Ok((weighted / self.total()).clamp(0.0, 1.0))
    }
}
