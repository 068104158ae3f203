//! Hints handed to providers alongside the email text.

use serde::{Deserialize, Serialize};

/// Known organisations that help a provider resolve names in the email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyContext {
    /// Startups already tracked in the project database.
    #[serde(default)]
    pub known_startups: Vec<String>,
    /// Partner organisations already tracked.
    #[serde(default)]
    pub known_partners: Vec<String>,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CompanyContext {
    pub fn new(known_startups: Vec<String>, known_partners: Vec<String>) -> Self {
        Self {
            known_startups,
            known_partners,
            notes: None,
        }
    }
}
