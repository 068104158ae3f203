//! Extraction provider trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::types::{CompanyContext, ExtractedEntities};

/// An LLM-backed entity extractor.
///
/// Providers arrive fully configured and authenticated; the orchestration
/// layer only calls them and records the outcome.
#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Extract entities from a cleaned email body.
    async fn extract_entities(
        &self,
        email_text: &str,
        company_context: Option<&CompanyContext>,
        email_id: Option<&str>,
    ) -> Result<ExtractedEntities, ProviderError>;

    /// Provider name (e.g. "claude").
    fn name(&self) -> &str;
}

/// Configured providers keyed by name.
pub type ProviderMap = HashMap<String, Arc<dyn ExtractionProvider>>;
