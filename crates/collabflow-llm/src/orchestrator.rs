//! Entry point tying providers, strategies and trackers together.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use collabflow_core::{
    CollabConfig, CollabResult, CompanyContext, CostTracker, ExtractedEntities,
    OrchestrationConfig, ProviderMap, SelectionMode, StrategyKind,
};

use crate::health::HealthTracker;
use crate::quality::{ProviderComparison, QualityTracker};
use crate::strategies::{unique_names, ExtractionRequest, ProviderResults, Strategy};

/// Result of one orchestrated extraction.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    /// Winner's entities, annotated with provider name and email id.
    pub entities: ExtractedEntities,
    pub provider_name: String,
    pub strategy: StrategyKind,
    /// Outcome of every provider the strategy considered.
    pub results: ProviderResults,
}

/// Provider health as reported by [`Orchestrator::provider_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub provider_name: String,
    pub configured: bool,
    pub available: bool,
    pub success_rate: f64,
    pub quality_score: Option<f64>,
}

/// Runs extractions over a fixed set of providers.
///
/// Trackers are shared so several orchestrators (or a reporting task) can
/// observe the same health and quality state.
pub struct Orchestrator {
    config: OrchestrationConfig,
    providers: ProviderMap,
    health: Arc<HealthTracker>,
    quality: Arc<QualityTracker>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestrationConfig,
        providers: ProviderMap,
        health: Arc<HealthTracker>,
        quality: Arc<QualityTracker>,
    ) -> Self {
        Self {
            config,
            providers,
            health,
            quality,
        }
    }

    /// Orchestrator whose trackers persist under `config.data_dir`.
    pub fn from_config(config: &CollabConfig, providers: ProviderMap) -> Self {
        let health = HealthTracker::open(&config.data_dir, config.health.clone());
        let quality = QualityTracker::open(&config.data_dir, config.quality.clone());
        Self::new(
            config.orchestration.clone(),
            providers,
            Arc::new(health),
            Arc::new(quality),
        )
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }

    pub fn providers(&self) -> &ProviderMap {
        &self.providers
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn quality(&self) -> &Arc<QualityTracker> {
        &self.quality
    }

    /// Strategy of the given kind built from this orchestrator's settings.
    pub fn build_strategy(&self, kind: StrategyKind) -> Strategy {
        Strategy::from_config(kind, &self.config)
    }

    /// Extract entities from one email.
    ///
    /// `strategy` overrides the configured default. Quality is recorded for
    /// the winner, and for every success when all providers were called.
    pub async fn extract_entities(
        &self,
        email_text: &str,
        email_id: Option<&str>,
        strategy: Option<StrategyKind>,
        company_context: Option<CompanyContext>,
    ) -> CollabResult<ExtractionResult> {
        let kind = strategy.unwrap_or(self.config.default_strategy);
        let strategy = self.build_strategy(kind);

        let mut request = ExtractionRequest::new(email_text);
        if let Some(context) = company_context {
            request = request.with_company_context(context);
        }
        if let Some(id) = email_id {
            request = request.with_email_id(id);
        }

        let quality = self.quality_for(kind).then_some(&self.quality);
        debug!("Running {} strategy", kind);
        let outcome = strategy
            .execute(&request, &self.providers, &self.health, quality)
            .await?;

        match kind {
            StrategyKind::AllProviders | StrategyKind::Consensus => {
                for (name, entities) in &outcome.results.successes {
                    self.record_quality(name, entities);
                }
            }
            StrategyKind::Failover | StrategyKind::BestMatch => {
                self.record_quality(&outcome.provider_name, &outcome.entities);
            }
        }

        info!(
            "Extraction completed by {} using {} strategy",
            outcome.provider_name, kind
        );
        Ok(ExtractionResult {
            entities: outcome.entities,
            provider_name: outcome.provider_name,
            strategy: kind,
            results: outcome.results,
        })
    }

    /// Configured providers in priority order whose circuit admits calls.
    pub fn get_available_providers(&self) -> Vec<String> {
        unique_names(&self.config.provider_priority)
            .into_iter()
            .filter(|name| self.providers.contains_key(name) && self.health.is_available(name))
            .collect()
    }

    /// Health and quality snapshot for every provider in priority order.
    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        unique_names(&self.config.provider_priority)
            .into_iter()
            .map(|name| {
                let configured = self.providers.contains_key(&name);
                ProviderStatus {
                    configured,
                    available: configured && self.health.is_available(&name),
                    success_rate: self.health.success_rate(&name),
                    quality_score: self.quality.quality_score(&name),
                    provider_name: name,
                }
            })
            .collect()
    }

    /// Quality and value ranking of every provider with history.
    pub fn compare_providers(&self, cost_tracker: &dyn CostTracker) -> ProviderComparison {
        self.quality.compare_providers(cost_tracker)
    }

    fn quality_for(&self, kind: StrategyKind) -> bool {
        self.config.enable_quality_routing
            || (kind == StrategyKind::AllProviders
                && self.config.all_providers_selection == SelectionMode::QualityBased)
    }

    fn record_quality(&self, provider_name: &str, entities: &ExtractedEntities) {
        let reasons = entities.validate();
        if !reasons.is_empty() {
            debug!(
                "Result from {} failed validation: {}",
                provider_name,
                reasons.join(", ")
            );
        }
        self.quality
            .record_extraction(provider_name, entities, reasons.is_empty(), &reasons);
    }
}
