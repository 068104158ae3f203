//! Concurrent fan-out to every provider with selection after the barrier.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use collabflow_core::{CollabResult, ExtractedEntities, ProviderMap, SelectionMode};

use super::{argmax_first, fan_out, ExtractionRequest, StrategyOutcome};
use crate::health::HealthTracker;
use crate::quality::QualityTracker;

#[derive(Debug, Clone)]
pub struct AllProvidersStrategy {
    provider_names: Vec<String>,
    selection_mode: SelectionMode,
    call_timeout: Option<Duration>,
}

impl AllProvidersStrategy {
    pub fn new(provider_names: Vec<String>) -> Self {
        Self {
            provider_names,
            selection_mode: SelectionMode::default(),
            call_timeout: None,
        }
    }

    pub fn with_selection_mode(mut self, mode: SelectionMode) -> Self {
        self.selection_mode = mode;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn selection_mode(&self) -> SelectionMode {
        self.selection_mode
    }

    /// Call every admitted provider concurrently, wait for all of them and
    /// select one success.
    ///
    /// Quality-based selection needs the quality tracker; without it, or when
    /// no successful provider has history, selection falls back to mean
    /// confidence.
    pub async fn execute(
        &self,
        request: &ExtractionRequest,
        providers: &ProviderMap,
        health: &Arc<HealthTracker>,
        quality: Option<&Arc<QualityTracker>>,
    ) -> CollabResult<StrategyOutcome> {
        let (successes, results) =
            fan_out(&self.provider_names, request, providers, health, self.call_timeout).await;

        debug!(
            "All providers finished: {} succeeded, {} failed, {} skipped",
            results.successes.len(),
            results.failures.len(),
            results.skipped.len()
        );

        let Some(winner) = self.select(&successes, quality.map(|q| q.as_ref())) else {
            return Err(results.into_error());
        };
        info!(
            "All providers selected {} ({} mode)",
            winner, self.selection_mode
        );
        StrategyOutcome::new(winner, results)
    }

    fn select(
        &self,
        successes: &[(String, ExtractedEntities)],
        quality: Option<&QualityTracker>,
    ) -> Option<String> {
        if self.selection_mode == SelectionMode::QualityBased {
            if let Some(name) = quality.and_then(|q| select_by_quality(successes, q)) {
                return Some(name);
            }
            debug!("No quality history for successful providers, using confidence");
        }
        argmax_first(successes, |(_, entities)| entities.confidence.mean())
            .map(|idx| successes[idx].0.clone())
    }
}

fn select_by_quality(
    successes: &[(String, ExtractedEntities)],
    quality: &QualityTracker,
) -> Option<String> {
    let scored: Vec<(&str, f64)> = successes
        .iter()
        .filter_map(|(name, _)| quality.quality_score(name).map(|s| (name.as_str(), s)))
        .collect();
    argmax_first(&scored, |(_, score)| *score).map(|idx| scored[idx].0.to_string())
}
