//! Sequential failover: the first provider to succeed wins.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use collabflow_core::{CollabResult, ProviderMap};

use super::{admit, call_and_record, unique_names, ExtractionRequest, ProviderResults, StrategyOutcome};
use crate::health::HealthTracker;
use crate::quality::QualityTracker;

/// Try providers one at a time in priority order.
///
/// When a quality tracker is supplied and holds data for any configured
/// candidate, attempts are reordered by descending quality score; candidates
/// without data follow in priority order.
#[derive(Debug, Clone)]
pub struct FailoverStrategy {
    priority_order: Vec<String>,
    call_timeout: Option<Duration>,
}

impl FailoverStrategy {
    pub fn new(priority_order: Vec<String>) -> Self {
        Self {
            priority_order,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn priority_order(&self) -> &[String] {
        &self.priority_order
    }

    /// Order in which providers will be attempted.
    pub fn attempt_order(
        &self,
        providers: &ProviderMap,
        quality: Option<&QualityTracker>,
    ) -> Vec<String> {
        let order = unique_names(&self.priority_order);
        let Some(quality) = quality else {
            return order;
        };

        let configured: Vec<String> = order
            .iter()
            .filter(|name| providers.contains_key(*name))
            .cloned()
            .collect();
        let ranked = quality.rank_providers(&configured);
        if ranked.is_empty() {
            return order;
        }

        let mut reordered: Vec<String> = ranked.into_iter().map(|(name, _)| name).collect();
        for name in order {
            if !reordered.contains(&name) {
                reordered.push(name);
            }
        }
        reordered
    }

    /// Attempt providers until one succeeds.
    pub async fn execute(
        &self,
        request: &ExtractionRequest,
        providers: &ProviderMap,
        health: &Arc<HealthTracker>,
        quality: Option<&Arc<QualityTracker>>,
    ) -> CollabResult<StrategyOutcome> {
        let order = self.attempt_order(providers, quality.map(|q| q.as_ref()));
        let mut results = ProviderResults::default();

        for name in order {
            let (provider, permit) = match admit(&name, providers, health) {
                Ok(admitted) => admitted,
                Err(reason) => {
                    results.skip(&name, reason);
                    continue;
                }
            };

            match call_and_record(&name, &provider, request, self.call_timeout, permit).await {
                Ok(entities) => {
                    info!("Failover selected {}", name);
                    results.successes.insert(name.clone(), entities);
                    return StrategyOutcome::new(name, results);
                }
                Err(err) => results.fail(&name, err),
            }
        }

        Err(results.into_error())
    }
}
