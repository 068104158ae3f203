//! Fallback consensus: fan out, keep the highest-priority success.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use collabflow_core::{CollabResult, ProviderMap};

use super::{fan_out, ExtractionRequest, StrategyOutcome};
use crate::health::HealthTracker;

/// Calls every provider concurrently and keeps the success of the provider
/// listed first.
///
/// Suited to free-text fields such as the summary, where there is nothing
/// to vote on field by field.
#[derive(Debug, Clone)]
pub struct ConsensusStrategy {
    provider_priority: Vec<String>,
    call_timeout: Option<Duration>,
}

impl ConsensusStrategy {
    pub fn new(provider_priority: Vec<String>) -> Self {
        Self {
            provider_priority,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub async fn execute(
        &self,
        request: &ExtractionRequest,
        providers: &ProviderMap,
        health: &Arc<HealthTracker>,
    ) -> CollabResult<StrategyOutcome> {
        let (successes, results) =
            fan_out(&self.provider_priority, request, providers, health, self.call_timeout).await;

        // Successes come back in priority order.
        match successes.into_iter().next() {
            Some((name, _)) => {
                info!("Consensus selected {} by priority", name);
                StrategyOutcome::new(name, results)
            }
            None => Err(results.into_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use collabflow_core::{ConfidenceScores, ExtractedEntities};

    #[tokio::test]
    async fn test_highest_priority_success_wins() {
        let gemini = FakeProvider::failing("gemini");
        // Finishes last but outranks openai.
        let claude = FakeProvider::with_result(
            "claude",
            Ok(ExtractedEntities::new(ConfidenceScores::uniform(0.4).unwrap())
                .with_summary("claude summary")),
            Some(Duration::from_millis(50)),
        );
        let openai = FakeProvider::succeeding("openai", 0.99);
        let providers = provider_map(&[&gemini, &claude, &openai]);

        let strategy = ConsensusStrategy::new(names(&["gemini", "claude", "openai"]));
        let outcome = strategy
            .execute(&ExtractionRequest::new("email"), &providers, &health())
            .await
            .unwrap();

        assert_eq!(outcome.provider_name, "claude");
        assert_eq!(outcome.entities.summary.as_deref(), Some("claude summary"));
        assert_eq!(outcome.results.successes.len(), 2);
        assert_eq!(openai.calls(), 1);
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let strategy = ConsensusStrategy::new(names(&["gemini"]));
        let err = strategy
            .execute(&ExtractionRequest::new("email"), &provider_map(&[]), &health())
            .await
            .unwrap_err();
        assert_eq!(err.provider_errors().unwrap().len(), 1);
    }
}
