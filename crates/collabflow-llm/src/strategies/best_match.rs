//! Sequential best-match: call every provider, keep the most confident.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ordered_float::OrderedFloat;
use tracing::{debug, info};

use collabflow_core::{CollabResult, ConfidenceScores, FieldWeights, ProviderMap};

use super::{admit, call_and_record, unique_names, ExtractionRequest, ProviderResults, StrategyOutcome};
use crate::health::HealthTracker;

/// Aggregates closer than this are treated as tied.
const SCORE_EPSILON: f64 = 1e-9;

/// Weighted mean of the field confidences.
///
/// Fails with a configuration error when the weights are negative, not
/// finite, or sum to zero.
pub fn calculate_aggregate_confidence(
    scores: &ConfidenceScores,
    weights: &FieldWeights,
) -> CollabResult<f64> {
    weights.aggregate(scores)
}

#[derive(Debug, Clone)]
pub struct BestMatchStrategy {
    provider_names: Vec<String>,
    weights: FieldWeights,
    call_timeout: Option<Duration>,
}

struct Candidate {
    name: String,
    aggregate: f64,
    success_rate: f64,
}

impl BestMatchStrategy {
    pub fn new(provider_names: Vec<String>) -> Self {
        Self {
            provider_names,
            weights: FieldWeights::default(),
            call_timeout: None,
        }
    }

    pub fn with_weights(mut self, weights: FieldWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn weights(&self) -> &FieldWeights {
        &self.weights
    }

    /// Call each provider in turn and return the highest aggregate.
    ///
    /// Ties go to the provider with the better success rate, then to the
    /// one listed first.
    pub async fn execute(
        &self,
        request: &ExtractionRequest,
        providers: &ProviderMap,
        health: &Arc<HealthTracker>,
    ) -> CollabResult<StrategyOutcome> {
        self.weights.validate()?;

        let mut results = ProviderResults::default();
        let mut scored: Vec<(String, f64)> = Vec::new();

        for name in unique_names(&self.provider_names) {
            let (provider, permit) = match admit(&name, providers, health) {
                Ok(admitted) => admitted,
                Err(reason) => {
                    results.skip(&name, reason);
                    continue;
                }
            };

            match call_and_record(&name, &provider, request, self.call_timeout, permit).await {
                Ok(entities) => {
                    let aggregate = calculate_aggregate_confidence(&entities.confidence, &self.weights)?;
                    debug!("Provider {} aggregate confidence {:.3}", name, aggregate);
                    scored.push((name.clone(), aggregate));
                    results.successes.insert(name, entities);
                }
                Err(err) => results.fail(&name, err),
            }
        }

        // Success rates are read after every call so ties see current health.
        let candidates: Vec<Candidate> = scored
            .into_iter()
            .map(|(name, aggregate)| Candidate {
                success_rate: health.success_rate(&name),
                name,
                aggregate,
            })
            .collect();

        match pick_best(&candidates) {
            Some(best) => {
                info!(
                    "Best match selected {} (aggregate {:.3})",
                    best.name, best.aggregate
                );
                StrategyOutcome::new(best.name.clone(), results)
            }
            None => Err(results.into_error()),
        }
    }
}

/// First candidate that no later candidate strictly beats.
fn pick_best(candidates: &[Candidate]) -> Option<&Candidate> {
    let mut best: Option<&Candidate> = None;
    for candidate in candidates {
        match best {
            Some(current) if compare(candidate, current) != Ordering::Greater => {}
            _ => best = Some(candidate),
        }
    }
    best
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    if (a.aggregate - b.aggregate).abs() > SCORE_EPSILON {
        return OrderedFloat(a.aggregate).cmp(&OrderedFloat(b.aggregate));
    }
    OrderedFloat(a.success_rate).cmp(&OrderedFloat(b.success_rate))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use collabflow_core::{CollabError, ErrorCode};

    #[test]
    fn test_aggregate_bounds() {
        let weights = FieldWeights::default();
        let high = ConfidenceScores::uniform(1.0).unwrap();
        let low = ConfidenceScores::uniform(0.0).unwrap();
        assert!((calculate_aggregate_confidence(&high, &weights).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(calculate_aggregate_confidence(&low, &weights).unwrap(), 0.0);
    }

    #[test]
    fn test_equal_weights_give_plain_mean() {
        let scores = ConfidenceScores::new(0.9, 0.8, 0.7, 0.6, 0.5).unwrap();
        let aggregate = calculate_aggregate_confidence(&scores, &FieldWeights::equal()).unwrap();
        assert!((aggregate - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_default_weights_favour_names() {
        // person 1.5, startup 1.5, partner 1.0, details 0.8, date 0.5
        let scores = ConfidenceScores::new(1.0, 1.0, 0.0, 0.0, 0.0).unwrap();
        let aggregate = calculate_aggregate_confidence(&scores, &FieldWeights::default()).unwrap();
        assert!((aggregate - 3.0 / 5.3).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let scores = ConfidenceScores::uniform(0.5).unwrap();
        let negative = FieldWeights {
            person: -1.0,
            ..FieldWeights::default()
        };
        let zero = FieldWeights {
            person: 0.0,
            startup: 0.0,
            partner: 0.0,
            details: 0.0,
            date: 0.0,
        };
        for weights in [negative, zero] {
            let err = calculate_aggregate_confidence(&scores, &weights).unwrap_err();
            assert_eq!(err.code(), ErrorCode::ConfigInvalid);
        }
    }

    #[tokio::test]
    async fn test_selects_highest_aggregate() {
        let gemini = FakeProvider::succeeding("gemini", 0.70);
        let claude = FakeProvider::succeeding("claude", 0.95);
        let openai = FakeProvider::succeeding("openai", 0.75);
        let providers = provider_map(&[&gemini, &claude, &openai]);

        let strategy = BestMatchStrategy::new(names(&["gemini", "claude", "openai"]));
        let outcome = strategy
            .execute(&ExtractionRequest::new("email"), &providers, &health())
            .await
            .unwrap();

        assert_eq!(outcome.provider_name, "claude");
        assert_eq!(outcome.results.successes.len(), 3);
        assert_eq!(gemini.calls() + claude.calls() + openai.calls(), 3);
    }

    #[tokio::test]
    async fn test_tie_goes_to_better_success_rate() {
        let gemini = FakeProvider::succeeding("gemini", 0.8);
        let claude = FakeProvider::succeeding("claude", 0.8);
        let providers = provider_map(&[&gemini, &claude]);
        let health = health();
        health.record_failure("gemini", "earlier outage");

        let strategy = BestMatchStrategy::new(names(&["gemini", "claude"]));
        let outcome = strategy
            .execute(&ExtractionRequest::new("email"), &providers, &health)
            .await
            .unwrap();
        assert_eq!(outcome.provider_name, "claude");
    }

    #[tokio::test]
    async fn test_full_tie_keeps_list_order() {
        let gemini = FakeProvider::succeeding("gemini", 0.8);
        let claude = FakeProvider::succeeding("claude", 0.8);
        let providers = provider_map(&[&gemini, &claude]);

        let strategy = BestMatchStrategy::new(names(&["claude", "gemini"]));
        let outcome = strategy
            .execute(&ExtractionRequest::new("email"), &providers, &health())
            .await
            .unwrap();
        assert_eq!(outcome.provider_name, "claude");
    }

    #[tokio::test]
    async fn test_bad_weights_fail_before_any_call() {
        let gemini = FakeProvider::succeeding("gemini", 0.8);
        let providers = provider_map(&[&gemini]);
        let weights = FieldWeights {
            date: -0.5,
            ..FieldWeights::default()
        };

        let strategy = BestMatchStrategy::new(names(&["gemini"])).with_weights(weights);
        let err = strategy
            .execute(&ExtractionRequest::new("email"), &providers, &health())
            .await
            .unwrap_err();

        assert!(matches!(err, CollabError::Configuration(_)));
        assert_eq!(gemini.calls(), 0);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let gemini = FakeProvider::failing("gemini");
        let providers = provider_map(&[&gemini]);

        let strategy = BestMatchStrategy::new(names(&["gemini", "claude"]));
        let err = strategy
            .execute(&ExtractionRequest::new("email"), &providers, &health())
            .await
            .unwrap_err();
        assert_eq!(err.provider_errors().unwrap().len(), 2);
    }
}
