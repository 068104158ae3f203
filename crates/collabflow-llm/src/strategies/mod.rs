//! Provider selection strategies.
//!
//! Every strategy takes the configured providers plus the health tracker
//! (and optionally the quality tracker) and yields one winning result. A
//! strategy only fails when no provider it attempted produced entities.
//!
//! - [`FailoverStrategy`] - sequential, first success wins
//! - [`BestMatchStrategy`] - sequential, highest weighted confidence wins
//! - [`AllProvidersStrategy`] - concurrent fan-out, selection after the barrier
//! - [`ConsensusStrategy`] - concurrent fan-out, highest-priority success wins

mod all_providers;
mod best_match;
mod consensus;
mod failover;

pub use all_providers::AllProvidersStrategy;
pub use best_match::{calculate_aggregate_confidence, BestMatchStrategy};
pub use consensus::ConsensusStrategy;
pub use failover::FailoverStrategy;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use collabflow_core::{
    CollabError, CollabResult, CompanyContext, ExtractedEntities, ExtractionProvider,
    OrchestrationConfig, ProviderError, ProviderMap, StrategyKind,
};

use crate::health::{CallPermit, HealthTracker};
use crate::quality::QualityTracker;

/// Input shared by every provider call of one extraction.
///
/// Cheap to clone so it can be moved into spawned tasks.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub email_text: Arc<str>,
    pub company_context: Option<Arc<CompanyContext>>,
    pub email_id: Option<Arc<str>>,
}

impl ExtractionRequest {
    pub fn new(email_text: impl Into<Arc<str>>) -> Self {
        Self {
            email_text: email_text.into(),
            company_context: None,
            email_id: None,
        }
    }

    pub fn with_company_context(mut self, context: CompanyContext) -> Self {
        self.company_context = Some(Arc::new(context));
        self
    }

    pub fn with_email_id(mut self, email_id: impl Into<Arc<str>>) -> Self {
        self.email_id = Some(email_id.into());
        self
    }

    pub fn company_context(&self) -> Option<&CompanyContext> {
        self.company_context.as_deref()
    }

    pub fn email_id(&self) -> Option<&str> {
        self.email_id.as_deref()
    }
}

/// What happened to every provider named by a strategy.
#[derive(Debug, Clone, Default)]
pub struct ProviderResults {
    /// Providers that returned entities.
    pub successes: BTreeMap<String, ExtractedEntities>,
    /// Providers that were called and failed.
    pub failures: BTreeMap<String, ProviderError>,
    /// Providers never called (not configured or circuit open).
    pub skipped: BTreeMap<String, ProviderError>,
}

impl ProviderResults {
    /// Number of providers actually called.
    pub fn attempted(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    fn skip(&mut self, name: &str, reason: ProviderError) {
        debug!("Skipping provider {}: {}", name, reason);
        self.skipped.insert(name.to_string(), reason);
    }

    fn fail(&mut self, name: &str, err: ProviderError) {
        warn!("Provider {} failed: {}", name, err);
        self.failures.insert(name.to_string(), err);
    }

    /// Aggregate failure carrying every failure and skip reason.
    pub fn into_error(self) -> CollabError {
        let mut errors = self.skipped;
        errors.extend(self.failures);
        CollabError::AllProvidersFailed { errors }
    }
}

/// Winning result of a strategy run.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    /// Winner's entities annotated with provider name and email id.
    pub entities: ExtractedEntities,
    pub provider_name: String,
    /// Outcome of every provider the strategy considered.
    pub results: ProviderResults,
}

impl StrategyOutcome {
    fn new(provider_name: String, results: ProviderResults) -> CollabResult<Self> {
        let entities = results
            .successes
            .get(&provider_name)
            .cloned()
            .ok_or_else(|| {
                CollabError::Internal(format!("winner {} has no recorded result", provider_name))
            })?;
        Ok(Self {
            entities,
            provider_name,
            results,
        })
    }
}

/// The closed set of strategies.
#[derive(Debug, Clone)]
pub enum Strategy {
    Failover(FailoverStrategy),
    BestMatch(BestMatchStrategy),
    AllProviders(AllProvidersStrategy),
    Consensus(ConsensusStrategy),
}

impl Strategy {
    /// Build a strategy of the given kind from orchestration settings.
    pub fn from_config(kind: StrategyKind, config: &OrchestrationConfig) -> Self {
        let names = config.provider_priority.clone();
        let timeout = config.call_timeout();
        match kind {
            StrategyKind::Failover => {
                Self::Failover(FailoverStrategy::new(names).with_call_timeout(timeout))
            }
            StrategyKind::BestMatch => Self::BestMatch(
                BestMatchStrategy::new(names)
                    .with_weights(config.best_match_weights)
                    .with_call_timeout(timeout),
            ),
            StrategyKind::AllProviders => Self::AllProviders(
                AllProvidersStrategy::new(names)
                    .with_selection_mode(config.all_providers_selection)
                    .with_call_timeout(timeout),
            ),
            StrategyKind::Consensus => {
                Self::Consensus(ConsensusStrategy::new(names).with_call_timeout(timeout))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Failover(_) => StrategyKind::Failover,
            Self::BestMatch(_) => StrategyKind::BestMatch,
            Self::AllProviders(_) => StrategyKind::AllProviders,
            Self::Consensus(_) => StrategyKind::Consensus,
        }
    }

    /// Run the strategy.
    pub async fn execute(
        &self,
        request: &ExtractionRequest,
        providers: &ProviderMap,
        health: &Arc<HealthTracker>,
        quality: Option<&Arc<QualityTracker>>,
    ) -> CollabResult<StrategyOutcome> {
        match self {
            Self::Failover(s) => s.execute(request, providers, health, quality).await,
            Self::BestMatch(s) => s.execute(request, providers, health).await,
            Self::AllProviders(s) => s.execute(request, providers, health, quality).await,
            Self::Consensus(s) => s.execute(request, providers, health).await,
        }
    }
}

/// Names in first-seen order without duplicates.
pub(crate) fn unique_names(names: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if !seen.contains(name) {
            seen.push(name.clone());
        }
    }
    seen
}

/// Look the provider up and ask the circuit breaker for permission.
fn admit(
    name: &str,
    providers: &ProviderMap,
    health: &Arc<HealthTracker>,
) -> Result<(Arc<dyn ExtractionProvider>, CallPermit), ProviderError> {
    let provider = providers.get(name).ok_or(ProviderError::NotConfigured)?;
    let permit = health.admit(name).ok_or(ProviderError::CircuitOpen)?;
    Ok((Arc::clone(provider), permit))
}

/// Call one provider, enforcing the deadline, and record the outcome.
///
/// If this future is dropped mid-call the permit is released unrecorded.
async fn call_and_record(
    name: &str,
    provider: &Arc<dyn ExtractionProvider>,
    request: &ExtractionRequest,
    timeout: Option<Duration>,
    permit: CallPermit,
) -> Result<ExtractedEntities, ProviderError> {
    let started = Instant::now();
    let call = provider.extract_entities(
        &request.email_text,
        request.company_context(),
        request.email_id(),
    );
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                elapsed_ms: limit.as_millis() as u64,
            }),
        },
        None => call.await,
    };
    let result = result.and_then(|entities| match entities.confidence.validate() {
        Ok(()) => Ok(entities.annotated(name, request.email_id())),
        Err(e) => Err(ProviderError::malformed(e.to_string())),
    });

    match &result {
        Ok(_) => permit.record_success(started.elapsed().as_secs_f64() * 1000.0),
        Err(err) => permit.record_failure(&err.to_string()),
    }
    result
}

/// Call every admitted provider on its own task and wait for all of them.
///
/// Returns the successes in `names` order alongside the full result map.
async fn fan_out(
    names: &[String],
    request: &ExtractionRequest,
    providers: &ProviderMap,
    health: &Arc<HealthTracker>,
    timeout: Option<Duration>,
) -> (Vec<(String, ExtractedEntities)>, ProviderResults) {
    let mut results = ProviderResults::default();
    let mut dispatched = Vec::new();
    let mut handles = Vec::new();

    for name in unique_names(names) {
        let (provider, permit) = match admit(&name, providers, health) {
            Ok(admitted) => admitted,
            Err(reason) => {
                results.skip(&name, reason);
                continue;
            }
        };
        let request = request.clone();
        let task_name = name.clone();
        handles.push(tokio::spawn(async move {
            call_and_record(&task_name, &provider, &request, timeout, permit).await
        }));
        dispatched.push(name);
    }

    debug!("Dispatched {} provider calls", dispatched.len());
    let joined = futures::future::join_all(handles).await;

    let mut successes = Vec::new();
    for (name, outcome) in dispatched.into_iter().zip(joined) {
        match outcome {
            Ok(Ok(entities)) => {
                results.successes.insert(name.clone(), entities.clone());
                successes.push((name, entities));
            }
            Ok(Err(err)) => results.fail(&name, err),
            Err(join_err) => {
                let err = ProviderError::TaskFailed(join_err.to_string());
                health.record_failure(&name, &err.to_string());
                results.fail(&name, err);
            }
        }
    }
    (successes, results)
}

/// Index of the entry with the highest score; ties keep the earliest.
fn argmax_first<T>(items: &[T], score: impl Fn(&T) -> f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, item) in items.iter().enumerate() {
        let value = score(item);
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use collabflow_core::ConfidenceScores;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider returning a fixed result and counting its calls.
    pub struct FakeProvider {
        name: String,
        result: Result<ExtractedEntities, ProviderError>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        pub fn succeeding(name: &str, confidence: f64) -> Arc<Self> {
            let entities = ExtractedEntities::new(ConfidenceScores::uniform(confidence).unwrap())
                .with_startup("Acme")
                .with_partner("Globex")
                .with_summary(format!("summary from {}", name));
            Self::with_result(name, Ok(entities), None)
        }

        pub fn failing(name: &str) -> Arc<Self> {
            Self::with_result(name, Err(ProviderError::request("upstream 500")), None)
        }

        pub fn with_result(
            name: &str,
            result: Result<ExtractedEntities, ProviderError>,
            delay: Option<Duration>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                result,
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ExtractionProvider for FakeProvider {
        async fn extract_entities(
            &self,
            _email_text: &str,
            _company_context: Option<&CompanyContext>,
            _email_id: Option<&str>,
        ) -> Result<ExtractedEntities, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone()
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    pub fn provider_map(providers: &[&Arc<FakeProvider>]) -> ProviderMap {
        providers
            .iter()
            .map(|p| {
                let provider: Arc<dyn ExtractionProvider> = Arc::clone(*p) as Arc<dyn ExtractionProvider>;
                (p.name().to_string(), provider)
            })
            .collect()
    }

    pub fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    pub fn health() -> Arc<HealthTracker> {
        Arc::new(HealthTracker::in_memory(Default::default()))
    }
}
