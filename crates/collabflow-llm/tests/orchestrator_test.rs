//! End-to-end orchestration tests over scripted providers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use collabflow_llm::{
    CircuitState, CollabError, CompanyContext, ConfidenceScores, CostLedger, ExtractedEntities,
    ExtractionProvider, HealthConfig, HealthTracker, OrchestrationConfig, Orchestrator,
    ProviderError, ProviderMap, QualityConfig, QualityTracker, SelectionMode, StrategyKind,
};

/// Provider replaying a queue of scripted responses, then repeating the last.
struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<ExtractedEntities, ProviderError>>>,
    last: Mutex<Option<Result<ExtractedEntities, ProviderError>>>,
    seen_context: Mutex<Option<CompanyContext>>,
}

impl ScriptedProvider {
    fn new(name: &str, script: Vec<Result<ExtractedEntities, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            seen_context: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ExtractionProvider for ScriptedProvider {
    async fn extract_entities(
        &self,
        _email_text: &str,
        company_context: Option<&CompanyContext>,
        _email_id: Option<&str>,
    ) -> Result<ExtractedEntities, ProviderError> {
        *self.seen_context.lock().unwrap() = company_context.cloned();
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone()
            .unwrap_or_else(|| Err(ProviderError::request("no scripted response")))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Fails once, hangs on the second call, then answers promptly.
struct StallingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl ExtractionProvider for StallingProvider {
    async fn extract_entities(
        &self,
        _email_text: &str,
        _company_context: Option<&CompanyContext>,
        _email_id: Option<&str>,
    ) -> Result<ExtractedEntities, ProviderError> {
        match self.calls.fetch_add(1, Ordering::SeqCst) {
            0 => Err(ProviderError::request("503")),
            1 => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(entities(0.8))
            }
            _ => Ok(entities(0.8)),
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn entities(confidence: f64) -> ExtractedEntities {
    ExtractedEntities::new(ConfidenceScores::uniform(confidence).unwrap())
        .with_person("Jane Doe")
        .with_startup("Acme Robotics")
        .with_partner("Globex")
        .with_details("Pilot of warehouse automation")
        .with_date("2024-05-01")
}

fn providers(list: &[&Arc<ScriptedProvider>]) -> ProviderMap {
    list.iter()
        .map(|p| {
            let provider: Arc<dyn ExtractionProvider> = Arc::clone(*p) as Arc<dyn ExtractionProvider>;
            (p.name.clone(), provider)
        })
        .collect()
}

fn orchestrator(config: OrchestrationConfig, providers: ProviderMap) -> Orchestrator {
    Orchestrator::new(
        config,
        providers,
        Arc::new(HealthTracker::in_memory(HealthConfig::default())),
        Arc::new(QualityTracker::in_memory(QualityConfig::default())),
    )
}

#[tokio::test]
async fn test_failover_opens_circuit_and_routes_around_it() {
    let gemini = ScriptedProvider::new("gemini", vec![Err(ProviderError::request("503"))]);
    let claude = ScriptedProvider::new("claude", vec![Ok(entities(0.9))]);
    let orch = orchestrator(
        OrchestrationConfig::default(),
        providers(&[&gemini, &claude]),
    );

    for _ in 0..3 {
        let result = orch.extract_entities("email", None, None, None).await.unwrap();
        assert_eq!(result.provider_name, "claude");
    }
    assert_eq!(orch.health().circuit_state("gemini"), CircuitState::Open);

    // The open circuit is skipped rather than called.
    let result = orch.extract_entities("email", None, None, None).await.unwrap();
    assert_eq!(
        result.results.skipped.get("gemini"),
        Some(&ProviderError::CircuitOpen)
    );
    assert_eq!(orch.health().get_metrics("gemini").unwrap().failure_count, 3);
    assert_eq!(orch.get_available_providers(), vec!["claude".to_string()]);
}

#[tokio::test]
async fn test_circuit_recovers_through_half_open_probe() {
    let gemini = ScriptedProvider::new(
        "gemini",
        vec![
            Err(ProviderError::request("503")),
            Err(ProviderError::request("503")),
            Ok(entities(0.8)),
        ],
    );
    let health = Arc::new(HealthTracker::in_memory(HealthConfig::new(2, 0)));
    let orch = Orchestrator::new(
        OrchestrationConfig::default(),
        providers(&[&gemini]),
        Arc::clone(&health),
        Arc::new(QualityTracker::in_memory(QualityConfig::default())),
    );

    for _ in 0..2 {
        assert!(orch.extract_entities("email", None, None, None).await.is_err());
    }
    assert_eq!(health.circuit_state("gemini"), CircuitState::Open);

    // Zero cooldown: the next request is admitted as a probe and closes it.
    let result = orch.extract_entities("email", None, None, None).await.unwrap();
    assert_eq!(result.provider_name, "gemini");
    assert_eq!(health.circuit_state("gemini"), CircuitState::Closed);
    assert_eq!(health.get_metrics("gemini").unwrap().consecutive_failures, 0);
}

#[tokio::test]
async fn test_all_failed_reports_every_provider() {
    let gemini = ScriptedProvider::new("gemini", vec![Err(ProviderError::request("503"))]);
    let claude = ScriptedProvider::new(
        "claude",
        vec![Err(ProviderError::Authentication("bad key".to_string()))],
    );
    let orch = orchestrator(
        OrchestrationConfig::default(),
        providers(&[&gemini, &claude]),
    );

    let err = orch
        .extract_entities("email", Some("msg-9"), Some(StrategyKind::BestMatch), None)
        .await
        .unwrap_err();

    match &err {
        CollabError::AllProvidersFailed { errors } => {
            assert_eq!(errors.len(), 3);
            assert_eq!(errors["openai"], ProviderError::NotConfigured);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("claude"));
    assert!(err.suggestion().is_some());
}

#[tokio::test]
async fn test_company_context_reaches_providers() {
    let claude = ScriptedProvider::new("claude", vec![Ok(entities(0.9))]);
    let orch = orchestrator(OrchestrationConfig::default(), providers(&[&claude]));
    let context = CompanyContext::new(vec!["Acme Robotics".to_string()], vec!["Globex".to_string()]);

    orch.extract_entities("email", None, Some(StrategyKind::Consensus), Some(context.clone()))
        .await
        .unwrap();

    assert_eq!(claude.seen_context.lock().unwrap().as_ref(), Some(&context));
}

#[tokio::test]
async fn test_quality_routing_learns_better_provider() {
    let sparse = ExtractedEntities::new(ConfidenceScores::uniform(0.95).unwrap());
    let gemini = ScriptedProvider::new("gemini", vec![Ok(sparse)]);
    let claude = ScriptedProvider::new("claude", vec![Ok(entities(0.85))]);
    let config = OrchestrationConfig {
        enable_quality_routing: true,
        all_providers_selection: SelectionMode::QualityBased,
        ..OrchestrationConfig::default()
    };
    let orch = orchestrator(config, providers(&[&gemini, &claude]));

    // Seed history for both providers.
    let first = orch
        .extract_entities("email", None, Some(StrategyKind::AllProviders), None)
        .await
        .unwrap();
    assert_eq!(first.provider_name, "gemini");

    // Failed validation drags gemini below claude.
    let second = orch.extract_entities("email", None, None, None).await.unwrap();
    assert_eq!(second.provider_name, "claude");

    let ledger = CostLedger::new();
    ledger.record_cost("gemini", 0.001);
    ledger.record_cost("claude", 0.01);
    let comparison = orch.compare_providers(&ledger);
    assert_eq!(comparison.best_quality.as_deref(), Some("claude"));
    assert_eq!(comparison.by_quality.len(), 2);
}

#[tokio::test]
async fn test_cancelled_probe_does_not_lock_provider_out() {
    let gemini = Arc::new(StallingProvider {
        calls: AtomicUsize::new(0),
    });
    let mut map = ProviderMap::new();
    map.insert("gemini".to_string(), gemini.clone() as Arc<dyn ExtractionProvider>);
    let health = Arc::new(HealthTracker::in_memory(HealthConfig::new(1, 0)));
    let orch = Orchestrator::new(
        OrchestrationConfig::default(),
        map,
        Arc::clone(&health),
        Arc::new(QualityTracker::in_memory(QualityConfig::default())),
    );

    assert!(orch.extract_entities("email", None, None, None).await.is_err());
    assert_eq!(health.circuit_state("gemini"), CircuitState::Open);

    // The caller gives up while the half-open probe is still in flight.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        orch.extract_entities("email", None, None, None),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(health.circuit_state("gemini"), CircuitState::HalfOpen);
    assert_eq!(health.get_metrics("gemini").unwrap().half_open_probes, 0);
    assert_eq!(orch.get_available_providers(), vec!["gemini".to_string()]);

    let result = orch.extract_entities("email", None, None, None).await.unwrap();
    assert_eq!(result.provider_name, "gemini");
    assert_eq!(health.circuit_state("gemini"), CircuitState::Closed);
    assert_eq!(gemini.calls.load(Ordering::SeqCst), 3);
}
