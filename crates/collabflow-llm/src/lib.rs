//! collabflow-llm - Multi-provider orchestration for collabflow.
//!
//! This crate routes entity extraction requests across several LLM
//! providers, guarding each one with a circuit breaker and learning which
//! providers produce the best results over time.
//!
//! # Strategies
//!
//! - **Failover** - try providers in priority order, first success wins
//! - **Best match** - call every provider, keep the highest weighted confidence
//! - **All providers** - call every provider concurrently, then select
//! - **Consensus** - call every provider concurrently, keep the highest priority
//!
//! # Example
//!
//! ```ignore
//! use collabflow_llm::{CollabConfig, Orchestrator, StrategyKind};
//!
//! let config = CollabConfig::from_env()?;
//! let orchestrator = Orchestrator::from_config(&config, providers);
//!
//! let result = orchestrator
//!     .extract_entities(email_text, Some("msg-42"), Some(StrategyKind::BestMatch), None)
//!     .await?;
//! println!("{} extracted {:?}", result.provider_name, result.entities.startup_name);
//! ```

pub mod cost;
pub mod health;
pub mod orchestrator;
pub mod quality;
pub mod strategies;

pub use cost::{CostLedger, ProviderCost};
pub use health::{CallPermit, CircuitState, HealthTracker, ProviderHealthMetrics};
pub use orchestrator::{ExtractionResult, Orchestrator, ProviderStatus};
pub use quality::{
    compute_quality_score, quality_score, ProviderComparison, ProviderQualitySummary,
    ProviderRanking, QualityRecord, QualityTracker,
};
pub use strategies::{
    calculate_aggregate_confidence, AllProvidersStrategy, BestMatchStrategy, ConsensusStrategy,
    ExtractionRequest, FailoverStrategy, ProviderResults, Strategy, StrategyOutcome,
};

// Re-export core types for convenience
pub use collabflow_core::{
    CollabConfig, CollabError, CollabResult, CompanyContext, ConfidenceScores, CostTracker,
    ExtractedEntities, ExtractionProvider, FieldWeights, HealthConfig, OrchestrationConfig,
    ProviderError, ProviderMap, QualityConfig, SelectionMode, StrategyKind,
};
