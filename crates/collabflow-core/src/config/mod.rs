//! Configuration system for collabflow.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumString};

use crate::error::{CollabError, CollabResult};
use crate::types::FieldWeights;

/// File name of the persisted health metrics document.
pub const HEALTH_METRICS_FILE: &str = "health_metrics.json";
/// File name of the persisted quality metrics document.
pub const QUALITY_METRICS_FILE: &str = "quality_metrics.json";

/// Strategy used to pick providers for one extraction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StrategyKind {
    /// Try providers one at a time; first success wins.
    #[default]
    Failover,
    /// Call every provider and keep the highest weighted confidence.
    BestMatch,
    /// Call every provider concurrently, then select.
    AllProviders,
    /// Call every provider concurrently and keep the highest-priority success.
    Consensus,
}

/// How the all-providers strategy picks a winner once every call finished.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SelectionMode {
    /// Highest unweighted mean confidence.
    #[default]
    HighestConfidence,
    /// Highest historical quality score.
    QualityBased,
    /// Reserved; currently behaves like `HighestConfidence`.
    Consensus,
}

/// Orchestration settings supplied by the assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    /// Strategy used when a call does not name one.
    pub default_strategy: StrategyKind,
    /// Provider names, most preferred first.
    pub provider_priority: Vec<String>,
    /// Reorder failover attempts by historical quality.
    pub enable_quality_routing: bool,
    /// Selection mode for the all-providers strategy.
    pub all_providers_selection: SelectionMode,
    /// Field weights for the best-match strategy.
    pub best_match_weights: FieldWeights,
    /// Deadline for a single provider call. `None` leaves deadlines to providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::Failover,
            provider_priority: vec![
                "gemini".to_string(),
                "claude".to_string(),
                "openai".to_string(),
            ],
            enable_quality_routing: false,
            all_providers_selection: SelectionMode::HighestConfidence,
            best_match_weights: FieldWeights::default(),
            call_timeout_ms: None,
        }
    }
}

impl OrchestrationConfig {
    /// Per-call deadline.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

/// Circuit breaker and response-time settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive failures that open the circuit (default: 3).
    pub unhealthy_threshold: u32,
    /// Cooldown before an open circuit admits probes (default: 300).
    pub circuit_breaker_timeout_secs: u64,
    /// Consecutive half-open successes that close the circuit (default: 1).
    pub half_open_success_threshold: u32,
    /// Probe calls admitted while half-open (default: 1).
    pub half_open_max_calls: u32,
    /// EWMA smoothing factor for response times (default: 0.2).
    pub response_time_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            circuit_breaker_timeout_secs: 300,
            half_open_success_threshold: 1,
            half_open_max_calls: 1,
            response_time_alpha: 0.2,
        }
    }
}

impl HealthConfig {
    /// Create a config with custom threshold and cooldown.
    pub fn new(unhealthy_threshold: u32, circuit_breaker_timeout_secs: u64) -> Self {
        Self {
            unhealthy_threshold,
            circuit_breaker_timeout_secs,
            ..Default::default()
        }
        .normalized()
    }

    /// Builder: set the half-open recovery parameters.
    pub fn with_half_open(mut self, success_threshold: u32, max_calls: u32) -> Self {
        self.half_open_success_threshold = success_threshold;
        self.half_open_max_calls = max_calls;
        self.normalized()
    }

    /// Clamp values into a usable range.
    ///
    /// The probe budget never drops below the success threshold, otherwise a
    /// half-open circuit could never close.
    pub fn normalized(mut self) -> Self {
        self.unhealthy_threshold = self.unhealthy_threshold.max(1);
        self.half_open_success_threshold = self.half_open_success_threshold.max(1);
        self.half_open_max_calls = self
            .half_open_max_calls
            .max(self.half_open_success_threshold);
        if !(self.response_time_alpha > 0.0 && self.response_time_alpha <= 1.0) {
            self.response_time_alpha = 0.2;
        }
        self
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_timeout_secs)
    }
}

/// Quality tracking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Records kept per provider for rolling statistics (default: 100).
    pub evaluation_window: usize,
    /// Minimum quality score for a value recommendation (default: 0.7).
    pub acceptable_quality_floor: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            evaluation_window: 100,
            acceptable_quality_floor: 0.7,
        }
    }
}

impl QualityConfig {
    pub fn with_window(mut self, window: usize) -> Self {
        self.evaluation_window = window.max(1);
        self
    }
}

/// Main collabflow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollabConfig {
    /// Strategy and provider settings.
    pub orchestration: OrchestrationConfig,
    /// Circuit breaker settings.
    pub health: HealthConfig,
    /// Quality tracking settings.
    pub quality: QualityConfig,
    /// Directory holding the metrics documents.
    pub data_dir: PathBuf,
}

impl Default for CollabConfig {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".collabflow"))
            .unwrap_or_else(|| PathBuf::from(".collabflow"));

        Self {
            orchestration: OrchestrationConfig::default(),
            health: HealthConfig::default(),
            quality: QualityConfig::default(),
            data_dir,
        }
    }
}

impl CollabConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> CollabResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| CollabError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| CollabError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| CollabError::Configuration(e.to_string()))?,
            _ => {
                return Err(CollabError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };
        config.validated()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> CollabResult<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("COLLABFLOW_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(strategy) = std::env::var("COLLABFLOW_DEFAULT_STRATEGY") {
            config.orchestration.default_strategy = StrategyKind::from_str(strategy.trim())
                .map_err(|_| {
                    CollabError::Configuration(format!("Unknown strategy '{}'", strategy))
                })?;
        }
        if let Ok(priority) = std::env::var("COLLABFLOW_PROVIDER_PRIORITY") {
            config.orchestration.provider_priority = priority
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Ok(flag) = std::env::var("COLLABFLOW_QUALITY_ROUTING") {
            config.orchestration.enable_quality_routing =
                matches!(flag.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(ms) = std::env::var("COLLABFLOW_CALL_TIMEOUT_MS") {
            config.orchestration.call_timeout_ms = Some(parse_env("COLLABFLOW_CALL_TIMEOUT_MS", &ms)?);
        }
        if let Ok(n) = std::env::var("COLLABFLOW_UNHEALTHY_THRESHOLD") {
            config.health.unhealthy_threshold = parse_env("COLLABFLOW_UNHEALTHY_THRESHOLD", &n)?;
        }
        if let Ok(secs) = std::env::var("COLLABFLOW_CIRCUIT_TIMEOUT_SECS") {
            config.health.circuit_breaker_timeout_secs =
                parse_env("COLLABFLOW_CIRCUIT_TIMEOUT_SECS", &secs)?;
        }

        config.validated()
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> CollabConfigBuilder {
        CollabConfigBuilder::default()
    }

    /// Check cross-field constraints and normalise tunables.
    pub fn validated(mut self) -> CollabResult<Self> {
        self.orchestration.best_match_weights.validate()?;
        if self.quality.evaluation_window == 0 {
            return Err(CollabError::Configuration(
                "quality.evaluation_window must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.quality.acceptable_quality_floor) {
            return Err(CollabError::Configuration(
                "quality.acceptable_quality_floor must be within 0.0-1.0".to_string(),
            ));
        }
        self.health = self.health.normalized();
        Ok(self)
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> CollabResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CollabError::Configuration(format!("{} has invalid value '{}'", name, value)))
}

/// Builder for CollabConfig.
#[derive(Default)]
pub struct CollabConfigBuilder {
    config: CollabConfig,
}

impl CollabConfigBuilder {
    /// Set orchestration configuration.
    pub fn orchestration(mut self, config: OrchestrationConfig) -> Self {
        self.config.orchestration = config;
        self
    }

    /// Set health configuration.
    pub fn health(mut self, config: HealthConfig) -> Self {
        self.config.health = config;
        self
    }

    /// Set quality configuration.
    pub fn quality(mut self, config: QualityConfig) -> Self {
        self.config.quality = config;
        self
    }

    /// Set the metrics directory.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> CollabResult<CollabConfig> {
        self.config.validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_kind_names() {
        assert_eq!(StrategyKind::BestMatch.to_string(), "best_match");
        assert_eq!(
            StrategyKind::from_str("all_providers").unwrap(),
            StrategyKind::AllProviders
        );
        assert!(StrategyKind::from_str("round_robin").is_err());
        assert_eq!(
            SelectionMode::from_str("quality_based").unwrap(),
            SelectionMode::QualityBased
        );
    }

    #[test]
    fn test_health_config_normalization() {
        let config = HealthConfig::default().with_half_open(3, 1);
        assert_eq!(config.half_open_success_threshold, 3);
        assert_eq!(config.half_open_max_calls, 3);

        let config = HealthConfig::new(0, 10);
        assert_eq!(config.unhealthy_threshold, 1);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collabflow.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/collabflow"

[orchestration]
default_strategy = "best_match"
provider_priority = ["claude", "openai"]
enable_quality_routing = true
call_timeout_ms = 20000

[health]
unhealthy_threshold = 5
"#,
        )
        .unwrap();

        let config = CollabConfig::from_file(&path).unwrap();
        assert_eq!(config.orchestration.default_strategy, StrategyKind::BestMatch);
        assert_eq!(config.orchestration.provider_priority, vec!["claude", "openai"]);
        assert!(config.orchestration.enable_quality_routing);
        assert_eq!(
            config.orchestration.call_timeout(),
            Some(Duration::from_secs(20))
        );
        assert_eq!(config.health.unhealthy_threshold, 5);
        assert_eq!(config.health.circuit_breaker_timeout_secs, 300);
        assert_eq!(config.quality.evaluation_window, 100);
    }

    #[test]
    fn test_from_file_rejects_negative_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collabflow.json");
        std::fs::write(
            &path,
            r#"{"orchestration": {"best_match_weights": {"person": -1.0, "startup": 1.0, "partner": 1.0, "details": 1.0, "date": 1.0}}}"#,
        )
        .unwrap();

        assert!(matches!(
            CollabConfig::from_file(&path),
            Err(CollabError::Configuration(_))
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collabflow.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(CollabConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_builder() {
        let config = CollabConfig::builder()
            .data_dir("/tmp/metrics")
            .quality(QualityConfig::default().with_window(10))
            .build()
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/metrics"));
        assert_eq!(config.quality.evaluation_window, 10);
    }
}
