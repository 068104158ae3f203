//! Per-provider extraction quality tracking.
//!
//! Each provider keeps lifetime counters plus a bounded window of recent
//! extraction records. Averages are computed over the window only, so memory
//! and the size of `quality_metrics.json` stay proportional to the window no
//! matter how many extractions have been recorded.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use collabflow_core::config::QUALITY_METRICS_FILE;
use collabflow_core::{CostTracker, ExtractedEntities, JsonDocument, QualityConfig};

/// Weight of average confidence in the quality score.
pub const CONFIDENCE_WEIGHT: f64 = 0.4;
/// Weight of field completeness in the quality score.
pub const COMPLETENESS_WEIGHT: f64 = 0.3;
/// Weight of validation success in the quality score.
pub const VALIDATION_WEIGHT: f64 = 0.3;

/// One recorded extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    /// Mean of the five field confidences.
    pub overall_confidence: f64,
    /// Percentage of tracked fields present.
    pub field_completeness: f64,
    pub fields_extracted: usize,
    pub validation_passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
}

impl QualityRecord {
    fn from_entities(
        entities: &ExtractedEntities,
        validation_passed: bool,
        failure_reasons: &[String],
    ) -> Self {
        Self {
            recorded_at: Utc::now(),
            email_id: entities.email_id.clone(),
            overall_confidence: entities.confidence.mean(),
            field_completeness: entities.completeness(),
            fields_extracted: entities.fields_extracted(),
            validation_passed,
            failure_reasons: failure_reasons.to_vec(),
        }
    }
}

/// Rolling quality statistics for one provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderQualitySummary {
    pub provider_name: String,
    /// Lifetime number of recorded extractions.
    pub total_extractions: u64,
    pub successful_validations: u64,
    pub failed_validations: u64,
    /// Percentage (0-100) of extractions that passed validation.
    pub validation_success_rate: f64,
    /// Mean overall confidence over the window (0-1).
    pub average_overall_confidence: f64,
    /// Population standard deviation of overall confidence over the window.
    pub confidence_std_deviation: f64,
    /// Mean completeness over the window (0-100).
    pub average_field_completeness: f64,
    pub average_fields_extracted: f64,
    pub quality_score: f64,
    /// Failure reason counts over the window.
    #[serde(default)]
    pub common_failure_reasons: BTreeMap<String, u64>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ProviderQualitySummary {
    fn new(provider_name: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            ..Default::default()
        }
    }

    pub fn has_data(&self) -> bool {
        self.total_extractions > 0
    }
}

/// Blend confidence (0-1), completeness (0-100) and validation rate (0-100).
pub fn quality_score(avg_confidence: f64, completeness_pct: f64, validation_rate_pct: f64) -> f64 {
    let score = CONFIDENCE_WEIGHT * avg_confidence
        + COMPLETENESS_WEIGHT * (completeness_pct / 100.0)
        + VALIDATION_WEIGHT * (validation_rate_pct / 100.0);
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Quality score of a summary. Pure function of three summary fields.
pub fn compute_quality_score(summary: &ProviderQualitySummary) -> f64 {
    quality_score(
        summary.average_overall_confidence,
        summary.average_field_completeness,
        summary.validation_success_rate,
    )
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProviderQualityState {
    summary: ProviderQualitySummary,
    #[serde(default)]
    recent: VecDeque<QualityRecord>,
}

impl ProviderQualityState {
    fn new(provider_name: &str) -> Self {
        Self {
            summary: ProviderQualitySummary::new(provider_name),
            recent: VecDeque::new(),
        }
    }

    fn trim(&mut self, window: usize) {
        while self.recent.len() > window {
            self.recent.pop_front();
        }
    }

    fn refresh(&mut self) {
        let summary = &mut self.summary;
        summary.validation_success_rate = if summary.total_extractions == 0 {
            0.0
        } else {
            summary.successful_validations as f64 / summary.total_extractions as f64 * 100.0
        };

        let n = self.recent.len();
        if n == 0 {
            summary.average_overall_confidence = 0.0;
            summary.confidence_std_deviation = 0.0;
            summary.average_field_completeness = 0.0;
            summary.average_fields_extracted = 0.0;
            summary.common_failure_reasons.clear();
        } else {
            let count = n as f64;
            let mean = self.recent.iter().map(|r| r.overall_confidence).sum::<f64>() / count;
            let variance = self
                .recent
                .iter()
                .map(|r| (r.overall_confidence - mean).powi(2))
                .sum::<f64>()
                / count;

            summary.average_overall_confidence = mean;
            summary.confidence_std_deviation = variance.sqrt();
            summary.average_field_completeness =
                self.recent.iter().map(|r| r.field_completeness).sum::<f64>() / count;
            summary.average_fields_extracted =
                self.recent.iter().map(|r| r.fields_extracted as f64).sum::<f64>() / count;

            let mut reasons = BTreeMap::new();
            for reason in self.recent.iter().flat_map(|r| r.failure_reasons.iter()) {
                *reasons.entry(reason.clone()).or_insert(0) += 1;
            }
            summary.common_failure_reasons = reasons;
        }

        summary.quality_score = compute_quality_score(summary);
    }
}

/// Position of one provider in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderRanking {
    pub provider_name: String,
    pub quality_score: f64,
    pub total_extractions: u64,
    /// Average USD cost per extraction, when known and positive.
    pub average_cost_usd: Option<f64>,
    /// Quality score per USD.
    pub quality_per_cost: Option<f64>,
}

/// Providers ranked by quality and by value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderComparison {
    /// Every provider with data, best quality first.
    pub by_quality: Vec<ProviderRanking>,
    /// Providers with cost data, best quality-per-cost first.
    pub by_value: Vec<ProviderRanking>,
    pub best_quality: Option<String>,
    pub best_value: Option<String>,
    pub recommended: Option<String>,
    pub rationale: String,
}

fn by_score_then_name(a: (f64, &str), b: (f64, &str)) -> std::cmp::Ordering {
    OrderedFloat(b.0)
        .cmp(&OrderedFloat(a.0))
        .then_with(|| a.1.cmp(b.1))
}

/// Tracks extraction quality per provider and ranks providers.
pub struct QualityTracker {
    config: QualityConfig,
    state: Mutex<BTreeMap<String, ProviderQualityState>>,
    document: Option<JsonDocument>,
}

impl QualityTracker {
    /// Tracker without persistence.
    pub fn in_memory(config: QualityConfig) -> Self {
        let window = config.evaluation_window;
        Self {
            config: config.with_window(window),
            state: Mutex::new(BTreeMap::new()),
            document: None,
        }
    }

    /// Tracker persisted to `dir/quality_metrics.json`, loading existing state.
    pub fn open(dir: impl AsRef<Path>, config: QualityConfig) -> Self {
        let window = config.evaluation_window;
        let config = config.with_window(window);
        let document = JsonDocument::new(dir, QUALITY_METRICS_FILE);
        let mut state = match document.load::<BTreeMap<String, ProviderQualityState>>() {
            Ok(Some(state)) => state,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(
                    "Failed to load quality metrics from {}: {}",
                    document.path().display(),
                    e
                );
                BTreeMap::new()
            }
        };
        for provider in state.values_mut() {
            provider.trim(config.evaluation_window);
            provider.refresh();
        }

        Self {
            config,
            state: Mutex::new(state),
            document: Some(document),
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProviderQualityState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &BTreeMap<String, ProviderQualityState>) {
        if let Some(document) = &self.document {
            if let Err(e) = document.store(state) {
                warn!(
                    "Failed to persist quality metrics to {}: {}",
                    document.path().display(),
                    e
                );
            }
        }
    }

    /// Record one extraction and return the provider's updated summary.
    pub fn record_extraction(
        &self,
        provider_name: &str,
        entities: &ExtractedEntities,
        validation_passed: bool,
        failure_reasons: &[String],
    ) -> ProviderQualitySummary {
        let mut state = self.lock();
        let provider = state
            .entry(provider_name.to_string())
            .or_insert_with(|| ProviderQualityState::new(provider_name));

        provider.summary.total_extractions += 1;
        if validation_passed {
            provider.summary.successful_validations += 1;
        } else {
            provider.summary.failed_validations += 1;
        }
        provider.summary.last_updated = Some(Utc::now());
        provider
            .recent
            .push_back(QualityRecord::from_entities(entities, validation_passed, failure_reasons));
        provider.trim(self.config.evaluation_window);
        provider.refresh();

        let summary = provider.summary.clone();
        debug!(
            "Quality for {}: score {:.3} over {} extractions",
            provider_name, summary.quality_score, summary.total_extractions
        );
        self.persist(&state);
        summary
    }

    pub fn get_summary(&self, provider_name: &str) -> Option<ProviderQualitySummary> {
        self.lock().get(provider_name).map(|p| p.summary.clone())
    }

    pub fn get_all_summaries(&self) -> BTreeMap<String, ProviderQualitySummary> {
        self.lock()
            .iter()
            .map(|(name, p)| (name.clone(), p.summary.clone()))
            .collect()
    }

    /// Records currently held in a provider's window.
    pub fn recent_records(&self, provider_name: &str) -> Vec<QualityRecord> {
        self.lock()
            .get(provider_name)
            .map(|p| p.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether at least one extraction was recorded for the provider.
    pub fn has_data(&self, provider_name: &str) -> bool {
        self.lock()
            .get(provider_name)
            .is_some_and(|p| p.summary.has_data())
    }

    /// Quality score, or `None` without data.
    pub fn quality_score(&self, provider_name: &str) -> Option<f64> {
        self.lock()
            .get(provider_name)
            .filter(|p| p.summary.has_data())
            .map(|p| p.summary.quality_score)
    }

    /// Candidates with data, best quality first, ties in name order.
    pub fn rank_providers(&self, candidates: &[String]) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = candidates
            .iter()
            .filter_map(|name| self.quality_score(name).map(|score| (name.clone(), score)))
            .collect();
        ranked.sort_by(|a, b| by_score_then_name((a.1, &a.0), (b.1, &b.0)));
        ranked.dedup_by(|a, b| a.0 == b.0);
        ranked
    }

    /// Highest-quality candidate with data, or `None` if none has data.
    pub fn select_provider_by_quality(&self, candidates: &[String]) -> Option<String> {
        self.rank_providers(candidates)
            .into_iter()
            .next()
            .map(|(name, _)| name)
    }

    /// Rank every provider with data by quality and by quality per cost.
    ///
    /// The best value provider is recommended unless its quality falls below
    /// the configured floor; then the best quality provider is recommended.
    pub fn compare_providers(&self, cost_tracker: &dyn CostTracker) -> ProviderComparison {
        let summaries = self.get_all_summaries();
        let mut by_quality: Vec<ProviderRanking> = summaries
            .values()
            .filter(|s| s.has_data())
            .map(|s| {
                let cost = cost_tracker
                    .average_cost_per_extraction(&s.provider_name)
                    .filter(|c| c.is_finite() && *c > 0.0);
                ProviderRanking {
                    provider_name: s.provider_name.clone(),
                    quality_score: s.quality_score,
                    total_extractions: s.total_extractions,
                    average_cost_usd: cost,
                    quality_per_cost: cost.map(|c| s.quality_score / c),
                }
            })
            .collect();
        by_quality.sort_by(|a, b| {
            by_score_then_name(
                (a.quality_score, &a.provider_name),
                (b.quality_score, &b.provider_name),
            )
        });

        let mut by_value: Vec<ProviderRanking> = by_quality
            .iter()
            .filter(|r| r.quality_per_cost.is_some())
            .cloned()
            .collect();
        by_value.sort_by(|a, b| {
            by_score_then_name(
                (a.quality_per_cost.unwrap_or(0.0), &a.provider_name),
                (b.quality_per_cost.unwrap_or(0.0), &b.provider_name),
            )
        });

        let best_quality = by_quality.first().map(|r| r.provider_name.clone());
        let best_value = by_value.first().map(|r| r.provider_name.clone());
        let floor = self.config.acceptable_quality_floor;

        let (recommended, rationale) = match (by_value.first(), by_quality.first()) {
            (Some(value), _) if value.quality_score >= floor => (
                Some(value.provider_name.clone()),
                format!(
                    "{} offers the best quality per dollar with quality {:.2}",
                    value.provider_name, value.quality_score
                ),
            ),
            (Some(value), Some(quality)) => (
                Some(quality.provider_name.clone()),
                format!(
                    "{} is the best value but its quality {:.2} is below {:.2}; {} has the best quality",
                    value.provider_name, value.quality_score, floor, quality.provider_name
                ),
            ),
            (None, Some(quality)) => (
                Some(quality.provider_name.clone()),
                format!(
                    "No cost data; {} has the best quality ({:.2})",
                    quality.provider_name, quality.quality_score
                ),
            ),
            _ => (None, "No quality data recorded yet".to_string()),
        };

        ProviderComparison {
            by_quality,
            by_value,
            best_quality,
            best_value,
            recommended,
            rationale,
        }
    }

    /// Forget everything recorded for a provider.
    pub fn reset_provider(&self, provider_name: &str) {
        let mut state = self.lock();
        if state.remove(provider_name).is_some() {
            self.persist(&state);
        }
    }
}
