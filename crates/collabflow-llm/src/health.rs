//! Per-provider circuit breaker and response-time tracking.
//!
//! Circuit states:
//! - Closed: calls flow normally; consecutive failures are counted
//! - Open: calls are refused until the cooldown has elapsed
//! - HalfOpen: a limited number of probe calls decide whether to close again
//!
//! There is no background timer. An open circuit moves to half-open the next
//! time its health is queried after the cooldown.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

use collabflow_core::config::HEALTH_METRICS_FILE;
use collabflow_core::{HealthConfig, JsonDocument};

/// Longest error message kept per provider.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Circuit breaker state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Health counters for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealthMetrics {
    pub provider_name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    /// Exponentially weighted moving average of successful call latency.
    pub average_response_time_ms: f64,
    pub circuit_breaker_state: CircuitState,
    /// Successes recorded during the current half-open probation.
    #[serde(default)]
    pub half_open_successes: u32,
    /// Probe calls admitted during the current half-open probation.
    #[serde(default)]
    pub half_open_probes: u32,
    #[serde(default)]
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub open_timestamp: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

impl ProviderHealthMetrics {
    /// Fresh, closed metrics.
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            average_response_time_ms: 0.0,
            circuit_breaker_state: CircuitState::Closed,
            half_open_successes: 0,
            half_open_probes: 0,
            last_success_time: None,
            last_failure_time: None,
            open_timestamp: None,
            last_error_message: None,
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Fraction of calls that succeeded, 0 without calls.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_calls();
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>, config: &HealthConfig) -> bool {
        let Some(opened) = self.open_timestamp else {
            return true;
        };
        now.signed_duration_since(opened)
            .to_std()
            .map(|elapsed| elapsed >= config.circuit_breaker_timeout())
            .unwrap_or(false)
    }

    fn open(&mut self, now: DateTime<Utc>) {
        // Each probation is identified by a distinct opening time.
        let opened = match self.open_timestamp {
            Some(previous) if previous >= now => previous + chrono::Duration::nanoseconds(1),
            _ => now,
        };
        self.circuit_breaker_state = CircuitState::Open;
        self.open_timestamp = Some(opened);
        self.half_open_successes = 0;
        self.half_open_probes = 0;
    }

    fn close(&mut self) {
        self.circuit_breaker_state = CircuitState::Closed;
        self.open_timestamp = None;
        self.half_open_successes = 0;
        self.half_open_probes = 0;
    }
}

fn truncate_message(message: &str) -> String {
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

enum Admission {
    Refused,
    Admitted,
    /// Admitted as a half-open probe during the probation opened at `probation`.
    Probe { probation: Option<DateTime<Utc>> },
}

/// Permission to make one call, obtained from [`HealthTracker::admit`].
#[must_use = "a dropped permit records nothing"]
pub struct CallPermit {
    tracker: Arc<HealthTracker>,
    provider_name: String,
    holds_probe: bool,
    probation: Option<DateTime<Utc>>,
}

impl CallPermit {
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.holds_probe
    }

    pub fn record_success(mut self, response_time_ms: f64) {
        self.holds_probe = false;
        self.tracker.record_success(&self.provider_name, response_time_ms);
    }

    pub fn record_failure(mut self, message: &str) {
        self.holds_probe = false;
        self.tracker.record_failure(&self.provider_name, message);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.holds_probe {
            self.tracker.release_probe(&self.provider_name, self.probation);
        }
    }
}

/// Tracks provider health and guards calls with a circuit breaker.
///
/// All state lives behind one mutex; every mutation rewrites
/// `health_metrics.json` while the lock is held.
pub struct HealthTracker {
    config: HealthConfig,
    metrics: Mutex<BTreeMap<String, ProviderHealthMetrics>>,
    document: Option<JsonDocument>,
}

impl HealthTracker {
    /// Tracker without persistence.
    pub fn in_memory(config: HealthConfig) -> Self {
        Self {
            config: config.normalized(),
            metrics: Mutex::new(BTreeMap::new()),
            document: None,
        }
    }

    /// Tracker persisted to `dir/health_metrics.json`, loading existing state.
    ///
    /// An unreadable document is logged and replaced by empty state.
    pub fn open(dir: impl AsRef<Path>, config: HealthConfig) -> Self {
        let document = JsonDocument::new(dir, HEALTH_METRICS_FILE);
        let mut metrics = match document.load::<BTreeMap<String, ProviderHealthMetrics>>() {
            Ok(Some(metrics)) => {
                debug!("Loaded health metrics for {} providers", metrics.len());
                metrics
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(
                    "Failed to load health metrics from {}: {}",
                    document.path().display(),
                    e
                );
                BTreeMap::new()
            }
        };
        // Probes admitted by a previous process can no longer report back.
        for entry in metrics.values_mut() {
            if entry.circuit_breaker_state == CircuitState::HalfOpen && entry.half_open_probes > 0 {
                debug!("Releasing stale probe slots for {}", entry.provider_name);
                entry.half_open_probes = 0;
            }
        }

        Self {
            config: config.normalized(),
            metrics: Mutex::new(metrics),
            document: Some(document),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProviderHealthMetrics>> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, metrics: &BTreeMap<String, ProviderHealthMetrics>) {
        if let Some(document) = &self.document {
            if let Err(e) = document.store(metrics) {
                warn!(
                    "Failed to persist health metrics to {}: {}",
                    document.path().display(),
                    e
                );
            }
        }
    }

    /// Whether a call to `provider_name` may proceed.
    ///
    /// While half-open each `true` answer consumes one probe slot, held until
    /// an outcome is recorded. Prefer [`admit`](Self::admit) around calls that
    /// may be cancelled.
    pub fn is_healthy(&self, provider_name: &str) -> bool {
        !matches!(self.check(provider_name, true), Admission::Refused)
    }

    /// Same predicate as [`is_healthy`](Self::is_healthy) without consuming a probe slot.
    ///
    /// Unknown providers are available and are not added to the metrics.
    pub fn is_available(&self, provider_name: &str) -> bool {
        if !self.lock().contains_key(provider_name) {
            return true;
        }
        !matches!(self.check(provider_name, false), Admission::Refused)
    }

    /// Ask to call `provider_name`.
    ///
    /// The returned permit records the call's outcome. A permit dropped
    /// without an outcome, for example because the call was cancelled, hands
    /// its half-open probe slot back.
    pub fn admit(self: &Arc<Self>, provider_name: &str) -> Option<CallPermit> {
        let (holds_probe, probation) = match self.check(provider_name, true) {
            Admission::Refused => return None,
            Admission::Admitted => (false, None),
            Admission::Probe { probation } => (true, probation),
        };
        Some(CallPermit {
            tracker: Arc::clone(self),
            provider_name: provider_name.to_string(),
            holds_probe,
            probation,
        })
    }

    fn check(&self, provider_name: &str, admit_probe: bool) -> Admission {
        let mut metrics = self.lock();
        let now = Utc::now();
        let mut changed = !metrics.contains_key(provider_name);
        let entry = metrics
            .entry(provider_name.to_string())
            .or_insert_with(|| ProviderHealthMetrics::new(provider_name));

        if entry.circuit_breaker_state == CircuitState::Open
            && entry.cooldown_elapsed(now, &self.config)
        {
            entry.circuit_breaker_state = CircuitState::HalfOpen;
            entry.half_open_successes = 0;
            entry.half_open_probes = 0;
            changed = true;
            info!("Circuit for {} is half-open, admitting probe calls", provider_name);
        }

        let admission = match entry.circuit_breaker_state {
            CircuitState::Closed if entry.consecutive_failures < self.config.unhealthy_threshold => {
                Admission::Admitted
            }
            CircuitState::Closed | CircuitState::Open => Admission::Refused,
            CircuitState::HalfOpen if entry.half_open_probes < self.config.half_open_max_calls => {
                if admit_probe {
                    entry.half_open_probes += 1;
                    changed = true;
                }
                Admission::Probe {
                    probation: entry.open_timestamp,
                }
            }
            CircuitState::HalfOpen => Admission::Refused,
        };

        if changed {
            self.persist(&metrics);
        }
        admission
    }

    /// Return a probe slot whose call never reported an outcome.
    ///
    /// Ignored once the probation it was taken in has ended.
    fn release_probe(&self, provider_name: &str, probation: Option<DateTime<Utc>>) {
        let mut metrics = self.lock();
        let Some(entry) = metrics.get_mut(provider_name) else {
            return;
        };
        if entry.circuit_breaker_state != CircuitState::HalfOpen
            || entry.open_timestamp != probation
            || entry.half_open_probes == 0
        {
            return;
        }
        entry.half_open_probes -= 1;
        debug!("Probe call to {} abandoned, slot released", provider_name);
        self.persist(&metrics);
    }

    /// Record a successful call and its latency.
    pub fn record_success(&self, provider_name: &str, response_time_ms: f64) {
        let mut metrics = self.lock();
        let entry = metrics
            .entry(provider_name.to_string())
            .or_insert_with(|| ProviderHealthMetrics::new(provider_name));

        entry.success_count += 1;
        entry.consecutive_failures = 0;
        entry.last_success_time = Some(Utc::now());

        let sample = response_time_ms.max(0.0);
        if entry.success_count == 1 {
            entry.average_response_time_ms = sample;
        } else {
            let alpha = self.config.response_time_alpha;
            entry.average_response_time_ms =
                alpha * sample + (1.0 - alpha) * entry.average_response_time_ms;
        }

        if entry.circuit_breaker_state == CircuitState::HalfOpen {
            entry.half_open_successes += 1;
            if entry.half_open_successes >= self.config.half_open_success_threshold {
                entry.close();
                info!("Circuit for {} closed after successful probes", provider_name);
            }
        }

        debug!(
            "{} succeeded in {:.0}ms (avg {:.0}ms)",
            provider_name, sample, entry.average_response_time_ms
        );
        self.persist(&metrics);
    }

    /// Record a failed call.
    pub fn record_failure(&self, provider_name: &str, message: &str) {
        let mut metrics = self.lock();
        let now = Utc::now();
        let entry = metrics
            .entry(provider_name.to_string())
            .or_insert_with(|| ProviderHealthMetrics::new(provider_name));

        entry.failure_count += 1;
        entry.consecutive_failures += 1;
        entry.last_failure_time = Some(now);
        entry.last_error_message = Some(truncate_message(message));

        match entry.circuit_breaker_state {
            CircuitState::HalfOpen => {
                entry.open(now);
                warn!("Probe call to {} failed, circuit reopened", provider_name);
            }
            CircuitState::Closed
                if entry.consecutive_failures >= self.config.unhealthy_threshold =>
            {
                entry.open(now);
                warn!(
                    "Circuit for {} opened after {} consecutive failures",
                    provider_name, entry.consecutive_failures
                );
            }
            _ => {}
        }

        self.persist(&metrics);
    }

    /// Snapshot for one provider, if it was ever referenced.
    pub fn get_metrics(&self, provider_name: &str) -> Option<ProviderHealthMetrics> {
        self.lock().get(provider_name).cloned()
    }

    /// Snapshot of every provider.
    pub fn get_all_metrics(&self) -> BTreeMap<String, ProviderHealthMetrics> {
        self.lock().clone()
    }

    /// Historical success rate, 0 for unknown providers.
    pub fn success_rate(&self, provider_name: &str) -> f64 {
        self.lock()
            .get(provider_name)
            .map(ProviderHealthMetrics::success_rate)
            .unwrap_or(0.0)
    }

    /// Current state without triggering the lazy half-open transition.
    pub fn circuit_state(&self, provider_name: &str) -> CircuitState {
        self.lock()
            .get(provider_name)
            .map(|m| m.circuit_breaker_state)
            .unwrap_or_default()
    }

    /// Zero all counters for a provider and force the circuit closed.
    pub fn reset_metrics(&self, provider_name: &str) {
        let mut metrics = self.lock();
        metrics.insert(
            provider_name.to_string(),
            ProviderHealthMetrics::new(provider_name),
        );
        info!("Health metrics reset for {}", provider_name);
        self.persist(&metrics);
    }

    /// Reset every known provider.
    pub fn reset_all(&self) {
        let mut metrics = self.lock();
        for (name, entry) in metrics.iter_mut() {
            *entry = ProviderHealthMetrics::new(name.clone());
        }
        self.persist(&metrics);
    }
}
