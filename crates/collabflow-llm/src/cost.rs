//! In-memory cost ledger.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use collabflow_core::CostTracker;

/// Accumulated spend for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProviderCost {
    pub calls: u64,
    pub total_usd: f64,
}

impl ProviderCost {
    pub fn average_usd(&self) -> Option<f64> {
        (self.calls > 0).then(|| self.total_usd / self.calls as f64)
    }
}

/// Records the USD cost of each provider call.
#[derive(Debug, Default)]
pub struct CostLedger {
    costs: Mutex<BTreeMap<String, ProviderCost>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the cost of one call. Negative or non-finite amounts are ignored.
    pub fn record_cost(&self, provider_name: &str, cost_usd: f64) {
        if !cost_usd.is_finite() || cost_usd < 0.0 {
            return;
        }
        let mut costs = self.costs.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = costs.entry(provider_name.to_string()).or_default();
        entry.calls += 1;
        entry.total_usd += cost_usd;
    }

    pub fn get(&self, provider_name: &str) -> Option<ProviderCost> {
        self.costs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider_name)
            .copied()
    }

    pub fn total_usd(&self) -> f64 {
        self.costs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|c| c.total_usd)
            .sum()
    }
}

impl CostTracker for CostLedger {
    fn average_cost_per_extraction(&self, provider_name: &str) -> Option<f64> {
        self.get(provider_name).and_then(|c| c.average_usd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_cost() {
        let ledger = CostLedger::new();
        assert_eq!(ledger.average_cost_per_extraction("claude"), None);

        ledger.record_cost("claude", 0.02);
        ledger.record_cost("claude", 0.04);
        ledger.record_cost("claude", -1.0);
        ledger.record_cost("gemini", 0.001);

        let avg = ledger.average_cost_per_extraction("claude").unwrap();
        assert!((avg - 0.03).abs() < 1e-12);
        assert_eq!(ledger.get("claude").unwrap().calls, 2);
        assert!((ledger.total_usd() - 0.061).abs() < 1e-12);
    }
}
