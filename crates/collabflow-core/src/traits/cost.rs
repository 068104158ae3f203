//! Cost lookup used when comparing providers.

/// Source of per-provider cost figures.
pub trait CostTracker: Send + Sync {
    /// Average USD cost of one extraction, or `None` without data.
    fn average_cost_per_extraction(&self, provider_name: &str) -> Option<f64>;
}
