//! Metrics collection for observability

use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Encoder, Histogram, Opts, Registry,
    TextEncoder,
};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Completion metrics
    pub completions: CounterVec,
    pub completion_duration: Histogram,
    pub snapshots_emitted: Counter,
    pub rate_limited: Counter,

    // Token budget metrics
    pub prompt_tokens: Histogram,
    pub budget_rejections: Counter,

    // History metrics
    pub turns_committed: Counter,
    pub regenerations: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let completions = register_counter_vec_with_registry!(
            Opts::new("dialogue_completions_total", "Total streamed completions by outcome"),
            &["outcome"],
            registry
        )?;

        let completion_duration = register_histogram_with_registry!(
            "dialogue_completion_duration_seconds",
            "Streamed completion duration in seconds",
            registry
        )?;

        let snapshots_emitted = register_counter_with_registry!(
            Opts::new("dialogue_snapshots_emitted_total", "Total text snapshots released to consumers"),
            registry
        )?;

        let rate_limited = register_counter_with_registry!(
            Opts::new("dialogue_rate_limited_total", "Total completions degraded by provider rate limits"),
            registry
        )?;

        let prompt_tokens = register_histogram_with_registry!(
            "dialogue_prompt_tokens",
            "Tokens consumed by request messages",
            vec![64.0, 256.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0, 32768.0],
            registry
        )?;

        let budget_rejections = register_counter_with_registry!(
            Opts::new("dialogue_budget_rejections_total", "Total requests rejected by the token budget"),
            registry
        )?;

        let turns_committed = register_counter_with_registry!(
            Opts::new("dialogue_turns_committed_total", "Total user/assistant pairs committed to history"),
            registry
        )?;

        let regenerations = register_counter_vec_with_registry!(
            Opts::new("dialogue_regenerations_total", "Total regeneration requests by result"),
            &["result"],
            registry
        )?;

        Ok(Self {
            registry,
            completions,
            completion_duration,
            snapshots_emitted,
            rate_limited,
            prompt_tokens,
            budget_rejections,
            turns_committed,
            regenerations,
        })
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
