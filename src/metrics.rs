use std::sync::Arc;
use std::time::Duration;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::error::Outcome;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum AttemptResult {
    Ok,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AttemptLabels {
    pub result: AttemptResult,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the cache.
pub struct Metrics {
    pub fetch_requests_total: Family<OutcomeLabels, Counter>,
    pub fetch_duration_seconds: Histogram,
    pub upstream_fetches_total: Counter,
    pub export_attempts_total: Family<AttemptLabels, Counter>,
    pub mirrors_created_total: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let fetch_requests_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "gitcache_fetch_requests",
            "Fetch requests by outcome",
            fetch_requests_total.clone(),
        );

        let fetch_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 14));
        registry.register(
            "gitcache_fetch_duration_seconds",
            "Time from request to end of archive stream",
            fetch_duration_seconds.clone(),
        );

        let upstream_fetches_total = Counter::default();
        registry.register(
            "gitcache_upstream_fetches",
            "Forced branch fetches against upstream",
            upstream_fetches_total.clone(),
        );

        let export_attempts_total = Family::<AttemptLabels, Counter>::default();
        registry.register(
            "gitcache_export_attempts",
            "Archive export attempts by result",
            export_attempts_total.clone(),
        );

        let mirrors_created_total = Counter::default();
        registry.register(
            "gitcache_mirrors_created",
            "Bare mirrors initialised",
            mirrors_created_total.clone(),
        );

        Self {
            fetch_requests_total,
            fetch_duration_seconds,
            upstream_fetches_total,
            export_attempts_total,
            mirrors_created_total,
        }
    }

    pub fn record_request(&self, outcome: Outcome, elapsed: Duration) {
        self.fetch_requests_total
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
        self.fetch_duration_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn record_attempt(&self, ok: bool) {
        let result = if ok {
            AttemptResult::Ok
        } else {
            AttemptResult::Failed
        };
        self.export_attempts_total
            .get_or_create(&AttemptLabels { result })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`AppState`].
///
/// [`AppState`]: crate::AppState
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
