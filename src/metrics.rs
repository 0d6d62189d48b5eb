use std::sync::Arc;

use anyhow::Result;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueryLabels {
    pub outcome: QueryOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum QueryOutcome {
    Success,
    Failure,
}

// ---------------------------------------------------------------------------
// Access cache metrics
// ---------------------------------------------------------------------------

/// Counters and gauges maintained by the repository access cache.
///
/// All handles are reference-counted, so cloning an [`AccessMetrics`] shares
/// the underlying values.  A cache always owns one; registering it with a
/// [`Registry`] is optional.
#[derive(Clone, Debug, Default)]
pub struct AccessMetrics {
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub cache_evictions: Counter,
    pub cache_entries: Gauge,
    pub upstream_queries: Family<QueryLabels, Counter>,
    pub upstream_rate_limit_remaining: Gauge,
}

impl AccessMetrics {
    /// Register every metric with `registry`.
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "forgelock_access_cache_hits",
            "Repository access lookups served from the cache",
            self.cache_hits.clone(),
        );
        registry.register(
            "forgelock_access_cache_misses",
            "Repository access lookups that required an upstream query",
            self.cache_misses.clone(),
        );
        registry.register(
            "forgelock_access_cache_evictions",
            "Repository entries dropped after their idle TTL",
            self.cache_evictions.clone(),
        );
        registry.register(
            "forgelock_access_cache_entries",
            "Repositories currently held in the access cache",
            self.cache_entries.clone(),
        );
        registry.register(
            "forgelock_upstream_queries",
            "Upstream repository access queries by outcome",
            self.upstream_queries.clone(),
        );
        registry.register(
            "forgelock_upstream_rate_limit_remaining",
            "Remaining upstream API calls before rate limit",
            self.upstream_rate_limit_remaining.clone(),
        );
    }

    pub(crate) fn record_query(&self, outcome: QueryOutcome) {
        self.upstream_queries
            .get_or_create(&QueryLabels { outcome })
            .inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper around the registry and the metrics registered in it.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: AccessMetrics,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all access metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = AccessMetrics::default();
        metrics.register(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_registered_metrics() {
        let registry = MetricsRegistry::new();
        registry.metrics.cache_hits.inc();
        registry.metrics.record_query(QueryOutcome::Failure);

        let text = registry.encode().unwrap();
        assert!(text.contains("forgelock_access_cache_hits_total 1"));
        assert!(text.contains("forgelock_upstream_queries_total{outcome=\"Failure\"} 1"));
        assert!(text.contains("forgelock_access_cache_entries 0"));
    }

    #[test]
    fn clones_share_counters() {
        let metrics = AccessMetrics::default();
        let other = metrics.clone();
        other.cache_misses.inc();
        other.cache_misses.inc();
        assert_eq!(metrics.cache_misses.get(), 2);
    }
}
