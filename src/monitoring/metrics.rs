//! Prometheus Metrics
//!
//! Each [`EngineMetrics`] owns its own registry, so several engines (or
//! tests) can coexist in one process. Recording is lock-free on the hot
//! path and never blocks on the scraper.

use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::{Error, Result};

const NAMESPACE: &str = "simshard";

/// Data-plane counters and histograms
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    cache_lookups: IntCounterVec,
    shard_request_duration: HistogramVec,
    merge_results: Histogram,
    merge_candidates: Histogram,
    shard_writes: IntCounterVec,
    prefetch_keys: IntCounterVec,
    local_cache_entries: IntGauge,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

impl EngineMetrics {
    /// Create and register every metric in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some(NAMESPACE.to_string()), None).map_err(prom)?;

        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Cache lookups by answering tier"),
            &["source"],
        )
        .map_err(prom)?;

        let shard_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "shard_request_duration_seconds",
                "Latency of one shard call during fan-out",
            )
            .buckets(vec![
                0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["shard", "outcome"],
        )
        .map_err(prom)?;

        let count_buckets = vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];
        let merge_results = Histogram::with_opts(
            HistogramOpts::new("merge_results", "Results returned by a merged search")
                .buckets(count_buckets.clone()),
        )
        .map_err(prom)?;
        let merge_candidates = Histogram::with_opts(
            HistogramOpts::new(
                "merge_candidates",
                "Candidates considered by a merged search",
            )
            .buckets(count_buckets),
        )
        .map_err(prom)?;

        let shard_writes = IntCounterVec::new(
            Opts::new("shard_writes_total", "Shard write batches by outcome"),
            &["shard", "outcome"],
        )
        .map_err(prom)?;

        let prefetch_keys = IntCounterVec::new(
            Opts::new("prefetch_keys_total", "Prefetch hints by outcome"),
            &["outcome"],
        )
        .map_err(prom)?;

        let local_cache_entries =
            IntGauge::new("local_cache_entries", "Entries resident in the local tier")
                .map_err(prom)?;

        registry
            .register(Box::new(cache_lookups.clone()))
            .map_err(prom)?;
        registry
            .register(Box::new(shard_request_duration.clone()))
            .map_err(prom)?;
        registry
            .register(Box::new(merge_results.clone()))
            .map_err(prom)?;
        registry
            .register(Box::new(merge_candidates.clone()))
            .map_err(prom)?;
        registry
            .register(Box::new(shard_writes.clone()))
            .map_err(prom)?;
        registry
            .register(Box::new(prefetch_keys.clone()))
            .map_err(prom)?;
        registry
            .register(Box::new(local_cache_entries.clone()))
            .map_err(prom)?;

        Ok(Self {
            registry,
            cache_lookups,
            shard_request_duration,
            merge_results,
            merge_candidates,
            shard_writes,
            prefetch_keys,
            local_cache_entries,
        })
    }

    /// `source` is `local`, `remote` or `miss`
    pub fn record_cache_lookup(&self, source: &str) {
        self.cache_lookups.with_label_values(&[source]).inc();
    }

    /// `outcome` is `success`, `failed` or `timed_out`
    pub fn record_shard_request(&self, shard: usize, outcome: &str, elapsed: Duration) {
        self.shard_request_duration
            .with_label_values(&[shard.to_string().as_str(), outcome])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_merge(&self, results: usize, candidates: usize) {
        self.merge_results.observe(results as f64);
        self.merge_candidates.observe(candidates as f64);
    }

    pub fn record_shard_write(&self, shard: usize, outcome: &str) {
        self.shard_writes
            .with_label_values(&[shard.to_string().as_str(), outcome])
            .inc();
    }

    /// `outcome` is `enqueued`, `dropped`, `loaded` or `failed`
    pub fn record_prefetch(&self, outcome: &str, keys: u64) {
        self.prefetch_keys.with_label_values(&[outcome]).inc_by(keys);
    }

    pub fn set_local_cache_entries(&self, entries: usize) {
        self.local_cache_entries.set(entries as i64);
    }

    /// Lookups recorded for one source
    pub fn cache_lookups(&self, source: &str) -> u64 {
        self.cache_lookups.with_label_values(&[source]).get()
    }

    pub fn prefetch_keys(&self, outcome: &str) -> u64 {
        self.prefetch_keys.with_label_values(&[outcome]).get()
    }

    /// The underlying registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format for a scrape
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics not UTF-8: {e}")))
    }
}

fn prom(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registry: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_independent() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.record_cache_lookup("local");
        a.record_cache_lookup("local");
        assert_eq!(a.cache_lookups("local"), 2);
        assert_eq!(b.cache_lookups("local"), 0);
    }

    #[test]
    fn test_render_contains_series() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_cache_lookup("miss");
        metrics.record_shard_request(3, "success", Duration::from_millis(4));
        metrics.record_merge(10, 40);
        metrics.record_shard_write(1, "failed");
        metrics.record_prefetch("dropped", 5);
        metrics.set_local_cache_entries(7);

        let text = tokio_test::assert_ok!(metrics.render());
        assert!(text.contains("simshard_cache_lookups_total{source=\"miss\"} 1"));
        assert!(text.contains("simshard_shard_request_duration_seconds_count"));
        assert!(text.contains("simshard_merge_results_sum 10"));
        assert!(text.contains("simshard_prefetch_keys_total{outcome=\"dropped\"} 5"));
        assert!(text.contains("simshard_local_cache_entries 7"));
    }
}
