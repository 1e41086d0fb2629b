//! Tiered Cache Counters
//!
//! Lock-free counters kept by the coordinator itself, independent of the
//! Prometheus registry so stats work without an exporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Coordinator counters
#[derive(Debug, Default)]
pub struct CacheMetrics {
    local_hits: AtomicU64,
    remote_hits: AtomicU64,
    misses: AtomicU64,
    remote_errors: AtomicU64,
    remote_read_latency_us: AtomicU64,
    prefetch_enqueued: AtomicU64,
    prefetch_dropped: AtomicU64,
    prefetch_loaded: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_hit(&self) {
        self.remote_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_enqueued(&self, n: u64) {
        self.prefetch_enqueued.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_prefetch_dropped(&self, n: u64) {
        self.prefetch_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_prefetch_loaded(&self, n: u64) {
        self.prefetch_loaded.fetch_add(n, Ordering::Relaxed);
    }

    /// Exponential moving average of remote read latency
    pub fn record_remote_latency(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;
        let target = &self.remote_read_latency_us;

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };
            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> CacheStats {
        let local_hits = self.local_hits.load(Ordering::Relaxed);
        let remote_hits = self.remote_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = local_hits + remote_hits + misses;
        CacheStats {
            local_hits,
            remote_hits,
            misses,
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (local_hits + remote_hits) as f64 / lookups as f64
            },
            remote_read_latency_us: self.remote_read_latency_us.load(Ordering::Relaxed),
            prefetch_enqueued: self.prefetch_enqueued.load(Ordering::Relaxed),
            prefetch_dropped: self.prefetch_dropped.load(Ordering::Relaxed),
            prefetch_loaded: self.prefetch_loaded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheMetrics`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub local_hits: u64,
    pub remote_hits: u64,
    pub misses: u64,
    pub remote_errors: u64,
    /// Hits in either tier over all lookups
    pub hit_rate: f64,
    pub remote_read_latency_us: u64,
    pub prefetch_enqueued: u64,
    pub prefetch_dropped: u64,
    pub prefetch_loaded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = CacheMetrics::new();
        assert_eq!(metrics.snapshot().hit_rate, 0.0);

        metrics.record_local_hit();
        metrics.record_remote_hit();
        metrics.record_miss();
        metrics.record_miss();
        let stats = metrics.snapshot();
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.remote_hits, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_ema() {
        let metrics = CacheMetrics::new();
        metrics.record_remote_latency(Duration::from_micros(100));
        assert_eq!(metrics.snapshot().remote_read_latency_us, 100);
        metrics.record_remote_latency(Duration::from_micros(200));
        assert_eq!(metrics.snapshot().remote_read_latency_us, 110);
    }
}
