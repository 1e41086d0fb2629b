//! Resource Pool
//!
//! A fixed set of long-lived handles to one backend, handed out round robin
//! or by hash of a caller key. Leases are RAII guards: the lease table is
//! locked only while acquiring and releasing, never while a handle is used.
//!
//! ```text
//!   acquire() ──► lock ──► pick slot ──► leases[slot] += 1 ──► unlock ──► PooledHandle
//!                                                                           │ drop
//!                                               leases[slot] -= 1 ◄─────────┘
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use crate::domain::ports::Probe;
use crate::error::{Error, Result};
use crate::monitoring::HealthStatus;

/// Default deadline for a single handle probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct PoolState {
    leases: Vec<usize>,
    next: usize,
    total: u64,
}

impl PoolState {
    fn lease(&mut self, slot: usize) {
        self.leases[slot] += 1;
        self.total += 1;
    }
}

/// Fixed-size pool of shared handles
pub struct ResourcePool<T: ?Sized + Send + Sync> {
    name: String,
    handles: Vec<Arc<T>>,
    state: Arc<Mutex<PoolState>>,
    probe_timeout: Duration,
}

impl<T: ?Sized + Send + Sync> ResourcePool<T> {
    /// Create a pool over existing handles. At least one handle is required.
    pub fn new(name: impl Into<String>, handles: Vec<Arc<T>>) -> Result<Self> {
        let name = name.into();
        if handles.is_empty() {
            return Err(Error::Config(format!("pool {name} needs at least one handle")));
        }
        let size = handles.len();
        Ok(Self {
            name,
            handles,
            state: Arc::new(Mutex::new(PoolState {
                leases: vec![0; size],
                next: 0,
                total: 0,
            })),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    /// Create `size` handles with a factory.
    pub fn with_factory(
        name: impl Into<String>,
        size: usize,
        factory: impl FnMut(usize) -> Arc<T>,
    ) -> Result<Self> {
        Self::new(name, (0..size).map(factory).collect())
    }

    /// Override the per-handle probe deadline
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Next handle in round-robin order
    pub fn acquire(&self) -> PooledHandle<T> {
        let slot = {
            let mut state = self.state.lock();
            let slot = state.next % self.handles.len();
            state.next = state.next.wrapping_add(1);
            state.lease(slot);
            slot
        };
        self.guard(slot)
    }

    /// Handle selected by hashing a caller key; the same key always maps to
    /// the same slot.
    pub fn acquire_for<K: Hash + ?Sized>(&self, caller: &K) -> PooledHandle<T> {
        let mut hasher = DefaultHasher::new();
        caller.hash(&mut hasher);
        let slot = (hasher.finish() % self.handles.len() as u64) as usize;
        self.state.lock().lease(slot);
        self.guard(slot)
    }

    fn guard(&self, slot: usize) -> PooledHandle<T> {
        PooledHandle {
            handle: self.handles[slot].clone(),
            slot,
            state: self.state.clone(),
        }
    }

    /// Lease and acquisition counters
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            name: self.name.clone(),
            size: self.handles.len(),
            active_leases: state.leases.iter().sum(),
            total_acquisitions: state.total,
        }
    }
}

impl<T: ?Sized + Probe> ResourcePool<T> {
    /// Probe every handle concurrently.
    ///
    /// Failing handles are reported but stay in rotation; callers decide
    /// whether to route around them.
    pub async fn health_check(&self) -> Vec<HandleHealth> {
        let probes = self.handles.iter().enumerate().map(|(slot, handle)| {
            let handle = handle.clone();
            let timeout = self.probe_timeout;
            async move {
                let started = Instant::now();
                let outcome = tokio::time::timeout(timeout, handle.probe()).await;
                let latency_ms = started.elapsed().as_millis() as u64;
                let (status, error) = match outcome {
                    Ok(Ok(())) => (HealthStatus::Healthy, None),
                    Ok(Err(e)) => (HealthStatus::Unhealthy, Some(e.to_string())),
                    Err(_) => (
                        HealthStatus::Unhealthy,
                        Some(format!("probe timed out after {timeout:?}")),
                    ),
                };
                HandleHealth {
                    slot,
                    status,
                    error,
                    latency_ms,
                }
            }
        });

        let report = join_all(probes).await;
        let failing = report.iter().filter(|h| !h.status.is_healthy()).count();
        if failing > 0 {
            warn!(
                pool = %self.name,
                failing,
                size = self.handles.len(),
                "Pool has degraded handles"
            );
        }
        report
    }

    /// Worst-case summary of [`health_check`](Self::health_check)
    pub async fn status(&self) -> HealthStatus {
        let report = self.health_check().await;
        let failing = report.iter().filter(|h| !h.status.is_healthy()).count();
        HealthStatus::from_counts(failing, report.len())
    }
}

// =============================================================================
// Scoped Handle
// =============================================================================

/// Leased handle; the lease is released when the guard drops.
pub struct PooledHandle<T: ?Sized> {
    handle: Arc<T>,
    slot: usize,
    state: Arc<Mutex<PoolState>>,
}

impl<T: ?Sized> PooledHandle<T> {
    /// Pool slot this handle came from
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<T: ?Sized> Deref for PooledHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

impl<T: ?Sized> Drop for PooledHandle<T> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(leases) = state.leases.get_mut(self.slot) {
            *leases = leases.saturating_sub(1);
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Probe result for one pooled handle
#[derive(Debug, Clone, Serialize)]
pub struct HandleHealth {
    pub slot: usize,
    pub status: HealthStatus,
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Pool counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub size: usize,
    pub active_leases: usize,
    pub total_acquisitions: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Conn {
        id: usize,
        up: AtomicBool,
    }

    #[async_trait]
    impl Probe for Conn {
        async fn probe(&self) -> Result<()> {
            if self.up.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(Error::upstream(format!("conn-{}", self.id), "down"))
            }
        }
    }

    fn pool(size: usize) -> ResourcePool<Conn> {
        ResourcePool::with_factory("test", size, |id| {
            Arc::new(Conn {
                id,
                up: AtomicBool::new(true),
            })
        })
        .unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(ResourcePool::<Conn>::new("empty", Vec::new()).is_err());
    }

    #[test]
    fn test_round_robin() {
        let pool = pool(3);
        let ids: Vec<usize> = (0..6).map(|_| pool.acquire().id).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(pool.stats().total_acquisitions, 6);
    }

    #[test]
    fn test_lease_released_on_drop() {
        let pool = pool(2);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.stats().active_leases, 2);
        drop(a);
        assert_eq!(pool.stats().active_leases, 1);
        drop(b);
        assert_eq!(pool.stats().active_leases, 0);
    }

    #[test]
    fn test_lease_released_on_error_path() {
        let pool = pool(2);
        let failing = || -> Result<()> {
            let conn = pool.acquire();
            Err(Error::upstream(format!("conn-{}", conn.id), "boom"))
        };
        assert!(failing().is_err());
        assert_eq!(pool.stats().active_leases, 0);
    }

    #[test]
    fn test_acquire_for_is_sticky() {
        let pool = pool(4);
        let first = pool.acquire_for("caller-a").slot();
        for _ in 0..10 {
            assert_eq!(pool.acquire_for("caller-a").slot(), first);
        }
    }

    #[tokio::test]
    async fn test_health_check_reports_without_removing() {
        let pool = pool(3);
        pool.handles[1].up.store(false, Ordering::Relaxed);

        let report = pool.health_check().await;
        assert_eq!(report.len(), 3);
        assert_eq!(report[0].status, HealthStatus::Healthy);
        assert_eq!(report[1].status, HealthStatus::Unhealthy);
        assert!(report[1].error.as_deref().unwrap().contains("down"));
        assert_eq!(pool.status().await, HealthStatus::Degraded);

        // Still in rotation
        let ids: Vec<usize> = (0..3).map(|_| pool.acquire().id).collect();
        assert!(ids.contains(&1));
    }
}
