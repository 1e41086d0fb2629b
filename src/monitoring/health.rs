//! Health Reporting
//!
//! Status vocabulary shared by pool probes, shard stats and the `/readyz`
//! endpoint of the operator binary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Serving normally
    Healthy,
    /// Serving, but some handles or shards are failing
    Degraded,
    /// Not serving
    Unhealthy,
}

impl HealthStatus {
    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    /// Status of a group where `failing` of `total` members are down.
    pub fn from_counts(failing: usize, total: usize) -> Self {
        if failing == 0 {
            HealthStatus::Healthy
        } else if failing < total {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Outcome of one named check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            duration_ms: 0,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    /// Set duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Aggregate health answer; overall status is the worst individual status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Process liveness/readiness flags for the operator binary.
pub struct ServiceHealth {
    started: Instant,
    live: AtomicBool,
    ready: AtomicBool,
}

impl ServiceHealth {
    /// Live but not yet ready
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Liveness and readiness as one response
    pub fn report(&self) -> HealthResponse {
        let liveness = if self.is_live() {
            HealthCheckResult::healthy("liveness")
        } else {
            HealthCheckResult::unhealthy("liveness", "shutting down")
        };
        let readiness = if self.is_ready() {
            HealthCheckResult::healthy("readiness")
        } else {
            HealthCheckResult::unhealthy("readiness", "engine not ready")
        };
        HealthResponse::new(vec![liveness, readiness], self.uptime())
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Degraded.is_healthy());
        assert!(!HealthStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_status_from_counts() {
        assert_eq!(HealthStatus::from_counts(0, 4), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_counts(1, 4), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_counts(4, 4), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_counts(0, 0), HealthStatus::Healthy);
    }

    #[test]
    fn test_response_takes_worst_status() {
        let checks = vec![
            HealthCheckResult::healthy("shard-0"),
            HealthCheckResult::degraded("shard-1", "slow"),
        ];
        let response = HealthResponse::new(checks, Duration::from_secs(60));
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.uptime_seconds, 60);
    }

    #[test]
    fn test_service_health_flags() {
        let health = ServiceHealth::new();
        assert!(health.is_live());
        assert!(!health.is_ready());
        assert_eq!(health.report().status, HealthStatus::Unhealthy);

        health.set_ready(true);
        assert_eq!(health.report().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_serialization() {
        let result = HealthCheckResult::degraded("pool", "1 of 4 handles failing");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("Degraded"));
        let back: HealthCheckResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, HealthStatus::Degraded);
    }
}
