//! Observability
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Observability                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────┐   ┌───────────────────────────┐  │
//! │  │ EngineMetrics          │   │ Health                    │  │
//! │  │ (own Prometheus        │   │ (pool probes, shard       │  │
//! │  │  registry, /metrics)   │   │  status, /healthz /readyz)│  │
//! │  └────────────────────────┘   └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod health;
mod metrics;

pub use health::{HealthCheckResult, HealthResponse, HealthStatus, ServiceHealth};
pub use metrics::EngineMetrics;
