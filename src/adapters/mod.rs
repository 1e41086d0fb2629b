//! Infrastructure Adapters
//!
//! Implementations of the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                             │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │             Ports: SearchBackend │ RemoteCache              │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                      │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │     InMemorySearchBackend │ InMemoryRemoteCache             │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The in-memory adapters back the `serve` command and the test suite.
//! Deployments against real services implement the same ports.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use simshard::adapters::InMemorySearchBackend;
//! use simshard::domain::ports::SearchBackend;
//!
//! let backend: Arc<dyn SearchBackend> = Arc::new(InMemorySearchBackend::new("shard-0"));
//! backend.create_collection("image_features_shard_0", 512).await?;
//! ```

mod memory_backend;
mod memory_cache;

pub use memory_backend::InMemorySearchBackend;
pub use memory_cache::InMemoryRemoteCache;
