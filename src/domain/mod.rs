//! Domain Layer
//!
//! Value objects and the port traits the data plane depends on.
//!
//! # Architecture
//!
//! - **Types** (`types.rs`) - Entity records, backend points and ranked hits
//! - **Ports** (`ports.rs`) - Trait abstractions for search backends and the
//!   remote cache store
//!
//! # Usage
//!
//! ```ignore
//! use simshard::domain::{SearchBackend, SearchRequest};
//!
//! async fn probe_top<B: SearchBackend + ?Sized>(backend: &B, query: Vec<f32>) -> Result<()> {
//!     let request = SearchRequest::new("image_features_shard_0", query, 10, 0.0);
//!     let points = backend.search(request).await?;
//!     // ...
//! }
//! ```

pub mod ports;
pub mod types;

pub use ports::{Probe, RemoteCache, SearchBackend};
pub use types::{EntityRecord, Metadata, Point, ScoredPoint, SearchHit, SearchRequest, ShardId};
