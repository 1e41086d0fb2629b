//! Tiered Caching
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     TieredCache                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐        ┌──────────────────────────┐  │
//! │  │ Local (LFU)        │ miss ─►│ Remote (pooled, TTL,     │  │
//! │  │ in-process, no TTL │◄─ hit ─│ priority, LZ4 framing)   │  │
//! │  └────────────────────┘        └──────────────────────────┘  │
//! │             ▲                                                │
//! │             └──────── prefetch worker (bounded queue) ◄──────│── hints
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys for search results come from [`fingerprint`].

pub mod compression;
pub mod fingerprint;
pub mod lfu;
pub mod metrics;
pub mod pattern;
mod prefetch;
pub mod tiered;

pub use compression::{Encoding, ValueCodec};
pub use fingerprint::{fingerprint, fingerprint_of, query_fingerprint};
pub use lfu::{LfuCache, LocalCache, LocalCacheStats};
pub use metrics::{CacheMetrics, CacheStats};
pub use pattern::glob_match;
pub use tiered::{CacheLookup, CacheSource, TieredCache, TieredCacheStats};
