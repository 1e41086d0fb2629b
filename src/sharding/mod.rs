//! Sharding
//!
//! Deterministic entity placement and scatter-gather over shard backends.
//!
//! # Components
//!
//! - **Router** (`router.rs`) - Hash routing, fan-out writes and searches,
//!   per-shard outcomes and stats
//! - **Merge** (`merge.rs`) - Global top-k over per-shard ranked lists
//!
//! # Placement
//!
//! ```text
//!   entity_id ──sha256──► first 8 bytes (big endian) ──mod N──► shard
//! ```
//!
//! The shard count is fixed for a deployment; changing it moves entities.

pub mod merge;
pub mod router;

#[cfg(test)]
mod proptest;

pub use merge::{compare_ranked, merge_ranked, over_fetch_limit, Merged, Ranked};
pub use router::{
    route_entity, SearchResponse, ShardOutcome, ShardRouter, ShardStats, ShardWriteOutcome,
    WriteReport,
};
