//! Approximate nearest-neighbor indexes
//!
//! In-memory indexes for corpora small enough to search in process:
//!
//! - [`FlatIndex`]: exhaustive inner-product scan
//! - [`IvfIndex`]: inverted lists over spherical k-means centroids
//! - [`Pca`]: optional projection to a reduced dimension
//! - [`IndexOptimizer`]: chooses between them, builds and searches handles,
//!   and runs partitioned build/search
//!
//! Every stored vector and every query is L2-normalized, so inner product
//! equals cosine similarity.

pub mod flat;
pub mod handle;
pub mod ivf;
pub mod kmeans;
pub mod linalg;
pub mod optimizer;
pub mod pca;

pub use flat::{FlatIndex, VectorIndex};
pub use handle::{AnnIndex, AppendOutcome, IndexHandle, IndexKind, PartitionedIndex};
pub use ivf::IvfIndex;
pub use optimizer::{IndexOptimizer, MemoryEstimate, TrainedState};
pub use pca::{Pca, PcaParams};
