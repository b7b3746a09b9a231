//! Block geometry and neighbor metadata consumed by the boundary exchange.
//!
//! The mesh itself (block tree, neighbor discovery, load balancing) is an
//! external collaborator; this module only defines the immutable per-block
//! context the exchange engine needs: index shapes, logical locations, and
//! validated neighbor descriptors.

pub mod block;
pub mod neighbor;

pub use block::{BlockGeometry, BlockId, BlockSize, IndexShape, LogicalLocation};
pub use neighbor::{NeighborConnect, NeighborDescriptor, NeighborIndexes};
