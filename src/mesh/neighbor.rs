//! Neighbor descriptors: immutable per-boundary metadata.
//!
//! One `NeighborDescriptor` exists per (block, boundary) pair: the relative
//! offset triple in {-1,0,1}^3, the geometric connection type, the fine-grid
//! sub-indexes disambiguating which fine child the offset refers to when
//! levels differ, and the identity of the target (block id, rank, local id,
//! and the boundary slot on each side). Neighbor lists are recomputed by the
//! mesh layer whenever topology changes and are otherwise immutable.

use serde::{Deserialize, Serialize};

use crate::mesh::block::BlockId;

/// Geometric relationship between two blocks sharing a boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeighborConnect {
    /// Blocks share a 2D face (one nonzero offset).
    Face,
    /// Blocks share a 1D edge (two nonzero offsets).
    Edge,
    /// Blocks share a single point (three nonzero offsets).
    Corner,
}

impl NeighborConnect {
    /// Number of nonzero offsets this connection type implies.
    pub fn nonzero_offsets(self) -> usize {
        match self {
            NeighborConnect::Face => 1,
            NeighborConnect::Edge => 2,
            NeighborConnect::Corner => 3,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            NeighborConnect::Face => "face",
            NeighborConnect::Edge => "edge",
            NeighborConnect::Corner => "corner",
        }
    }
}

/// Offset triple, fine sub-indexes, and connection type of one boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeighborIndexes {
    /// Relative offset along x1, in {-1, 0, 1}.
    pub ox1: i64,
    /// Relative offset along x2.
    pub ox2: i64,
    /// Relative offset along x3.
    pub ox3: i64,
    /// First fine sub-index (0 or 1): selects the half-extent along the
    /// lowest zero-offset axis when the neighbor is on a different level.
    pub fi1: i64,
    /// Second fine sub-index (0 or 1).
    pub fi2: i64,
    /// Geometric connection type.
    pub connect: NeighborConnect,
}

impl NeighborIndexes {
    /// Face connection along a single axis (all other offsets zero).
    pub fn face(ox1: i64, ox2: i64, ox3: i64) -> Self {
        Self {
            ox1,
            ox2,
            ox3,
            fi1: 0,
            fi2: 0,
            connect: NeighborConnect::Face,
        }
    }

    /// Count of nonzero offsets.
    pub fn nonzero(&self) -> usize {
        [self.ox1, self.ox2, self.ox3]
            .iter()
            .filter(|&&o| o != 0)
            .count()
    }

    /// Geometric location index of this boundary, unique within the 3x3x3
    /// offset cube: `(1+ox1) + 3*((1+ox2) + 3*(1+ox3))`, in 0..27.
    pub fn location_index(&self) -> usize {
        ((1 + self.ox1) + 3 * ((1 + self.ox2) + 3 * (1 + self.ox3))) as usize
    }

    /// Location index of the same boundary as seen from the other block
    /// (offsets mirrored).
    pub fn mirror_location_index(&self) -> usize {
        ((1 - self.ox1) + 3 * ((1 - self.ox2) + 3 * (1 - self.ox3))) as usize
    }

    /// Edge identifier in 0..12 for edge connections, `None` otherwise.
    ///
    /// Numbering follows the fine-edge counting order: x1x2 edges first
    /// (0..4), then x1x3 (4..8), then x2x3 (8..12), each block ordered by
    /// `(lower offset first)` on the second axis, then the first.
    pub fn edge_id(&self) -> Option<usize> {
        if self.connect != NeighborConnect::Edge {
            return None;
        }
        let half = |o: i64| ((o + 1) / 2) as usize;
        if self.ox3 == 0 {
            Some(half(self.ox1) + 2 * half(self.ox2))
        } else if self.ox2 == 0 {
            Some(4 + half(self.ox1) + 2 * half(self.ox3))
        } else {
            Some(8 + half(self.ox2) + 2 * half(self.ox3))
        }
    }
}

/// Everything the exchange engine knows about one neighbor of one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborDescriptor {
    /// Offsets, sub-indexes, and connection type.
    pub ni: NeighborIndexes,
    /// Global id of the neighboring block.
    pub block: BlockId,
    /// Absolute refinement level of the neighbor.
    pub level: i64,
    /// Rank owning the neighbor.
    pub rank: usize,
    /// Local (per-rank) id of the neighbor, used in channel tags.
    pub lid: u64,
    /// Boundary slot of this boundary in the owning block's neighbor list.
    pub bufid: usize,
    /// Boundary slot of the mirrored boundary on the neighbor's side.
    pub target_slot: usize,
}

impl NeighborDescriptor {
    /// Edge identifier (0..12) if this is an edge connection.
    pub fn eid(&self) -> Option<usize> {
        self.ni.edge_id()
    }
}
