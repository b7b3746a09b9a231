//! Block identity and index-space geometry.
//!
//! A block is a rectangular index-space region at one refinement level:
//! interior cell counts plus a fixed ghost width on every active axis.
//! `BlockGeometry` bundles the immutable context the boundary engine needs
//! per block and is shared (`Arc`) by all of that block's boundary
//! variables. It is rebuilt from scratch on every AMR regrid; nothing in it
//! mutates between regrids.

use std::collections::HashSet;
use std::num::NonZeroU64;
use std::{cmp, fmt};

use serde::{Deserialize, Serialize};

use crate::error::BvalsError;
use crate::mesh::neighbor::NeighborDescriptor;

/// Strong, zero-cost handle for a mesh block.
///
/// Wraps a nonzero `u64`; 0 is reserved as an invalid/sentinel value so the
/// niche optimization makes `Option<BlockId>` pointer-sized.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct BlockId(NonZeroU64);

impl BlockId {
    /// Creates a `BlockId` from a raw `u64`.
    ///
    /// # Errors
    /// Returns `Err(InvalidBlockId)` if `raw == 0`.
    #[inline]
    pub fn new(raw: u64) -> Result<Self, BvalsError> {
        NonZeroU64::new(raw)
            .map(BlockId)
            .ok_or(BvalsError::InvalidBlockId)
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockId").field(&self.get()).finish()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

/// Interior cell counts of a block. Degenerate axes have count 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSize {
    pub nx1: i64,
    pub nx2: i64,
    pub nx3: i64,
}

impl BlockSize {
    pub fn new(nx1: i64, nx2: i64, nx3: i64) -> Self {
        Self { nx1, nx2, nx3 }
    }

    /// Problem dimensionality implied by the cell counts.
    pub fn ndim(&self) -> usize {
        if self.nx3 > 1 {
            3
        } else if self.nx2 > 1 {
            2
        } else {
            1
        }
    }

    /// Cell counts of the coarse (half-resolution) representation.
    pub fn coarse(&self) -> BlockSize {
        BlockSize {
            nx1: cmp::max(self.nx1 / 2, 1),
            nx2: cmp::max(self.nx2 / 2, 1),
            nx3: cmp::max(self.nx3 / 2, 1),
        }
    }
}

/// Integer coordinates of a block within its refinement level.
///
/// The low bit of each coordinate tells which half of the parent block this
/// block covers; the from-coarser unpack uses it to pick the side on which
/// the prolongation stencil margin extends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalLocation {
    pub lx1: i64,
    pub lx2: i64,
    pub lx3: i64,
    pub level: i64,
}

/// Inclusive interior index bounds of a ghost-padded array.
///
/// Active axes span `[nghost, nghost + nx - 1]`; degenerate axes collapse to
/// the single index 0 with no ghost padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexShape {
    is: i64,
    ie: i64,
    js: i64,
    je: i64,
    ks: i64,
    ke: i64,
    nghost: i64,
}

impl IndexShape {
    pub fn new(size: BlockSize, nghost: i64) -> Self {
        let (js, je) = if size.nx2 > 1 {
            (nghost, nghost + size.nx2 - 1)
        } else {
            (0, 0)
        };
        let (ks, ke) = if size.nx3 > 1 {
            (nghost, nghost + size.nx3 - 1)
        } else {
            (0, 0)
        };
        Self {
            is: nghost,
            ie: nghost + size.nx1 - 1,
            js,
            je,
            ks,
            ke,
            nghost,
        }
    }

    #[inline]
    pub fn is(&self) -> i64 {
        self.is
    }
    #[inline]
    pub fn ie(&self) -> i64 {
        self.ie
    }
    #[inline]
    pub fn js(&self) -> i64 {
        self.js
    }
    #[inline]
    pub fn je(&self) -> i64 {
        self.je
    }
    #[inline]
    pub fn ks(&self) -> i64 {
        self.ks
    }
    #[inline]
    pub fn ke(&self) -> i64 {
        self.ke
    }
    #[inline]
    pub fn nghost(&self) -> i64 {
        self.nghost
    }

    /// Total cell count along x1 including ghosts.
    #[inline]
    pub fn ncells1(&self) -> i64 {
        self.ie + self.nghost + 1
    }
    /// Total cell count along x2 including ghosts (1 when degenerate).
    #[inline]
    pub fn ncells2(&self) -> i64 {
        if self.je == 0 { 1 } else { self.je + self.nghost + 1 }
    }
    /// Total cell count along x3 including ghosts (1 when degenerate).
    #[inline]
    pub fn ncells3(&self) -> i64 {
        if self.ke == 0 { 1 } else { self.ke + self.nghost + 1 }
    }
}

/// Per-edge output of fine-neighbor counting: whether every contact on the
/// edge is at the block's own level (so same-level flux correction applies),
/// and how many same-level-fine contacts it has.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EdgeFlags {
    pub edge_flag: [bool; 12],
    pub nedge_fine: [usize; 12],
}

/// Immutable per-block context for the boundary exchange.
///
/// Rank/world identity is injected here at construction rather than read
/// from ambient globals.
#[derive(Clone, Debug)]
pub struct BlockGeometry {
    /// Global block id.
    pub gid: BlockId,
    /// Local (per-rank) id, used in channel tags.
    pub lid: u64,
    /// Rank owning this block.
    pub rank: usize,
    pub loc: LogicalLocation,
    pub size: BlockSize,
    /// Ghost width on active axes.
    pub nghost: i64,
    /// Coarse-buffer ghost width used by prolongation stencils.
    pub cnghost: i64,
    pub ndim: usize,
    /// True when the mesh has more than one refinement level anywhere.
    pub multilevel: bool,
    pub cellbounds: IndexShape,
    pub c_cellbounds: IndexShape,
    pub neighbors: Vec<NeighborDescriptor>,
    /// Refinement level of the neighbor at each offset (`[ox3+1][ox2+1][ox1+1]`),
    /// -1 where no neighbor exists (physical boundary).
    pub nblevel: [[[i64; 3]; 3]; 3],
}

impl BlockGeometry {
    /// Builds and validates the per-block context.
    ///
    /// When `nblevel` is `None`, the table is derived from the neighbor
    /// list (own level at the center, -1 at offsets with no neighbor).
    ///
    /// # Errors
    /// Rejects neighbor descriptors whose offsets exceed the problem
    /// dimensionality, whose connection type disagrees with the number of
    /// nonzero offsets, or whose `bufid` collides with another neighbor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gid: BlockId,
        lid: u64,
        rank: usize,
        loc: LogicalLocation,
        size: BlockSize,
        nghost: i64,
        multilevel: bool,
        neighbors: Vec<NeighborDescriptor>,
        nblevel: Option<[[[i64; 3]; 3]; 3]>,
    ) -> Result<Self, BvalsError> {
        let ndim = size.ndim();
        let cnghost = (nghost + 1) / 2 + 1;

        // bufids are location-derived slots, not dense ordinals; only
        // collisions are invalid
        let mut seen = HashSet::with_capacity(neighbors.len());
        for nb in &neighbors {
            for (axis, off) in [nb.ni.ox1, nb.ni.ox2, nb.ni.ox3].into_iter().enumerate() {
                if off != 0 && axis >= ndim {
                    return Err(BvalsError::OffsetBeyondDimension {
                        block: gid,
                        bufid: nb.bufid,
                        axis: axis + 1,
                        ndim,
                    });
                }
            }
            if nb.ni.nonzero() != nb.ni.connect.nonzero_offsets() {
                return Err(BvalsError::ConnectMismatch {
                    block: gid,
                    bufid: nb.bufid,
                    connect: nb.ni.connect.name(),
                    nonzero: nb.ni.nonzero(),
                });
            }
            if !seen.insert(nb.bufid) {
                return Err(BvalsError::DuplicateBufId {
                    block: gid,
                    bufid: nb.bufid,
                });
            }
        }

        let nblevel = nblevel.unwrap_or_else(|| {
            let mut table = [[[-1i64; 3]; 3]; 3];
            table[1][1][1] = loc.level;
            for nb in &neighbors {
                table[(nb.ni.ox3 + 1) as usize][(nb.ni.ox2 + 1) as usize]
                    [(nb.ni.ox1 + 1) as usize] = nb.level;
            }
            table
        });

        Ok(Self {
            gid,
            lid,
            rank,
            loc,
            size,
            nghost,
            cnghost,
            ndim,
            multilevel,
            cellbounds: IndexShape::new(size, nghost),
            c_cellbounds: IndexShape::new(size.coarse(), cnghost),
            neighbors,
            nblevel,
        })
    }

    /// Recomputed once per topology change: for each edge, the number of
    /// same-level fine-grid contacts and whether the edge qualifies for
    /// same-level flux correction (all contacts at this block's own level).
    pub fn count_fine_edges(&self) -> EdgeFlags {
        let mylevel = self.loc.level;
        let mut flags = EdgeFlags {
            edge_flag: [false; 12],
            nedge_fine: [0; 12],
        };
        let mut eid = 0;

        // A fine contact bumps the reference level once; contacts are then
        // counted at the highest level seen in the window.
        let scan = |cells: Vec<i64>| {
            let mut fl = mylevel;
            let mut nf = 0usize;
            for lv in cells {
                if lv > fl {
                    fl += 1;
                    nf = 0;
                }
                if lv == fl {
                    nf += 1;
                }
            }
            (fl == mylevel, nf)
        };
        let clamp = |o: i64| (cmp::max(o - 1, -1), cmp::min(o + 1, 1));

        if self.size.nx2 > 1 {
            for ox2 in [-1i64, 1] {
                for ox1 in [-1i64, 1] {
                    let ((i0, i1), (j0, j1)) = (clamp(ox1), clamp(ox2));
                    let cells = (j0..=j1)
                        .flat_map(|nj| {
                            (i0..=i1)
                                .map(move |ni| self.nblevel[1][(nj + 1) as usize][(ni + 1) as usize])
                        })
                        .collect();
                    let (flag, nf) = scan(cells);
                    flags.edge_flag[eid] = flag;
                    flags.nedge_fine[eid] = nf;
                    eid += 1;
                }
            }
        }
        if self.size.nx3 > 1 {
            for ox3 in [-1i64, 1] {
                for ox1 in [-1i64, 1] {
                    let ((i0, i1), (k0, k1)) = (clamp(ox1), clamp(ox3));
                    let cells = (k0..=k1)
                        .flat_map(|nk| {
                            (i0..=i1)
                                .map(move |ni| self.nblevel[(nk + 1) as usize][1][(ni + 1) as usize])
                        })
                        .collect();
                    let (flag, nf) = scan(cells);
                    flags.edge_flag[eid] = flag;
                    flags.nedge_fine[eid] = nf;
                    eid += 1;
                }
            }
            for ox3 in [-1i64, 1] {
                for ox2 in [-1i64, 1] {
                    let ((j0, j1), (k0, k1)) = (clamp(ox2), clamp(ox3));
                    let cells = (k0..=k1)
                        .flat_map(|nk| {
                            (j0..=j1)
                                .map(move |nj| self.nblevel[(nk + 1) as usize][(nj + 1) as usize][1])
                        })
                        .collect();
                    let (flag, nf) = scan(cells);
                    flags.edge_flag[eid] = flag;
                    flags.nedge_fine[eid] = nf;
                    eid += 1;
                }
            }
        }
        flags
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::neighbor::{NeighborConnect, NeighborDescriptor, NeighborIndexes};

    fn nb(ox1: i64, ox2: i64, connect: NeighborConnect, bufid: usize) -> NeighborDescriptor {
        NeighborDescriptor {
            ni: NeighborIndexes {
                ox1,
                ox2,
                ox3: 0,
                fi1: 0,
                fi2: 0,
                connect,
            },
            block: BlockId::new(99).unwrap(),
            level: 0,
            rank: 0,
            lid: 0,
            bufid,
            target_slot: 0,
        }
    }

    #[test]
    fn block_id_zero_rejected() {
        assert_eq!(BlockId::new(0), Err(BvalsError::InvalidBlockId));
        assert_eq!(BlockId::new(7).unwrap().get(), 7);
    }

    #[test]
    fn index_shape_degenerate_axes() {
        let shape = IndexShape::new(BlockSize::new(4, 1, 1), 2);
        assert_eq!((shape.is(), shape.ie()), (2, 5));
        assert_eq!((shape.js(), shape.je()), (0, 0));
        assert_eq!((shape.ks(), shape.ke()), (0, 0));
        assert_eq!(shape.ncells1(), 8);
        assert_eq!(shape.ncells2(), 1);
        assert_eq!(shape.ncells3(), 1);
    }

    #[test]
    fn geometry_rejects_offset_beyond_ndim() {
        let err = BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(4, 1, 1),
            2,
            false,
            vec![nb(0, 1, NeighborConnect::Face, 0)],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BvalsError::OffsetBeyondDimension { axis: 2, .. }));
    }

    #[test]
    fn geometry_rejects_connect_mismatch() {
        let err = BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(4, 4, 1),
            2,
            false,
            vec![nb(1, 1, NeighborConnect::Face, 0)],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BvalsError::ConnectMismatch { .. }));
    }

    #[test]
    fn geometry_rejects_duplicate_bufid() {
        let err = BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(4, 4, 1),
            2,
            false,
            vec![
                nb(1, 0, NeighborConnect::Face, 0),
                nb(-1, 0, NeighborConnect::Face, 0),
            ],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, BvalsError::DuplicateBufId { bufid: 0, .. }));
    }

    #[test]
    fn location_derived_bufids_need_not_be_dense() {
        // a one-neighbor block with a sparse slot id is valid
        let geom = BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(4, 4, 1),
            2,
            false,
            vec![
                nb(1, 0, NeighborConnect::Face, 5),
                nb(-1, 0, NeighborConnect::Face, 0),
            ],
            None,
        )
        .unwrap();
        assert_eq!(geom.neighbors[0].bufid, 5);
    }

    #[test]
    fn coarse_bounds_use_cnghost() {
        let geom = BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(8, 8, 1),
            2,
            true,
            vec![],
            None,
        )
        .unwrap();
        assert_eq!(geom.cnghost, 2); // (2+1)/2 + 1
        assert_eq!(geom.c_cellbounds.is(), 2);
        assert_eq!(geom.c_cellbounds.ie(), 5);
    }

    #[test]
    fn fine_edge_counting_flags_fine_contacts() {
        // 2D block with a finer neighbor across the (+1,+1) corner window.
        let mut nblevel = [[[0i64; 3]; 3]; 3];
        nblevel[1][2][2] = 1; // finer block at ox1=+1, ox2=+1
        let geom = BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(4, 4, 1),
            2,
            true,
            vec![],
            Some(nblevel),
        )
        .unwrap();
        let flags = geom.count_fine_edges();
        // eid order for 2D: (-1,-1), (1,-1), (-1,1), (1,1)
        assert!(flags.edge_flag[0]);
        assert!(flags.edge_flag[1]);
        assert!(flags.edge_flag[2]);
        assert!(!flags.edge_flag[3], "fine contact disqualifies the edge");
        assert_eq!(flags.nedge_fine[3], 1);
    }
}
