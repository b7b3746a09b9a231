//! Index-Range Calculator: pure arithmetic from neighbor descriptors to
//! inclusive pack/unpack index ranges.
//!
//! For each centering kind there is one function per (refinement
//! relationship, pack/unpack role). The conventions, shared by every
//! function:
//!
//! - a zero offset on an axis selects the full interior along that axis
//!   (plus one index on the face-normal axis of a face-centered component,
//!   so the shared face is packed exactly once per owning side);
//! - offset +1 selects the last `nghost` interior cells, -1 the first;
//! - on multilevel meshes, edge and corner boundaries widen the
//!   face-normal range by one cell toward the neighbor, because the
//!   primary face neighbor does not own that overlapping face;
//! - the coarser path works in coarse-index space and is followed by
//!   restriction; the finer path splits zero-offset axes in half using the
//!   fine sub-indexes and keeps a `cnghost` margin for the destination's
//!   prolongation stencil; the from-coarser path extends by `cnghost` on
//!   the side selected by the block's logical-location parity.
//!
//! These are pure functions with no error conditions; the topology layer
//! guarantees valid neighbor descriptors.

use serde::{Deserialize, Serialize};

use crate::mesh::block::BlockGeometry;
use crate::mesh::neighbor::{NeighborConnect, NeighborIndexes};

/// Inclusive index ranges `[s, e]` per axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range3 {
    pub si: i64,
    pub ei: i64,
    pub sj: i64,
    pub ej: i64,
    pub sk: i64,
    pub ek: i64,
}

impl Range3 {
    pub fn new(si: i64, ei: i64, sj: i64, ej: i64, sk: i64, ek: i64) -> Self {
        Self {
            si,
            ei,
            sj,
            ej,
            sk,
            ek,
        }
    }

    /// Number of elements the range covers.
    pub fn count(&self) -> usize {
        let n = |s: i64, e: i64| (e - s + 1).max(0) as usize;
        n(self.si, self.ei) * n(self.sj, self.ej) * n(self.sk, self.ek)
    }
}

// Per-axis selection rules. `(s, e)` are the interior bounds of the axis.

/// Pack side, cell-centered (also the tangential axes of a face component).
#[inline]
fn load_cell(s: i64, e: i64, ox: i64, g: i64) -> (i64, i64) {
    match ox {
        0 => (s, e),
        1.. => (e - g + 1, e),
        _ => (s, s + g - 1),
    }
}

/// Pack side, the normal axis of a face component (`e + 1` is the last face).
#[inline]
fn load_face(s: i64, e: i64, ox: i64, g: i64) -> (i64, i64) {
    match ox {
        0 => (s, e + 1),
        1.. => (e - g + 1, e),
        _ => (s + 1, s + g),
    }
}

/// Unpack side, cell-centered / tangential: ghost region toward the neighbor.
#[inline]
fn set_cell(s: i64, e: i64, ox: i64, g: i64) -> (i64, i64) {
    match ox {
        0 => (s, e),
        1.. => (e + 1, e + g),
        _ => (s - g, s - 1),
    }
}

/// Unpack side, face-normal axis: the shared face itself (`e + 1`) belongs
/// to this block and is skipped for face neighbors on a uniform grid.
#[inline]
fn set_face(s: i64, e: i64, ox: i64, g: i64) -> (i64, i64) {
    match ox {
        0 => (s, e + 1),
        1.. => (e + 2, e + g + 1),
        _ => (s - g, s - 1),
    }
}

/// Multilevel edge/corner widening, pack side: one cell toward the neighbor.
#[inline]
fn widen_load((s, e): (i64, i64), ox: i64, apply: bool) -> (i64, i64) {
    if !apply {
        return (s, e);
    }
    match ox {
        1.. => (s, e + 1),
        ..=-1 => (s - 1, e),
        _ => (s, e),
    }
}

/// Multilevel edge/corner widening, unpack side: mirror of `widen_load`.
#[inline]
fn widen_set((s, e): (i64, i64), ox: i64, apply: bool) -> (i64, i64) {
    if !apply {
        return (s, e);
    }
    match ox {
        1.. => (s - 1, e),
        ..=-1 => (s, e + 1),
        _ => (s, e),
    }
}

/// Fine sub-index selecting the x2 half: `fi1` unless the x1 offset is zero.
#[inline]
fn fsel_j(ni: &NeighborIndexes) -> i64 {
    if ni.ox1 != 0 { ni.fi1 } else { ni.fi2 }
}

/// Fine sub-index selecting the x3 half.
#[inline]
fn fsel_k(ni: &NeighborIndexes) -> i64 {
    if ni.ox1 != 0 && ni.ox2 != 0 {
        ni.fi1
    } else {
        ni.fi2
    }
}

/// Pack side toward a finer neighbor, tangential axis: half extent chosen by
/// the fine sub-index with a `cng` stencil margin; `cn = cng - 1` ghost rows
/// for nonzero offsets.
#[inline]
fn load_finer_tang(
    s: i64,
    e: i64,
    ox: i64,
    nx: i64,
    active: bool,
    fi: i64,
    cng: i64,
) -> (i64, i64) {
    let cn = cng - 1;
    match ox {
        0 => {
            if !active {
                (s, e)
            } else if fi == 1 {
                (s + nx / 2 - cng, e)
            } else {
                (s, e - nx / 2 + cng)
            }
        }
        1.. => (e - cn, e),
        _ => (s, s + cn),
    }
}

/// Pack side toward a finer neighbor, face-normal axis.
#[inline]
fn load_finer_face(
    s: i64,
    e: i64,
    ox: i64,
    nx: i64,
    active: bool,
    fi: i64,
    cng: i64,
) -> (i64, i64) {
    match ox {
        0 => {
            if !active {
                (s, e)
            } else if fi == 1 {
                (s + nx / 2 - cng, e + 1)
            } else {
                (s, e + 1 - nx / 2 + cng)
            }
        }
        1.. => (e + 1 - cng, e + 1),
        _ => (s, s + cng),
    }
}

/// Unpack side from a coarser neighbor, tangential axis (coarse indices):
/// the `cng` prolongation margin extends on the side selected by the
/// logical-location parity bit.
#[inline]
fn set_coarser_tang(
    s: i64,
    e: i64,
    ox: i64,
    active: bool,
    parity_even: bool,
    cng: i64,
) -> (i64, i64) {
    match ox {
        0 => {
            if !active {
                (s, e)
            } else if parity_even {
                (s, e + cng)
            } else {
                (s - cng, e)
            }
        }
        1.. => (e + 1, e + cng),
        _ => (s - cng, s - 1),
    }
}

/// Unpack side from a coarser neighbor, face-normal axis.
#[inline]
fn set_coarser_face(
    s: i64,
    e: i64,
    ox: i64,
    active: bool,
    parity_even: bool,
    cng: i64,
) -> (i64, i64) {
    match ox {
        0 => {
            if !active {
                (s, e)
            } else if parity_even {
                (s, e + 1 + cng)
            } else {
                (s - cng, e + 1)
            }
        }
        1.. => (e + 1, e + 1 + cng),
        _ => (s - cng, s),
    }
}

/// Unpack side from a finer neighbor, tangential axis: half extent chosen
/// by the fine sub-index, ghost region for nonzero offsets.
#[inline]
fn set_finer_tang(s: i64, e: i64, ox: i64, nx: i64, active: bool, fi: i64, g: i64) -> (i64, i64) {
    match ox {
        0 => {
            if !active {
                (s, e)
            } else if fi == 1 {
                (s + nx / 2, e)
            } else {
                (s, e - nx / 2)
            }
        }
        1.. => (e + 1, e + g),
        _ => (s - g, s - 1),
    }
}

/// Unpack side from a finer neighbor, face-normal axis. A degenerate axis
/// takes a single layer; the second face layer is replicated after the
/// payload is consumed.
#[inline]
fn set_finer_face(s: i64, e: i64, ox: i64, nx: i64, active: bool, fi: i64, g: i64) -> (i64, i64) {
    match ox {
        0 => {
            if !active {
                (s, e)
            } else if fi == 1 {
                (s + nx / 2, e + 1)
            } else {
                (s, e + 1 - nx / 2)
            }
        }
        1.. => (e + 2, e + g + 1),
        _ => (s - g, s - 1),
    }
}

// --- cell-centered ranges ---

/// Pack range for sending cell-centered data to a same-level neighbor.
pub fn cc_load_same_level(geom: &BlockGeometry, ni: &NeighborIndexes) -> Range3 {
    let cb = &geom.cellbounds;
    let g = geom.nghost;
    let (si, ei) = load_cell(cb.is(), cb.ie(), ni.ox1, g);
    let (sj, ej) = load_cell(cb.js(), cb.je(), ni.ox2, g);
    let (sk, ek) = load_cell(cb.ks(), cb.ke(), ni.ox3, g);
    Range3::new(si, ei, sj, ej, sk, ek)
}

/// Unpack range for cell-centered data received from a same-level neighbor.
pub fn cc_set_same_level(geom: &BlockGeometry, ni: &NeighborIndexes) -> Range3 {
    let cb = &geom.cellbounds;
    let g = geom.nghost;
    let (si, ei) = set_cell(cb.is(), cb.ie(), ni.ox1, g);
    let (sj, ej) = set_cell(cb.js(), cb.je(), ni.ox2, g);
    let (sk, ek) = set_cell(cb.ks(), cb.ke(), ni.ox3, g);
    Range3::new(si, ei, sj, ej, sk, ek)
}

/// Coarse-index window restricted and packed when sending to a coarser
/// neighbor.
pub fn cc_load_to_coarser(geom: &BlockGeometry, ni: &NeighborIndexes) -> Range3 {
    let cb = &geom.c_cellbounds;
    let g = geom.nghost;
    let (si, ei) = load_cell(cb.is(), cb.ie(), ni.ox1, g);
    let (sj, ej) = load_cell(cb.js(), cb.je(), ni.ox2, g);
    let (sk, ek) = load_cell(cb.ks(), cb.ke(), ni.ox3, g);
    Range3::new(si, ei, sj, ej, sk, ek)
}

/// Pack range when sending the half-extent sub-block a finer neighbor needs.
pub fn cc_load_to_finer(geom: &BlockGeometry, ni: &NeighborIndexes) -> Range3 {
    let cb = &geom.cellbounds;
    let cng = geom.cnghost;
    let sz = geom.size;
    let (si, ei) = load_finer_tang(cb.is(), cb.ie(), ni.ox1, sz.nx1, true, ni.fi1, cng);
    let (sj, ej) = load_finer_tang(cb.js(), cb.je(), ni.ox2, sz.nx2, sz.nx2 > 1, fsel_j(ni), cng);
    let (sk, ek) = load_finer_tang(cb.ks(), cb.ke(), ni.ox3, sz.nx3, sz.nx3 > 1, fsel_k(ni), cng);
    Range3::new(si, ei, sj, ej, sk, ek)
}

/// Coarse-scratch unpack range for data received from a coarser neighbor
/// (prolongation consumes the scratch afterwards).
pub fn cc_set_from_coarser(geom: &BlockGeometry, ni: &NeighborIndexes) -> Range3 {
    let cb = &geom.c_cellbounds;
    let cng = geom.cnghost;
    let sz = geom.size;
    let loc = geom.loc;
    let (si, ei) = set_coarser_tang(cb.is(), cb.ie(), ni.ox1, true, loc.lx1 & 1 == 0, cng);
    let (sj, ej) = set_coarser_tang(cb.js(), cb.je(), ni.ox2, sz.nx2 > 1, loc.lx2 & 1 == 0, cng);
    let (sk, ek) = set_coarser_tang(cb.ks(), cb.ke(), ni.ox3, sz.nx3 > 1, loc.lx3 & 1 == 0, cng);
    Range3::new(si, ei, sj, ej, sk, ek)
}

/// Unpack range for already-restricted data received from a finer neighbor.
pub fn cc_set_from_finer(geom: &BlockGeometry, ni: &NeighborIndexes) -> Range3 {
    let cb = &geom.cellbounds;
    let g = geom.nghost;
    let sz = geom.size;
    let (si, ei) = set_finer_tang(cb.is(), cb.ie(), ni.ox1, sz.nx1, true, ni.fi1, g);
    let (sj, ej) = set_finer_tang(cb.js(), cb.je(), ni.ox2, sz.nx2, sz.nx2 > 1, fsel_j(ni), g);
    let (sk, ek) = set_finer_tang(cb.ks(), cb.ke(), ni.ox3, sz.nx3, sz.nx3 > 1, fsel_k(ni), g);
    Range3::new(si, ei, sj, ej, sk, ek)
}

// --- face-centered ranges, one Range3 per component [x1f, x2f, x3f] ---

/// Pack ranges for sending face-centered data to a same-level neighbor.
pub fn fc_load_same_level(geom: &BlockGeometry, ni: &NeighborIndexes) -> [Range3; 3] {
    let cb = &geom.cellbounds;
    let g = geom.nghost;
    let sz = geom.size;
    let widen = geom.multilevel && ni.connect != NeighborConnect::Face;

    let i_cell = load_cell(cb.is(), cb.ie(), ni.ox1, g);
    let j_cell = load_cell(cb.js(), cb.je(), ni.ox2, g);
    let k_cell = load_cell(cb.ks(), cb.ke(), ni.ox3, g);

    let x1 = {
        let (si, ei) = widen_load(load_face(cb.is(), cb.ie(), ni.ox1, g), ni.ox1, widen);
        Range3::new(si, ei, j_cell.0, j_cell.1, k_cell.0, k_cell.1)
    };
    let x2 = {
        let (sj, ej) = if sz.nx2 == 1 {
            (cb.js(), cb.je())
        } else {
            widen_load(load_face(cb.js(), cb.je(), ni.ox2, g), ni.ox2, widen)
        };
        Range3::new(i_cell.0, i_cell.1, sj, ej, k_cell.0, k_cell.1)
    };
    let x3 = {
        let (sk, ek) = if sz.nx3 == 1 {
            (cb.ks(), cb.ke())
        } else {
            widen_load(load_face(cb.ks(), cb.ke(), ni.ox3, g), ni.ox3, widen)
        };
        Range3::new(i_cell.0, i_cell.1, j_cell.0, j_cell.1, sk, ek)
    };
    [x1, x2, x3]
}

/// Unpack ranges for face-centered data received from a same-level
/// neighbor. For a uniform grid the face neighbors take care of the
/// overlapping faces, so the shared face itself is skipped.
pub fn fc_set_same_level(geom: &BlockGeometry, ni: &NeighborIndexes) -> [Range3; 3] {
    let cb = &geom.cellbounds;
    let g = geom.nghost;
    let sz = geom.size;
    let widen = geom.multilevel && ni.connect != NeighborConnect::Face;

    let i_cell = set_cell(cb.is(), cb.ie(), ni.ox1, g);
    let j_cell = set_cell(cb.js(), cb.je(), ni.ox2, g);
    let k_cell = set_cell(cb.ks(), cb.ke(), ni.ox3, g);

    let x1 = {
        let (si, ei) = widen_set(set_face(cb.is(), cb.ie(), ni.ox1, g), ni.ox1, widen);
        Range3::new(si, ei, j_cell.0, j_cell.1, k_cell.0, k_cell.1)
    };
    let x2 = {
        let (sj, ej) = if sz.nx2 == 1 {
            (cb.js(), cb.je())
        } else {
            widen_set(set_face(cb.js(), cb.je(), ni.ox2, g), ni.ox2, widen)
        };
        Range3::new(i_cell.0, i_cell.1, sj, ej, k_cell.0, k_cell.1)
    };
    let x3 = {
        let (sk, ek) = if sz.nx3 == 1 {
            (cb.ks(), cb.ke())
        } else {
            widen_set(set_face(cb.ks(), cb.ke(), ni.ox3, g), ni.ox3, widen)
        };
        Range3::new(i_cell.0, i_cell.1, j_cell.0, j_cell.1, sk, ek)
    };
    [x1, x2, x3]
}

/// Coarse-index windows restricted and packed when sending face-centered
/// data to a coarser neighbor. A level difference implies a multilevel
/// mesh, so edge/corner widening applies unconditionally here.
pub fn fc_load_to_coarser(geom: &BlockGeometry, ni: &NeighborIndexes) -> [Range3; 3] {
    let cb = &geom.c_cellbounds;
    let g = geom.nghost;
    let sz = geom.size;
    let widen = ni.connect != NeighborConnect::Face;

    let i_cell = load_cell(cb.is(), cb.ie(), ni.ox1, g);
    let j_cell = load_cell(cb.js(), cb.je(), ni.ox2, g);
    let k_cell = load_cell(cb.ks(), cb.ke(), ni.ox3, g);

    let x1 = {
        let (si, ei) = widen_load(load_face(cb.is(), cb.ie(), ni.ox1, g), ni.ox1, widen);
        Range3::new(si, ei, j_cell.0, j_cell.1, k_cell.0, k_cell.1)
    };
    let x2 = {
        let (sj, ej) = if sz.nx2 == 1 {
            (cb.js(), cb.je())
        } else {
            widen_load(load_face(cb.js(), cb.je(), ni.ox2, g), ni.ox2, widen)
        };
        Range3::new(i_cell.0, i_cell.1, sj, ej, k_cell.0, k_cell.1)
    };
    let x3 = {
        let (sk, ek) = if sz.nx3 == 1 {
            (cb.ks(), cb.ke())
        } else {
            widen_load(load_face(cb.ks(), cb.ke(), ni.ox3, g), ni.ox3, widen)
        };
        Range3::new(i_cell.0, i_cell.1, j_cell.0, j_cell.1, sk, ek)
    };
    [x1, x2, x3]
}

/// Pack ranges for sending face-centered data toward a finer neighbor; the
/// target block prolongates afterwards, so every axis keeps the stencil
/// margin.
pub fn fc_load_to_finer(geom: &BlockGeometry, ni: &NeighborIndexes) -> [Range3; 3] {
    let cb = &geom.cellbounds;
    let cng = geom.cnghost;
    let sz = geom.size;

    let i_tang = load_finer_tang(cb.is(), cb.ie(), ni.ox1, sz.nx1, true, ni.fi1, cng);
    let j_tang = load_finer_tang(cb.js(), cb.je(), ni.ox2, sz.nx2, sz.nx2 > 1, fsel_j(ni), cng);
    let k_tang = load_finer_tang(cb.ks(), cb.ke(), ni.ox3, sz.nx3, sz.nx3 > 1, fsel_k(ni), cng);

    let x1 = {
        let (si, ei) = load_finer_face(cb.is(), cb.ie(), ni.ox1, sz.nx1, true, ni.fi1, cng);
        Range3::new(si, ei, j_tang.0, j_tang.1, k_tang.0, k_tang.1)
    };
    let x2 = {
        let (sj, ej) =
            load_finer_face(cb.js(), cb.je(), ni.ox2, sz.nx2, sz.nx2 > 1, fsel_j(ni), cng);
        Range3::new(i_tang.0, i_tang.1, sj, ej, k_tang.0, k_tang.1)
    };
    let x3 = {
        let (sk, ek) =
            load_finer_face(cb.ks(), cb.ke(), ni.ox3, sz.nx3, sz.nx3 > 1, fsel_k(ni), cng);
        Range3::new(i_tang.0, i_tang.1, j_tang.0, j_tang.1, sk, ek)
    };
    [x1, x2, x3]
}

/// Coarse-scratch unpack ranges for face-centered data received from a
/// coarser neighbor.
pub fn fc_set_from_coarser(geom: &BlockGeometry, ni: &NeighborIndexes) -> [Range3; 3] {
    let cb = &geom.c_cellbounds;
    let cng = geom.cnghost;
    let sz = geom.size;
    let loc = geom.loc;

    let i_tang = set_coarser_tang(cb.is(), cb.ie(), ni.ox1, true, loc.lx1 & 1 == 0, cng);
    let j_tang = set_coarser_tang(cb.js(), cb.je(), ni.ox2, sz.nx2 > 1, loc.lx2 & 1 == 0, cng);
    let k_tang = set_coarser_tang(cb.ks(), cb.ke(), ni.ox3, sz.nx3 > 1, loc.lx3 & 1 == 0, cng);

    let x1 = {
        let (si, ei) = set_coarser_face(cb.is(), cb.ie(), ni.ox1, true, loc.lx1 & 1 == 0, cng);
        Range3::new(si, ei, j_tang.0, j_tang.1, k_tang.0, k_tang.1)
    };
    let x2 = {
        let (sj, ej) =
            set_coarser_face(cb.js(), cb.je(), ni.ox2, sz.nx2 > 1, loc.lx2 & 1 == 0, cng);
        Range3::new(i_tang.0, i_tang.1, sj, ej, k_tang.0, k_tang.1)
    };
    let x3 = {
        let (sk, ek) =
            set_coarser_face(cb.ks(), cb.ke(), ni.ox3, sz.nx3 > 1, loc.lx3 & 1 == 0, cng);
        Range3::new(i_tang.0, i_tang.1, j_tang.0, j_tang.1, sk, ek)
    };
    [x1, x2, x3]
}

/// Unpack ranges for already-restricted face-centered data received from a
/// finer neighbor.
pub fn fc_set_from_finer(geom: &BlockGeometry, ni: &NeighborIndexes) -> [Range3; 3] {
    let cb = &geom.cellbounds;
    let g = geom.nghost;
    let sz = geom.size;
    let widen = ni.connect != NeighborConnect::Face;

    let i_tang = set_finer_tang(cb.is(), cb.ie(), ni.ox1, sz.nx1, true, ni.fi1, g);
    let j_tang = set_finer_tang(cb.js(), cb.je(), ni.ox2, sz.nx2, sz.nx2 > 1, fsel_j(ni), g);
    let k_tang = set_finer_tang(cb.ks(), cb.ke(), ni.ox3, sz.nx3, sz.nx3 > 1, fsel_k(ni), g);

    let x1 = {
        let (si, ei) = widen_set(
            set_finer_face(cb.is(), cb.ie(), ni.ox1, sz.nx1, true, ni.fi1, g),
            ni.ox1,
            widen,
        );
        Range3::new(si, ei, j_tang.0, j_tang.1, k_tang.0, k_tang.1)
    };
    let x2 = {
        let (sj, ej) = widen_set(
            set_finer_face(cb.js(), cb.je(), ni.ox2, sz.nx2, sz.nx2 > 1, fsel_j(ni), g),
            ni.ox2,
            widen,
        );
        Range3::new(i_tang.0, i_tang.1, sj, ej, k_tang.0, k_tang.1)
    };
    let x3 = {
        let (sk, ek) = widen_set(
            set_finer_face(cb.ks(), cb.ke(), ni.ox3, sz.nx3, sz.nx3 > 1, fsel_k(ni), g),
            ni.ox3,
            widen,
        );
        Range3::new(i_tang.0, i_tang.1, j_tang.0, j_tang.1, sk, ek)
    };
    [x1, x2, x3]
}
