//! Pack/unpack engine: moves data between `(k, j, i)` arrays and flat
//! message buffers.
//!
//! Both directions walk a [`Range3`] in `k`-slowest order at a running
//! offset so one buffer carries several ranges back-to-back (the three
//! face-centered components travel in one message). With the `par-pack`
//! feature the copy parallelizes over `k` planes; planes touch disjoint
//! buffer and array regions, so the split is free of coordination.

use crate::bvals::bounds::Range3;
use crate::field::Array3;

#[cfg(feature = "par-pack")]
use rayon::prelude::*;

#[inline]
fn span(s: i64, e: i64) -> usize {
    (e - s + 1).max(0) as usize
}

/// Copies `range` of `src` into `buf` starting at `*offset`; advances the
/// offset by the element count.
///
/// # Panics
/// Panics if the buffer is too short for the range at the offset. Callers
/// size buffers from the same arithmetic, so this indicates a logic error.
pub fn pack_range(src: &Array3, range: &Range3, buf: &mut [f64], offset: &mut usize) {
    let (ni, nj, nk) = (
        span(range.si, range.ei),
        span(range.sj, range.ej),
        span(range.sk, range.ek),
    );
    let count = ni * nj * nk;
    if count == 0 {
        return;
    }
    let out = &mut buf[*offset..*offset + count];

    let copy_plane = |k: i64, plane: &mut [f64]| {
        let mut p = 0;
        for j in range.sj..=range.ej {
            for i in range.si..=range.ei {
                plane[p] = src.at(k, j, i);
                p += 1;
            }
        }
    };

    #[cfg(feature = "par-pack")]
    out.par_chunks_mut(ni * nj)
        .enumerate()
        .for_each(|(dk, plane)| copy_plane(range.sk + dk as i64, plane));

    #[cfg(not(feature = "par-pack"))]
    for (dk, plane) in out.chunks_mut(ni * nj).enumerate() {
        copy_plane(range.sk + dk as i64, plane);
    }

    *offset += count;
}

/// Copies from `buf` starting at `*offset` into `range` of `dst`; advances
/// the offset by the element count.
///
/// # Panics
/// Panics if the buffer is too short for the range at the offset.
pub fn unpack_range(dst: &mut Array3, range: &Range3, buf: &[f64], offset: &mut usize) {
    let (ni, nj, nk) = (
        span(range.si, range.ei),
        span(range.sj, range.ej),
        span(range.sk, range.ek),
    );
    let count = ni * nj * nk;
    if count == 0 {
        return;
    }
    let src = &buf[*offset..*offset + count];
    let (_, n2, n1) = dst.extents();
    let plane_len = n2 * n1;
    let (sk, ek) = (range.sk, range.ek);

    let fill_plane = |k: i64, plane: &mut [f64]| {
        let base = (k - sk) as usize * nj * ni;
        for (dj, j) in (range.sj..=range.ej).enumerate() {
            let row = base + dj * ni;
            let dst_row = j as usize * n1 + range.si as usize;
            plane[dst_row..dst_row + ni].copy_from_slice(&src[row..row + ni]);
        }
    };

    #[cfg(feature = "par-pack")]
    dst.as_mut_slice()
        .par_chunks_mut(plane_len)
        .enumerate()
        .filter(|&(k, _)| (k as i64) >= sk && (k as i64) <= ek)
        .for_each(|(k, plane)| fill_plane(k as i64, plane));

    #[cfg(not(feature = "par-pack"))]
    for (k, plane) in dst.as_mut_slice().chunks_mut(plane_len).enumerate() {
        if (k as i64) >= sk && (k as i64) <= ek {
            fill_plane(k as i64, plane);
        }
    }

    *offset += count;
}

/// Zeroes `range` of `dst`: the unpack counterpart of a null message when
/// the receiving variable is allocated.
pub fn zero_fill_range(dst: &mut Array3, range: &Range3) {
    for k in range.sk..=range.ek {
        for j in range.sj..=range.ej {
            for i in range.si..=range.ei {
                *dst.at_mut(k, j, i) = 0.0;
            }
        }
    }
}

/// Replicates the x2 face layer `sj` into `sj + 1` over the `i`/`k` extent
/// of `range`. On a 1D run the x2 face component has no second layer of its
/// own; both faces of the single cell carry the same value.
pub fn replicate_x2_face(arr: &mut Array3, range: &Range3) {
    for k in range.sk..=range.ek {
        for i in range.si..=range.ei {
            *arr.at_mut(k, range.sj + 1, i) = arr.at(k, range.sj, i);
        }
    }
}

/// Replicates the x3 face layer `sk` into `sk + 1`: the 1D/2D analogue of
/// [`replicate_x2_face`] for the x3 component.
pub fn replicate_x3_face(arr: &mut Array3, range: &Range3) {
    for j in range.sj..=range.ej {
        for i in range.si..=range.ei {
            *arr.at_mut(range.sk + 1, j, i) = arr.at(range.sk, j, i);
        }
    }
}
