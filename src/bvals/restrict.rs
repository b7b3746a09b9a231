//! Restriction: coarsening fine-block data into the coarse index windows
//! that travel to coarser neighbors.
//!
//! The trait seam exists so a solver can substitute a conservative or
//! high-order operator; the exchange only requires that restriction be a
//! projection (restricting a uniform field reproduces the uniform value).
//! Prolongation is deliberately absent: from-coarser payloads land in the
//! coarse scratch arrays and an external interpolator consumes them.

use crate::bvals::bounds::Range3;
use crate::field::{Array3, Axis};
use crate::mesh::block::BlockGeometry;

/// Coarsens fine data into coarse-index windows.
///
/// `range` is expressed in coarse indices; implementations map each coarse
/// cell (or face) to its fine children through the block geometry.
pub trait Restriction: Send + Sync {
    /// Restricts cell-centered data over `range`.
    fn restrict_cc(&self, fine: &Array3, coarse: &mut Array3, range: &Range3, geom: &BlockGeometry);

    /// Restricts the face-centered component normal to `axis` over `range`.
    /// Faces average over their tangential fine children only; the normal
    /// index maps exactly onto a fine face.
    fn restrict_fc(
        &self,
        axis: Axis,
        fine: &Array3,
        coarse: &mut Array3,
        range: &Range3,
        geom: &BlockGeometry,
    );
}

/// Uniform-weight averaging: cell values over their 2^d fine children, face
/// values over the 2^(d-1) fine faces they cover. Exact for uniform grids;
/// a curvilinear solver would swap in an area/volume-weighted operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct VolumeAverage;

#[inline]
fn fine_index(c: i64, cs: i64, fs: i64, active: bool) -> i64 {
    if active { (c - cs) * 2 + fs } else { c }
}

impl Restriction for VolumeAverage {
    fn restrict_cc(&self, fine: &Array3, coarse: &mut Array3, range: &Range3, geom: &BlockGeometry) {
        let cb = &geom.cellbounds;
        let ccb = &geom.c_cellbounds;
        let f2 = geom.size.nx2 > 1;
        let f3 = geom.size.nx3 > 1;
        let (d2, d3) = (f2 as i64, f3 as i64);
        let weight = 1.0 / (2.0 * (1 + d2) as f64 * (1 + d3) as f64);

        for ck in range.sk..=range.ek {
            let k = fine_index(ck, ccb.ks(), cb.ks(), f3);
            for cj in range.sj..=range.ej {
                let j = fine_index(cj, ccb.js(), cb.js(), f2);
                for ci in range.si..=range.ei {
                    let i = fine_index(ci, ccb.is(), cb.is(), true);
                    let mut sum = 0.0;
                    for dk in 0..=d3 {
                        for dj in 0..=d2 {
                            for di in 0..=1 {
                                sum += fine.at(k + dk, j + dj, i + di);
                            }
                        }
                    }
                    *coarse.at_mut(ck, cj, ci) = sum * weight;
                }
            }
        }
    }

    fn restrict_fc(
        &self,
        axis: Axis,
        fine: &Array3,
        coarse: &mut Array3,
        range: &Range3,
        geom: &BlockGeometry,
    ) {
        let cb = &geom.cellbounds;
        let ccb = &geom.c_cellbounds;
        let f2 = geom.size.nx2 > 1;
        let f3 = geom.size.nx3 > 1;

        // Tangential child offsets per component; the normal axis maps 1:1
        // onto fine faces.
        let (amax, bmax) = match axis {
            Axis::X1 => (f2 as i64, f3 as i64), // a: dj, b: dk
            Axis::X2 => (1, f3 as i64),         // a: di, b: dk
            Axis::X3 => (1, f2 as i64),         // a: di, b: dj
        };
        let nchild = ((amax + 1) * (bmax + 1)) as f64;

        for ck in range.sk..=range.ek {
            let k = fine_index(ck, ccb.ks(), cb.ks(), f3);
            for cj in range.sj..=range.ej {
                let j = fine_index(cj, ccb.js(), cb.js(), f2);
                for ci in range.si..=range.ei {
                    let i = fine_index(ci, ccb.is(), cb.is(), true);
                    let mut sum = 0.0;
                    for b in 0..=bmax {
                        for a in 0..=amax {
                            let (dk, dj, di) = match axis {
                                Axis::X1 => (b, a, 0),
                                Axis::X2 => (b, 0, a),
                                Axis::X3 => (0, b, a),
                            };
                            sum += fine.at(k + dk, j + dj, i + di);
                        }
                    }
                    *coarse.at_mut(ck, cj, ci) = sum / nchild;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::block::{BlockGeometry, BlockId, BlockSize, LogicalLocation};

    fn geom(nx: (i64, i64, i64)) -> BlockGeometry {
        BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(nx.0, nx.1, nx.2),
            2,
            true,
            vec![],
            None,
        )
        .unwrap()
    }

    #[test]
    fn uniform_field_is_a_fixed_point() {
        let geom = geom((8, 8, 1));
        let shape = &geom.cellbounds;
        let cshape = &geom.c_cellbounds;
        let mut fine = Array3::cell_centered(shape);
        fine.fill(3.25);
        let mut coarse = Array3::cell_centered(cshape);
        let range = Range3::new(cshape.is(), cshape.ie(), cshape.js(), cshape.je(), 0, 0);
        VolumeAverage.restrict_cc(&fine, &mut coarse, &range, &geom);
        for j in range.sj..=range.ej {
            for i in range.si..=range.ei {
                assert_eq!(coarse.at(0, j, i), 3.25);
            }
        }

        for axis in [Axis::X1, Axis::X2, Axis::X3] {
            let mut fine_f = Array3::face_centered(shape, axis);
            fine_f.fill(1.5);
            let mut coarse_f = Array3::face_centered(cshape, axis);
            let extra = if axis == Axis::X1 { 1 } else { 0 };
            let range = Range3::new(
                cshape.is(),
                cshape.ie() + extra,
                cshape.js(),
                cshape.je() + if axis == Axis::X2 { 1 } else { 0 },
                0,
                0,
            );
            VolumeAverage.restrict_fc(axis, &fine_f, &mut coarse_f, &range, &geom);
            for j in range.sj..=range.ej {
                for i in range.si..=range.ei {
                    assert_eq!(coarse_f.at(0, j, i), 1.5, "axis {axis:?}");
                }
            }
        }
    }

    #[test]
    fn cc_averages_children_1d() {
        let geom = geom((8, 1, 1));
        let cb = &geom.cellbounds;
        let ccb = &geom.c_cellbounds;
        let mut fine = Array3::cell_centered(cb);
        for i in 0..cb.ncells1() {
            *fine.at_mut(0, 0, i) = i as f64;
        }
        let mut coarse = Array3::cell_centered(ccb);
        let range = Range3::new(ccb.is(), ccb.ie(), 0, 0, 0, 0);
        VolumeAverage.restrict_cc(&fine, &mut coarse, &range, &geom);
        for ci in range.si..=range.ei {
            let i = (ci - ccb.is()) * 2 + cb.is();
            assert_eq!(coarse.at(0, 0, ci), (i as f64 + (i + 1) as f64) / 2.0);
        }
    }

    #[test]
    fn fc_normal_faces_map_exactly_1d() {
        // In 1D the x1 face has no tangential children: restriction picks
        // the coincident fine face value.
        let geom = geom((8, 1, 1));
        let cb = &geom.cellbounds;
        let ccb = &geom.c_cellbounds;
        let mut fine = Array3::face_centered(cb, Axis::X1);
        for i in 0..(cb.ncells1() + 1) {
            *fine.at_mut(0, 0, i) = 10.0 * i as f64;
        }
        let mut coarse = Array3::face_centered(ccb, Axis::X1);
        let range = Range3::new(ccb.is(), ccb.ie() + 1, 0, 0, 0, 0);
        VolumeAverage.restrict_fc(Axis::X1, &fine, &mut coarse, &range, &geom);
        for ci in range.si..=range.ei {
            let i = (ci - ccb.is()) * 2 + cb.is();
            assert_eq!(coarse.at(0, 0, ci), 10.0 * i as f64);
        }
    }

    #[test]
    fn fc_tangential_average_2d() {
        let geom = geom((4, 4, 1));
        let cb = &geom.cellbounds;
        let ccb = &geom.c_cellbounds;
        let mut fine = Array3::face_centered(cb, Axis::X1);
        // x1 face value = j index, so a coarse face averages two j children
        for j in 0..cb.ncells2() {
            for i in 0..(cb.ncells1() + 1) {
                *fine.at_mut(0, j, i) = j as f64;
            }
        }
        let mut coarse = Array3::face_centered(ccb, Axis::X1);
        let range = Range3::new(ccb.is(), ccb.ie() + 1, ccb.js(), ccb.je(), 0, 0);
        VolumeAverage.restrict_fc(Axis::X1, &fine, &mut coarse, &range, &geom);
        for cj in range.sj..=range.ej {
            let j = (cj - ccb.js()) * 2 + cb.js();
            for ci in range.si..=range.ei {
                assert_eq!(coarse.at(0, cj, ci), (2 * j + 1) as f64 / 2.0);
            }
        }
    }
}
