//! Exchange across a refinement jump: a coarse block and the fine child
//! adjoining it, both holding the same constant field. Restriction must
//! reproduce the constant in the coarse block's ghosts, and the fine
//! block's coarse scratch must receive the constant for prolongation.

use std::sync::Arc;

use amr_bvals::bvals::bounds;
use amr_bvals::prelude::*;

const VALUE: f64 = 3.0;

/// Coarse block (level 0, lx1 = 0) with a finer neighbor on its right.
fn coarse_geom() -> Arc<BlockGeometry> {
    let nb = NeighborDescriptor {
        ni: NeighborIndexes::face(1, 0, 0),
        block: BlockId::new(2).unwrap(),
        level: 1,
        rank: 0,
        lid: 1,
        bufid: 0,
        target_slot: 0,
    };
    Arc::new(
        BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(8, 1, 1),
            2,
            true,
            vec![nb],
            None,
        )
        .unwrap(),
    )
}

/// Fine block (level 1, lx1 = 2: left child of coarse cell 1) with a
/// coarser neighbor on its left.
fn fine_geom() -> Arc<BlockGeometry> {
    let nb = NeighborDescriptor {
        ni: NeighborIndexes::face(-1, 0, 0),
        block: BlockId::new(1).unwrap(),
        level: 0,
        rank: 0,
        lid: 0,
        bufid: 0,
        target_slot: 0,
    };
    Arc::new(
        BlockGeometry::new(
            BlockId::new(2).unwrap(),
            1,
            0,
            LogicalLocation { lx1: 2, level: 1, ..Default::default() },
            BlockSize::new(8, 1, 1),
            2,
            true,
            vec![nb],
            None,
        )
        .unwrap(),
    )
}

fn constant_var(geom: Arc<BlockGeometry>) -> CellCenteredBvar {
    let mut var = CellCenteredBvar::new("u", geom, 0);
    var.data.fill(VALUE);
    var
}

#[test]
fn constant_field_survives_the_refinement_jump() {
    let mut set = ExchangeSet::new(5);
    let coarse_idx = set.add_variable(Box::new(constant_var(coarse_geom())));
    let fine_idx = set.add_variable(Box::new(constant_var(fine_geom())));
    set.setup(&NoComm).unwrap();

    set.start_receiving(BoundaryCommPhase::All).unwrap();
    set.send_all().unwrap();
    assert!(set.try_set_boundaries().unwrap());
    set.clear_boundary(BoundaryCommPhase::All).unwrap();

    // fine -> coarse: restricted data lands in the coarse block's ghosts
    let coarse = set
        .variable(coarse_idx)
        .as_any()
        .downcast_ref::<CellCenteredBvar>()
        .unwrap();
    let range = bounds::cc_set_from_finer(coarse.geometry(), &coarse.geometry().neighbors[0].ni);
    for k in range.sk..=range.ek {
        for j in range.sj..=range.ej {
            for i in range.si..=range.ei {
                assert_eq!(coarse.data.at(k, j, i), VALUE, "coarse ghost ({k},{j},{i})");
            }
        }
    }

    // coarse -> fine: the payload lands in the fine block's coarse scratch
    let fine = set
        .variable(fine_idx)
        .as_any()
        .downcast_ref::<CellCenteredBvar>()
        .unwrap();
    let range = bounds::cc_set_from_coarser(fine.geometry(), &fine.geometry().neighbors[0].ni);
    for k in range.sk..=range.ek {
        for j in range.sj..=range.ej {
            for i in range.si..=range.ei {
                assert_eq!(fine.coarse.at(k, j, i), VALUE, "fine scratch ({k},{j},{i})");
            }
        }
    }
}

#[test]
fn face_field_constant_survives_too() {
    let mut set = ExchangeSet::new(5);
    let coarse_idx = set.add_variable(Box::new({
        let mut var = FaceCenteredBvar::new("B", coarse_geom(), 2);
        var.data.fill(VALUE);
        var
    }));
    set.add_variable(Box::new({
        let mut var = FaceCenteredBvar::new("B", fine_geom(), 2);
        var.data.fill(VALUE);
        var
    }));
    set.setup(&NoComm).unwrap();

    set.start_receiving(BoundaryCommPhase::All).unwrap();
    set.send_all().unwrap();
    assert!(set.try_set_boundaries().unwrap());

    let coarse = set
        .variable(coarse_idx)
        .as_any()
        .downcast_ref::<FaceCenteredBvar>()
        .unwrap();
    let ranges = bounds::fc_set_from_finer(coarse.geometry(), &coarse.geometry().neighbors[0].ni);
    for (comp, range) in [&coarse.data.x1f, &coarse.data.x2f, &coarse.data.x3f]
        .into_iter()
        .zip(&ranges)
    {
        for k in range.sk..=range.ek {
            for j in range.sj..=range.ej {
                for i in range.si..=range.ei {
                    assert_eq!(comp.at(k, j, i), VALUE, "coarse face ghost ({k},{j},{i})");
                }
            }
        }
    }
}
