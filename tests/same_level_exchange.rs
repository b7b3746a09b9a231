//! End-to-end same-level ghost exchange: two 4-cell 1D blocks, ghost
//! width 2, once on a single rank (direct delivery) and once across two
//! in-process ranks (mailbox channels).

use std::sync::Arc;

use amr_bvals::prelude::*;
use serial_test::serial;

/// Geometry for one of the two blocks; `rank_of` assigns block ownership.
fn block_geom(which: usize, rank_of: [usize; 2]) -> Arc<BlockGeometry> {
    let (gid, lx1, nb_block, ox1) = match which {
        0 => (1u64, 0i64, 2u64, 1i64),
        _ => (2, 1, 1, -1),
    };
    let nb = NeighborDescriptor {
        ni: NeighborIndexes::face(ox1, 0, 0),
        block: BlockId::new(nb_block).unwrap(),
        level: 0,
        rank: rank_of[1 - which],
        lid: 0,
        bufid: 0,
        target_slot: 0,
    };
    Arc::new(
        BlockGeometry::new(
            BlockId::new(gid).unwrap(),
            0,
            rank_of[which],
            LogicalLocation { lx1, ..Default::default() },
            BlockSize::new(4, 1, 1),
            2,
            false,
            vec![nb],
            None,
        )
        .unwrap(),
    )
}

/// Global cell value: 10 * global index along x1.
fn filled(geom: Arc<BlockGeometry>) -> CellCenteredBvar {
    let lx1 = geom.loc.lx1;
    let mut var = CellCenteredBvar::new("u", geom, 0);
    for i in 2..=5 {
        *var.data.at_mut(0, 0, i) = (lx1 * 4 + i - 2) as f64 * 10.0;
    }
    var
}

fn check_ghosts(var: &CellCenteredBvar) {
    let lx1 = var.geometry().loc.lx1;
    if lx1 == 0 {
        // right ghosts continue into the neighbor's interior
        assert_eq!(var.data.at(0, 0, 6), 40.0);
        assert_eq!(var.data.at(0, 0, 7), 50.0);
    } else {
        // left ghosts reach back into the neighbor's interior
        assert_eq!(var.data.at(0, 0, 0), 20.0);
        assert_eq!(var.data.at(0, 0, 1), 30.0);
    }
    // interior untouched
    assert_eq!(var.data.at(0, 0, 2), lx1 as f64 * 40.0);
}

#[test]
fn single_rank_direct_delivery() {
    let mut set = ExchangeSet::new(11);
    set.add_variable(Box::new(filled(block_geom(0, [0, 0]))));
    set.add_variable(Box::new(filled(block_geom(1, [0, 0]))));
    set.setup(&NoComm).unwrap();

    set.start_receiving(BoundaryCommPhase::All).unwrap();
    set.send_all().unwrap();
    assert!(set.try_set_boundaries().unwrap());
    set.clear_boundary(BoundaryCommPhase::All).unwrap();

    for idx in 0..2 {
        let var = set
            .variable(idx)
            .as_any()
            .downcast_ref::<CellCenteredBvar>()
            .unwrap();
        check_ghosts(var);
    }
}

#[test]
#[serial]
fn two_ranks_over_the_mailbox() {
    MailboxComm::clear_all();
    // one exchange set per "rank", same address space
    let mut set0 = ExchangeSet::new(11);
    set0.add_variable(Box::new(filled(block_geom(0, [0, 1]))));
    set0.setup(&MailboxComm::new(0, 2)).unwrap();
    let mut set1 = ExchangeSet::new(11);
    set1.add_variable(Box::new(filled(block_geom(1, [0, 1]))));
    set1.setup(&MailboxComm::new(1, 2)).unwrap();

    set0.start_receiving(BoundaryCommPhase::All).unwrap();
    set1.start_receiving(BoundaryCommPhase::All).unwrap();
    set0.send_all().unwrap();
    set1.send_all().unwrap();
    set0.set_boundaries().unwrap();
    set1.set_boundaries().unwrap();
    set0.clear_boundary(BoundaryCommPhase::All).unwrap();
    set1.clear_boundary(BoundaryCommPhase::All).unwrap();

    for set in [&set0, &set1] {
        let var = set
            .variable(0)
            .as_any()
            .downcast_ref::<CellCenteredBvar>()
            .unwrap();
        check_ghosts(var);
    }
}

#[test]
#[serial]
fn polling_converges_across_ranks() {
    MailboxComm::clear_all();
    let mut set0 = ExchangeSet::new(3);
    set0.add_variable(Box::new(filled(block_geom(0, [0, 1]))));
    set0.setup(&MailboxComm::new(0, 2)).unwrap();
    let mut set1 = ExchangeSet::new(3);
    set1.add_variable(Box::new(filled(block_geom(1, [0, 1]))));
    set1.setup(&MailboxComm::new(1, 2)).unwrap();

    set0.start_receiving(BoundaryCommPhase::All).unwrap();
    set1.start_receiving(BoundaryCommPhase::All).unwrap();

    // nothing sent yet: polling must report pending work, not fail
    assert!(!set0.try_set_boundaries().unwrap());

    set0.send_all().unwrap();
    set1.send_all().unwrap();
    assert!(set0.try_set_boundaries().unwrap());
    assert!(set1.try_set_boundaries().unwrap());
}
