//! Communication keys and the boundary-buffer cache.
//!
//! The cache flattens "for each variable, for each neighbor" into one list
//! visited in a shuffled order. Shuffling decorrelates the completion order
//! of receives from the neighbor-list order, which otherwise serializes
//! against peers iterating the same way; the permutation is drawn from a
//! seeded `SmallRng` so runs are reproducible, and no correctness property
//! depends on which permutation is in effect.
//!
//! Cached entries snapshot each variable's storage serial and allocation
//! state. Any drift between snapshot and live state (regrid changed the
//! boundary count, a variable re-allocated its storage, sparse data
//! appeared or vanished) invalidates the cache; the owner rebuilds it and
//! carries on. Staleness is recoverable by construction, never an error.

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::mesh::block::{BlockGeometry, BlockId};
use crate::mesh::neighbor::NeighborDescriptor;

/// Identity of one directed communication boundary within a rank:
/// (sending block, receiving block, variable, geometric location). Both
/// ends derive the same key, so same-rank payloads route through a plain
/// map lookup with no handshake.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommKey {
    pub sender: BlockId,
    pub receiver: BlockId,
    pub label: String,
    /// Location index of the boundary in the *sender's* offset cube.
    pub location: usize,
}

/// Key under which this block publishes its payload for neighbor `nb`.
pub fn send_key(geom: &BlockGeometry, nb: &NeighborDescriptor, label: &str) -> CommKey {
    CommKey {
        sender: geom.gid,
        receiver: nb.block,
        label: label.to_owned(),
        location: nb.ni.location_index(),
    }
}

/// Key under which this block looks up the payload neighbor `nb` sent it:
/// the sender's view of the same boundary, so the location index mirrors.
pub fn recv_key(geom: &BlockGeometry, nb: &NeighborDescriptor, label: &str) -> CommKey {
    CommKey {
        sender: nb.block,
        receiver: geom.gid,
        label: label.to_owned(),
        location: nb.ni.mirror_location_index(),
    }
}

/// One cached boundary: which variable, which slot, and the storage
/// identity observed when the cache was built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BndEntry {
    /// Index of the owning variable within the exchange set.
    pub var_idx: usize,
    /// Position of the neighbor in the owning block's neighbor list.
    pub nb_idx: usize,
    /// Boundary slot (`bufid`) of the buffer.
    pub bufid: usize,
    /// Storage serial of the variable at build time.
    pub serial: u64,
    /// Allocation state of the variable at build time.
    pub allocated: bool,
}

/// Shuffled iteration order over the live boundaries of an exchange set.
#[derive(Debug)]
pub struct BufferCache {
    entries: Vec<BndEntry>,
    /// Iteration position -> entry slot.
    order: Vec<usize>,
    seed: u64,
}

impl BufferCache {
    pub fn new(seed: u64) -> Self {
        Self {
            entries: Vec::new(),
            order: Vec::new(),
            seed,
        }
    }

    /// True when `live` no longer matches the snapshot: different count,
    /// different boundary identity, a storage serial moved on, or an
    /// allocation state flipped.
    pub fn is_stale(&self, live: &[BndEntry]) -> bool {
        self.entries != live
    }

    /// Replaces the snapshot and redraws the iteration order.
    pub fn rebuild(&mut self, live: Vec<BndEntry>) {
        let mut order: Vec<usize> = (0..live.len()).collect();
        let mut rng = SmallRng::seed_from_u64(self.seed ^ live.len() as u64);
        order.shuffle(&mut rng);
        self.entries = live;
        self.order = order;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in shuffled order.
    pub fn iter(&self) -> impl Iterator<Item = &BndEntry> {
        self.order.iter().map(|&slot| &self.entries[slot])
    }
}
