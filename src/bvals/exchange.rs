//! The exchange driver: one `ExchangeSet` per rank owns every boundary
//! variable on that rank and walks the whole batch through the
//! start-receiving / send / set / clear cycle.
//!
//! Same-rank boundaries never touch a channel. Each variable registers the
//! key it expects payloads under; a sender whose neighbor lives on this
//! rank derives the identical key and hands the payload over directly.
//! Cross-rank boundaries go through the persistent channels the variables
//! opened at setup.
//!
//! Iteration order over boundaries comes from two seeded shuffles (one for
//! sends, one for receives) cached between cycles. The caches snapshot
//! every variable's storage identity; any drift (regrid, re-allocation,
//! sparse data appearing or vanishing) is detected on the next cycle and
//! answered with a rebuild, never an error.

use std::collections::HashMap;

use log::debug;

use crate::bvals::cache::{BndEntry, BufferCache, CommKey, recv_key, send_key};
use crate::bvals::{BoundaryCommPhase, BoundaryVariable};
use crate::comm::Communicator;
use crate::error::BvalsError;

/// All boundary variables of one rank plus the routing and ordering state
/// shared between them.
pub struct ExchangeSet {
    vars: Vec<Box<dyn BoundaryVariable>>,
    /// Same-rank routing: receive key -> (variable index, boundary slot).
    registry: HashMap<CommKey, (usize, usize)>,
    send_cache: BufferCache,
    recv_cache: BufferCache,
    /// Per shuffled receive position: boundary already unpacked this cycle.
    set_done: Vec<bool>,
    rebuild_count: u64,
}

impl ExchangeSet {
    /// Empty set. `seed` fixes both iteration shuffles; any value is valid
    /// and no correctness property depends on it.
    pub fn new(seed: u64) -> Self {
        Self {
            vars: Vec::new(),
            registry: HashMap::new(),
            send_cache: BufferCache::new(seed),
            recv_cache: BufferCache::new(!seed),
            set_done: Vec::new(),
            rebuild_count: 0,
        }
    }

    /// Adds a variable and returns its index within the set.
    pub fn add_variable(&mut self, var: Box<dyn BoundaryVariable>) -> usize {
        self.vars.push(var);
        self.vars.len() - 1
    }

    pub fn variable(&self, idx: usize) -> &dyn BoundaryVariable {
        self.vars[idx].as_ref()
    }

    pub fn variable_mut(&mut self, idx: usize) -> &mut dyn BoundaryVariable {
        self.vars[idx].as_mut()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Number of cache rebuilds so far (setup counts as the first).
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Opens channels for every variable and rebuilds the same-rank routing
    /// registry. Must run after construction and again after every regrid.
    pub fn setup(&mut self, comm: &dyn Communicator) -> Result<(), BvalsError> {
        self.registry.clear();
        for (var_idx, var) in self.vars.iter_mut().enumerate() {
            var.setup_channels(comm)?;
            let geom = var.geometry();
            for (nb_idx, nb) in geom.neighbors.iter().enumerate() {
                if nb.rank == geom.rank {
                    let key = recv_key(geom, nb, var.label());
                    self.registry.insert(key, (var_idx, nb_idx));
                }
            }
        }
        self.refresh_caches();
        debug!(
            "exchange set: {} variables, {} boundaries, {} local routes",
            self.vars.len(),
            self.send_cache.len(),
            self.registry.len()
        );
        Ok(())
    }

    fn live_entries(&self) -> Vec<BndEntry> {
        let mut live = Vec::new();
        for (var_idx, var) in self.vars.iter().enumerate() {
            let serial = var.storage_serial();
            let allocated = var.is_allocated();
            for (nb_idx, nb) in var.geometry().neighbors.iter().enumerate() {
                live.push(BndEntry {
                    var_idx,
                    nb_idx,
                    bufid: nb.bufid,
                    serial,
                    allocated,
                });
            }
        }
        live
    }

    fn refresh_caches(&mut self) {
        let live = self.live_entries();
        if self.send_cache.is_stale(&live) || self.recv_cache.is_stale(&live) {
            self.send_cache.rebuild(live.clone());
            self.recv_cache.rebuild(live);
            self.set_done = vec![false; self.recv_cache.len()];
            self.rebuild_count += 1;
            debug!(
                "boundary caches rebuilt ({} entries, rebuild #{})",
                self.send_cache.len(),
                self.rebuild_count
            );
        }
    }

    /// Arms cross-rank receives on every variable.
    pub fn start_receiving(&mut self, phase: BoundaryCommPhase) -> Result<(), BvalsError> {
        self.refresh_caches();
        for var in &mut self.vars {
            var.start_receiving(phase)?;
        }
        Ok(())
    }

    /// Packs and dispatches every boundary: cross-rank boundaries start
    /// their channel transfer, same-rank boundaries deliver directly into
    /// the receiving variable's buffer.
    pub fn send_all(&mut self) -> Result<(), BvalsError> {
        self.refresh_caches();
        let order: Vec<BndEntry> = self.send_cache.iter().cloned().collect();
        for entry in order {
            let var = &mut self.vars[entry.var_idx];
            var.load_boundary(entry.nb_idx)?;
            let geom = var.geometry();
            let nb = geom.neighbors[entry.nb_idx].clone();
            if nb.rank != geom.rank {
                var.start_send(entry.nb_idx)?;
                continue;
            }
            let key = send_key(geom, &nb, var.label());
            let sender = geom.gid;
            // the payload is copied out so the target may be the sender
            // itself (periodic self-neighbor)
            let payload = var.send_payload(entry.nb_idx)?.to_vec();
            let &(tgt_var, tgt_slot) =
                self.registry
                    .get(&key)
                    .ok_or_else(|| BvalsError::ChannelMissing {
                        sender,
                        receiver: nb.block,
                        label: key.label.clone(),
                        location: key.location,
                    })?;
            self.vars[tgt_var].receive_local(tgt_slot, &payload)?;
        }
        Ok(())
    }

    /// Polls every pending boundary once, unpacking those whose payload has
    /// arrived. Returns true when every boundary of the cycle is set.
    pub fn try_set_boundaries(&mut self) -> Result<bool, BvalsError> {
        let order: Vec<BndEntry> = self.recv_cache.iter().cloned().collect();
        let mut all_done = true;
        for (pos, entry) in order.iter().enumerate() {
            if self.set_done[pos] {
                continue;
            }
            let var = &mut self.vars[entry.var_idx];
            if var.try_receive(entry.nb_idx)? {
                var.set_boundary(entry.nb_idx)?;
                self.set_done[pos] = true;
            } else {
                all_done = false;
            }
        }
        Ok(all_done)
    }

    /// Blocks until every pending boundary has arrived and is set.
    ///
    /// # Errors
    /// A same-rank boundary whose payload was never delivered (a missed
    /// `send_all`) surfaces as `UnexpectedBufferState` rather than hanging.
    pub fn set_boundaries(&mut self) -> Result<(), BvalsError> {
        let order: Vec<BndEntry> = self.recv_cache.iter().cloned().collect();
        for (pos, entry) in order.iter().enumerate() {
            if self.set_done[pos] {
                continue;
            }
            let var = &mut self.vars[entry.var_idx];
            var.wait_receive(entry.nb_idx)?;
            var.set_boundary(entry.nb_idx)?;
            self.set_done[pos] = true;
        }
        Ok(())
    }

    /// Ends the cycle: resets every buffer flag, waits out in-flight sends,
    /// and re-arms the per-cycle bookkeeping.
    pub fn clear_boundary(&mut self, phase: BoundaryCommPhase) -> Result<(), BvalsError> {
        for var in &mut self.vars {
            var.clear_boundary(phase)?;
        }
        self.set_done.iter_mut().for_each(|d| *d = false);
        Ok(())
    }
}
