//! Cell-centered boundary variable: one scalar field on one block, its
//! coarse scratch, and the boundary machinery serving it.
//!
//! The level relationship of each neighbor picks the path: same-level data
//! packs straight from the ghost-padded array; data for a coarser neighbor
//! is restricted into the coarse scratch first; data from a coarser
//! neighbor lands *in* the coarse scratch, where an external prolongation
//! operator picks it up.

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use crate::bvals::bounds;
use crate::bvals::buffer::{BoundaryBuffer, BoundaryData, BufferState, cc_buffer_size};
use crate::bvals::pack::{pack_range, unpack_range, zero_fill_range};
use crate::bvals::restrict::{Restriction, VolumeAverage};
use crate::bvals::{BoundaryCommPhase, BoundaryVariable, next_storage_serial};
use crate::comm::{Communicator, comm_tag};
use crate::error::BvalsError;
use crate::field::Array3;
use crate::mesh::block::BlockGeometry;
use crate::mesh::neighbor::{NeighborDescriptor, NeighborIndexes};

pub struct CellCenteredBvar {
    label: String,
    geom: Arc<BlockGeometry>,
    /// Ghost-padded cell data.
    pub data: Array3,
    /// Coarse scratch: restriction source for coarser neighbors, landing
    /// zone for from-coarser payloads.
    pub coarse: Array3,
    allocated: bool,
    serial: u64,
    phys: u64,
    bd: BoundaryData,
    restriction: Box<dyn Restriction>,
}

impl CellCenteredBvar {
    /// New allocated variable with zeroed storage. `phys` is the channel
    /// id separating this variable's messages from others on the same
    /// block pair.
    pub fn new(label: impl Into<String>, geom: Arc<BlockGeometry>, phys: u64) -> Self {
        Self {
            label: label.into(),
            data: Array3::cell_centered(&geom.cellbounds),
            coarse: Array3::cell_centered(&geom.c_cellbounds),
            geom,
            allocated: true,
            serial: next_storage_serial(),
            phys,
            bd: BoundaryData::default(),
            restriction: Box::new(VolumeAverage),
        }
    }

    /// Replaces the restriction operator.
    pub fn with_restriction(mut self, restriction: Box<dyn Restriction>) -> Self {
        self.restriction = restriction;
        self
    }

    /// Gives the sparse variable fresh zeroed storage.
    pub fn allocate(&mut self) {
        self.data.fill(0.0);
        self.coarse.fill(0.0);
        self.allocated = true;
        self.serial = next_storage_serial();
    }

    /// Marks the sparse variable empty; it sends null messages until
    /// re-allocated.
    pub fn deallocate(&mut self) {
        self.allocated = false;
        self.serial = next_storage_serial();
    }

    pub fn boundary_data(&self) -> &BoundaryData {
        &self.bd
    }

    pub fn boundary_data_mut(&mut self) -> &mut BoundaryData {
        &mut self.bd
    }

    fn neighbor(&self, n: usize) -> Result<NeighborDescriptor, BvalsError> {
        self.geom.neighbors.get(n).cloned().ok_or({
            BvalsError::BoundaryCountMismatch {
                cached: n,
                found: self.geom.neighbors.len(),
            }
        })
    }

    fn not_set_up(&self) -> BvalsError {
        BvalsError::NotSetUp {
            label: self.label.clone(),
            block: self.geom.gid,
        }
    }

    // `use<>`: the closure owns its captures, so the borrow of `self`
    // ends here and the caller can take `self.bd` mutably afterwards.
    fn size_err(&self, bufid: usize) -> impl FnOnce(usize, usize) -> BvalsError + use<> {
        let label = self.label.clone();
        let block = self.geom.gid;
        move |received, needed| BvalsError::PayloadSizeMismatch {
            label,
            block,
            bufid,
            received,
            needed,
        }
    }
}

impl BoundaryVariable for CellCenteredBvar {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn geometry(&self) -> &Arc<BlockGeometry> {
        &self.geom
    }

    fn is_allocated(&self) -> bool {
        self.allocated
    }

    fn storage_serial(&self) -> u64 {
        self.serial
    }

    fn compute_buffer_size(&self, ni: &NeighborIndexes) -> usize {
        cc_buffer_size(&self.geom, ni)
    }

    fn setup_channels(&mut self, comm: &dyn Communicator) -> Result<(), BvalsError> {
        let geom = Arc::clone(&self.geom);
        let mut bd = BoundaryData::new(geom.neighbors.len());
        for nb in &geom.neighbors {
            let cap = cc_buffer_size(&geom, &nb.ni);
            let mut buf = BoundaryBuffer::new(cap, cap);
            if nb.rank != geom.rank {
                let send_tag = comm_tag(nb.lid, nb.target_slot, self.phys);
                let recv_tag = comm_tag(geom.lid, nb.bufid, self.phys);
                buf.send_channel = Some(comm.send_channel(nb.rank, send_tag, cap));
                buf.recv_channel = Some(comm.recv_channel(nb.rank, recv_tag, cap));
            }
            bd.insert(nb.bufid, buf);
        }
        // dropping the previous BoundaryData frees its channels
        self.bd = bd;
        debug!(
            "cc `{}` block {}: {} boundaries set up",
            self.label,
            self.geom.gid,
            self.geom.neighbors.len()
        );
        Ok(())
    }

    fn start_receiving(&mut self, phase: BoundaryCommPhase) -> Result<(), BvalsError> {
        if phase == BoundaryCommPhase::AmrRegrid {
            return Ok(());
        }
        for (_, buf) in self.bd.iter_mut() {
            if let Some(ch) = &mut buf.recv_channel {
                ch.start();
            }
        }
        Ok(())
    }

    fn clear_boundary(&mut self, phase: BoundaryCommPhase) -> Result<(), BvalsError> {
        for (_, buf) in self.bd.iter_mut() {
            buf.reset_flags();
            if phase != BoundaryCommPhase::AmrRegrid
                && let Some(ch) = &mut buf.send_channel
            {
                ch.wait();
            }
        }
        Ok(())
    }

    fn load_boundary(&mut self, n: usize) -> Result<usize, BvalsError> {
        let nb = self.neighbor(n)?;
        if !self.allocated {
            let err = self.not_set_up();
            let buf = self.bd.get_mut(nb.bufid).ok_or(err)?;
            buf.set_send_len(0);
            buf.sflag = BufferState::Sending;
            return Ok(0);
        }

        let mylevel = self.geom.loc.level;
        let (range, from_coarse) = match nb.level.cmp(&mylevel) {
            Ordering::Equal => (bounds::cc_load_same_level(&self.geom, &nb.ni), false),
            Ordering::Less => {
                let range = bounds::cc_load_to_coarser(&self.geom, &nb.ni);
                self.restriction
                    .restrict_cc(&self.data, &mut self.coarse, &range, &self.geom);
                (range, true)
            }
            Ordering::Greater => (bounds::cc_load_to_finer(&self.geom, &nb.ni), false),
        };

        let needed = range.count();
        let label = self.label.clone();
        let block = self.geom.gid;
        let buf = self
            .bd
            .get_mut(nb.bufid)
            .ok_or(BvalsError::NotSetUp { label: label.clone(), block })?;
        if needed > buf.send_capacity() {
            return Err(BvalsError::BufferOverrun {
                label,
                block,
                bufid: nb.bufid,
                needed,
                capacity: buf.send_capacity(),
            });
        }
        let src = if from_coarse { &self.coarse } else { &self.data };
        let mut offset = 0;
        pack_range(src, &range, buf.send_mut(), &mut offset);
        buf.set_send_len(offset);
        buf.sflag = BufferState::Sending;
        Ok(offset)
    }

    fn send_payload(&self, n: usize) -> Result<&[f64], BvalsError> {
        let nb = self.neighbor(n)?;
        let buf = self.bd.get(nb.bufid).ok_or_else(|| self.not_set_up())?;
        Ok(buf.send_payload())
    }

    fn start_send(&mut self, n: usize) -> Result<(), BvalsError> {
        let nb = self.neighbor(n)?;
        let err = self.not_set_up();
        let buf = self.bd.get_mut(nb.bufid).ok_or(err)?;
        buf.start_send_channel()?;
        Ok(())
    }

    fn receive_local(&mut self, bufid: usize, payload: &[f64]) -> Result<(), BvalsError> {
        let mk_err = self.size_err(bufid);
        let err = self.not_set_up();
        let buf = self.bd.get_mut(bufid).ok_or(err)?;
        buf.absorb(payload, mk_err)
    }

    fn try_receive(&mut self, n: usize) -> Result<bool, BvalsError> {
        let nb = self.neighbor(n)?;
        let mk_err = self.size_err(nb.bufid);
        let err = self.not_set_up();
        let buf = self.bd.get_mut(nb.bufid).ok_or(err)?;
        buf.try_recv_channel(mk_err)
    }

    fn wait_receive(&mut self, n: usize) -> Result<(), BvalsError> {
        let nb = self.neighbor(n)?;
        let mk_err = self.size_err(nb.bufid);
        let label = self.label.clone();
        let block = self.geom.gid;
        let buf = self.bd.get_mut(nb.bufid).ok_or(BvalsError::NotSetUp {
            label: label.clone(),
            block,
        })?;
        if buf.wait_recv_channel(mk_err)? {
            Ok(())
        } else {
            // no channel: a same-rank payload should already have landed
            Err(BvalsError::UnexpectedBufferState {
                label,
                block,
                bufid: nb.bufid,
                state: buf.flag.name(),
            })
        }
    }

    fn set_boundary(&mut self, n: usize) -> Result<(), BvalsError> {
        let nb = self.neighbor(n)?;
        let mylevel = self.geom.loc.level;
        let (range, into_coarse) = match nb.level.cmp(&mylevel) {
            Ordering::Equal => (bounds::cc_set_same_level(&self.geom, &nb.ni), false),
            Ordering::Less => (bounds::cc_set_from_coarser(&self.geom, &nb.ni), true),
            Ordering::Greater => (bounds::cc_set_from_finer(&self.geom, &nb.ni), false),
        };

        let buf = self.bd.get(nb.bufid).ok_or_else(|| self.not_set_up())?;
        match buf.flag {
            BufferState::ReceivedNull => {
                if self.allocated {
                    let dst = if into_coarse { &mut self.coarse } else { &mut self.data };
                    zero_fill_range(dst, &range);
                }
                Ok(())
            }
            BufferState::Received => {
                if !self.allocated {
                    return Ok(());
                }
                let payload = buf.recv_payload();
                let needed = range.count();
                if payload.len() != needed {
                    return Err(BvalsError::PayloadSizeMismatch {
                        label: self.label.clone(),
                        block: self.geom.gid,
                        bufid: nb.bufid,
                        received: payload.len(),
                        needed,
                    });
                }
                let dst = if into_coarse { &mut self.coarse } else { &mut self.data };
                let mut offset = 0;
                unpack_range(dst, &range, payload, &mut offset);
                Ok(())
            }
            state => Err(BvalsError::UnexpectedBufferState {
                label: self.label.clone(),
                block: self.geom.gid,
                bufid: nb.bufid,
                state: state.name(),
            }),
        }
    }
}
