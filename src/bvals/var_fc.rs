//! Face-centered boundary variable: a three-component face field, its
//! coarse scratch, and two boundary-data sets. One carries variable data,
//! the other the flux-correction channels that keep face-integrated
//! quantities consistent across refinement jumps.
//!
//! The three components travel in one message, packed back-to-back in
//! x1f/x2f/x3f order. Flux-correction payloads are packed by the solver
//! (the numerical averaging is its concern); this module owns their
//! sizing, channels, state flags, and phase gating. Which flux channels
//! exist is asymmetric by construction: a same-level face (or an edge
//! whose contacts are all same-level) exchanges flux both ways, a finer
//! neighbor only sends (restricted), a coarser neighbor only receives,
//! and corners never participate.

use std::cmp::Ordering;
use std::sync::Arc;

use log::debug;

use crate::bvals::bounds::{self, Range3};
use crate::bvals::buffer::{
    BoundaryBuffer, BoundaryData, BufferState, fc_buffer_size, fc_flux_buffer_size,
    fc_flux_coarse_buffer_size,
};
use crate::bvals::pack::{
    pack_range, replicate_x2_face, replicate_x3_face, unpack_range, zero_fill_range,
};
use crate::bvals::restrict::{Restriction, VolumeAverage};
use crate::bvals::{BoundaryCommPhase, BoundaryVariable, next_storage_serial};
use crate::comm::{Communicator, comm_tag};
use crate::error::BvalsError;
use crate::field::{Axis, FaceField};
use crate::mesh::block::{BlockGeometry, EdgeFlags};
use crate::mesh::neighbor::{NeighborConnect, NeighborDescriptor, NeighborIndexes};

pub struct FaceCenteredBvar {
    label: String,
    geom: Arc<BlockGeometry>,
    /// Ghost-padded face data.
    pub data: FaceField,
    /// Coarse scratch for restriction and from-coarser payloads.
    pub coarse: FaceField,
    allocated: bool,
    serial: u64,
    phys: u64,
    phys_flux: u64,
    bd: BoundaryData,
    bd_flux: BoundaryData,
    edge_flags: EdgeFlags,
    restriction: Box<dyn Restriction>,
}

impl FaceCenteredBvar {
    /// New allocated variable with zeroed storage. Messages use channel id
    /// `phys` for variable data and `phys + 1` for flux correction.
    pub fn new(label: impl Into<String>, geom: Arc<BlockGeometry>, phys: u64) -> Self {
        Self {
            label: label.into(),
            data: FaceField::zeros(&geom.cellbounds),
            coarse: FaceField::zeros(&geom.c_cellbounds),
            geom,
            allocated: true,
            serial: next_storage_serial(),
            phys,
            phys_flux: phys + 1,
            bd: BoundaryData::default(),
            bd_flux: BoundaryData::default(),
            edge_flags: EdgeFlags::default(),
            restriction: Box::new(VolumeAverage),
        }
    }

    /// Replaces the restriction operator.
    pub fn with_restriction(mut self, restriction: Box<dyn Restriction>) -> Self {
        self.restriction = restriction;
        self
    }

    pub fn allocate(&mut self) {
        self.data.fill(0.0);
        self.coarse.fill(0.0);
        self.allocated = true;
        self.serial = next_storage_serial();
    }

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

    /// Flux-correction buffers, indexed by boundary slot.
    pub fn flux_data(&self) -> &BoundaryData {
        &self.bd_flux
    }

    pub fn flux_data_mut(&mut self) -> &mut BoundaryData {
        &mut self.bd_flux
    }

    /// Edge qualification computed at the last channel setup.
    pub fn edge_flags(&self) -> &EdgeFlags {
        &self.edge_flags
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
    // ends here and the caller can take a boundary set mutably afterwards.
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

    /// Whether a same-level neighbor exchanges flux across this boundary.
    fn same_level_flux(&self, nb: &NeighborDescriptor) -> bool {
        match nb.ni.connect {
            NeighborConnect::Face => true,
            NeighborConnect::Edge => nb
                .eid()
                .map(|eid| self.edge_flags.edge_flag[eid])
                .unwrap_or(false),
            NeighborConnect::Corner => false,
        }
    }

    /// Copies a solver-packed flux payload into the send buffer for
    /// neighbor slot `n` (empty payload = null message).
    pub fn load_flux(&mut self, n: usize, payload: &[f64]) -> Result<(), BvalsError> {
        let nb = self.neighbor(n)?;
        let label = self.label.clone();
        let block = self.geom.gid;
        let buf = self
            .bd_flux
            .get_mut(nb.bufid)
            .ok_or(BvalsError::NotSetUp { label: label.clone(), block })?;
        if payload.len() > buf.send_capacity() {
            return Err(BvalsError::BufferOverrun {
                label,
                block,
                bufid: nb.bufid,
                needed: payload.len(),
                capacity: buf.send_capacity(),
            });
        }
        buf.send_mut()[..payload.len()].copy_from_slice(payload);
        buf.set_send_len(payload.len());
        buf.sflag = BufferState::Sending;
        Ok(())
    }

    /// The packed flux payload for neighbor slot `n`.
    pub fn flux_payload(&self, n: usize) -> Result<&[f64], BvalsError> {
        let nb = self.neighbor(n)?;
        let buf = self.bd_flux.get(nb.bufid).ok_or_else(|| self.not_set_up())?;
        Ok(buf.send_payload())
    }

    /// Starts the cross-rank flux send for neighbor slot `n`.
    pub fn start_flux_send(&mut self, n: usize) -> Result<(), BvalsError> {
        let nb = self.neighbor(n)?;
        let err = self.not_set_up();
        let buf = self.bd_flux.get_mut(nb.bufid).ok_or(err)?;
        buf.start_send_channel()?;
        Ok(())
    }

    /// Same-rank flux delivery into boundary slot `bufid`.
    pub fn receive_flux_local(&mut self, bufid: usize, payload: &[f64]) -> Result<(), BvalsError> {
        let mk_err = self.size_err(bufid);
        let err = self.not_set_up();
        let buf = self.bd_flux.get_mut(bufid).ok_or(err)?;
        buf.absorb(payload, mk_err)
    }

    /// Polls the cross-rank flux receive for neighbor slot `n`.
    pub fn try_receive_flux(&mut self, n: usize) -> Result<bool, BvalsError> {
        let nb = self.neighbor(n)?;
        let mk_err = self.size_err(nb.bufid);
        let err = self.not_set_up();
        let buf = self.bd_flux.get_mut(nb.bufid).ok_or(err)?;
        buf.try_recv_channel(mk_err)
    }

    /// Unpacks one component set into the destination face field, then
    /// replicates degenerate-axis face layers so both faces of a collapsed
    /// cell carry the value.
    fn unpack_components(
        dst: &mut FaceField,
        ranges: &[Range3; 3],
        payload: &[f64],
        nx2: i64,
        nx3: i64,
    ) {
        let mut offset = 0;
        unpack_range(&mut dst.x1f, &ranges[0], payload, &mut offset);
        unpack_range(&mut dst.x2f, &ranges[1], payload, &mut offset);
        unpack_range(&mut dst.x3f, &ranges[2], payload, &mut offset);
        if nx2 == 1 {
            replicate_x2_face(&mut dst.x2f, &ranges[1]);
        }
        if nx3 == 1 {
            replicate_x3_face(&mut dst.x3f, &ranges[2]);
        }
    }

    fn zero_components(dst: &mut FaceField, ranges: &[Range3; 3], nx2: i64, nx3: i64) {
        zero_fill_range(&mut dst.x1f, &ranges[0]);
        zero_fill_range(&mut dst.x2f, &ranges[1]);
        zero_fill_range(&mut dst.x3f, &ranges[2]);
        if nx2 == 1 {
            replicate_x2_face(&mut dst.x2f, &ranges[1]);
        }
        if nx3 == 1 {
            replicate_x3_face(&mut dst.x3f, &ranges[2]);
        }
    }
}

impl BoundaryVariable for FaceCenteredBvar {
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
        fc_buffer_size(&self.geom, ni)
    }

    fn setup_channels(&mut self, comm: &dyn Communicator) -> Result<(), BvalsError> {
        let geom = Arc::clone(&self.geom);
        self.edge_flags = geom.count_fine_edges();
        let mylevel = geom.loc.level;

        let mut bd = BoundaryData::new(geom.neighbors.len());
        let mut bd_flux = BoundaryData::new(geom.neighbors.len());
        for nb in &geom.neighbors {
            let cap = fc_buffer_size(&geom, &nb.ni);
            let mut buf = BoundaryBuffer::new(cap, cap);
            if nb.rank != geom.rank {
                let send_tag = comm_tag(nb.lid, nb.target_slot, self.phys);
                let recv_tag = comm_tag(geom.lid, nb.bufid, self.phys);
                buf.send_channel = Some(comm.send_channel(nb.rank, send_tag, cap));
                buf.recv_channel = Some(comm.recv_channel(nb.rank, recv_tag, cap));
            }
            bd.insert(nb.bufid, buf);

            if nb.ni.connect == NeighborConnect::Corner {
                continue;
            }
            let fsize = fc_flux_buffer_size(&geom, &nb.ni);
            let f2csize = fc_flux_coarse_buffer_size(&geom, &nb.ni);
            let fcap = fsize.max(f2csize);
            let mut fbuf = BoundaryBuffer::new(fcap, fcap);
            if nb.rank != geom.rank {
                let send_tag = comm_tag(nb.lid, nb.target_slot, self.phys_flux);
                let recv_tag = comm_tag(geom.lid, nb.bufid, self.phys_flux);
                match nb.level.cmp(&mylevel) {
                    Ordering::Equal => {
                        if self.same_level_flux(nb) {
                            fbuf.send_channel = Some(comm.send_channel(nb.rank, send_tag, fsize));
                            fbuf.recv_channel = Some(comm.recv_channel(nb.rank, recv_tag, fsize));
                        }
                    }
                    // a finer neighbor sends restricted flux down to us
                    Ordering::Greater => {
                        fbuf.recv_channel = Some(comm.recv_channel(nb.rank, recv_tag, f2csize));
                    }
                    // we restrict and send flux up to a coarser neighbor
                    Ordering::Less => {
                        fbuf.send_channel = Some(comm.send_channel(nb.rank, send_tag, f2csize));
                    }
                }
            }
            bd_flux.insert(nb.bufid, fbuf);
        }
        self.bd = bd;
        self.bd_flux = bd_flux;
        debug!(
            "fc `{}` block {}: {} boundaries, {} flux boundaries set up",
            self.label,
            self.geom.gid,
            self.bd.len(),
            self.bd_flux.len()
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
        if phase == BoundaryCommPhase::All {
            // flux recv channels exist exactly where flux can arrive
            for (_, buf) in self.bd_flux.iter_mut() {
                if let Some(ch) = &mut buf.recv_channel {
                    ch.start();
                }
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
        if phase == BoundaryCommPhase::All {
            for (_, buf) in self.bd_flux.iter_mut() {
                buf.reset_flags();
                if let Some(ch) = &mut buf.send_channel {
                    ch.wait();
                }
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
        let (ranges, from_coarse) = match nb.level.cmp(&mylevel) {
            Ordering::Equal => (bounds::fc_load_same_level(&self.geom, &nb.ni), false),
            Ordering::Less => {
                let ranges = bounds::fc_load_to_coarser(&self.geom, &nb.ni);
                self.restriction.restrict_fc(
                    Axis::X1,
                    &self.data.x1f,
                    &mut self.coarse.x1f,
                    &ranges[0],
                    &self.geom,
                );
                self.restriction.restrict_fc(
                    Axis::X2,
                    &self.data.x2f,
                    &mut self.coarse.x2f,
                    &ranges[1],
                    &self.geom,
                );
                self.restriction.restrict_fc(
                    Axis::X3,
                    &self.data.x3f,
                    &mut self.coarse.x3f,
                    &ranges[2],
                    &self.geom,
                );
                // keep both face layers of collapsed axes consistent in
                // the scratch before packing
                if self.geom.size.nx2 == 1 {
                    replicate_x2_face(&mut self.coarse.x2f, &ranges[1]);
                }
                if self.geom.size.nx3 == 1 {
                    replicate_x3_face(&mut self.coarse.x3f, &ranges[2]);
                }
                (ranges, true)
            }
            Ordering::Greater => (bounds::fc_load_to_finer(&self.geom, &nb.ni), false),
        };

        let needed: usize = ranges.iter().map(Range3::count).sum();
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
        pack_range(&src.x1f, &ranges[0], buf.send_mut(), &mut offset);
        pack_range(&src.x2f, &ranges[1], buf.send_mut(), &mut offset);
        pack_range(&src.x3f, &ranges[2], buf.send_mut(), &mut offset);
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
        let (ranges, into_coarse) = match nb.level.cmp(&mylevel) {
            Ordering::Equal => (bounds::fc_set_same_level(&self.geom, &nb.ni), false),
            Ordering::Less => (bounds::fc_set_from_coarser(&self.geom, &nb.ni), true),
            Ordering::Greater => (bounds::fc_set_from_finer(&self.geom, &nb.ni), false),
        };
        let (nx2, nx3) = (self.geom.size.nx2, self.geom.size.nx3);

        let buf = self.bd.get(nb.bufid).ok_or_else(|| self.not_set_up())?;
        match buf.flag {
            BufferState::ReceivedNull => {
                if self.allocated {
                    let dst = if into_coarse { &mut self.coarse } else { &mut self.data };
                    Self::zero_components(dst, &ranges, nx2, nx3);
                }
                Ok(())
            }
            BufferState::Received => {
                if !self.allocated {
                    return Ok(());
                }
                let payload = buf.recv_payload();
                let needed: usize = ranges.iter().map(Range3::count).sum();
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
                Self::unpack_components(dst, &ranges, payload, nx2, nx3);
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
