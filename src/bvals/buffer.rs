//! Communication buffers and worst-case sizing.
//!
//! Buffers are sized once, at channel setup, to the element-count maximum
//! over every level relationship the boundary can be asked to carry
//! (same-level, restricted fine-to-coarse, margin-padded coarse-to-fine), so
//! regridding never reallocates them mid-cycle. The sizing arithmetic below
//! mirrors the range selection in [`crate::bvals::bounds`]; the
//! `size / g * (g + 1)` adjustments account for the one-cell widening of
//! edge/corner boundaries on multilevel meshes.

use crate::comm::{RecvChannel, RecvPayload, SendChannel};
use crate::error::BvalsError;
use crate::mesh::block::BlockGeometry;
use crate::mesh::neighbor::{NeighborConnect, NeighborIndexes};

/// Life-cycle state of one boundary buffer in one role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    /// No transfer in progress; buffer contents are meaningless.
    Waiting,
    /// A send has been started and not yet cleared.
    Sending,
    /// A payload has arrived and awaits unpacking.
    Received,
    /// A null message arrived: the sender holds no data for this cycle.
    ReceivedNull,
}

impl BufferState {
    pub(crate) fn name(self) -> &'static str {
        match self {
            BufferState::Waiting => "waiting",
            BufferState::Sending => "sending",
            BufferState::Received => "received",
            BufferState::ReceivedNull => "received-null",
        }
    }
}

/// Send and receive storage for one boundary of one variable, plus the
/// persistent channels serving it when the neighbor is on another rank.
///
/// The buffer is exclusively owned by the transfer while one is in flight;
/// `clear` (via the owning variable) waits out the send before the slot may
/// be packed again.
pub struct BoundaryBuffer {
    send: Vec<f64>,
    recv: Vec<f64>,
    send_len: usize,
    recv_len: usize,
    /// Receive-role state.
    pub flag: BufferState,
    /// Send-role state.
    pub sflag: BufferState,
    pub send_channel: Option<Box<dyn SendChannel>>,
    pub recv_channel: Option<Box<dyn RecvChannel>>,
}

impl std::fmt::Debug for BoundaryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryBuffer")
            .field("send_capacity", &self.send.len())
            .field("recv_capacity", &self.recv.len())
            .field("send_len", &self.send_len)
            .field("recv_len", &self.recv_len)
            .field("flag", &self.flag)
            .field("sflag", &self.sflag)
            .field("has_send_channel", &self.send_channel.is_some())
            .field("has_recv_channel", &self.recv_channel.is_some())
            .finish()
    }
}

impl BoundaryBuffer {
    /// Buffer with the given worst-case capacities and no channels.
    pub fn new(send_capacity: usize, recv_capacity: usize) -> Self {
        Self {
            send: vec![0.0; send_capacity],
            recv: vec![0.0; recv_capacity],
            send_len: 0,
            recv_len: 0,
            flag: BufferState::Waiting,
            sflag: BufferState::Waiting,
            send_channel: None,
            recv_channel: None,
        }
    }

    #[inline]
    pub fn send_capacity(&self) -> usize {
        self.send.len()
    }

    #[inline]
    pub fn recv_capacity(&self) -> usize {
        self.recv.len()
    }

    /// Full send storage for packing into.
    #[inline]
    pub fn send_mut(&mut self) -> &mut [f64] {
        &mut self.send
    }

    /// Marks `len` leading elements of the send storage as the payload.
    #[inline]
    pub fn set_send_len(&mut self, len: usize) {
        debug_assert!(len <= self.send.len());
        self.send_len = len;
    }

    /// The packed payload (empty for a null message).
    #[inline]
    pub fn send_payload(&self) -> &[f64] {
        &self.send[..self.send_len]
    }

    /// The received payload awaiting unpack.
    #[inline]
    pub fn recv_payload(&self) -> &[f64] {
        &self.recv[..self.recv_len]
    }

    /// Stores an arrived payload and flips the receive flag accordingly.
    ///
    /// # Errors
    /// Fails if the payload exceeds the receive capacity; identity fields
    /// for the error are supplied by the owning variable.
    pub fn absorb(
        &mut self,
        payload: &[f64],
        mk_err: impl FnOnce(usize, usize) -> BvalsError,
    ) -> Result<(), BvalsError> {
        if payload.is_empty() {
            self.recv_len = 0;
            self.flag = BufferState::ReceivedNull;
            return Ok(());
        }
        if payload.len() > self.recv.len() {
            return Err(mk_err(payload.len(), self.recv.len()));
        }
        self.recv[..payload.len()].copy_from_slice(payload);
        self.recv_len = payload.len();
        self.flag = BufferState::Received;
        Ok(())
    }

    /// Stores a channel payload (see [`absorb`](Self::absorb)).
    pub fn absorb_payload(
        &mut self,
        payload: RecvPayload,
        mk_err: impl FnOnce(usize, usize) -> BvalsError,
    ) -> Result<(), BvalsError> {
        match payload {
            RecvPayload::Null => self.absorb(&[], mk_err),
            RecvPayload::Data(data) => self.absorb(&data, mk_err),
        }
    }

    /// Resets both role flags to `Waiting`.
    pub fn reset_flags(&mut self) {
        self.flag = BufferState::Waiting;
        self.sflag = BufferState::Waiting;
    }

    /// Starts the cross-rank transfer of the packed payload. Returns false
    /// when the boundary has no channel (same-rank neighbor).
    pub fn start_send_channel(&mut self) -> Result<bool, BvalsError> {
        match &mut self.send_channel {
            Some(ch) => {
                ch.start(&self.send[..self.send_len])?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Polls the receive channel, absorbing an arrived payload. Returns
    /// whether the buffer now holds a message.
    pub fn try_recv_channel(
        &mut self,
        mk_err: impl FnOnce(usize, usize) -> BvalsError,
    ) -> Result<bool, BvalsError> {
        if matches!(self.flag, BufferState::Received | BufferState::ReceivedNull) {
            return Ok(true);
        }
        let Some(ch) = &mut self.recv_channel else {
            return Ok(false);
        };
        match ch.take() {
            Some(payload) => {
                self.absorb_payload(payload, mk_err)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Blocks on the receive channel until the payload arrives. Returns
    /// false when the boundary has no channel.
    pub fn wait_recv_channel(
        &mut self,
        mk_err: impl FnOnce(usize, usize) -> BvalsError,
    ) -> Result<bool, BvalsError> {
        if matches!(self.flag, BufferState::Received | BufferState::ReceivedNull) {
            return Ok(true);
        }
        let Some(ch) = &mut self.recv_channel else {
            return Ok(false);
        };
        let payload = ch.wait();
        self.absorb_payload(payload, mk_err)?;
        Ok(true)
    }
}

/// Per-variable collection of boundary buffers, indexed by boundary slot.
/// Slots without a neighbor stay empty.
#[derive(Debug, Default)]
pub struct BoundaryData {
    slots: Vec<Option<BoundaryBuffer>>,
}

impl BoundaryData {
    pub fn new(nslots: usize) -> Self {
        Self {
            slots: (0..nslots).map(|_| None).collect(),
        }
    }

    pub fn insert(&mut self, bufid: usize, buffer: BoundaryBuffer) {
        if bufid >= self.slots.len() {
            self.slots.resize_with(bufid + 1, || None);
        }
        self.slots[bufid] = Some(buffer);
    }

    pub fn get(&self, bufid: usize) -> Option<&BoundaryBuffer> {
        self.slots.get(bufid).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, bufid: usize) -> Option<&mut BoundaryBuffer> {
        self.slots.get_mut(bufid).and_then(|s| s.as_mut())
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut BoundaryBuffer)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|b| (i, b)))
    }
}

// --- worst-case sizing ---

#[inline]
fn axis_factor(ox: i64, full: i64, ghost: i64) -> i64 {
    if ox == 0 { full } else { ghost }
}

/// Edge/corner widening inflates a ghost-width factor from `g` to `g + 1`
/// along each nonzero axis; division is exact because the factor divides
/// the product.
#[inline]
fn widen_adjust(mut size: i64, ni: &NeighborIndexes, g: i64) -> i64 {
    if ni.connect == NeighborConnect::Face {
        return size;
    }
    for ox in [ni.ox1, ni.ox2, ni.ox3] {
        if ox != 0 {
            size = size / g * (g + 1);
        }
    }
    size
}

/// Worst-case element count of a cell-centered variable-data message for
/// one boundary, over every level relationship.
pub fn cc_buffer_size(geom: &BlockGeometry, ni: &NeighborIndexes) -> usize {
    let (nx1, nx2, nx3) = (geom.size.nx1, geom.size.nx2, geom.size.nx3);
    let g = geom.nghost;
    let same = axis_factor(ni.ox1, nx1, g) * axis_factor(ni.ox2, nx2, g) * axis_factor(ni.ox3, nx3, g);
    if !geom.multilevel {
        return same as usize;
    }
    let f2c = axis_factor(ni.ox1, (nx1 + 1) / 2, g)
        * axis_factor(ni.ox2, (nx2 + 1) / 2, g)
        * axis_factor(ni.ox3, (nx3 + 1) / 2, g);
    let cng = geom.cnghost;
    let (cng1, cng2, cng3) = (
        cng,
        if geom.ndim >= 2 { cng } else { 0 },
        if geom.ndim >= 3 { cng } else { 0 },
    );
    let c2f = axis_factor(ni.ox1, (nx1 + 1) / 2 + cng1, cng)
        * axis_factor(ni.ox2, (nx2 + 1) / 2 + cng2, cng)
        * axis_factor(ni.ox3, (nx3 + 1) / 2 + cng3, cng);
    same.max(f2c).max(c2f) as usize
}

/// Worst-case element count of a face-centered variable-data message for
/// one boundary: the sum over the three components, maximized over level
/// relationships, with the multilevel widening adjustment on nonzero axes.
pub fn fc_buffer_size(geom: &BlockGeometry, ni: &NeighborIndexes) -> usize {
    let (nx1, nx2, nx3) = (geom.size.nx1, geom.size.nx2, geom.size.nx3);
    let g = geom.nghost;
    let f2 = if geom.ndim >= 2 { 1 } else { 0 };
    let f3 = if geom.ndim >= 3 { 1 } else { 0 };

    let size1 = axis_factor(ni.ox1, nx1 + 1, g)
        * axis_factor(ni.ox2, nx2, g)
        * axis_factor(ni.ox3, nx3, g);
    let size2 = axis_factor(ni.ox1, nx1, g)
        * axis_factor(ni.ox2, nx2 + f2, g)
        * axis_factor(ni.ox3, nx3, g);
    let size3 = axis_factor(ni.ox1, nx1, g)
        * axis_factor(ni.ox2, nx2, g)
        * axis_factor(ni.ox3, nx3 + f3, g);
    if !geom.multilevel {
        return (size1 + size2 + size3) as usize;
    }

    let same = widen_adjust(size1, ni, g) + widen_adjust(size2, ni, g) + widen_adjust(size3, ni, g);

    let f2c1 = axis_factor(ni.ox1, (nx1 + 1) / 2 + 1, g)
        * axis_factor(ni.ox2, (nx2 + 1) / 2, g)
        * axis_factor(ni.ox3, (nx3 + 1) / 2, g);
    let f2c2 = axis_factor(ni.ox1, (nx1 + 1) / 2, g)
        * axis_factor(ni.ox2, (nx2 + 1) / 2 + f2, g)
        * axis_factor(ni.ox3, (nx3 + 1) / 2, g);
    let f2c3 = axis_factor(ni.ox1, (nx1 + 1) / 2, g)
        * axis_factor(ni.ox2, (nx2 + 1) / 2, g)
        * axis_factor(ni.ox3, (nx3 + 1) / 2 + f3, g);
    let fsize = widen_adjust(f2c1, ni, g) + widen_adjust(f2c2, ni, g) + widen_adjust(f2c3, ni, g);

    let cng = geom.cnghost;
    let (cng1, cng2, cng3) = (cng, cng * f2, cng * f3);
    let c2f1 = axis_factor(ni.ox1, (nx1 + 1) / 2 + cng1 + 1, cng + 1)
        * axis_factor(ni.ox2, (nx2 + 1) / 2 + cng2, cng)
        * axis_factor(ni.ox3, (nx3 + 1) / 2 + cng3, cng);
    let c2f2 = axis_factor(ni.ox1, (nx1 + 1) / 2 + cng1, cng)
        * axis_factor(ni.ox2, (nx2 + 1) / 2 + cng2 + f2, cng + 1)
        * axis_factor(ni.ox3, (nx3 + 1) / 2 + cng3, cng);
    let c2f3 = axis_factor(ni.ox1, (nx1 + 1) / 2 + cng1, cng)
        * axis_factor(ni.ox2, (nx2 + 1) / 2 + cng2, cng)
        * axis_factor(ni.ox3, (nx3 + 1) / 2 + cng3 + f3, cng + 1);
    let csize = c2f1 + c2f2 + c2f3;

    same.max(fsize).max(csize) as usize
}

/// Element count of a same-level flux-correction message across this
/// boundary: both tangential face-area components over the shared face for
/// face neighbors, the one edge-aligned line for qualifying edges, zero for
/// corners (corners never exchange flux).
pub fn fc_flux_buffer_size(geom: &BlockGeometry, ni: &NeighborIndexes) -> usize {
    let (nx1, nx2, nx3) = (geom.size.nx1, geom.size.nx2, geom.size.nx3);
    let size = match ni.connect {
        NeighborConnect::Face => {
            if nx3 > 1 {
                if ni.ox1 != 0 {
                    (nx2 + 1) * nx3 + nx2 * (nx3 + 1)
                } else if ni.ox2 != 0 {
                    (nx1 + 1) * nx3 + nx1 * (nx3 + 1)
                } else {
                    (nx1 + 1) * nx2 + nx1 * (nx2 + 1)
                }
            } else if nx2 > 1 {
                if ni.ox1 != 0 { (nx2 + 1) + nx2 } else { (nx1 + 1) + nx1 }
            } else {
                2
            }
        }
        NeighborConnect::Edge => {
            if nx3 > 1 {
                if ni.ox3 == 0 {
                    nx3
                } else if ni.ox2 == 0 {
                    nx2
                } else {
                    nx1
                }
            } else if nx2 > 1 {
                1
            } else {
                0
            }
        }
        NeighborConnect::Corner => 0,
    };
    size as usize
}

/// Element count of a restricted (fine-to-coarse) flux-correction message:
/// the halved-resolution counterpart of [`fc_flux_buffer_size`].
pub fn fc_flux_coarse_buffer_size(geom: &BlockGeometry, ni: &NeighborIndexes) -> usize {
    let (nx1, nx2, nx3) = (geom.size.nx1, geom.size.nx2, geom.size.nx3);
    let size = match ni.connect {
        NeighborConnect::Face => {
            if nx3 > 1 {
                if ni.ox1 != 0 {
                    (nx2 / 2 + 1) * (nx3 / 2) + (nx2 / 2) * (nx3 / 2 + 1)
                } else if ni.ox2 != 0 {
                    (nx1 / 2 + 1) * (nx3 / 2) + (nx1 / 2) * (nx3 / 2 + 1)
                } else {
                    (nx1 / 2 + 1) * (nx2 / 2) + (nx1 / 2) * (nx2 / 2 + 1)
                }
            } else if nx2 > 1 {
                if ni.ox1 != 0 { (nx2 / 2 + 1) + nx2 / 2 } else { (nx1 / 2 + 1) + nx1 / 2 }
            } else {
                2
            }
        }
        NeighborConnect::Edge => {
            if nx3 > 1 {
                if ni.ox3 == 0 {
                    nx3 / 2
                } else if ni.ox2 == 0 {
                    nx2 / 2
                } else {
                    nx1 / 2
                }
            } else if nx2 > 1 {
                1
            } else {
                0
            }
        }
        NeighborConnect::Corner => 0,
    };
    size as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvals::bounds::{self, Range3};
    use crate::mesh::block::{BlockGeometry, BlockId, BlockSize, LogicalLocation};

    fn geom(nx: (i64, i64, i64), g: i64, multilevel: bool) -> BlockGeometry {
        BlockGeometry::new(
            BlockId::new(1).unwrap(),
            0,
            0,
            LogicalLocation::default(),
            BlockSize::new(nx.0, nx.1, nx.2),
            g,
            multilevel,
            vec![],
            None,
        )
        .unwrap()
    }

    fn indexes(ox1: i64, ox2: i64, ox3: i64) -> NeighborIndexes {
        let connect = match [ox1, ox2, ox3].iter().filter(|&&o| o != 0).count() {
            1 => NeighborConnect::Face,
            2 => NeighborConnect::Edge,
            _ => NeighborConnect::Corner,
        };
        NeighborIndexes {
            ox1,
            ox2,
            ox3,
            fi1: 0,
            fi2: 0,
            connect,
        }
    }

    fn offsets(ndim: usize) -> Vec<(i64, i64, i64)> {
        let r = |active: bool| if active { -1..=1 } else { 0..=0 };
        let mut out = vec![];
        for ox3 in r(ndim >= 3) {
            for ox2 in r(ndim >= 2) {
                for ox1 in -1..=1 {
                    if (ox1, ox2, ox3) != (0, 0, 0) {
                        out.push((ox1, ox2, ox3));
                    }
                }
            }
        }
        out
    }

    #[test]
    fn cc_uniform_face_is_ghost_slab() {
        let geom = geom((4, 4, 4), 2, false);
        assert_eq!(cc_buffer_size(&geom, &indexes(1, 0, 0)), 2 * 4 * 4);
        assert_eq!(cc_buffer_size(&geom, &indexes(1, 1, 0)), 2 * 2 * 4);
        assert_eq!(cc_buffer_size(&geom, &indexes(1, 1, 1)), 2 * 2 * 2);
    }

    #[test]
    fn sizes_cover_every_pack_range() {
        for &multilevel in &[false, true] {
            for ndim in 1..=3usize {
                let nx = 8;
                let geom = geom(
                    (nx, if ndim >= 2 { nx } else { 1 }, if ndim >= 3 { nx } else { 1 }),
                    2,
                    multilevel,
                );
                for (ox1, ox2, ox3) in offsets(ndim) {
                    for fi1 in 0..=1 {
                        for fi2 in 0..=1 {
                            let mut ni = indexes(ox1, ox2, ox3);
                            ni.fi1 = fi1;
                            ni.fi2 = fi2;
                            let cc = cc_buffer_size(&geom, &ni);
                            let fc = fc_buffer_size(&geom, &ni);
                            let mut cc_counts =
                                vec![bounds::cc_load_same_level(&geom, &ni).count()];
                            let mut fc_counts = vec![
                                bounds::fc_load_same_level(&geom, &ni)
                                    .iter()
                                    .map(Range3::count)
                                    .sum::<usize>(),
                            ];
                            if multilevel {
                                cc_counts.push(bounds::cc_load_to_coarser(&geom, &ni).count());
                                cc_counts.push(bounds::cc_load_to_finer(&geom, &ni).count());
                                cc_counts.push(bounds::cc_set_from_coarser(&geom, &ni).count());
                                fc_counts.push(
                                    bounds::fc_load_to_coarser(&geom, &ni)
                                        .iter()
                                        .map(Range3::count)
                                        .sum(),
                                );
                                fc_counts.push(
                                    bounds::fc_load_to_finer(&geom, &ni)
                                        .iter()
                                        .map(Range3::count)
                                        .sum(),
                                );
                                fc_counts.push(
                                    bounds::fc_set_from_coarser(&geom, &ni)
                                        .iter()
                                        .map(Range3::count)
                                        .sum(),
                                );
                            }
                            for count in cc_counts {
                                assert!(
                                    count <= cc,
                                    "cc pack {count} > size {cc} at ({ox1},{ox2},{ox3}) \
                                     fi=({fi1},{fi2}) ndim={ndim} ml={multilevel}"
                                );
                            }
                            for count in fc_counts {
                                assert!(
                                    count <= fc,
                                    "fc pack {count} > size {fc} at ({ox1},{ox2},{ox3}) \
                                     fi=({fi1},{fi2}) ndim={ndim} ml={multilevel}"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn flux_sizes_match_dimensionality() {
        let g3 = geom((4, 4, 4), 2, true);
        assert_eq!(fc_flux_buffer_size(&g3, &indexes(1, 0, 0)), 5 * 4 + 4 * 5);
        assert_eq!(fc_flux_buffer_size(&g3, &indexes(1, 1, 0)), 4); // nx3 line
        assert_eq!(fc_flux_buffer_size(&g3, &indexes(1, 1, 1)), 0);
        assert_eq!(
            fc_flux_coarse_buffer_size(&g3, &indexes(1, 0, 0)),
            3 * 2 + 2 * 3
        );

        let g2 = geom((4, 4, 1), 2, true);
        assert_eq!(fc_flux_buffer_size(&g2, &indexes(1, 0, 0)), 5 + 4);
        assert_eq!(fc_flux_buffer_size(&g2, &indexes(1, 1, 0)), 1);

        let g1 = geom((4, 1, 1), 2, true);
        assert_eq!(fc_flux_buffer_size(&g1, &indexes(1, 0, 0)), 2);
    }

    #[test]
    fn absorb_tracks_state_and_overrun() {
        let mut buf = BoundaryBuffer::new(4, 4);
        assert_eq!(buf.flag, BufferState::Waiting);

        buf.absorb(&[1.0, 2.0], |_, _| BvalsError::InvalidBlockId)
            .unwrap();
        assert_eq!(buf.flag, BufferState::Received);
        assert_eq!(buf.recv_payload(), &[1.0, 2.0]);

        buf.reset_flags();
        buf.absorb(&[], |_, _| BvalsError::InvalidBlockId).unwrap();
        assert_eq!(buf.flag, BufferState::ReceivedNull);
        assert!(buf.recv_payload().is_empty());

        let err = buf
            .absorb(&[0.0; 5], |received, capacity| BvalsError::PayloadSizeMismatch {
                label: "b".into(),
                block: BlockId::new(1).unwrap(),
                bufid: 0,
                received,
                needed: capacity,
            })
            .unwrap_err();
        assert!(matches!(err, BvalsError::PayloadSizeMismatch { received: 5, .. }));
    }

    #[test]
    fn boundary_data_slots() {
        let mut bd = BoundaryData::new(2);
        assert!(bd.is_empty());
        bd.insert(1, BoundaryBuffer::new(8, 8));
        bd.insert(4, BoundaryBuffer::new(2, 2)); // grows
        assert_eq!(bd.len(), 2);
        assert!(bd.get(0).is_none());
        assert_eq!(bd.get(1).unwrap().send_capacity(), 8);
        assert_eq!(bd.iter_mut().map(|(i, _)| i).collect::<Vec<_>>(), vec![1, 4]);
    }
}
