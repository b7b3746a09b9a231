//! Boundary-value exchange: buffers, index ranges, pack/unpack, and the
//! persistent-channel protocol that moves ghost-zone data between blocks.
//!
//! The submodules layer bottom-up: [`bounds`] computes index ranges,
//! [`buffer`] sizes and holds communication buffers, [`pack`] moves data
//! between arrays and buffers, [`restrict`] coarsens fine data before it is
//! sent to a coarser neighbor, [`var_cc`] / [`var_fc`] tie those together
//! per variable, and [`cache`] / [`exchange`] drive whole batches of
//! variables through the send/receive/set cycle.

pub mod bounds;
pub mod buffer;
pub mod cache;
pub mod exchange;
pub mod pack;
pub mod restrict;
pub mod var_cc;
pub mod var_fc;

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::comm::Communicator;
use crate::error::BvalsError;
use crate::mesh::block::BlockGeometry;
use crate::mesh::neighbor::NeighborIndexes;

pub use bounds::Range3;
pub use buffer::{BoundaryBuffer, BoundaryData, BufferState};
pub use exchange::ExchangeSet;
pub use var_cc::CellCenteredBvar;
pub use var_fc::FaceCenteredBvar;

static STORAGE_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Monotonic identity for a storage allocation; two allocations never
/// share a serial, so a cache can tell "same variable, new storage" from
/// "same storage".
pub(crate) fn next_storage_serial() -> u64 {
    STORAGE_SERIAL.fetch_add(1, Ordering::Relaxed)
}

/// Which subset of communication a `start_receiving` / `clear_boundary`
/// cycle covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryCommPhase {
    /// Mesh initialization: variable data only, no flux correction.
    MeshInit,
    /// Regular evolution cycle: variable data plus flux correction.
    All,
    /// AMR regrid data movement: cross-rank communication is skipped
    /// entirely (regridding has its own transport).
    AmrRegrid,
}

/// One field variable's view of the boundary exchange.
///
/// Implementations own the field storage, the boundary buffers, and the
/// persistent channels; [`exchange::ExchangeSet`] drives them through the
/// cycle and routes same-rank payloads between them. Boundary slots are
/// indexed by position in the block's neighbor list.
pub trait BoundaryVariable: Any {
    /// The concrete variable back out of the trait object; the solver owns
    /// the field storage behind it.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Stable name identifying the variable in keys, tags, and errors.
    fn label(&self) -> &str;

    /// The block this variable lives on.
    fn geometry(&self) -> &Arc<BlockGeometry>;

    /// Whether the sparse variable currently holds data. Unallocated
    /// variables send null messages and ignore (or zero-fill) receives.
    fn is_allocated(&self) -> bool;

    /// Monotonic serial of the current storage allocation; changes whenever
    /// the variable is re-allocated, which invalidates cached buffer views.
    fn storage_serial(&self) -> u64;

    /// Worst-case element count a variable-data message for this boundary
    /// may carry, in either direction.
    fn compute_buffer_size(&self, ni: &NeighborIndexes) -> usize;

    /// Allocates boundary buffers and (re-)opens persistent channels for
    /// every cross-rank neighbor. The only mutation point for channels.
    fn setup_channels(&mut self, comm: &dyn Communicator) -> Result<(), BvalsError>;

    /// Arms cross-rank receives for the phase. Must run before any peer
    /// starts sending.
    fn start_receiving(&mut self, phase: BoundaryCommPhase) -> Result<(), BvalsError>;

    /// Resets all boundary flags to `Waiting` and waits out in-flight
    /// sends, returning channels to a reusable state.
    fn clear_boundary(&mut self, phase: BoundaryCommPhase) -> Result<(), BvalsError>;

    /// Packs the payload for neighbor slot `n` into its send buffer and
    /// returns the packed element count (0 when unallocated: null message).
    fn load_boundary(&mut self, n: usize) -> Result<usize, BvalsError>;

    /// The packed payload for neighbor slot `n` (empty slice for null).
    fn send_payload(&self, n: usize) -> Result<&[f64], BvalsError>;

    /// Starts the cross-rank send for neighbor slot `n`.
    fn start_send(&mut self, n: usize) -> Result<(), BvalsError>;

    /// Same-rank delivery into boundary slot `bufid`: stores the payload in
    /// the receive buffer and marks it `Received` (or `ReceivedNull`).
    fn receive_local(&mut self, bufid: usize, payload: &[f64]) -> Result<(), BvalsError>;

    /// Polls the cross-rank receive for neighbor slot `n`, absorbing an
    /// arrived payload. Returns whether the slot now holds a message.
    fn try_receive(&mut self, n: usize) -> Result<bool, BvalsError>;

    /// Blocks until the payload for neighbor slot `n` has arrived.
    fn wait_receive(&mut self, n: usize) -> Result<(), BvalsError>;

    /// Unpacks the received payload for neighbor slot `n` into ghost zones
    /// (same level / from finer) or the coarse scratch (from coarser).
    /// `ReceivedNull` zero-fills when the variable is allocated.
    fn set_boundary(&mut self, n: usize) -> Result<(), BvalsError>;
}
