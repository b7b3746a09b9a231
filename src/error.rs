//! BvalsError: unified error type for amr-bvals public APIs.
//!
//! Programming-invariant violations (count mismatches, missing channels,
//! malformed neighbor descriptors) surface as structured variants that
//! identify the offending block/variable/boundary; continuing past any of
//! them risks silent data corruption across ranks, so callers are expected
//! to abort. Transient sparse-allocation mismatches are *not* errors: the
//! exchange layer recovers from them by rebuilding its caches.

use crate::mesh::block::BlockId;
use thiserror::Error;

/// Unified error type for boundary-exchange operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BvalsError {
    /// Attempted to construct a BlockId with a zero value (invalid).
    #[error("BlockId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidBlockId,
    /// A neighbor offset is nonzero on an axis the problem does not have.
    #[error("block {block}: neighbor bufid {bufid} has offset on axis {axis} but ndim = {ndim}")]
    OffsetBeyondDimension {
        block: BlockId,
        bufid: usize,
        axis: usize,
        ndim: usize,
    },
    /// Connection type inconsistent with the number of nonzero offsets.
    #[error(
        "block {block}: neighbor bufid {bufid} claims {connect} but has {nonzero} nonzero offsets"
    )]
    ConnectMismatch {
        block: BlockId,
        bufid: usize,
        connect: &'static str,
        nonzero: usize,
    },
    /// Two neighbors of one block share a boundary slot identifier.
    #[error("block {block}: duplicate neighbor bufid {bufid}")]
    DuplicateBufId { block: BlockId, bufid: usize },
    /// Exchange was driven before `setup_channels` established buffers.
    #[error("variable `{label}` on block {block}: boundary data not set up")]
    NotSetUp { label: String, block: BlockId },
    /// A pack produced more elements than the buffer was sized for.
    #[error(
        "variable `{label}` on block {block}, bufid {bufid}: packed {needed} elements into a buffer of {capacity}"
    )]
    BufferOverrun {
        label: String,
        block: BlockId,
        bufid: usize,
        needed: usize,
        capacity: usize,
    },
    /// The cached boundary count disagrees with the live neighbor lists.
    #[error("boundary cache holds {cached} entries but iteration found {found}")]
    BoundaryCountMismatch { cached: usize, found: usize },
    /// No persistent channel or local target exists for a boundary.
    #[error(
        "no communication channel for sender {sender} -> receiver {receiver}, variable `{label}`, location {location}"
    )]
    ChannelMissing {
        sender: BlockId,
        receiver: BlockId,
        label: String,
        location: usize,
    },
    /// A buffer was asked to transition from a state it is not in.
    #[error("variable `{label}` on block {block}, bufid {bufid}: unexpected buffer state {state}")]
    UnexpectedBufferState {
        label: String,
        block: BlockId,
        bufid: usize,
        state: &'static str,
    },
    /// A received payload does not match the unpack ranges for the boundary.
    #[error(
        "variable `{label}` on block {block}, bufid {bufid}: received {received} elements, unpack needs {needed}"
    )]
    PayloadSizeMismatch {
        label: String,
        block: BlockId,
        bufid: usize,
        received: usize,
        needed: usize,
    },
}
