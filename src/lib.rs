#![cfg_attr(docsrs, feature(doc_cfg))]
//! # amr-bvals
//!
//! amr-bvals is the boundary-communication core for block-structured
//! adaptive-mesh-refinement PDE solvers: ghost-zone exchange between mesh
//! blocks at the same or adjacent refinement levels, for cell-centered and
//! face-centered field data, plus the flux-correction messages that keep
//! face-integrated quantities consistent across refinement jumps.
//!
//! ## Features
//! - Index-range calculation for every pairing of boundary geometry
//!   (face/edge/corner) and level relationship (same, coarser, finer)
//! - Worst-case buffer sizing so regridding never reallocates mid-cycle
//! - Persistent communication channels behind a pluggable [`comm`] façade
//!   (in-process mailbox, MPI with `mpi-support`)
//! - Sparse variables: unallocated senders cost one null message
//! - Seeded, reproducible iteration order over boundary buffers
//!
//! ## Determinism
//!
//! All randomized decisions use `SmallRng` seeds supplied by the caller so
//! runs are reproducible. Unit tests fix seeds explicitly.
//!
//! ## Usage
//! Add `amr-bvals` as a dependency in your `Cargo.toml` and enable features
//! as needed:
//!
//! ```toml
//! [dependencies]
//! amr-bvals = "0.3"
//! # Optional features:
//! # features = ["mpi-support","par-pack"]
//! ```
//!
//! A typical cycle, per rank:
//!
//! 1. build [`mesh::block::BlockGeometry`] per block and wrap each field in
//!    a [`bvals::CellCenteredBvar`] / [`bvals::FaceCenteredBvar`],
//! 2. collect them in a [`bvals::ExchangeSet`] and call `setup`,
//! 3. each step: `start_receiving`, `send_all`, `try_set_boundaries` (or
//!    `set_boundaries` to block), `clear_boundary`.

pub mod bvals;
pub mod comm;
pub mod error;
pub mod field;
pub mod mesh;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::bvals::{
        BoundaryCommPhase, BoundaryVariable, CellCenteredBvar, ExchangeSet, FaceCenteredBvar,
    };
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::comm::{Communicator, MailboxComm, NoComm};
    pub use crate::error::BvalsError;
    pub use crate::field::{Array3, Axis, FaceField};
    pub use crate::mesh::block::{BlockGeometry, BlockId, BlockSize, IndexShape, LogicalLocation};
    pub use crate::mesh::neighbor::{NeighborConnect, NeighborDescriptor, NeighborIndexes};
}
