//! Field-variable storage: dense ghost-padded arrays over a block.

pub mod array;

pub use array::{Array3, Axis, FaceField};
