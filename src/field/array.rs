//! Dense `(k, j, i)` arrays backing field variables.
//!
//! Storage is a flat `Vec<f64>` behind typed accessors; the x1 index varies
//! fastest. Indexing takes `i64` because the boundary calculator works in
//! signed index arithmetic; all in-range indices are non-negative by
//! construction (ghost zones are part of the array).

use serde::{Deserialize, Serialize};

use crate::mesh::block::IndexShape;

/// One of the three coordinate axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    X1,
    X2,
    X3,
}

/// Dense 3D array with `(k, j, i)` ordering.
#[derive(Clone, Debug, PartialEq)]
pub struct Array3 {
    n3: usize,
    n2: usize,
    n1: usize,
    data: Vec<f64>,
}

impl Array3 {
    /// Zero-initialized array of the given extents (`n3` slowest).
    pub fn zeros(n3: usize, n2: usize, n1: usize) -> Self {
        Self {
            n3,
            n2,
            n1,
            data: vec![0.0; n3 * n2 * n1],
        }
    }

    /// Cell-centered array shaped for `shape` (ghosts included).
    pub fn cell_centered(shape: &IndexShape) -> Self {
        Self::zeros(
            shape.ncells3() as usize,
            shape.ncells2() as usize,
            shape.ncells1() as usize,
        )
    }

    /// Face-centered array for the face normal to `axis`: one extra layer
    /// along the normal direction. Degenerate axes keep the extra layer
    /// too (a 1D run still has two x2 faces per cell); replication keeps
    /// both layers equal.
    pub fn face_centered(shape: &IndexShape, axis: Axis) -> Self {
        let (mut n3, mut n2, mut n1) = (
            shape.ncells3() as usize,
            shape.ncells2() as usize,
            shape.ncells1() as usize,
        );
        match axis {
            Axis::X1 => n1 += 1,
            Axis::X2 => n2 += 1,
            Axis::X3 => n3 += 1,
        }
        Self::zeros(n3, n2, n1)
    }

    #[inline]
    pub fn extents(&self) -> (usize, usize, usize) {
        (self.n3, self.n2, self.n1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    fn offset(&self, k: i64, j: i64, i: i64) -> usize {
        debug_assert!(k >= 0 && j >= 0 && i >= 0, "negative index ({k},{j},{i})");
        debug_assert!(
            (k as usize) < self.n3 && (j as usize) < self.n2 && (i as usize) < self.n1,
            "index ({k},{j},{i}) out of extents {:?}",
            self.extents()
        );
        (k as usize * self.n2 + j as usize) * self.n1 + i as usize
    }

    /// Element at `(k, j, i)`.
    ///
    /// # Panics
    /// Panics (debug) if the index is out of range.
    #[inline]
    pub fn at(&self, k: i64, j: i64, i: i64) -> f64 {
        self.data[self.offset(k, j, i)]
    }

    /// Mutable element at `(k, j, i)`.
    #[inline]
    pub fn at_mut(&mut self, k: i64, j: i64, i: i64) -> &mut f64 {
        let off = self.offset(k, j, i);
        &mut self.data[off]
    }

    /// Flat view of the underlying storage.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Flat mutable view of the underlying storage.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Overwrite every element with `value`.
    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }
}

/// The three face-centered component arrays of one vector field.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceField {
    pub x1f: Array3,
    pub x2f: Array3,
    pub x3f: Array3,
}

impl FaceField {
    /// Zero-initialized face field shaped for `shape`.
    pub fn zeros(shape: &IndexShape) -> Self {
        Self {
            x1f: Array3::face_centered(shape, Axis::X1),
            x2f: Array3::face_centered(shape, Axis::X2),
            x3f: Array3::face_centered(shape, Axis::X3),
        }
    }

    /// Component normal to `axis`.
    pub fn component(&self, axis: Axis) -> &Array3 {
        match axis {
            Axis::X1 => &self.x1f,
            Axis::X2 => &self.x2f,
            Axis::X3 => &self.x3f,
        }
    }

    /// Mutable component normal to `axis`.
    pub fn component_mut(&mut self, axis: Axis) -> &mut Array3 {
        match axis {
            Axis::X1 => &mut self.x1f,
            Axis::X2 => &mut self.x2f,
            Axis::X3 => &mut self.x3f,
        }
    }

    /// Overwrite all three components with `value`.
    pub fn fill(&mut self, value: f64) {
        self.x1f.fill(value);
        self.x2f.fill(value);
        self.x3f.fill(value);
    }
}
