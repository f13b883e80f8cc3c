//! N-dimensional intensity grid with bad-pixel masking and flat-index geometry.
//!
//! The public [`Grid`] wraps an `ndarray` array of any rank >= 1. Non-finite
//! samples are treated as bad pixels, and callers may additionally supply an
//! explicit bad-pixel mask. Backends never see the grid directly: the pipeline
//! converts it into an internal flat working copy ([`WorkGrid`]) where bad
//! pixels are NaN and all traversal happens through [`Geometry`], which owns
//! the shape/stride bookkeeping and neighbor enumeration for any rank.
//!
//! Working on flat buffers keeps the hot loops (flood fills, walks, component
//! labeling) free of per-access multi-index arithmetic; coordinates are only
//! materialized at the boundaries of the grid or when a catalog entry needs
//! them.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Neighbor connectivity for N-dimensional traversal.
///
/// `Face` connects pixels differing by one step along exactly one axis
/// (4-connectivity in 2-D, 6 in 3-D). `Vertex` also connects diagonals
/// (8-connectivity in 2-D, 26 in 3-D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    /// Axis-aligned neighbors only.
    #[default]
    Face,
    /// All neighbors in the surrounding 3^N - 1 hypercube.
    Vertex,
}

/// An immutable N-dimensional intensity array plus bad-pixel information.
///
/// Bad pixels are excluded from every algorithm: they are never candidate
/// seeds, never walked through, and never assigned to a clump. A sample is bad
/// if it is non-finite (NaN/inf sentinel flagging) or if the optional explicit
/// mask marks it bad.
#[derive(Debug, Clone)]
pub struct Grid {
    data: ArrayD<f64>,
    mask: Option<ArrayD<bool>>,
}

impl Grid {
    /// Wrap an intensity array. Non-finite samples are treated as bad pixels.
    pub fn new(data: ArrayD<f64>) -> Self {
        // Normalize to standard (row-major, contiguous) layout so flat
        // indexing and logical iteration order agree.
        let data = data.as_standard_layout().into_owned();
        Self { data, mask: None }
    }

    /// Wrap an intensity array with an explicit bad-pixel mask (`true` = bad).
    ///
    /// # Errors
    /// Returns [`ExtractError::ShapeMismatch`] if the mask extents differ from
    /// the data extents.
    pub fn with_mask(data: ArrayD<f64>, mask: ArrayD<bool>) -> Result<Self, ExtractError> {
        if data.shape() != mask.shape() {
            return Err(ExtractError::ShapeMismatch {
                grid: data.shape().to_vec(),
                other: mask.shape().to_vec(),
                what: "bad-pixel mask",
            });
        }
        let data = data.as_standard_layout().into_owned();
        let mask = mask.as_standard_layout().into_owned();
        Ok(Self {
            data,
            mask: Some(mask),
        })
    }

    /// Per-axis extents.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Total number of pixels.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the grid holds no pixels at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the underlying intensity array.
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Samples in row-major order, with badness resolved per pixel: a bad
    /// sample (non-finite, or flagged by the explicit mask) comes out as NaN.
    pub(crate) fn flat_samples(&self) -> Vec<f64> {
        match &self.mask {
            Some(mask) => self
                .data
                .iter()
                .zip(mask.iter())
                .map(|(&v, &bad)| if bad || !v.is_finite() { f64::NAN } else { v })
                .collect(),
            None => self
                .data
                .iter()
                .map(|&v| if v.is_finite() { v } else { f64::NAN })
                .collect(),
        }
    }
}

/// Shape and stride bookkeeping for flat-index traversal of a row-major grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl Geometry {
    /// Build the geometry for a row-major array of the given extents.
    pub fn new(shape: &[usize]) -> Self {
        let mut strides = vec![1usize; shape.len()];
        for axis in (0..shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * shape[axis + 1];
        }
        Self {
            shape: shape.to_vec(),
            strides,
        }
    }

    /// Per-axis extents.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of pixels.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// True when the grid holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decompose a flat index into per-axis coordinates.
    pub fn coords_of(&self, flat: usize) -> Vec<usize> {
        let mut coords = vec![0usize; self.shape.len()];
        self.coords_into(flat, &mut coords);
        coords
    }

    /// Decompose a flat index into a caller-provided coordinate buffer.
    pub fn coords_into(&self, flat: usize, coords: &mut [usize]) {
        let mut rem = flat;
        for (axis, &stride) in self.strides.iter().enumerate() {
            coords[axis] = rem / stride;
            rem %= stride;
        }
    }

    /// Compose per-axis coordinates into a flat index.
    pub fn flat_of(&self, coords: &[usize]) -> usize {
        coords
            .iter()
            .zip(&self.strides)
            .map(|(&c, &s)| c * s)
            .sum()
    }

    /// Collect the flat indices of all in-bounds neighbors of `flat`.
    ///
    /// The output buffer is cleared first; neighbors are produced in a fixed
    /// deterministic order so traversal results are reproducible.
    pub fn neighbors_into(&self, flat: usize, connectivity: Connectivity, out: &mut Vec<usize>) {
        out.clear();
        let coords = self.coords_of(flat);
        match connectivity {
            Connectivity::Face => {
                for axis in 0..self.shape.len() {
                    if coords[axis] > 0 {
                        out.push(flat - self.strides[axis]);
                    }
                    if coords[axis] + 1 < self.shape[axis] {
                        out.push(flat + self.strides[axis]);
                    }
                }
            }
            Connectivity::Vertex => {
                // Odometer over {-1, 0, +1}^N excluding the all-zero offset.
                let ndim = self.shape.len();
                let mut delta = vec![-1i64; ndim];
                loop {
                    if delta.iter().any(|&d| d != 0) {
                        let mut ok = true;
                        let mut neighbor = flat as i64;
                        for axis in 0..ndim {
                            let c = coords[axis] as i64 + delta[axis];
                            if c < 0 || c >= self.shape[axis] as i64 {
                                ok = false;
                                break;
                            }
                            neighbor += delta[axis] * self.strides[axis] as i64;
                        }
                        if ok {
                            out.push(neighbor as usize);
                        }
                    }
                    // Advance the odometer.
                    let mut axis = ndim;
                    loop {
                        if axis == 0 {
                            return;
                        }
                        axis -= 1;
                        if delta[axis] < 1 {
                            delta[axis] += 1;
                            break;
                        }
                        delta[axis] = -1;
                    }
                }
            }
        }
    }

    /// Collect all in-bounds flat indices within Chebyshev distance `radius`
    /// of `flat`, excluding `flat` itself. Used by the FellWalker jump rule.
    pub fn chebyshev_ball_into(&self, flat: usize, radius: usize, out: &mut Vec<usize>) {
        out.clear();
        if radius == 0 {
            return;
        }
        let coords = self.coords_of(flat);
        let ndim = self.shape.len();
        let r = radius as i64;
        let mut delta = vec![-r; ndim];
        loop {
            if delta.iter().any(|&d| d != 0) {
                let mut ok = true;
                let mut neighbor = flat as i64;
                for axis in 0..ndim {
                    let c = coords[axis] as i64 + delta[axis];
                    if c < 0 || c >= self.shape[axis] as i64 {
                        ok = false;
                        break;
                    }
                    neighbor += delta[axis] * self.strides[axis] as i64;
                }
                if ok {
                    out.push(neighbor as usize);
                }
            }
            let mut axis = ndim;
            loop {
                if axis == 0 {
                    return;
                }
                axis -= 1;
                if delta[axis] < r {
                    delta[axis] += 1;
                    break;
                }
                delta[axis] = -r;
            }
        }
    }
}

/// Internal working copy of a grid: flat row-major samples with bad pixels
/// stored as NaN, plus the geometry needed to traverse them.
///
/// Exclusively owned by one extraction run and discarded on completion; the
/// caller's [`Grid`] is never mutated.
#[derive(Debug, Clone)]
pub(crate) struct WorkGrid {
    pub values: Vec<f64>,
    pub geom: Geometry,
}

impl WorkGrid {
    pub fn from_grid(grid: &Grid) -> Self {
        Self {
            values: grid.flat_samples(),
            geom: Geometry::new(grid.shape()),
        }
    }

    /// True when the sample at `flat` is usable.
    #[inline]
    pub fn is_good(&self, flat: usize) -> bool {
        self.values[flat].is_finite()
    }

    /// True when every pixel is masked.
    pub fn all_bad(&self) -> bool {
        self.values.iter().all(|v| !v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_geometry_roundtrip() {
        let geom = Geometry::new(&[3, 4, 5]);
        assert_eq!(geom.len(), 60);
        for flat in 0..geom.len() {
            let coords = geom.coords_of(flat);
            assert_eq!(geom.flat_of(&coords), flat);
        }
    }

    #[test]
    fn test_face_neighbors_2d() {
        let geom = Geometry::new(&[3, 3]);
        let mut out = Vec::new();

        // Center pixel has 4 face neighbors.
        geom.neighbors_into(geom.flat_of(&[1, 1]), Connectivity::Face, &mut out);
        assert_eq!(out.len(), 4);

        // Corner pixel has 2.
        geom.neighbors_into(geom.flat_of(&[0, 0]), Connectivity::Face, &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_vertex_neighbors_2d() {
        let geom = Geometry::new(&[3, 3]);
        let mut out = Vec::new();

        geom.neighbors_into(geom.flat_of(&[1, 1]), Connectivity::Vertex, &mut out);
        assert_eq!(out.len(), 8);

        geom.neighbors_into(geom.flat_of(&[0, 0]), Connectivity::Vertex, &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_vertex_neighbors_3d_count() {
        let geom = Geometry::new(&[3, 3, 3]);
        let mut out = Vec::new();
        geom.neighbors_into(geom.flat_of(&[1, 1, 1]), Connectivity::Vertex, &mut out);
        assert_eq!(out.len(), 26);
    }

    #[test]
    fn test_face_neighbors_1d() {
        let geom = Geometry::new(&[5]);
        let mut out = Vec::new();
        geom.neighbors_into(2, Connectivity::Face, &mut out);
        assert_eq!(out, vec![1, 3]);
        geom.neighbors_into(0, Connectivity::Face, &mut out);
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_chebyshev_ball_1d() {
        let geom = Geometry::new(&[9]);
        let mut out = Vec::new();
        geom.chebyshev_ball_into(4, 2, &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![2, 3, 5, 6]);
    }

    #[test]
    fn test_workgrid_masks_nonfinite() {
        let data =
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, f64::NAN, 3.0, f64::INFINITY])
                .unwrap();
        let grid = Grid::new(data);
        let work = WorkGrid::from_grid(&grid);
        assert!(work.is_good(0));
        assert!(!work.is_good(1));
        assert!(work.is_good(2));
        assert!(!work.is_good(3));
        assert!(!work.all_bad());
    }

    #[test]
    fn test_explicit_mask_applies() {
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mask =
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![false, true, false, false]).unwrap();
        let grid = Grid::with_mask(data, mask).unwrap();
        let work = WorkGrid::from_grid(&grid);
        assert!(work.is_good(0));
        assert!(!work.is_good(1));
    }

    #[test]
    fn test_mask_shape_mismatch_rejected() {
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0; 4]).unwrap();
        let mask = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![false; 6]).unwrap();
        assert!(matches!(
            Grid::with_mask(data, mask),
            Err(ExtractError::ShapeMismatch { .. })
        ));
    }
}
