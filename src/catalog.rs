//! Output data structures: clump records, ownership map and fractional
//! attribution.
//!
//! A catalog is the complete result of one extraction run. Clump identifiers
//! are dense, 1-based and ordered by descending peak value (ties broken by
//! ascending centroid, lexicographically), so identical inputs always yield
//! identical catalogs. Identifier 0 is reserved for background/unassigned
//! pixels in the ownership map.
//!
//! Most backends produce disjoint pixel sets, so a single integer per pixel
//! suffices. GaussClumps components may overlap; for pixels where more than
//! one fitted model contributes, the ownership map records the dominant
//! component and [`ClumpCatalog::fractions`] carries the full sparse weight
//! list.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::CatalogWarning;

/// Closed-form shape descriptor for a fitted Gaussian component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianModel {
    /// Peak amplitude above the background offset.
    pub amplitude: f64,
    /// Center position per axis, in fractional pixel coordinates.
    pub center: Vec<f64>,
    /// Standard deviation per axis, in pixels.
    pub sigma: Vec<f64>,
    /// Constant background offset under the component.
    pub background: f64,
}

impl GaussianModel {
    /// Value of the Gaussian term alone (no background) at a position.
    pub fn profile_at(&self, coords: &[f64]) -> f64 {
        let mut exponent = 0.0;
        for axis in 0..self.center.len() {
            let d = coords[axis] - self.center[axis];
            exponent += d * d / (2.0 * self.sigma[axis] * self.sigma[axis]);
        }
        self.amplitude * (-exponent).exp()
    }

    /// Full model value (background plus Gaussian term) at a position.
    pub fn value_at(&self, coords: &[f64]) -> f64 {
        self.background + self.profile_at(coords)
    }

    /// Closed-form volume integral of the Gaussian term over all space:
    /// `A * prod_k(sigma_k * sqrt(2*pi))`.
    pub fn integrated_flux(&self) -> f64 {
        let root_two_pi = (2.0 * std::f64::consts::PI).sqrt();
        self.amplitude
            * self
                .sigma
                .iter()
                .map(|s| s * root_two_pi)
                .product::<f64>()
    }
}

/// One catalog entry: a discrete region of enhanced signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clump {
    /// Dense 1-based identifier; 0 is reserved for background.
    pub id: u32,
    /// Highest data value over the clump's pixels (or the model peak for a
    /// fitted component).
    pub peak_value: f64,
    /// Coordinates of the peak pixel.
    pub peak_index: Vec<usize>,
    /// Intensity-weighted centroid, fractional pixel coordinates per axis.
    pub centroid: Vec<f64>,
    /// Inclusive (min, max) pixel bounds per axis.
    pub bounds: Vec<(usize, usize)>,
    /// Number of pixels assigned to the clump in the ownership map.
    pub pixel_count: usize,
    /// Integrated flux: sum of member pixel values, or the closed-form model
    /// integral for a fitted component.
    pub flux: f64,
    /// Shape descriptor for model-based backends; `None` for the
    /// segmentation backends, whose clumps are defined by their pixel sets.
    pub model: Option<GaussianModel>,
}

/// Fractional ownership of one pixel shared by overlapping components.
///
/// `index` is the flat row-major pixel index into the grid; decode it with
/// the catalog's ownership-map shape. Weights sum to 1 over the listed
/// component ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelFraction {
    /// Flat row-major pixel index.
    pub index: usize,
    /// `(clump id, weight)` pairs, descending by weight.
    pub weights: Vec<(u32, f64)>,
}

/// Complete result of one extraction run.
#[derive(Debug, Clone, PartialEq)]
pub struct ClumpCatalog {
    /// Surviving clumps, ordered by id (descending peak value).
    pub clumps: Vec<Clump>,
    /// Per-pixel clump assignment; 0 = background/unassigned.
    pub ownership: ArrayD<u32>,
    /// Sparse fractional weights for pixels shared by overlapping components
    /// (GaussClumps only; empty for the segmentation backends).
    pub fractions: Vec<PixelFraction>,
    /// Non-fatal conditions encountered during the run.
    pub warnings: Vec<CatalogWarning>,
}

impl ClumpCatalog {
    /// Empty catalog for a grid of the given shape.
    pub(crate) fn empty(shape: &[usize], warnings: Vec<CatalogWarning>) -> Self {
        Self {
            clumps: Vec::new(),
            ownership: ArrayD::zeros(ndarray::IxDyn(shape)),
            fractions: Vec::new(),
            warnings,
        }
    }

    /// Number of clumps found.
    pub fn len(&self) -> usize {
        self.clumps.len()
    }

    /// True when no clumps were found.
    pub fn is_empty(&self) -> bool {
        self.clumps.is_empty()
    }

    /// Look up a clump by its 1-based identifier.
    pub fn get(&self, id: u32) -> Option<&Clump> {
        if id == 0 {
            return None;
        }
        self.clumps.get(id as usize - 1)
    }
}
