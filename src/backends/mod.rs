//! The four segmentation/decomposition backends and their shared machinery.
//!
//! Each backend is a pure function of the working grid, the noise field and
//! its configuration: it produces a raw per-pixel assignment (ids dense from
//! 1, in backend-local order) plus any models, fractional weights and
//! warnings. Everything that is uniform across backends - pruning, adjacency
//! conflict resolution, renumbering, statistics - lives in the pipeline, not
//! here.

pub mod clumpfind;
pub mod fellwalker;
pub mod gaussclumps;
pub mod reinhold;

use serde::{Deserialize, Serialize};

use crate::catalog::{GaussianModel, PixelFraction};
use crate::config::{ClumpFindConfig, FellWalkerConfig, GaussClumpsConfig, ReinholdConfig};
use crate::error::{CatalogWarning, ExtractError};
use crate::grid::WorkGrid;
use crate::noise::NoiseField;

/// Backend selector with the backend-specific configuration embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Contour-descent flood-fill segmentation.
    ClumpFind(ClumpFindConfig),
    /// Gradient-ascent walk-to-peak segmentation.
    FellWalker(FellWalkerConfig),
    /// Iterative Gaussian fit-and-subtract decomposition.
    GaussClumps(GaussClumpsConfig),
    /// Scan-line peak detection with face-based region growing.
    Reinhold(ReinholdConfig),
}

impl Backend {
    /// Stable lowercase backend name, used in warnings and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::ClumpFind(_) => "clumpfind",
            Backend::FellWalker(_) => "fellwalker",
            Backend::GaussClumps(_) => "gaussclumps",
            Backend::Reinhold(_) => "reinhold",
        }
    }

    pub(crate) fn validate(&self, ndim: usize) -> Result<(), ExtractError> {
        match self {
            Backend::ClumpFind(config) => config.validate(),
            Backend::FellWalker(config) => config.validate(),
            Backend::GaussClumps(config) => config.validate(),
            Backend::Reinhold(config) => config.validate_for(ndim),
        }
    }
}

/// Raw backend output before the common post-processing passes.
#[derive(Debug)]
pub(crate) struct RawSegmentation {
    /// Per-pixel clump id, dense from 1 in backend-local order; 0 = none.
    pub assignment: Vec<u32>,
    /// Fitted shape descriptors, `models[i]` belonging to id `i + 1`.
    /// Empty for the segmentation backends.
    pub models: Vec<GaussianModel>,
    /// Sparse fractional weights for overlap pixels (GaussClumps only).
    pub fractions: Vec<PixelFraction>,
    /// Non-fatal conditions raised while segmenting.
    pub warnings: Vec<CatalogWarning>,
    /// Whether the pipeline should run boundary conflict resolution on the
    /// assignment (the level- and face-growing backends produce intermediate
    /// regions that can butt against each other).
    pub resolve_adjacency: bool,
}

impl RawSegmentation {
    pub fn segmentation(assignment: Vec<u32>, resolve_adjacency: bool) -> Self {
        Self {
            assignment,
            models: Vec::new(),
            fractions: Vec::new(),
            warnings: Vec::new(),
            resolve_adjacency,
        }
    }

    /// Number of distinct raw ids present.
    pub fn id_count(&self) -> usize {
        self.assignment.iter().copied().max().unwrap_or(0) as usize
    }
}

/// Significance floor at one pixel: `noise_level * rms`.
#[inline]
pub(crate) fn floor_at(noise: &NoiseField, noise_level: f64, flat: usize) -> f64 {
    noise_level * noise.rms_at(flat)
}

/// True when the pixel is unmasked and at or above its significance floor.
#[inline]
pub(crate) fn above_floor(
    work: &WorkGrid,
    noise: &NoiseField,
    noise_level: f64,
    flat: usize,
) -> bool {
    let v = work.values[flat];
    v.is_finite() && v >= floor_at(noise, noise_level, flat)
}

/// Find the root label in a disjoint-set forest, with path compression.
pub(crate) fn find_root(parents: &mut [u32], label: u32) -> u32 {
    let mut current = label;
    while current != parents[current as usize] {
        parents[current as usize] = parents[parents[current as usize] as usize];
        current = parents[current as usize];
    }
    current
}

/// Union two labels; the smaller root becomes the parent.
pub(crate) fn union_labels(parents: &mut [u32], a: u32, b: u32) -> u32 {
    let root_a = find_root(parents, a);
    let root_b = find_root(parents, b);
    if root_a == root_b {
        return root_a;
    }
    if root_a < root_b {
        parents[root_b as usize] = root_a;
        root_a
    } else {
        parents[root_a as usize] = root_b;
        root_b
    }
}
