//! Clump extraction from N-dimensional gridded intensity data.
//!
//! Given a noisy grid (a spectral-line cube, an image, a 1-D scan), this
//! crate partitions the significant emission into discrete clumps and
//! returns a catalog of per-clump statistics plus a pixel-level ownership
//! map. Four interchangeable backends cover the classic algorithm families:
//!
//! - [`ClumpFind`](backends::Backend::ClumpFind) - contour-descent flood
//!   fill, segmenting by intensity level sets
//! - [`FellWalker`](backends::Backend::FellWalker) - steepest-ascent walks
//!   to local maxima, with noise-dip merging
//! - [`GaussClumps`](backends::Backend::GaussClumps) - iterative Gaussian
//!   fit-and-subtract decomposition (components may overlap)
//! - [`Reinhold`](backends::Backend::Reinhold) - scan-line peak detection
//!   with face linking and region growing
//!
//! All significance decisions are expressed in multiples of the noise RMS,
//! supplied as a [`NoiseModel`] or estimated robustly from the data. Bad
//! pixels (non-finite samples or an explicit mask) are excluded everywhere.
//!
//! ```
//! use clumpfield::{extract, Backend, ExtractConfig, FellWalkerConfig, Grid, NoiseModel};
//!
//! let data = clumpfield::synth::gaussian_bump(&[32, 32], &[16.0, 16.0], 10.0, 2.0);
//! let grid = Grid::new(data);
//! let catalog = extract(
//!     &grid,
//!     &NoiseModel::Global(0.1),
//!     &Backend::FellWalker(FellWalkerConfig::default()),
//!     &ExtractConfig::default(),
//! )?;
//! assert_eq!(catalog.len(), 1);
//! # Ok::<(), clumpfield::ExtractError>(())
//! ```

pub mod backends;
pub mod catalog;
pub mod config;
pub mod error;
pub mod grid;
pub mod noise;
pub mod pipeline;
pub mod synth;

pub use backends::Backend;
pub use catalog::{Clump, ClumpCatalog, GaussianModel, PixelFraction};
pub use config::{
    ClumpFindConfig, ExtractConfig, FellWalkerConfig, GaussClumpsConfig, ReinholdConfig,
};
pub use error::{CatalogWarning, ExtractError};
pub use grid::{Connectivity, Geometry, Grid};
pub use noise::NoiseModel;
pub use pipeline::extract;
