//! Synthetic intensity patterns for tests, examples and benchmarks.
//!
//! Scenes are described as sums of [`GaussianModel`] components evaluated
//! over an N-dimensional grid, optionally with seeded Gaussian noise on top.
//! Noise generation uses a fixed-seed `StdRng`, so a given seed always
//! produces the same grid and extraction results stay reproducible.

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::catalog::GaussianModel;
use crate::grid::Geometry;

/// Evaluate a sum of Gaussian components over a grid of the given extents.
pub fn gaussian_field(shape: &[usize], components: &[GaussianModel]) -> ArrayD<f64> {
    let geom = Geometry::new(shape);
    let mut data = vec![0.0f64; geom.len()];
    let mut coords = vec![0usize; geom.ndim()];
    let mut position = vec![0.0f64; geom.ndim()];
    for (flat, sample) in data.iter_mut().enumerate() {
        geom.coords_into(flat, &mut coords);
        for (axis, &c) in coords.iter().enumerate() {
            position[axis] = c as f64;
        }
        for component in components {
            *sample += component.value_at(&position);
        }
    }
    ArrayD::from_shape_vec(IxDyn(shape), data).unwrap_or_else(|_| ArrayD::zeros(IxDyn(shape)))
}

/// A single isotropic bump, the common case in tests.
pub fn gaussian_bump(shape: &[usize], center: &[f64], amplitude: f64, sigma: f64) -> ArrayD<f64> {
    gaussian_field(
        shape,
        &[GaussianModel {
            amplitude,
            center: center.to_vec(),
            sigma: vec![sigma; shape.len()],
            background: 0.0,
        }],
    )
}

/// Add zero-mean Gaussian noise of the given RMS, reproducibly from a seed.
pub fn add_noise(data: &mut ArrayD<f64>, rms: f64, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    // A non-positive RMS would be a caller bug; Normal::new only fails for
    // non-finite or negative spread.
    if let Ok(normal) = Normal::new(0.0, rms) {
        for sample in data.iter_mut() {
            *sample += normal.sample(&mut rng);
        }
    }
}

/// Uniform grid, useful for below-floor and degenerate-input scenarios.
pub fn constant(shape: &[usize], value: f64) -> ArrayD<f64> {
    ArrayD::from_elem(IxDyn(shape), value)
}
