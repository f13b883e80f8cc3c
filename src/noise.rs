//! Noise models and robust RMS estimation.
//!
//! Every backend measures significance in multiples of the noise RMS. The
//! model is either a single scalar applied uniformly or a per-pixel RMS array
//! matching the grid shape (useful for mosaicked cubes with varying exposure).
//!
//! When the caller has no noise estimate, [`NoiseModel::estimate`] derives a
//! robust global RMS from the median absolute deviation of the unmasked
//! samples, which tolerates the bright-source outliers that would inflate a
//! plain standard deviation.

use ndarray::ArrayD;

use crate::error::ExtractError;
use crate::grid::Grid;

/// Scale factor from median absolute deviation to Gaussian standard deviation.
const MAD_TO_SIGMA: f64 = 1.4826;

/// Noise level descriptor: uniform scalar RMS or a per-pixel RMS field.
#[derive(Debug, Clone)]
pub enum NoiseModel {
    /// One RMS value applied to every pixel.
    Global(f64),
    /// Per-pixel RMS array; must match the grid extents.
    PerPixel(ArrayD<f64>),
}

impl NoiseModel {
    /// Check the model against a grid: extents must match for per-pixel
    /// models, and RMS values must be strictly positive wherever the grid is
    /// unmasked.
    pub fn validate(&self, grid: &Grid) -> Result<(), ExtractError> {
        match self {
            NoiseModel::Global(rms) => {
                if !rms.is_finite() || *rms <= 0.0 {
                    return Err(ExtractError::ConfigurationInvalid(format!(
                        "noise RMS must be finite and positive, got {rms}"
                    )));
                }
            }
            NoiseModel::PerPixel(field) => {
                if field.shape() != grid.shape() {
                    return Err(ExtractError::ShapeMismatch {
                        grid: grid.shape().to_vec(),
                        other: field.shape().to_vec(),
                        what: "noise model",
                    });
                }
                for (&rms, good) in field
                    .iter()
                    .zip(grid.flat_samples().iter().map(|v| v.is_finite()))
                {
                    if good && (!rms.is_finite() || rms <= 0.0) {
                        return Err(ExtractError::ConfigurationInvalid(format!(
                            "per-pixel noise RMS must be positive on unmasked pixels, got {rms}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Estimate a global RMS from the grid itself using the scaled median
    /// absolute deviation of the unmasked samples.
    ///
    /// Returns `None` when the grid has no unmasked pixels or the samples are
    /// perfectly constant (zero spread carries no usable noise information).
    pub fn estimate(grid: &Grid) -> Option<NoiseModel> {
        let mut samples: Vec<f64> = grid
            .flat_samples()
            .into_iter()
            .filter(|v| v.is_finite())
            .collect();
        if samples.is_empty() {
            return None;
        }
        let med = median_in_place(&mut samples)?;
        let mut deviations: Vec<f64> = samples.iter().map(|v| (v - med).abs()).collect();
        let mad = median_in_place(&mut deviations)?;
        let rms = mad * MAD_TO_SIGMA;
        if rms > 0.0 {
            Some(NoiseModel::Global(rms))
        } else {
            None
        }
    }
}

/// Flattened, validated view of a noise model used by the backends.
#[derive(Debug, Clone)]
pub(crate) enum NoiseField {
    Scalar(f64),
    Field(Vec<f64>),
}

impl NoiseField {
    pub fn from_model(model: &NoiseModel) -> Self {
        match model {
            NoiseModel::Global(rms) => NoiseField::Scalar(*rms),
            NoiseModel::PerPixel(field) => {
                NoiseField::Field(field.iter().copied().collect())
            }
        }
    }

    /// RMS at a flat pixel index.
    #[inline]
    pub fn rms_at(&self, flat: usize) -> f64 {
        match self {
            NoiseField::Scalar(rms) => *rms,
            NoiseField::Field(v) => v[flat],
        }
    }

    /// Mean RMS over the grid, used where a backend needs one representative
    /// step size (e.g. the ClumpFind contour spacing).
    pub fn mean_rms(&self, len: usize) -> f64 {
        match self {
            NoiseField::Scalar(rms) => *rms,
            NoiseField::Field(v) => {
                let finite: Vec<f64> = v.iter().copied().filter(|r| r.is_finite()).collect();
                if finite.is_empty() || len == 0 {
                    0.0
                } else {
                    finite.iter().sum::<f64>() / finite.len() as f64
                }
            }
        }
    }
}

/// Median of a mutable sample buffer; None when empty.
fn median_in_place(samples: &mut [f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 0 {
        Some((samples[mid - 1] + samples[mid]) / 2.0)
    } else {
        Some(samples[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::IxDyn;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn noisy_grid(shape: &[usize], mean: f64, sigma: f64, seed: u64) -> Grid {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(mean, sigma).unwrap();
        let len: usize = shape.iter().product();
        let data: Vec<f64> = (0..len).map(|_| normal.sample(&mut rng)).collect();
        Grid::new(ArrayD::from_shape_vec(IxDyn(shape), data).unwrap())
    }

    #[test]
    fn test_global_validation() {
        let grid = noisy_grid(&[4, 4], 0.0, 1.0, 1);
        assert!(NoiseModel::Global(1.0).validate(&grid).is_ok());
        assert!(NoiseModel::Global(0.0).validate(&grid).is_err());
        assert!(NoiseModel::Global(-1.0).validate(&grid).is_err());
        assert!(NoiseModel::Global(f64::NAN).validate(&grid).is_err());
    }

    #[test]
    fn test_per_pixel_shape_mismatch() {
        let grid = noisy_grid(&[4, 4], 0.0, 1.0, 2);
        let field = ArrayD::from_elem(IxDyn(&[4, 5]), 1.0);
        assert!(matches!(
            NoiseModel::PerPixel(field).validate(&grid),
            Err(ExtractError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_per_pixel_nonpositive_on_masked_pixel_allowed() {
        let data =
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, f64::NAN, 3.0, 4.0]).unwrap();
        let grid = Grid::new(data);
        let field =
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, 0.0, 1.0, 1.0]).unwrap();
        // Zero RMS under a masked pixel does not violate the invariant.
        assert!(NoiseModel::PerPixel(field).validate(&grid).is_ok());

        let bad_field =
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, 1.0, 0.0, 1.0]).unwrap();
        assert!(NoiseModel::PerPixel(bad_field).validate(&grid).is_err());
    }

    #[test]
    fn test_mad_estimate_recovers_sigma() {
        let grid = noisy_grid(&[64, 64], 100.0, 5.0, 42);
        let model = NoiseModel::estimate(&grid).unwrap();
        match model {
            NoiseModel::Global(rms) => assert_relative_eq!(rms, 5.0, epsilon = 0.5),
            _ => panic!("expected a global estimate"),
        }
    }

    #[test]
    fn test_estimate_on_constant_grid_is_none() {
        let grid = Grid::new(ArrayD::from_elem(IxDyn(&[8, 8]), 3.0));
        assert!(NoiseModel::estimate(&grid).is_none());
    }

    #[test]
    fn test_estimate_on_all_masked_is_none() {
        let grid = Grid::new(ArrayD::from_elem(IxDyn(&[4, 4]), f64::NAN));
        assert!(NoiseModel::estimate(&grid).is_none());
    }

    #[test]
    fn test_noise_field_access() {
        let field = NoiseField::Scalar(2.0);
        assert_eq!(field.rms_at(17), 2.0);
        assert_eq!(field.mean_rms(100), 2.0);

        let field = NoiseField::Field(vec![1.0, 3.0]);
        assert_eq!(field.rms_at(1), 3.0);
        assert_relative_eq!(field.mean_rms(2), 2.0);
    }
}
