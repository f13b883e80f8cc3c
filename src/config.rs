//! Configuration records for the extraction pipeline and its backends.
//!
//! All records derive serde traits so callers can persist or ship
//! configurations as JSON/YAML, and all carry defaults chosen to behave
//! sensibly on typical radio/submillimetre cubes. `validate()` rejects
//! structurally bad values before any work begins.

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::grid::Connectivity;

/// Fields common to every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Significance floor as a multiple of the noise RMS; pixels below
    /// `noise_level * rms` are background.
    pub noise_level: f64,

    /// Minimum pixel count for a clump to survive pruning. `None` selects a
    /// rank-dependent default (3 for 1-D, 7 for 2-D, 16 for 3-D and above).
    pub min_pixels: Option<usize>,

    /// Optional cap on the number of clumps returned.
    pub max_clumps: Option<usize>,

    /// Neighbor connectivity used by the segmentation backends.
    pub connectivity: Connectivity,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            noise_level: 3.0,
            min_pixels: None,
            max_clumps: None,
            connectivity: Connectivity::Face,
        }
    }
}

impl ExtractConfig {
    /// Reject structurally invalid parameter values.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if !self.noise_level.is_finite() || self.noise_level <= 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "noise_level must be finite and positive, got {}",
                self.noise_level
            )));
        }
        if let Some(min_pixels) = self.min_pixels {
            if min_pixels == 0 {
                return Err(ExtractError::ConfigurationInvalid(
                    "min_pixels must be at least 1".into(),
                ));
            }
        }
        if let Some(max_clumps) = self.max_clumps {
            if max_clumps == 0 {
                return Err(ExtractError::ConfigurationInvalid(
                    "max_clumps must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }

    /// Effective minimum pixel count for a grid of the given rank.
    pub fn min_pixels_for(&self, ndim: usize) -> usize {
        self.min_pixels.unwrap_or(match ndim {
            0 | 1 => 3,
            2 => 7,
            _ => 16,
        })
    }
}

/// ClumpFind: contour-descent flood-fill segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClumpFindConfig {
    /// Spacing between contour levels as a multiple of the noise RMS.
    /// Smaller values deblend finer structure at higher cost.
    pub delta_rms: f64,
}

impl Default for ClumpFindConfig {
    fn default() -> Self {
        Self { delta_rms: 2.0 }
    }
}

impl ClumpFindConfig {
    pub(crate) fn validate(&self) -> Result<(), ExtractError> {
        if !self.delta_rms.is_finite() || self.delta_rms <= 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "delta_rms must be finite and positive, got {}",
                self.delta_rms
            )));
        }
        Ok(())
    }
}

/// FellWalker: gradient-ascent walk-to-peak segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FellWalkerConfig {
    /// Minimum peak-to-saddle drop, in RMS multiples, for a clump to stay
    /// distinct from its highest-peak neighbor.
    pub min_dip_rms: f64,

    /// Chebyshev radius searched for a steeper pixel when a walk stalls on a
    /// noise-induced local maximum.
    pub max_jump: usize,

    /// Minimum average ascent per step for a walk to seed a new clump;
    /// zero disables the plateau guard.
    pub flat_slope: f64,
}

impl Default for FellWalkerConfig {
    fn default() -> Self {
        Self {
            min_dip_rms: 3.0,
            max_jump: 4,
            flat_slope: 0.0,
        }
    }
}

impl FellWalkerConfig {
    pub(crate) fn validate(&self) -> Result<(), ExtractError> {
        if !self.min_dip_rms.is_finite() || self.min_dip_rms < 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "min_dip_rms must be finite and non-negative, got {}",
                self.min_dip_rms
            )));
        }
        if !self.flat_slope.is_finite() || self.flat_slope < 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "flat_slope must be finite and non-negative, got {}",
                self.flat_slope
            )));
        }
        Ok(())
    }
}

/// GaussClumps: iterative fit-and-subtract Gaussian decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussClumpsConfig {
    /// Iteration cap for a single Levenberg-Marquardt fit.
    pub max_iterations: usize,

    /// Relative chi-squared change below which a fit has converged.
    pub tolerance: f64,

    /// Half-width of the fitting window around a residual peak, in units of
    /// the initial per-axis width.
    pub window_sigmas: f64,

    /// Initial per-axis Gaussian width (pixels) used to seed each fit.
    pub initial_sigma: f64,

    /// Fit a constant background offset alongside the Gaussian.
    pub fit_background: bool,

    /// Consecutive failed fits tolerated before the decomposition stops.
    pub max_failed_fits: usize,
}

impl Default for GaussClumpsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            window_sigmas: 3.0,
            initial_sigma: 2.0,
            fit_background: true,
            max_failed_fits: 10,
        }
    }
}

impl GaussClumpsConfig {
    pub(crate) fn validate(&self) -> Result<(), ExtractError> {
        if self.max_iterations == 0 {
            return Err(ExtractError::ConfigurationInvalid(
                "max_iterations must be at least 1".into(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "tolerance must be finite and positive, got {}",
                self.tolerance
            )));
        }
        if !self.window_sigmas.is_finite() || self.window_sigmas <= 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "window_sigmas must be finite and positive, got {}",
                self.window_sigmas
            )));
        }
        if !self.initial_sigma.is_finite() || self.initial_sigma <= 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "initial_sigma must be finite and positive, got {}",
                self.initial_sigma
            )));
        }
        if self.max_failed_fits == 0 {
            return Err(ExtractError::ConfigurationInvalid(
                "max_failed_fits must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Reinhold: scan-line peak detection with face-based region growing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinholdConfig {
    /// Axis scanned for 1-D maxima; `None` scans along axis 0.
    pub scan_axis: Option<usize>,

    /// Value agreement, in RMS multiples, for candidate points on adjacent
    /// scan lines to be linked into one face.
    pub value_tolerance_rms: f64,

    /// Rounds of majority-vote cellular-automata smoothing applied to the raw
    /// ownership map; zero disables the cleanup pass.
    pub ca_iterations: usize,
}

impl Default for ReinholdConfig {
    fn default() -> Self {
        Self {
            scan_axis: None,
            value_tolerance_rms: 1.0,
            ca_iterations: 1,
        }
    }
}

impl ReinholdConfig {
    pub(crate) fn validate(&self) -> Result<(), ExtractError> {
        if !self.value_tolerance_rms.is_finite() || self.value_tolerance_rms <= 0.0 {
            return Err(ExtractError::ConfigurationInvalid(format!(
                "value_tolerance_rms must be finite and positive, got {}",
                self.value_tolerance_rms
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_for(&self, ndim: usize) -> Result<(), ExtractError> {
        self.validate()?;
        if let Some(axis) = self.scan_axis {
            if axis >= ndim {
                return Err(ExtractError::ConfigurationInvalid(format!(
                    "scan_axis {axis} out of range for a rank-{ndim} grid"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ExtractConfig::default().validate().is_ok());
        assert!(ClumpFindConfig::default().validate().is_ok());
        assert!(FellWalkerConfig::default().validate().is_ok());
        assert!(GaussClumpsConfig::default().validate().is_ok());
        assert!(ReinholdConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rank_dependent_min_pixels() {
        let config = ExtractConfig::default();
        assert_eq!(config.min_pixels_for(1), 3);
        assert_eq!(config.min_pixels_for(2), 7);
        assert_eq!(config.min_pixels_for(3), 16);
        assert_eq!(config.min_pixels_for(4), 16);

        let config = ExtractConfig {
            min_pixels: Some(5),
            ..Default::default()
        };
        assert_eq!(config.min_pixels_for(3), 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ExtractConfig {
            noise_level: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ExtractConfig {
            min_pixels: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClumpFindConfig { delta_rms: -1.0 };
        assert!(config.validate().is_err());

        let config = ReinholdConfig {
            scan_axis: Some(3),
            ..Default::default()
        };
        assert!(config.validate_for(2).is_err());
        assert!(config.validate_for(4).is_ok());
    }

    #[test]
    fn test_serde_roundtrip_with_defaults() {
        let config: ExtractConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ExtractConfig::default());

        let config: FellWalkerConfig =
            serde_json::from_str(r#"{"min_dip_rms": 2.0}"#).unwrap();
        assert_eq!(config.min_dip_rms, 2.0);
        assert_eq!(config.max_jump, FellWalkerConfig::default().max_jump);
    }
}
