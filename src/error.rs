//! Error and warning taxonomy for clump extraction runs.
//!
//! Only structural input problems abort a run: bad configuration values and
//! geometry disagreements between the grid and a per-pixel noise model.
//! Everything else (a diverging fit, an exhausted iteration cap, an entirely
//! masked grid) degrades to a best-effort catalog carrying machine-readable
//! [`CatalogWarning`] entries describing what was skipped and why.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort an extraction run before any output is produced.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A configuration field fails validation (rejected before any work begins).
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Grid and per-pixel noise model (or explicit bad-pixel mask) disagree in extent.
    #[error("shape mismatch: grid has extents {grid:?} but {what} has {other:?}")]
    ShapeMismatch {
        /// Grid extents per axis.
        grid: Vec<usize>,
        /// Extents of the disagreeing array.
        other: Vec<usize>,
        /// Which collaborator disagreed ("noise model" or "bad-pixel mask").
        what: &'static str,
    },
}

/// Non-fatal conditions attached to a catalog produced by a degraded run.
///
/// Partial results remain valid whenever one of these is present; callers that
/// need strictness can treat a non-empty warning list as a failure themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CatalogWarning {
    /// Every pixel of the input grid was masked; nothing was processed.
    EmptyGrid,

    /// One or more GaussClumps peak fits failed to converge and were skipped.
    FitDivergence {
        /// Number of candidate peaks abandoned without producing a clump.
        skipped: usize,
    },

    /// A backend's internal loop hit a safety cap and stopped early.
    IterationLimitExceeded {
        /// Name of the backend that stopped.
        backend: String,
        /// Human-readable description of which cap fired.
        detail: String,
    },
}
