//! GaussClumps: iterative Gaussian fit-and-subtract decomposition.
//!
//! The backend keeps a residual copy of the grid and repeatedly: finds the
//! highest residual pixel, fits an N-dimensional Gaussian (amplitude, center,
//! per-axis width, optional constant background) to a window around it by
//! damped least squares, subtracts the fitted profile from the residual and
//! records it as a clump. A peak whose fit diverges or degenerates is masked
//! and skipped - never fatal - and the loop stops when no residual peak
//! clears the significance floor, when the component cap is reached, or
//! after too many consecutive failures.
//!
//! The decomposition is expressed as a bounded iterator yielding one fitted
//! component per step, so the driver (and ultimately the caller via
//! `max_clumps`) imposes its own budget without this module knowing about
//! it. Fits are strictly sequential - each depends on the residual left by
//! the previous one - but the post-hoc ownership attribution is a pure
//! per-pixel computation and runs on the rayon pool.
//!
//! Overlapping components are the norm here: the ownership map records the
//! dominant component per pixel and the sparse fraction list carries the
//! full weight split wherever more than one model contributes.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::catalog::{GaussianModel, PixelFraction};
use crate::config::{ExtractConfig, GaussClumpsConfig};
use crate::error::CatalogWarning;
use crate::grid::WorkGrid;
use crate::noise::NoiseField;

use super::{floor_at, RawSegmentation};

/// Smallest admissible fitted width, in pixels. Anything narrower is a noise
/// spike, not a resolvable clump.
const MIN_SIGMA: f64 = 0.25;

/// Minimum relative model contribution for a pixel to appear in the sparse
/// fraction list.
const FRACTION_CUTOFF: f64 = 0.01;

/// Models are evaluated only within this many fitted sigmas of their center.
const EVAL_SIGMAS: f64 = 5.0;

pub(crate) fn run(
    work: &WorkGrid,
    noise: &NoiseField,
    config: &GaussClumpsConfig,
    common: &ExtractConfig,
) -> RawSegmentation {
    let mut decomposer = Decomposer::new(work, noise, config, common);

    let mut models: Vec<GaussianModel> = Vec::new();
    let mut cap_reached = false;
    loop {
        if let Some(cap) = common.max_clumps {
            if models.len() >= cap {
                cap_reached = true;
                break;
            }
        }
        match decomposer.next_component() {
            Some(model) => models.push(model),
            None => break,
        }
    }

    let mut warnings = Vec::new();
    if decomposer.skipped > 0 {
        warnings.push(CatalogWarning::FitDivergence {
            skipped: decomposer.skipped,
        });
    }
    if decomposer.stopped_by_failures {
        warnings.push(CatalogWarning::IterationLimitExceeded {
            backend: "gaussclumps".into(),
            detail: format!(
                "stopped after {} consecutive failed fits",
                config.max_failed_fits
            ),
        });
    }
    if cap_reached && decomposer.peak_above_floor().is_some() {
        warnings.push(CatalogWarning::IterationLimitExceeded {
            backend: "gaussclumps".into(),
            detail: "component cap reached with residual signal remaining".into(),
        });
    }

    debug!(
        backend = "gaussclumps",
        components = models.len(),
        skipped = decomposer.skipped,
        "decomposition finished"
    );

    let (assignment, fractions) = attribute_ownership(work, noise, common, &models);

    RawSegmentation {
        assignment,
        models,
        fractions,
        warnings,
        resolve_adjacency: false,
    }
}

/// Fit-and-subtract state machine; each successful step yields one component.
struct Decomposer<'a> {
    work: &'a WorkGrid,
    noise: &'a NoiseField,
    config: &'a GaussClumpsConfig,
    common: &'a ExtractConfig,
    residual: Vec<f64>,
    /// Peaks whose fits failed; never reconsidered.
    blocked: Vec<bool>,
    skipped: usize,
    consecutive_failures: usize,
    stopped_by_failures: bool,
}

impl<'a> Decomposer<'a> {
    fn new(
        work: &'a WorkGrid,
        noise: &'a NoiseField,
        config: &'a GaussClumpsConfig,
        common: &'a ExtractConfig,
    ) -> Self {
        Self {
            work,
            noise,
            config,
            common,
            residual: work.values.clone(),
            blocked: vec![false; work.values.len()],
            skipped: 0,
            consecutive_failures: 0,
            stopped_by_failures: false,
        }
    }

    /// Highest usable residual pixel still above its significance floor.
    fn peak_above_floor(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        let mut best_value = f64::NEG_INFINITY;
        for (flat, &v) in self.residual.iter().enumerate() {
            if !v.is_finite() || self.blocked[flat] {
                continue;
            }
            if v > best_value && v >= floor_at(self.noise, self.common.noise_level, flat) {
                best_value = v;
                best = Some(flat);
            }
        }
        best
    }

    /// Produce the next fitted component, recovering locally from failed
    /// fits. Returns `None` when the residual is exhausted or the
    /// consecutive-failure cap fires.
    fn next_component(&mut self) -> Option<GaussianModel> {
        if self.stopped_by_failures {
            return None;
        }
        loop {
            let peak = self.peak_above_floor()?;
            match self.fit_at(peak) {
                Some(model) => {
                    self.subtract(&model);
                    self.consecutive_failures = 0;
                    return Some(model);
                }
                None => {
                    self.blocked[peak] = true;
                    self.skipped += 1;
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= self.config.max_failed_fits {
                        self.stopped_by_failures = true;
                        return None;
                    }
                }
            }
        }
    }

    /// Fit one Gaussian to the residual window around `peak`; None when the
    /// fit diverges, degenerates or comes out below the significance floor.
    fn fit_at(&self, peak: usize) -> Option<GaussianModel> {
        let geom = &self.work.geom;
        let ndim = geom.ndim();
        let center = geom.coords_of(peak);

        let halfwidth = (self.config.window_sigmas * self.config.initial_sigma).ceil() as usize;
        let halfwidth = halfwidth.max(1);

        // Gather finite residual samples from the window.
        let mut lo = vec![0usize; ndim];
        let mut hi = vec![0usize; ndim];
        for axis in 0..ndim {
            lo[axis] = center[axis].saturating_sub(halfwidth);
            hi[axis] = (center[axis] + halfwidth).min(geom.shape()[axis] - 1);
        }
        let mut samples: Vec<(Vec<f64>, f64)> = Vec::new();
        let mut cursor = lo.clone();
        loop {
            let flat = geom.flat_of(&cursor);
            let v = self.residual[flat];
            if v.is_finite() {
                samples.push((cursor.iter().map(|&c| c as f64).collect(), v));
            }
            // Advance the window cursor.
            let mut axis = ndim;
            let mut done = true;
            while axis > 0 {
                axis -= 1;
                if cursor[axis] < hi[axis] {
                    cursor[axis] += 1;
                    done = false;
                    break;
                }
                cursor[axis] = lo[axis];
            }
            if done {
                break;
            }
        }

        // Need more samples than free parameters for the fit to be posed.
        let n_params = 1 + 2 * ndim + usize::from(self.config.fit_background);
        if samples.len() <= n_params {
            return None;
        }

        let background_seed = if self.config.fit_background {
            samples
                .iter()
                .map(|(_, v)| *v)
                .fold(f64::INFINITY, f64::min)
        } else {
            0.0
        };
        let seed = GaussianModel {
            amplitude: (self.residual[peak] - background_seed).max(f64::EPSILON),
            center: center.iter().map(|&c| c as f64).collect(),
            sigma: vec![self.config.initial_sigma; ndim],
            background: background_seed,
        };

        let fitted = levenberg_marquardt(&samples, seed, self.config)?;

        // Reject degenerate or implausible solutions.
        if !fitted.amplitude.is_finite() || fitted.amplitude <= 0.0 {
            return None;
        }
        let model_peak = fitted.amplitude + fitted.background;
        if model_peak < floor_at(self.noise, self.common.noise_level, peak) {
            return None;
        }
        for axis in 0..ndim {
            let sigma = fitted.sigma[axis];
            if !sigma.is_finite() || sigma < MIN_SIGMA || sigma > geom.shape()[axis] as f64 {
                return None;
            }
            let c = fitted.center[axis];
            if !c.is_finite()
                || c < lo[axis] as f64 - 1.0
                || c > hi[axis] as f64 + 1.0
            {
                return None;
            }
        }
        Some(fitted)
    }

    /// Subtract the fitted profile (not its background) from the residual
    /// over a window wide enough that the remaining tails are negligible.
    fn subtract(&mut self, model: &GaussianModel) {
        let geom = &self.work.geom;
        let ndim = geom.ndim();
        let mut lo = vec![0usize; ndim];
        let mut hi = vec![0usize; ndim];
        for axis in 0..ndim {
            let reach = (4.0 * model.sigma[axis]).ceil() as usize + 1;
            let c = model.center[axis].round() as i64;
            lo[axis] = (c - reach as i64).max(0) as usize;
            hi[axis] = ((c + reach as i64).max(0) as usize).min(geom.shape()[axis] - 1);
            if lo[axis] > hi[axis] {
                return;
            }
        }
        let mut cursor = lo.clone();
        let mut coords = vec![0.0f64; ndim];
        loop {
            let flat = geom.flat_of(&cursor);
            if self.residual[flat].is_finite() {
                for axis in 0..ndim {
                    coords[axis] = cursor[axis] as f64;
                }
                self.residual[flat] -= model.profile_at(&coords);
            }
            let mut axis = ndim;
            let mut done = true;
            while axis > 0 {
                axis -= 1;
                if cursor[axis] < hi[axis] {
                    cursor[axis] += 1;
                    done = false;
                    break;
                }
                cursor[axis] = lo[axis];
            }
            if done {
                break;
            }
        }
    }
}

/// Damped least-squares fit of an N-dimensional Gaussian.
///
/// Parameters are packed `[amplitude, center.., sigma.., (background)]`; the
/// Jacobian is analytic. The damping factor grows when a step fails to
/// reduce chi-squared and shrinks when it succeeds, which keeps the solver
/// stable when neighboring peaks overlap the window. Returns `None` when the
/// iteration cap passes without convergence or the normal equations stay
/// unsolvable.
fn levenberg_marquardt(
    samples: &[(Vec<f64>, f64)],
    seed: GaussianModel,
    config: &GaussClumpsConfig,
) -> Option<GaussianModel> {
    let ndim = seed.center.len();
    let fit_background = config.fit_background;
    let n_params = 1 + 2 * ndim + usize::from(fit_background);
    let n_samples = samples.len();

    let mut params = pack(&seed, fit_background);
    let mut cost = chi_squared(samples, &params, ndim, fit_background);
    let mut lambda = 1e-3;

    for _ in 0..config.max_iterations {
        // Build residual vector and analytic Jacobian at the current params.
        let mut jacobian = DMatrix::<f64>::zeros(n_samples, n_params);
        let mut residuals = DVector::<f64>::zeros(n_samples);
        for (row, (coords, value)) in samples.iter().enumerate() {
            let amplitude = params[0];
            let background = if fit_background {
                params[n_params - 1]
            } else {
                0.0
            };
            let mut exponent = 0.0;
            for axis in 0..ndim {
                let d = coords[axis] - params[1 + axis];
                let sigma = params[1 + ndim + axis];
                exponent += d * d / (2.0 * sigma * sigma);
            }
            let shape = (-exponent).exp();
            let model = background + amplitude * shape;
            residuals[row] = model - value;

            jacobian[(row, 0)] = shape;
            for axis in 0..ndim {
                let d = coords[axis] - params[1 + axis];
                let sigma = params[1 + ndim + axis];
                jacobian[(row, 1 + axis)] = amplitude * shape * d / (sigma * sigma);
                jacobian[(row, 1 + ndim + axis)] =
                    amplitude * shape * d * d / (sigma * sigma * sigma);
            }
            if fit_background {
                jacobian[(row, n_params - 1)] = 1.0;
            }
        }

        let jtj = jacobian.transpose() * &jacobian;
        let jtr = jacobian.transpose() * &residuals;

        // Try increasingly damped steps until one reduces chi-squared.
        let mut stepped = false;
        for _ in 0..12 {
            let mut damped = jtj.clone();
            for i in 0..n_params {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }
            let Some(cholesky) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let delta = cholesky.solve(&(-&jtr));
            let trial: DVector<f64> = &params + &delta;

            // Widths must stay physical for the trial to be meaningful.
            if (0..ndim).any(|axis| trial[1 + ndim + axis].abs() < MIN_SIGMA / 4.0) {
                lambda *= 10.0;
                continue;
            }
            let trial_cost = chi_squared(samples, &trial, ndim, fit_background);
            if trial_cost.is_finite() && trial_cost < cost {
                let improvement = cost - trial_cost;
                params = trial;
                let converged = improvement <= config.tolerance * cost.max(f64::EPSILON);
                cost = trial_cost;
                lambda = (lambda * 0.1).max(1e-12);
                stepped = true;
                if converged {
                    return Some(unpack(&params, ndim, fit_background));
                }
                break;
            }
            lambda *= 10.0;
        }
        if !stepped {
            // No damping level helps: converged to numerical precision or
            // genuinely stuck. Accept only if the gradient is tiny.
            let gradient_norm = jtr.norm();
            if gradient_norm <= config.tolerance * (1.0 + cost) {
                return Some(unpack(&params, ndim, fit_background));
            }
            return None;
        }
    }
    None
}

fn pack(model: &GaussianModel, fit_background: bool) -> DVector<f64> {
    let ndim = model.center.len();
    let n_params = 1 + 2 * ndim + usize::from(fit_background);
    let mut params = DVector::zeros(n_params);
    params[0] = model.amplitude;
    for axis in 0..ndim {
        params[1 + axis] = model.center[axis];
        params[1 + ndim + axis] = model.sigma[axis];
    }
    if fit_background {
        params[n_params - 1] = model.background;
    }
    params
}

fn unpack(params: &DVector<f64>, ndim: usize, fit_background: bool) -> GaussianModel {
    let n_params = 1 + 2 * ndim + usize::from(fit_background);
    GaussianModel {
        amplitude: params[0],
        center: (0..ndim).map(|axis| params[1 + axis]).collect(),
        // The widths enter the model squared, so a negative sign is gauge.
        sigma: (0..ndim).map(|axis| params[1 + ndim + axis].abs()).collect(),
        background: if fit_background {
            params[n_params - 1]
        } else {
            0.0
        },
    }
}

fn chi_squared(
    samples: &[(Vec<f64>, f64)],
    params: &DVector<f64>,
    ndim: usize,
    fit_background: bool,
) -> f64 {
    let n_params = 1 + 2 * ndim + usize::from(fit_background);
    let amplitude = params[0];
    let background = if fit_background {
        params[n_params - 1]
    } else {
        0.0
    };
    samples
        .iter()
        .map(|(coords, value)| {
            let mut exponent = 0.0;
            for axis in 0..ndim {
                let d = coords[axis] - params[1 + axis];
                let sigma = params[1 + ndim + axis];
                exponent += d * d / (2.0 * sigma * sigma);
            }
            let r = background + amplitude * (-exponent).exp() - value;
            r * r
        })
        .sum()
}

/// Assign each above-floor pixel to the component contributing the largest
/// share of its value, recording fractional weights where components
/// overlap. Pure per-pixel work, parallelized over the grid.
fn attribute_ownership(
    work: &WorkGrid,
    noise: &NoiseField,
    common: &ExtractConfig,
    models: &[GaussianModel],
) -> (Vec<u32>, Vec<PixelFraction>) {
    let len = work.geom.len();
    if models.is_empty() {
        return (vec![0u32; len], Vec::new());
    }

    let per_pixel: Vec<(u32, Option<Vec<(u32, f64)>>)> = (0..len)
        .into_par_iter()
        .map(|flat| {
            let v = work.values[flat];
            if !v.is_finite() || v < floor_at(noise, common.noise_level, flat) {
                return (0, None);
            }
            let coords: Vec<f64> = work
                .geom
                .coords_of(flat)
                .into_iter()
                .map(|c| c as f64)
                .collect();

            let mut contributions: Vec<(u32, f64)> = Vec::new();
            let mut total = 0.0;
            'models: for (index, model) in models.iter().enumerate() {
                for axis in 0..coords.len() {
                    if (coords[axis] - model.center[axis]).abs()
                        > EVAL_SIGMAS * model.sigma[axis]
                    {
                        continue 'models;
                    }
                }
                let contribution = model.profile_at(&coords);
                if contribution > 1e-12 {
                    contributions.push((index as u32 + 1, contribution));
                    total += contribution;
                }
            }
            if contributions.is_empty() || total <= 0.0 {
                return (0, None);
            }

            // Dominant component wins the ownership map (smaller id on ties).
            let &(owner, _) = contributions
                .iter()
                .max_by(|(ida, ca), (idb, cb)| {
                    ca.partial_cmp(cb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(idb.cmp(ida))
                })
                .unwrap_or(&contributions[0]);

            let mut weights: Vec<(u32, f64)> = contributions
                .iter()
                .map(|&(id, c)| (id, c / total))
                .filter(|&(_, w)| w >= FRACTION_CUTOFF)
                .collect();
            if weights.len() < 2 {
                return (owner, None);
            }
            weights.sort_by(|(ida, wa), (idb, wb)| {
                wb.partial_cmp(wa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(ida.cmp(idb))
            });
            (owner, Some(weights))
        })
        .collect();

    let mut assignment = vec![0u32; len];
    let mut fractions = Vec::new();
    for (flat, (owner, weights)) in per_pixel.into_iter().enumerate() {
        assignment[flat] = owner;
        if let Some(weights) = weights {
            fractions.push(PixelFraction {
                index: flat,
                weights,
            });
        }
    }
    (assignment, fractions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Geometry, Grid};
    use approx::assert_relative_eq;
    use ndarray::{ArrayD, IxDyn};

    fn gaussian_grid_2d(
        shape: (usize, usize),
        bumps: &[(f64, f64, f64, f64)], // (row, col, amplitude, sigma)
    ) -> WorkGrid {
        let mut data = vec![0.0; shape.0 * shape.1];
        let geom = Geometry::new(&[shape.0, shape.1]);
        for flat in 0..data.len() {
            let coords = geom.coords_of(flat);
            for &(row, col, amplitude, sigma) in bumps {
                let dr = coords[0] as f64 - row;
                let dc = coords[1] as f64 - col;
                data[flat] += amplitude * (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp();
            }
        }
        let array = ArrayD::from_shape_vec(IxDyn(&[shape.0, shape.1]), data).unwrap();
        WorkGrid::from_grid(&Grid::new(array))
    }

    fn quiet_config() -> (GaussClumpsConfig, ExtractConfig) {
        (
            GaussClumpsConfig::default(),
            ExtractConfig {
                noise_level: 3.0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_lm_recovers_clean_gaussian() {
        let truth = GaussianModel {
            amplitude: 8.0,
            center: vec![5.3, 6.7],
            sigma: vec![1.8, 2.2],
            background: 0.5,
        };
        let mut samples = Vec::new();
        for row in 0..12 {
            for col in 0..12 {
                let coords = vec![row as f64, col as f64];
                let value = truth.value_at(&coords);
                samples.push((coords, value));
            }
        }
        // Seed deliberately off-truth.
        let seed = GaussianModel {
            amplitude: 5.0,
            center: vec![5.0, 7.0],
            sigma: vec![2.0, 2.0],
            background: 0.0,
        };
        let fitted = levenberg_marquardt(&samples, seed, &GaussClumpsConfig::default())
            .expect("clean data must fit");
        assert_relative_eq!(fitted.amplitude, truth.amplitude, epsilon = 1e-3);
        assert_relative_eq!(fitted.center[0], truth.center[0], epsilon = 1e-3);
        assert_relative_eq!(fitted.center[1], truth.center[1], epsilon = 1e-3);
        assert_relative_eq!(fitted.sigma[0], truth.sigma[0], epsilon = 1e-3);
        assert_relative_eq!(fitted.sigma[1], truth.sigma[1], epsilon = 1e-3);
        assert_relative_eq!(fitted.background, truth.background, epsilon = 1e-3);
    }

    #[test]
    fn test_single_bump_single_component() {
        let work = gaussian_grid_2d((24, 24), &[(12.0, 12.0, 10.0, 2.0)]);
        let (config, common) = quiet_config();
        let raw = run(&work, &NoiseField::Scalar(0.05), &config, &common);
        assert_eq!(raw.models.len(), 1);
        let model = &raw.models[0];
        assert_relative_eq!(model.center[0], 12.0, epsilon = 0.5);
        assert_relative_eq!(model.center[1], 12.0, epsilon = 0.5);
        assert_relative_eq!(model.sigma[0], 2.0, epsilon = 0.1);
        // The peak pixel belongs to the component.
        let peak = work.geom.flat_of(&[12, 12]);
        assert_eq!(raw.assignment[peak], 1);
    }

    #[test]
    fn test_two_bumps_two_components() {
        let work = gaussian_grid_2d((32, 32), &[(8.0, 8.0, 10.0, 2.0), (24.0, 24.0, 10.0, 2.0)]);
        let (config, common) = quiet_config();
        let raw = run(&work, &NoiseField::Scalar(0.05), &config, &common);
        assert_eq!(raw.models.len(), 2);
        for model in &raw.models {
            let on_first = (model.center[0] - 8.0).abs() < 1.0;
            let on_second = (model.center[0] - 24.0).abs() < 1.0;
            assert!(on_first || on_second, "center off both bumps: {model:?}");
            assert_relative_eq!(model.sigma[0], 2.0, epsilon = 0.1);
        }
    }

    #[test]
    fn test_residual_decreases() {
        let work = gaussian_grid_2d((24, 24), &[(12.0, 12.0, 10.0, 2.0)]);
        let (config, common) = quiet_config();
        let noise = NoiseField::Scalar(0.05);
        let mut decomposer = Decomposer::new(&work, &noise, &config, &common);
        let before: f64 = decomposer.residual.iter().map(|v| v * v).sum();
        assert!(decomposer.next_component().is_some());
        let after: f64 = decomposer.residual.iter().map(|v| v * v).sum();
        assert!(after < before);
    }

    #[test]
    fn test_component_cap_warns_when_signal_remains() {
        let work = gaussian_grid_2d((32, 32), &[(8.0, 8.0, 10.0, 2.0), (24.0, 24.0, 10.0, 2.0)]);
        let (config, mut common) = quiet_config();
        common.max_clumps = Some(1);
        let raw = run(&work, &NoiseField::Scalar(0.05), &config, &common);
        assert_eq!(raw.models.len(), 1);
        assert!(raw
            .warnings
            .iter()
            .any(|w| matches!(w, CatalogWarning::IterationLimitExceeded { .. })));
    }

    #[test]
    fn test_flat_grid_yields_nothing() {
        let data = ArrayD::from_elem(IxDyn(&[16, 16]), 0.5);
        let work = WorkGrid::from_grid(&Grid::new(data));
        let (config, common) = quiet_config();
        let raw = run(&work, &NoiseField::Scalar(1.0), &config, &common);
        assert!(raw.models.is_empty());
        assert!(raw.assignment.iter().all(|&id| id == 0));
    }

    #[test]
    fn test_overlapping_models_record_fractions() {
        // Two components eight pixels apart share their midline pixels.
        let work = gaussian_grid_2d((20, 20), &[(10.0, 6.0, 10.0, 2.0), (10.0, 14.0, 10.0, 2.0)]);
        let (_, common) = quiet_config();
        let models = vec![
            GaussianModel {
                amplitude: 10.0,
                center: vec![10.0, 6.0],
                sigma: vec![2.0, 2.0],
                background: 0.0,
            },
            GaussianModel {
                amplitude: 10.0,
                center: vec![10.0, 14.0],
                sigma: vec![2.0, 2.0],
                background: 0.0,
            },
        ];
        let (assignment, fractions) =
            attribute_ownership(&work, &NoiseField::Scalar(0.05), &common, &models);

        // Each peak belongs to its own component.
        assert_eq!(assignment[work.geom.flat_of(&[10, 6])], 1);
        assert_eq!(assignment[work.geom.flat_of(&[10, 14])], 2);

        // The equidistant midline pixel is shared half-and-half; the tie in
        // dominance goes to the smaller id.
        let midline = work.geom.flat_of(&[10, 10]);
        assert_eq!(assignment[midline], 1);
        let fraction = fractions
            .iter()
            .find(|f| f.index == midline)
            .expect("midline pixel must carry fractional weights");
        assert_eq!(fraction.weights.len(), 2);
        for &(_, weight) in &fraction.weights {
            assert_relative_eq!(weight, 0.5, epsilon = 1e-9);
        }
        let total: f64 = fraction.weights.iter().map(|(_, w)| w).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }
}
